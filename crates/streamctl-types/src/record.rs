//! `SessionRecord`: the durable record the orchestrator and the
//! store mutate through `UpdateSession`'s atomic read-modify-write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ContextData;
use crate::fsm::{PipelineState, SessionState};
use crate::id::SessionId;
use crate::profile::ProfileSpec;
use crate::reason::ReasonCode;

/// LIVE or RECORDING.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Live,
    Recording,
}

impl Mode {
    pub fn as_label(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Recording => "recording",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Mode::Live)
    }
}

/// The durable per-session record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub service_ref: String,
    pub profile: ProfileSpec,
    pub state: SessionState,
    pub pipeline_state: PipelineState,
    pub reason: ReasonCode,
    pub reason_detail: String,
    pub context: ContextData,
    pub correlation_id: String,
    pub updated_at_unix: i64,
    pub last_access_unix: i64,
    /// Monotonic counter bumped on every mutation.
    pub state_gen: u64,
}

impl SessionRecord {
    /// Constructs a brand-new record in state `New`.
    pub fn new(id: SessionId, service_ref: impl Into<String>, profile: ProfileSpec, mode: Mode) -> Self {
        let now = Utc::now().timestamp();
        let mut context = ContextData::new();
        context.set_mode(mode.as_label());
        Self {
            id,
            service_ref: service_ref.into(),
            profile,
            state: SessionState::New,
            pipeline_state: PipelineState::None,
            reason: ReasonCode::None,
            reason_detail: String::new(),
            context,
            correlation_id: String::new(),
            updated_at_unix: now,
            last_access_unix: now,
            state_gen: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        match self.context.mode() {
            Some("recording") => Mode::Recording,
            _ => Mode::Live,
        }
    }

    /// Applies one FSM transition in place, bumping `state_gen` and
    /// `updated_at_unix` iff the transition is legal.
    pub fn apply(&mut self, event: crate::fsm::Event, now: DateTime<Utc>) -> bool {
        match crate::fsm::transition(self.state, event, self.mode()) {
            crate::fsm::TransitionOutcome::Transitioned(next) => {
                self.state = next;
                self.state_gen += 1;
                self.updated_at_unix = now.timestamp();
                true
            }
            crate::fsm::TransitionOutcome::Rejected => false,
        }
    }

    pub fn set_terminal(&mut self, reason: ReasonCode, detail: impl Into<String>) {
        self.reason = reason;
        self.reason_detail = detail.into();
    }

    pub fn touch_access(&mut self, now: DateTime<Utc>) {
        self.last_access_unix = now.timestamp();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_in_new_state_with_gen_zero() {
        let id = SessionId::parse("s1").unwrap();
        let record = SessionRecord::new(id, "bbc1", ProfileSpec::Default, Mode::Live);
        assert_eq!(record.state, SessionState::New);
        assert_eq!(record.state_gen, 0);
        assert_eq!(record.mode(), Mode::Live);
    }

    #[test]
    fn recording_mode_round_trips_through_context() {
        let id = SessionId::parse("s1").unwrap();
        let record = SessionRecord::new(id, "bbc1", ProfileSpec::Default, Mode::Recording);
        assert_eq!(record.mode(), Mode::Recording);
    }
}
