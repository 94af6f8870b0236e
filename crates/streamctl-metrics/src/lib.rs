//! Observability surface. The scraping endpoint is out of
//! scope; the counters and histograms themselves are core behavior this
//! crate provides behind a `Recorder` trait.
//!
//! `tracing`/`tracing-subscriber` are the only observability dependencies
//! in this workspace and there is no dedicated metrics crate, so
//! `TracingRecorder` emits each metric as a structured `tracing::event!`
//! rather than reaching for an unrelated dependency just to tick counters.
//! `InMemoryRecorder` gives tests something to assert against without a
//! collector.

use std::sync::Mutex;

use streamctl_types::{Mode, ProfileSpec, ReasonCode, SessionState};
use tracing::info;

/// Outcome of a start attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StartResult {
    Success,
    Busy,
    Cancel,
    Fail,
}

impl StartResult {
    pub fn as_label(&self) -> &'static str {
        match self {
            StartResult::Success => "success",
            StartResult::Busy => "busy",
            StartResult::Cancel => "cancel",
            StartResult::Fail => "fail",
        }
    }
}

/// Outcome of the playlist-readiness gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadyOutcome {
    Ready,
    RepairRetry,
    UpstreamCorrupt,
    PackagerFailed,
}

impl ReadyOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            ReadyOutcome::Ready => "ready",
            ReadyOutcome::RepairRetry => "repair_retry",
            ReadyOutcome::UpstreamCorrupt => "upstream_corrupt",
            ReadyOutcome::PackagerFailed => "packager_failed",
        }
    }
}

/// The metrics surface every orchestrator and build-monitor call site emits
/// through. Implementations must be cheap enough to call from
/// hot paths without awaiting.
pub trait Recorder: Send + Sync {
    fn session_start(&self, result: StartResult, reason: ReasonCode, profile: &ProfileSpec, mode: Mode);
    fn session_end(&self, reason: ReasonCode, profile: &ProfileSpec, mode: Mode);
    fn ready_duration(&self, outcome: ReadyOutcome, mode: Mode, seconds: f64);
    fn ready_outcome(&self, outcome: ReadyOutcome, mode: Mode);
    fn tuner_busy(&self, mode: Mode);
    fn fsm_transition(&self, from: SessionState, to: SessionState, mode: Mode);
    fn lease_lost(&self, mode: Mode);
    fn ttfp(&self, profile: &ProfileSpec, mode: Mode, seconds: f64);
}

/// Default recorder: every metric emission is also a structured tracing
/// event so existing log pipelines pick it up without a dedicated exporter.
#[derive(Default)]
pub struct TracingRecorder;

impl Recorder for TracingRecorder {
    fn session_start(&self, result: StartResult, reason: ReasonCode, profile: &ProfileSpec, mode: Mode) {
        info!(
            metric = "session_start_total",
            result = result.as_label(),
            reason = reason.as_label(),
            profile = profile.as_label(),
            mode = mode.as_label(),
        );
    }

    fn session_end(&self, reason: ReasonCode, profile: &ProfileSpec, mode: Mode) {
        info!(
            metric = "session_end_total",
            reason = reason.as_label(),
            profile = profile.as_label(),
            mode = mode.as_label(),
        );
    }

    fn ready_duration(&self, outcome: ReadyOutcome, mode: Mode, seconds: f64) {
        info!(
            metric = "ready_duration_seconds",
            outcome = outcome.as_label(),
            mode = mode.as_label(),
            seconds,
        );
    }

    fn ready_outcome(&self, outcome: ReadyOutcome, mode: Mode) {
        info!(
            metric = "ready_outcome_total",
            outcome = outcome.as_label(),
            mode = mode.as_label(),
        );
    }

    fn tuner_busy(&self, mode: Mode) {
        info!(metric = "tuner_busy_total", mode = mode.as_label());
    }

    fn fsm_transition(&self, from: SessionState, to: SessionState, mode: Mode) {
        info!(
            metric = "fsm_transitions_total",
            state_from = ?from,
            state_to = ?to,
            mode = mode.as_label(),
        );
    }

    fn lease_lost(&self, mode: Mode) {
        info!(metric = "lease_lost_total", mode = mode.as_label());
    }

    fn ttfp(&self, profile: &ProfileSpec, mode: Mode, seconds: f64) {
        info!(
            metric = "ttfp_seconds",
            profile = profile.as_label(),
            mode = mode.as_label(),
            seconds,
        );
    }
}

/// One recorded metric emission, as captured by `InMemoryRecorder`.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedMetric {
    SessionStart { result: StartResult, reason: ReasonCode, profile: String, mode: Mode },
    SessionEnd { reason: ReasonCode, profile: String, mode: Mode },
    ReadyDuration { outcome: ReadyOutcome, mode: Mode, seconds: f64 },
    ReadyOutcome_ { outcome: ReadyOutcome, mode: Mode },
    TunerBusy { mode: Mode },
    FsmTransition { from: SessionState, to: SessionState, mode: Mode },
    LeaseLost { mode: Mode },
    Ttfp { profile: String, mode: Mode, seconds: f64 },
}

/// Test recorder: keeps every emission in order so assertions can check both
/// counts and label values.
#[derive(Default)]
pub struct InMemoryRecorder {
    events: Mutex<Vec<RecordedMetric>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedMetric> {
        self.events.lock().expect("recorder mutex poisoned").clone()
    }

    pub fn count_matching(&self, predicate: impl Fn(&RecordedMetric) -> bool) -> usize {
        self.events.lock().expect("recorder mutex poisoned").iter().filter(|m| predicate(m)).count()
    }

    fn push(&self, metric: RecordedMetric) {
        self.events.lock().expect("recorder mutex poisoned").push(metric);
    }
}

impl Recorder for InMemoryRecorder {
    fn session_start(&self, result: StartResult, reason: ReasonCode, profile: &ProfileSpec, mode: Mode) {
        self.push(RecordedMetric::SessionStart {
            result,
            reason,
            profile: profile.as_label().to_string(),
            mode,
        });
    }

    fn session_end(&self, reason: ReasonCode, profile: &ProfileSpec, mode: Mode) {
        self.push(RecordedMetric::SessionEnd {
            reason,
            profile: profile.as_label().to_string(),
            mode,
        });
    }

    fn ready_duration(&self, outcome: ReadyOutcome, mode: Mode, seconds: f64) {
        self.push(RecordedMetric::ReadyDuration { outcome, mode, seconds });
    }

    fn ready_outcome(&self, outcome: ReadyOutcome, mode: Mode) {
        self.push(RecordedMetric::ReadyOutcome_ { outcome, mode });
    }

    fn tuner_busy(&self, mode: Mode) {
        self.push(RecordedMetric::TunerBusy { mode });
    }

    fn fsm_transition(&self, from: SessionState, to: SessionState, mode: Mode) {
        self.push(RecordedMetric::FsmTransition { from, to, mode });
    }

    fn lease_lost(&self, mode: Mode) {
        self.push(RecordedMetric::LeaseLost { mode });
    }

    fn ttfp(&self, profile: &ProfileSpec, mode: Mode, seconds: f64) {
        self.push(RecordedMetric::Ttfp {
            profile: profile.as_label().to_string(),
            mode,
            seconds,
        });
    }
}

/// A no-op recorder for call sites that don't want to pay for a real one
/// (e.g. unit tests of unrelated logic).
#[derive(Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn session_start(&self, _: StartResult, _: ReasonCode, _: &ProfileSpec, _: Mode) {}
    fn session_end(&self, _: ReasonCode, _: &ProfileSpec, _: Mode) {}
    fn ready_duration(&self, _: ReadyOutcome, _: Mode, _: f64) {}
    fn ready_outcome(&self, _: ReadyOutcome, _: Mode) {}
    fn tuner_busy(&self, _: Mode) {}
    fn fsm_transition(&self, _: SessionState, _: SessionState, _: Mode) {}
    fn lease_lost(&self, _: Mode) {}
    fn ttfp(&self, _: &ProfileSpec, _: Mode, _: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_recorder_captures_session_start_with_labels() {
        let recorder = InMemoryRecorder::new();
        recorder.session_start(StartResult::Busy, ReasonCode::LeaseBusy, &ProfileSpec::Default, Mode::Live);
        let events = recorder.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RecordedMetric::SessionStart { result, reason, mode, .. } => {
                assert_eq!(*result, StartResult::Busy);
                assert_eq!(*reason, ReasonCode::LeaseBusy);
                assert_eq!(*mode, Mode::Live);
            }
            other => panic!("unexpected metric: {other:?}"),
        }
    }

    #[test]
    fn count_matching_filters_by_predicate() {
        let recorder = InMemoryRecorder::new();
        recorder.fsm_transition(SessionState::New, SessionState::Starting, Mode::Live);
        recorder.fsm_transition(SessionState::Starting, SessionState::Priming, Mode::Live);
        recorder.lease_lost(Mode::Live);
        let transitions = recorder.count_matching(|m| matches!(m, RecordedMetric::FsmTransition { .. }));
        assert_eq!(transitions, 2);
    }

    #[test]
    fn null_recorder_accepts_every_call_without_panicking() {
        let recorder = NullRecorder;
        recorder.session_start(StartResult::Success, ReasonCode::None, &ProfileSpec::Default, Mode::Live);
        recorder.ttfp(&ProfileSpec::Default, Mode::Live, 1.2);
    }
}
