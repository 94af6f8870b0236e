//! The session FSM: a pure function from `(state, event, mode)`
//! to an outcome. No I/O, no side effects — `SessionRecord::apply` is the
//! only caller that actually mutates anything.

use serde::{Deserialize, Serialize};

use crate::record::Mode;

/// Session lifecycle state. `Stopped`, `Failed`, and `Succeeded`
/// are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    New,
    Starting,
    Priming,
    Ready,
    Stopping,
    Draining,
    Stopped,
    Failed,
    Succeeded,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed | SessionState::Succeeded)
    }
}

/// Pipeline lifecycle tag, orthogonal to `SessionState`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    #[default]
    None,
    StopRequested,
    Stopped,
    Fail,
}

/// Events the FSM understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Start,
    TuneOk,
    Fail,
    PlaylistReady,
    /// VOD transcoder process exited cleanly, artifact pending publish.
    ProcessOk,
    /// VOD artifact has been published: `Draining -> Succeeded`.
    PublishComplete,
    /// A stop was requested.
    Stop,
    FinalizeStopped,
    FinalizeFailed,
}

/// The result of attempting one transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    Transitioned(SessionState),
    /// The `(state, event)` pair has no legal transition; the
    /// FSM returns the input state unchanged (callers simply don't apply a
    /// new state when they see this).
    Rejected,
}

/// The pure transition function.
pub fn transition(state: SessionState, event: Event, mode: Mode) -> TransitionOutcome {
    use Event::*;
    use SessionState::*;
    use TransitionOutcome::*;

    match (state, event) {
        (New, Start) => Transitioned(Starting),
        // New -> Stop short-circuits straight to Stopped.
        (New, Stop) => Transitioned(Stopped),

        (Starting, TuneOk) => Transitioned(Priming),
        (Starting, Fail) => Transitioned(Failed),

        (Priming, PlaylistReady) => Transitioned(Ready),
        (Priming, Fail) => Transitioned(Failed),
        (Priming, ProcessOk) if matches!(mode, Mode::Recording) => Transitioned(Draining),

        (Draining, PublishComplete) => Transitioned(Succeeded),
        (Draining, Fail) => Transitioned(Failed),

        (Ready, FinalizeStopped) => Transitioned(Stopped),
        (Ready, FinalizeFailed) => Transitioned(Failed),

        (Stopping, FinalizeStopped) => Transitioned(Stopped),
        (Stopping, FinalizeFailed) => Transitioned(Failed),

        // Any non-terminal state accepts Stop, transitioning to Stopping
        //, except New which is
        // handled above as a short-circuit.
        (s, Stop) if !s.is_terminal() && !matches!(s, New) => Transitioned(Stopping),

        _ => Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_live_session() {
        let mode = Mode::Live;
        assert_eq!(transition(SessionState::New, Event::Start, mode), TransitionOutcome::Transitioned(SessionState::Starting));
        assert_eq!(transition(SessionState::Starting, Event::TuneOk, mode), TransitionOutcome::Transitioned(SessionState::Priming));
        assert_eq!(transition(SessionState::Priming, Event::PlaylistReady, mode), TransitionOutcome::Transitioned(SessionState::Ready));
        assert_eq!(transition(SessionState::Ready, Event::FinalizeStopped, mode), TransitionOutcome::Transitioned(SessionState::Stopped));
    }

    #[test]
    fn vod_completion_goes_through_draining() {
        let mode = Mode::Recording;
        assert_eq!(transition(SessionState::Priming, Event::ProcessOk, mode), TransitionOutcome::Transitioned(SessionState::Draining));
        assert_eq!(transition(SessionState::Draining, Event::PublishComplete, mode), TransitionOutcome::Transitioned(SessionState::Succeeded));
    }

    #[test]
    fn process_ok_is_illegal_for_live_sessions() {
        let outcome = transition(SessionState::Priming, Event::ProcessOk, Mode::Live);
        assert_eq!(outcome, TransitionOutcome::Rejected);
    }

    #[test]
    fn new_stop_short_circuits_to_stopped() {
        let outcome = transition(SessionState::New, Event::Stop, Mode::Live);
        assert_eq!(outcome, TransitionOutcome::Transitioned(SessionState::Stopped));
    }

    #[test]
    fn any_non_terminal_state_accepts_stop() {
        for state in [SessionState::Starting, SessionState::Priming, SessionState::Ready, SessionState::Draining] {
            let outcome = transition(state, Event::Stop, Mode::Live);
            assert_eq!(outcome, TransitionOutcome::Transitioned(SessionState::Stopping));
        }
    }

    #[test]
    fn terminal_states_never_transition() {
        for state in [SessionState::Stopped, SessionState::Failed, SessionState::Succeeded] {
            for event in [
                Event::Start,
                Event::TuneOk,
                Event::Fail,
                Event::PlaylistReady,
                Event::ProcessOk,
                Event::PublishComplete,
                Event::Stop,
                Event::FinalizeStopped,
                Event::FinalizeFailed,
            ] {
                assert_eq!(
                    transition(state, event, Mode::Live),
                    TransitionOutcome::Rejected,
                    "terminal state {state:?} must reject event {event:?}"
                );
            }
        }
    }

    /// FSM closure law: every `(state, event)` pair not in the
    /// legal table returns `Rejected` (i.e. the input state, unchanged).
    #[test]
    fn closure_law_over_every_state_event_pair() {
        let states = [
            SessionState::New,
            SessionState::Starting,
            SessionState::Priming,
            SessionState::Ready,
            SessionState::Stopping,
            SessionState::Draining,
            SessionState::Stopped,
            SessionState::Failed,
            SessionState::Succeeded,
        ];
        let events = [
            Event::Start,
            Event::TuneOk,
            Event::Fail,
            Event::PlaylistReady,
            Event::ProcessOk,
            Event::PublishComplete,
            Event::Stop,
            Event::FinalizeStopped,
            Event::FinalizeFailed,
        ];
        // `None` means the row is legal under either mode (the vast
        // majority of transitions are mode-independent); `Some(mode)` scopes
        // a row to the one mode it actually applies to, e.g. `ProcessOk` only
        // drives `Priming -> Draining` for `Recording`.
        let legal: &[(SessionState, Event, Option<Mode>)] = &[
            (SessionState::New, Event::Start, None),
            (SessionState::New, Event::Stop, None),
            (SessionState::Starting, Event::TuneOk, None),
            (SessionState::Starting, Event::Fail, None),
            (SessionState::Priming, Event::PlaylistReady, None),
            (SessionState::Priming, Event::Fail, None),
            (SessionState::Priming, Event::ProcessOk, Some(Mode::Recording)),
            (SessionState::Draining, Event::PublishComplete, None),
            (SessionState::Draining, Event::Fail, None),
            (SessionState::Ready, Event::FinalizeStopped, None),
            (SessionState::Ready, Event::FinalizeFailed, None),
            (SessionState::Stopping, Event::FinalizeStopped, None),
            (SessionState::Stopping, Event::FinalizeFailed, None),
        ];
        for mode in [Mode::Live, Mode::Recording] {
            for &state in &states {
                for &event in &events {
                    let is_legal_here = legal.iter().any(|&(s, e, scope)| {
                        s == state && e == event && match scope {
                            None => true,
                            Some(m) => m == mode,
                        }
                    }) || (!state.is_terminal() && event == Event::Stop && state != SessionState::New);
                    let outcome = transition(state, event, mode);
                    if is_legal_here {
                        assert!(matches!(outcome, TransitionOutcome::Transitioned(_)));
                    } else {
                        assert_eq!(outcome, TransitionOutcome::Rejected, "expected reject for {state:?}/{event:?}/{mode:?}");
                    }
                }
            }
        }
    }
}
