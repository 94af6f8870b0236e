//! The stop handler: idempotent regardless of how many times
//! `Stop` arrives or what state the session is currently in.

use chrono::Utc;
use streamctl_adapters::{EventBus, Fs, StopSessionEvent};
use streamctl_store::StateStore;
use streamctl_types::{Event, PipelineState, SessionState};
use tracing::{info, instrument, warn};

use crate::finalize::FinalOutcome;
use crate::Orchestrator;

impl<S, B, F> Orchestrator<S, B, F>
where
    S: StateStore + 'static,
    B: EventBus + 'static,
    F: Fs + 'static,
{
    #[instrument(skip(self, event), fields(session_id = %event.session_id, correlation_id = %event.correlation_id))]
    pub(crate) async fn handle_stop_event(self: std::sync::Arc<Self>, event: StopSessionEvent) {
        let StopSessionEvent { session_id, reason, .. } = event;

        let Some(mut record) = (match self.store.get_session(&session_id) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "failed to read session for stop");
                return;
            }
        }) else {
            info!("stop event for unknown session, ignoring");
            return;
        };

        if record.state.is_terminal() {
            info!(state = ?record.state, "stop event for an already-terminal session, ignoring");
            return;
        }

        let now = Utc::now();
        let was_new = record.state == SessionState::New;

        let persisted = self.store.update_session(&session_id, &mut |r| {
            if r.state.is_terminal() {
                return Ok(());
            }
            let from = r.state;
            if r.apply(Event::Stop, now) {
                r.pipeline_state = PipelineState::StopRequested;
                r.set_terminal(reason, "stop requested");
                r.touch_access(now);
                self.recorder.fsm_transition(from, r.state, r.mode());
            }
            Ok(())
        });

        match persisted {
            Ok(updated) => record = updated,
            Err(err) => {
                warn!(error = %err, "failed to persist stop transition");
                return;
            }
        }

        if was_new {
            // New -> Stopped is a direct short-circuit: there
            // is no running task to cancel, so finalize runs inline.
            let mode = record.mode();
            self.finalize(&mut record, FinalOutcome::Cancelled, mode).await;
            return;
        }

        if !self.registry.cancel(&session_id) {
            // No live task owns this session (e.g. it survived a crash as a
            // non-terminal record with no in-process handler). Finalize it
            // directly so leases and artifacts don't leak.
            warn!("stop event for a session with no active handler, finalizing directly");
            let mode = record.mode();
            self.finalize(&mut record, FinalOutcome::Cancelled, mode).await;
        }
    }
}
