//! The single deferred finalization block: one seam every
//! exit path from the start handler funnels through, responsible for the
//! terminal state write, VOD artifact publish, cleanup, lease release, and
//! the `session_end` metric.

use chrono::Utc;
use streamctl_adapters::{EventBus, Fs};
use streamctl_metrics::Recorder;
use streamctl_store::StateStore;
use streamctl_types::{Event, LeaseKey, Mode, ReasonCode, ReasonError, SessionRecord, SessionState};
use tracing::{info, warn};

use crate::Orchestrator;

/// Every way a start handler can conclude. `DedupBusy` is the distinguished
/// sentinel: it alone bypasses every other step in
/// this module.
pub enum FinalOutcome {
    DedupBusy,
    Cancelled,
    VodCompleted,
    Error(ReasonError),
}

/// What the finalize closure should do to reach a terminal state, chosen
/// from the session's *current* fsm state rather than a fixed event per
/// outcome — `Starting`/`Priming`/`Draining` only accept `Fail`, while
/// `Ready`/`Stopping` only accept `FinalizeFailed`/`FinalizeStopped`, and a
/// session that never left `New` has no legal failing edge at all.
enum FinalizeAction {
    Apply(Event),
    ForceFailed,
}

fn finalize_action(outcome: &FinalOutcome, state: SessionState) -> FinalizeAction {
    match outcome {
        FinalOutcome::VodCompleted => FinalizeAction::Apply(Event::PublishComplete),
        FinalOutcome::Cancelled => FinalizeAction::Apply(Event::FinalizeStopped),
        FinalOutcome::Error(_) => match state {
            SessionState::New => FinalizeAction::ForceFailed,
            SessionState::Starting | SessionState::Priming | SessionState::Draining => {
                FinalizeAction::Apply(Event::Fail)
            }
            _ => FinalizeAction::Apply(Event::FinalizeFailed),
        },
        FinalOutcome::DedupBusy => unreachable!("handled above"),
    }
}

impl<S, B, F> Orchestrator<S, B, F>
where
    S: StateStore + 'static,
    B: EventBus + 'static,
    F: Fs + 'static,
{
    pub(crate) async fn finalize(&self, record: &mut SessionRecord, outcome: FinalOutcome, mode: Mode) {
        if matches!(&outcome, FinalOutcome::DedupBusy) {
            // The replay loser gets zero side effects: no state write, no
            // cleanup, no release.
            return;
        }

        let session_id = record.id.clone();
        let now = Utc::now();

        let reason = match &outcome {
            FinalOutcome::Cancelled => ReasonError::client_stop(),
            FinalOutcome::Error(err) => ReasonError::new(err.code, err.detail.clone()),
            FinalOutcome::VodCompleted => ReasonError::new(ReasonCode::None, String::new()),
            FinalOutcome::DedupBusy => unreachable!("handled above"),
        };

        let persisted = self.store.update_session(&session_id, &mut |r| {
            if r.state.is_terminal() {
                // Already force-set terminal by a concurrent path (e.g. the
                // heartbeat's lease-loss force-write) — no-op here, since
                // terminal states never transition again.
                return Ok(());
            }
            let from = r.state;
            match finalize_action(&outcome, from) {
                FinalizeAction::Apply(event) => {
                    if r.apply(event, now) {
                        // `Cancelled` sessions already carry their reason from
                        // the stop handler that requested this finalize; don't
                        // clobber it with the generic client-stop detail.
                        if matches!(&outcome, FinalOutcome::Error(_)) {
                            r.set_terminal(reason.code, reason.detail.clone());
                        }
                        r.touch_access(now);
                        self.recorder.fsm_transition(from, r.state, mode);
                    } else {
                        warn!(from = ?from, event = ?event, "finalize event rejected by fsm, session left as-is");
                    }
                }
                FinalizeAction::ForceFailed => {
                    // No FSM edge fails a session that never left `New` (e.g.
                    // tuner exhaustion before the Starting transition) —
                    // force the terminal state directly, the same bypass the
                    // heartbeat's lease-loss path already uses.
                    r.state = SessionState::Failed;
                    r.set_terminal(reason.code, reason.detail.clone());
                    r.touch_access(now);
                    self.recorder.fsm_transition(from, r.state, mode);
                }
            }
            Ok(())
        });

        match persisted {
            Ok(updated) => *record = updated,
            Err(err) => {
                warn!(error = %err, "finalize: failed to persist terminal state");
            }
        }

        if matches!(&outcome, FinalOutcome::VodCompleted) {
            self.publish_vod_artifact(record).await;
        }

        let keep_artifacts = matches!(record.state, SessionState::Succeeded) && matches!(&outcome, FinalOutcome::VodCompleted);
        if !keep_artifacts {
            let session_dir = self.config.session_dir(session_id.as_str());
            let _ = self.fs.remove_dir_all(&session_dir).await;
        }

        self.force_release_leases(record, mode).await;

        info!(session_id = %session_id, state = ?record.state, reason = %reason.code, "session finalized");
        self.recorder.session_end(reason.code, &record.profile, mode);
    }

    /// Moves the completed recording's manifest and segments out of the
    /// working session directory into the durable recordings cache, file
    /// by file since `Fs::rename` operates on individual paths.
    async fn publish_vod_artifact(&self, record: &SessionRecord) {
        let Some(cache_key) = record.context.source() else {
            warn!("vod session completed with no cache key, skipping publish");
            return;
        };
        let session_dir = self.config.session_dir(record.id.as_str());
        let dest_dir = self.config.hls_root.join("recordings").join(cache_key);

        let entries = match self.fs.read_dir_entries(&session_dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "vod publish: failed to list session dir");
                return;
            }
        };

        for entry in entries {
            let from = session_dir.join(&entry.name);
            let to = dest_dir.join(&entry.name);
            if let Err(err) = self.fs.rename(&from, &to).await {
                warn!(error = %err, file = %entry.name, "vod publish: failed to move artifact");
            }
        }
    }

    async fn force_release_leases(&self, record: &SessionRecord, mode: Mode) {
        if !mode.is_live() {
            return;
        }
        let owner = record.id.as_str();
        let _ = self.store.release_lease(&LeaseKey::service(&record.service_ref), owner);
        if let Some(slot) = record.context.tuner_slot() {
            let _ = self.store.release_lease(&LeaseKey::tuner(slot), owner);
        }
    }
}
