//! The background sweeper: reclaims terminal session records
//! past their retention window and any orphaned session directories left
//! behind on disk, on a fixed interval.

use chrono::Utc;
use streamctl_adapters::{EventBus, Fs};
use streamctl_store::{SessionFilter, StateStore};
use streamctl_types::SessionState;
use tracing::{info, instrument, warn};

use crate::Orchestrator;

const MAX_STORE_ENTRIES: usize = 10_000;

impl<S, B, F> Orchestrator<S, B, F>
where
    S: StateStore + 'static,
    B: EventBus + 'static,
    F: Fs + 'static,
{
    pub(crate) fn spawn_sweeper(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweeper_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = self.root_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.sweep_once().await;
            }
        })
    }

    #[instrument(skip(self))]
    async fn sweep_once(&self) {
        self.sweep_orphaned_session_dirs().await;
        self.sweep_store_metadata().await;
    }

    /// Removes terminal session records older than the retention window,
    /// then caps store cardinality.
    async fn sweep_store_metadata(&self) {
        let now = Utc::now();
        match self.store.prune_metadata(now, self.config.retention(), MAX_STORE_ENTRIES) {
            Ok(pruned) if pruned > 0 => info!(pruned, "sweeper pruned stale session records"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "sweeper: prune_metadata failed"),
        }
    }

    /// Removes on-disk session directories with no corresponding store
    /// record, skipping anything modified more recently than the retention
    /// window so a session mid-creation (record not yet written) isn't
    /// swept out from under it.
    async fn sweep_orphaned_session_dirs(&self) {
        let sessions_dir = self.config.sessions_dir();
        let entries = match self.fs.read_dir_entries(&sessions_dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "sweeper: failed to list sessions dir");
                return;
            }
        };

        let known: Vec<streamctl_types::SessionId> = match self.store.list_sessions(&SessionFilter::default()) {
            Ok(records) => records.into_iter().map(|r| r.id).collect(),
            Err(err) => {
                warn!(error = %err, "sweeper: failed to list known sessions");
                return;
            }
        };

        let now = Utc::now();
        let cutoff = now - self.config.retention();

        for entry in entries {
            let Ok(id) = streamctl_types::SessionId::parse(entry.name.clone()) else {
                continue;
            };
            if known.iter().any(|k| k == &id) {
                continue;
            }
            if entry.modified > cutoff {
                continue;
            }
            let dir = self.config.session_dir(id.as_str());
            match self.fs.remove_dir_all(&dir).await {
                Ok(()) => info!(session_id = %id, "sweeper removed orphaned session directory"),
                Err(err) => warn!(error = %err, session_id = %id, "sweeper: failed to remove orphaned directory"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use streamctl_adapters::{InMemoryEventBus, MockFs, MockTunerFactory, MockTranscoderFactory, MockBehavior};
    use streamctl_metrics::NullRecorder;
    use streamctl_store::InMemoryStateStore;
    use streamctl_types::{Mode, ProfileSpec, SessionId, SessionRecord};

    fn orchestrator() -> Arc<Orchestrator<InMemoryStateStore, InMemoryEventBus, MockFs>> {
        let deps = crate::OrchestratorDeps {
            store: Arc::new(InMemoryStateStore::new()),
            bus: Arc::new(InMemoryEventBus::new(8)),
            fs: Arc::new(MockFs::new()),
            tuner_factory: Arc::new(MockTunerFactory::always_succeeds()),
            transcoder_factory: Arc::new(MockTranscoderFactory::new(MockBehavior::RunsUntilStopped)),
            recorder: Arc::new(NullRecorder),
        };
        Orchestrator::new(deps, crate::OrchestratorConfig { hls_root: "/hls".into(), ..Default::default() })
    }

    #[tokio::test]
    async fn sweep_removes_orphaned_directories_past_retention() {
        let orchestrator = orchestrator();
        let dir = orchestrator.config.session_dir("orphan1");
        orchestrator.fs.write(&dir.join("index.m3u8"), b"#EXTM3U\n").await.unwrap();
        orchestrator.fs.set_dir_modified(&dir, Utc::now() - Duration::seconds(3600));

        orchestrator.sweep_once().await;

        assert!(!orchestrator.fs.session_dir_exists(&dir));
    }

    #[tokio::test]
    async fn sweep_leaves_young_orphans_alone() {
        let orchestrator = orchestrator();
        let dir = orchestrator.config.session_dir("orphan2");
        orchestrator.fs.write(&dir.join("index.m3u8"), b"#EXTM3U\n").await.unwrap();
        orchestrator.fs.set_dir_modified(&dir, Utc::now());

        orchestrator.sweep_once().await;

        assert!(orchestrator.fs.session_dir_exists(&dir));
    }

    #[tokio::test]
    async fn sweep_prunes_stale_terminal_session_records() {
        let orchestrator = orchestrator();
        let mut record = SessionRecord::new(SessionId::parse("s1").unwrap(), "bbc1", ProfileSpec::Default, Mode::Live);
        record.state = SessionState::Stopped;
        record.updated_at_unix = (Utc::now() - Duration::seconds(10_000)).timestamp();
        orchestrator.store.put_session(record).unwrap();

        orchestrator.sweep_once().await;

        assert!(orchestrator.store.get_session(&SessionId::parse("s1").unwrap()).unwrap().is_none());
    }
}
