//! Facade crate: wires a `StateStore`, `EventBus`,
//! `Fs`, and the adapter factories into one `Orchestrator`, and owns the
//! handful of embedding-application concerns the core crates deliberately
//! stay silent on (installing a `tracing` subscriber, driving startup
//! recovery, waiting for shutdown).
//!
//! Library crates upstream of this one only ever call `tracing::*`
//! macros; this is the one place in the workspace allowed to install a
//! subscriber, on the convention that `tracing` initialization belongs
//! to the binary/embedding application, not a library.

use std::sync::Arc;

use streamctl_adapters::{EventBus, Fs, StartSessionEvent, StopSessionEvent};
use streamctl_orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorDeps};
use streamctl_store::{StateStore, StoreError};
use streamctl_types::SessionId;

/// Thin wrapper around `Arc<Orchestrator<S, B, F>>` exposing the
/// embedding-application lifecycle: recover, spawn, submit events, shut
/// down.
pub struct Runtime<S: StateStore, B: EventBus, F: Fs> {
    orchestrator: Arc<Orchestrator<S, B, F>>,
}

impl<S, B, F> Runtime<S, B, F>
where
    S: StateStore + 'static,
    B: EventBus + 'static,
    F: Fs + 'static,
{
    pub fn new(deps: OrchestratorDeps<S, B, F>, config: OrchestratorConfig) -> Self {
        Self { orchestrator: Orchestrator::new(deps, config) }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<S, B, F>> {
        &self.orchestrator
    }

    /// Startup recovery followed by spawning the intake and
    /// sweeper tasks. A recovery-sweep failure is fatal — callers should
    /// propagate the error and abort startup rather than serve against
    /// stale lease state.
    pub fn recover_and_spawn(&self) -> Result<Vec<SessionId>, StoreError> {
        let reset = self.orchestrator.recover()?;
        self.orchestrator.spawn();
        Ok(reset)
    }

    /// Publishes a `StartSessionEvent` on the orchestrator's bus. The
    /// intake path that constructs `session_id` is responsible for
    /// `SessionId::parse` and `CorrelationId` generation; this crate
    /// never invents either.
    pub async fn submit_start(&self, event: StartSessionEvent) {
        self.orchestrator.bus().publish_start(event).await;
    }

    /// Publishes a `StopSessionEvent` on the orchestrator's bus.
    pub async fn submit_stop(&self, event: StopSessionEvent) {
        self.orchestrator.bus().publish_stop(event).await;
    }

    /// Cancels every in-flight session and awaits the intake/sweeper tasks
    /// up to `grace`; the configured `stop_grace`/`stop_kill` window is the
    /// per-session analogue already enforced inside the orchestrator.
    pub async fn shutdown(&self, grace: std::time::Duration) {
        self.orchestrator.shutdown(grace).await;
    }
}

/// A fresh `CorrelationId` for a new start/stop event pair.
pub fn new_correlation_id() -> streamctl_types::CorrelationId {
    uuid::Uuid::new_v4().to_string()
}

/// Installs a `tracing-subscriber` `fmt` layer honoring `RUST_LOG`. Call
/// once, from the outermost binary/demo entry point.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
