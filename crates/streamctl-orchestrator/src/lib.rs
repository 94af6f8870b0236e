//! The Session Orchestrator: the event-driven FSM that
//! supervises each live or recording session from intake through process
//! lifecycle to terminal finalization, with at-most-one-writer guarantees
//! (leases) and crash-safe recovery.
//!
//! One object owns an event source, a reducer (here: the FSM in
//! `streamctl_types::fsm`), and a step function, with a runner driving it,
//! generalized from a single deterministic run loop to one `tokio::spawn`ed
//! task per inbound session event.

mod config;
mod finalize;
mod playlist;
mod profile_decision;
mod registry;
mod sweeper;
mod start;
mod stop;

pub use config::{ConfigError, OrchestratorConfig};
pub use profile_decision::decide_profile;
pub use registry::CancellationRegistry;

use std::sync::Arc;

use streamctl_adapters::{EventBus, Fs, TranscoderFactory, TunerFactory};
use streamctl_metrics::Recorder;
use streamctl_store::StateStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Everything the orchestrator needs besides its own config, bundled to
/// keep `Orchestrator::new`'s signature from growing unreadable as the
/// seam list does.
pub struct OrchestratorDeps<S: StateStore, B: EventBus, F: Fs> {
    pub store: Arc<S>,
    pub bus: Arc<B>,
    pub fs: Arc<F>,
    pub tuner_factory: Arc<dyn TunerFactory>,
    pub transcoder_factory: Arc<dyn TranscoderFactory>,
    pub recorder: Arc<dyn Recorder>,
}

/// One process-wide orchestrator instance. Generic over the
/// state store, event bus, and filesystem implementations, matching the
/// build monitor's `BuildMonitor<R, C, F>` composition-over-generics shape;
/// the tuner/transcoder factories and the metrics recorder stay as trait
/// objects since they are the seams most likely to vary
/// independently of the store/bus/fs choice.
pub struct Orchestrator<S: StateStore, B: EventBus, F: Fs> {
    store: Arc<S>,
    bus: Arc<B>,
    fs: Arc<F>,
    tuner_factory: Arc<dyn TunerFactory>,
    transcoder_factory: Arc<dyn TranscoderFactory>,
    recorder: Arc<dyn Recorder>,
    config: OrchestratorConfig,
    registry: Arc<CancellationRegistry>,
    root_cancel: CancellationToken,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<S, B, F> Orchestrator<S, B, F>
where
    S: StateStore + 'static,
    B: EventBus + 'static,
    F: Fs + 'static,
{
    pub fn new(deps: OrchestratorDeps<S, B, F>, config: OrchestratorConfig) -> Arc<Self> {
        Arc::new(Self {
            store: deps.store,
            bus: deps.bus,
            fs: deps.fs,
            tuner_factory: deps.tuner_factory,
            transcoder_factory: deps.transcoder_factory,
            recorder: deps.recorder,
            config,
            registry: Arc::new(CancellationRegistry::new()),
            root_cancel: CancellationToken::new(),
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    /// The event bus this orchestrator is subscribed to, so an embedding
    /// application can publish `Start`/`Stop` intents through the same
    /// handle the intake loops read from.
    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    /// Startup recovery pass:
    /// flush every lease, then reset every non-terminal session to `New`.
    /// Fatal ("recovery-sweep failure at startup (fail-fast to
    /// protect integrity)") — callers should treat an `Err` here as
    /// unrecoverable and abort startup rather than degrade into serving
    /// with stale state.
    #[instrument(skip(self))]
    pub fn recover(&self) -> Result<Vec<streamctl_types::SessionId>, streamctl_store::StoreError> {
        streamctl_lease::recover_by_flushing_all_leases(self.store.as_ref())
    }

    /// Spawns the start/stop event-intake loops and the background
    /// sweeper. Each inbound event is dispatched to
    /// its own task so multiple sessions progress concurrently.
    pub fn spawn(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("tasks mutex poisoned");
        tasks.push(self.clone().spawn_start_intake());
        tasks.push(self.clone().spawn_stop_intake());
        tasks.push(self.clone().spawn_sweeper());
    }

    fn spawn_start_intake(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut subscription = self.bus.subscribe_start();
            loop {
                tokio::select! {
                    _ = self.root_cancel.cancelled() => break,
                    event = subscription.recv() => {
                        match event {
                            Some(event) => {
                                let this = self.clone();
                                tokio::spawn(async move { this.handle_start_event(event).await });
                            }
                            None => break,
                        }
                    }
                }
            }
        })
    }

    fn spawn_stop_intake(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut subscription = self.bus.subscribe_stop();
            loop {
                tokio::select! {
                    _ = self.root_cancel.cancelled() => break,
                    event = subscription.recv() => {
                        match event {
                            Some(event) => {
                                let this = self.clone();
                                tokio::spawn(async move { this.handle_stop_event(event).await });
                            }
                            None => break,
                        }
                    }
                }
            }
        })
    }

    /// Cancels the root scope (fanning out to every registered session's
    /// cancel handle), then awaits the intake/sweeper tasks with a grace
    /// timeout.
    pub async fn shutdown(&self, grace: std::time::Duration) {
        info!("orchestrator shutdown requested");
        self.root_cancel.cancel();
        self.registry.cancel_all();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().expect("tasks mutex poisoned"));
        let joined = tokio::time::timeout(grace, futures_join_all(handles)).await;
        if joined.is_err() {
            tracing::warn!("orchestrator shutdown grace period elapsed before all tasks finished");
        }
    }
}

/// Small local stand-in for `futures::future::join_all` so this crate
/// doesn't need the `futures` dependency just for shutdown.
async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}
