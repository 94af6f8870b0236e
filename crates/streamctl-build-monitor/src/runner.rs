//! The external build process seam: `Runner.Start(Spec) ->
//! Handle`, where `Handle` exposes a progress channel, `Wait`, `Stop`, and
//! `Diagnostics`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use streamctl_types::ProfileSpec;
use tokio::sync::{mpsc, Notify};

/// `Spec{Input, WorkDir, OutputTemp, Profile}` plus the optional final
/// destination.
#[derive(Clone, Debug)]
pub struct BuildSpec {
    pub input: String,
    pub work_dir: PathBuf,
    pub output_temp: String,
    pub profile: ProfileSpec,
    pub final_path: Option<PathBuf>,
}

impl BuildSpec {
    pub fn output_temp_path(&self) -> PathBuf {
        self.work_dir.join(&self.output_temp)
    }
}

/// One liveness proof emitted on `Handle::progress`'s channel. Deliberately
/// carries no timestamp: the monitor's `lastSeen` is stamped by the monitor
/// itself on receipt, never read out of the event.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("runner failed to start: {0}")]
    StartFailed(String),
    #[error("build process crashed: {0}")]
    Crashed(String),
}

#[async_trait]
pub trait Handle: Send + Sync {
    /// The progress channel; receiving anything on it is proof of liveness.
    fn progress(&mut self) -> &mut mpsc::Receiver<ProgressEvent>;

    /// Blocks until the build process exits. `Ok(())` is a clean exit,
    /// `Err` is a crash: returning before completion maps to
    /// `Failed(Crash)`.
    async fn wait(&mut self) -> Result<(), RunnerError>;

    /// Issues a graceful-then-forceful stop exactly once per stall/cancel.
    async fn stop(&mut self, grace: StdDuration, kill: StdDuration);

    fn diagnostics(&self) -> String;
}

#[async_trait]
pub trait Runner: Send + Sync {
    async fn start(&self, spec: &BuildSpec) -> Result<Box<dyn Handle>, RunnerError>;
}

/// Scripted behavior for [`MockRunner`], one per build-monitor test case.
#[derive(Clone, Debug)]
pub enum MockRunnerBehavior {
    /// Blocks on `wait` until `stop` is called or the test signals
    /// completion via [`MockHandleController::complete`].
    Healthy,
    /// `start` itself returns an error (`StartFail`).
    StartFails(String),
    /// `wait` resolves with a crash as soon as the handle is stopped or
    /// told to crash via [`MockHandleController::crash`].
    CanCrash,
}

struct MockHandleState {
    stopped: AtomicBool,
    crashed: AtomicBool,
    stop_calls: AtomicUsize,
    completed: Notify,
}

pub struct MockHandle {
    progress_rx: mpsc::Receiver<ProgressEvent>,
    state: Arc<MockHandleState>,
}

#[async_trait]
impl Handle for MockHandle {
    fn progress(&mut self) -> &mut mpsc::Receiver<ProgressEvent> {
        &mut self.progress_rx
    }

    async fn wait(&mut self) -> Result<(), RunnerError> {
        loop {
            if self.state.crashed.load(Ordering::SeqCst) {
                return Err(RunnerError::Crashed("process exited unexpectedly".to_string()));
            }
            if self.state.stopped.load(Ordering::SeqCst) {
                return Ok(());
            }
            tokio::select! {
                _ = self.state.completed.notified() => continue,
                _ = tokio::time::sleep(StdDuration::from_millis(20)) => {}
            }
        }
    }

    async fn stop(&mut self, _grace: StdDuration, _kill: StdDuration) {
        self.state.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.completed.notify_waiters();
    }

    fn diagnostics(&self) -> String {
        "mock build handle".to_string()
    }
}

/// A handle to externally drive a [`MockHandle`] from test code: emit
/// progress events, force completion, or force a crash.
#[derive(Clone)]
pub struct MockHandleController {
    progress_tx: mpsc::Sender<ProgressEvent>,
    state: Arc<MockHandleState>,
}

impl MockHandleController {
    pub async fn emit_progress(&self, message: impl Into<String>) {
        let _ = self.progress_tx.send(ProgressEvent { message: message.into() }).await;
    }

    pub fn complete(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.completed.notify_waiters();
    }

    pub fn crash(&self) {
        self.state.crashed.store(true, Ordering::SeqCst);
        self.state.completed.notify_waiters();
    }

    pub fn stop_call_count(&self) -> usize {
        self.state.stop_calls.load(Ordering::SeqCst)
    }
}

/// Test runner. Writes the minimum start-contract artifact to
/// `work_dir/output_temp` unless configured not to, then hands back a
/// [`MockHandle`] whose controller is stashed where the test can retrieve it
/// via [`MockRunner::last_controller`].
pub struct MockRunner {
    behavior: MockRunnerBehavior,
    produce_artifact: bool,
    fs: Arc<dyn streamctl_adapters::Fs>,
    controller: Mutex<Option<MockHandleController>>,
}

impl MockRunner {
    pub fn new(behavior: MockRunnerBehavior, fs: Arc<dyn streamctl_adapters::Fs>) -> Self {
        Self { behavior, produce_artifact: true, fs, controller: Mutex::new(None) }
    }

    /// Configures the runner to *not* write the minimum artifact, so the
    /// build monitor's start-contract check fails.
    pub fn without_artifact(mut self) -> Self {
        self.produce_artifact = false;
        self
    }

    pub fn last_controller(&self) -> Option<MockHandleController> {
        self.controller.lock().expect("mock runner mutex poisoned").clone()
    }
}

#[async_trait]
impl Runner for MockRunner {
    async fn start(&self, spec: &BuildSpec) -> Result<Box<dyn Handle>, RunnerError> {
        if let MockRunnerBehavior::StartFails(detail) = &self.behavior {
            return Err(RunnerError::StartFailed(detail.clone()));
        }
        if self.produce_artifact {
            self.fs
                .write(&spec.output_temp_path(), b"minimal-artifact")
                .await
                .map_err(|e| RunnerError::StartFailed(e.to_string()))?;
        }
        let (progress_tx, progress_rx) = mpsc::channel(16);
        let state = Arc::new(MockHandleState {
            stopped: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
            completed: Notify::new(),
        });
        *self.controller.lock().expect("mock runner mutex poisoned") =
            Some(MockHandleController { progress_tx, state: state.clone() });
        Ok(Box::new(MockHandle { progress_rx, state }))
    }
}
