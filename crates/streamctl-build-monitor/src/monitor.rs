//! `BuildMonitor`: supervises one external build process from
//! contract check through heartbeat enforcement to atomic publish.
//!
//! State machine: `Idle -> Building -> Finalizing -> Succeeded|Failed|Canceled`.
//! `Building -> Succeeded` is illegal; every success path passes through
//! `Finalizing` (the atomic rename).

use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::Duration;
use streamctl_adapters::Fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::runner::{BuildSpec, Handle, Runner};

/// Canonical failure reason codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureReason {
    Stall,
    Crash,
    StartFail,
    ContractViolation,
    Internal,
    Canceled,
}

impl FailureReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            FailureReason::Stall => "stall",
            FailureReason::Crash => "crash",
            FailureReason::StartFail => "start_fail",
            FailureReason::ContractViolation => "contract_violation",
            FailureReason::Internal => "internal",
            FailureReason::Canceled => "canceled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Building,
    Finalizing,
    Succeeded,
    Failed(FailureReason),
    Canceled,
}

/// Tunable timeouts governing build supervision.
#[derive(Clone, Debug)]
pub struct BuildMonitorConfig {
    pub build_start_timeout: StdDuration,
    pub heartbeat_timeout: Duration,
    pub stop_grace: StdDuration,
    pub stop_kill: StdDuration,
}

impl Default for BuildMonitorConfig {
    fn default() -> Self {
        Self {
            build_start_timeout: StdDuration::from_millis(300),
            heartbeat_timeout: Duration::seconds(15),
            stop_grace: StdDuration::from_secs(2),
            stop_kill: StdDuration::from_secs(5),
        }
    }
}

pub type SuccessCallback = Box<dyn Fn(&std::path::Path) + Send + Sync>;
pub type FailureCallback = Box<dyn Fn(FailureReason, &str) + Send + Sync>;

enum Finished {
    Clean,
    Crashed(String),
    Stalled,
    Canceled,
}

/// One monitor per build. Generic over `Runner`/`Clock`/`Fs` so
/// tests wire the mocks and production wires the real implementations,
/// the same composition-over-a-generic-collaborator shape used by the
/// lease manager.
pub struct BuildMonitor<R: Runner, C: Clock, F: Fs> {
    runner: std::sync::Arc<R>,
    clock: std::sync::Arc<C>,
    fs: std::sync::Arc<F>,
    config: BuildMonitorConfig,
    on_succeeded: SuccessCallback,
    on_failed: FailureCallback,
    state: Mutex<BuildState>,
}

impl<R: Runner, C: Clock, F: Fs> BuildMonitor<R, C, F> {
    pub fn new(
        runner: std::sync::Arc<R>,
        clock: std::sync::Arc<C>,
        fs: std::sync::Arc<F>,
        config: BuildMonitorConfig,
        on_succeeded: SuccessCallback,
        on_failed: FailureCallback,
    ) -> Self {
        Self { runner, clock, fs, config, on_succeeded, on_failed, state: Mutex::new(BuildState::Idle) }
    }

    pub fn state(&self) -> BuildState {
        self.state.lock().expect("monitor mutex poisoned").clone()
    }

    fn set_state(&self, state: BuildState) {
        *self.state.lock().expect("monitor mutex poisoned") = state;
    }

    async fn cleanup(&self, spec: &BuildSpec) {
        if let Err(e) = self.fs.remove_dir_all(&spec.work_dir).await {
            warn!(error = %e, work_dir = %spec.work_dir.display(), "failed to clean up build work dir");
        }
    }

    fn fail(&self, reason: FailureReason, detail: impl Into<String>) -> BuildState {
        let detail = detail.into();
        warn!(reason = reason.as_label(), %detail, "build failed");
        (self.on_failed)(reason, &detail);
        BuildState::Failed(reason)
    }

    /// Runs the build to completion: start contract, heartbeat supervision,
    /// and atomic publish. `cancel` fires if the owning session stops the
    /// build early.
    #[instrument(skip(self, cancel), fields(work_dir = %spec.work_dir.display()))]
    pub async fn run(&self, spec: BuildSpec, cancel: CancellationToken) -> BuildState {
        self.set_state(BuildState::Building);

        let mut handle = match self.runner.start(&spec).await {
            Ok(handle) => handle,
            Err(e) => {
                self.cleanup(&spec).await;
                let outcome = self.fail(FailureReason::StartFail, e.to_string());
                self.set_state(outcome.clone());
                return outcome;
            }
        };

        if !self.await_start_contract(&spec, &mut handle).await {
            handle.stop(self.config.stop_grace, self.config.stop_kill).await;
            self.cleanup(&spec).await;
            let outcome = self.fail(
                FailureReason::ContractViolation,
                "no artifact produced within BuildStartTimeout",
            );
            self.set_state(outcome.clone());
            return outcome;
        }

        let finished = self.supervise(&mut handle, &cancel).await;

        let outcome = match finished {
            Finished::Clean => {
                self.set_state(BuildState::Finalizing);
                self.publish(&spec).await
            }
            Finished::Crashed(detail) => {
                self.cleanup(&spec).await;
                self.fail(FailureReason::Crash, detail)
            }
            Finished::Stalled => {
                self.cleanup(&spec).await;
                self.fail(FailureReason::Stall, "no progress within HeartbeatTimeout")
            }
            Finished::Canceled => {
                handle.stop(self.config.stop_grace, self.config.stop_kill).await;
                self.cleanup(&spec).await;
                let _ = (self.on_failed)(FailureReason::Canceled, "build canceled");
                BuildState::Canceled
            }
        };
        self.set_state(outcome.clone());
        outcome
    }

    async fn await_start_contract(&self, spec: &BuildSpec, handle: &mut Box<dyn Handle>) -> bool {
        if self.fs.exists(&spec.output_temp_path()).await {
            return true;
        }
        let deadline = self.clock.now()
            + Duration::from_std(self.config.build_start_timeout).unwrap_or(Duration::milliseconds(300));
        loop {
            tokio::select! {
                _ = self.clock.tick() => {}
                progress = handle.progress().recv() => {
                    if progress.is_none() {
                        return self.fs.exists(&spec.output_temp_path()).await;
                    }
                }
            }
            if self.fs.exists(&spec.output_temp_path()).await {
                return true;
            }
            if self.clock.now() >= deadline {
                return false;
            }
        }
    }

    async fn supervise(&self, handle: &mut Box<dyn Handle>, cancel: &CancellationToken) -> Finished {
        let mut last_seen: Option<chrono::DateTime<chrono::Utc>> = None;
        let mut progress_open = true;
        let mut stopped_for_stall = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Finished::Canceled,

                wait_result = handle.wait() => {
                    return match wait_result {
                        Ok(()) => Finished::Clean,
                        Err(e) => Finished::Crashed(e.to_string()),
                    };
                }

                progress = handle.progress().recv(), if progress_open => {
                    match progress {
                        Some(event) => {
                            info!(message = %event.message, "build progress received");
                            last_seen = Some(self.clock.now());
                        }
                        None => progress_open = false,
                    }
                }

                _ = self.clock.tick(), if last_seen.is_some() && !stopped_for_stall => {
                    let seen = last_seen.expect("guarded by last_seen.is_some()");
                    if self.clock.now() - seen > self.config.heartbeat_timeout {
                        warn!("heartbeat timeout exceeded, stopping build process");
                        handle.stop(self.config.stop_grace, self.config.stop_kill).await;
                        stopped_for_stall = true;
                        return Finished::Stalled;
                    }
                }
            }
        }
    }

    async fn publish(&self, spec: &BuildSpec) -> BuildState {
        let Some(final_path) = spec.final_path.as_ref() else {
            self.cleanup(spec).await;
            return self.fail(FailureReason::Internal, "no final_path configured for a succeeded build");
        };
        match self.fs.rename(&spec.output_temp_path(), final_path).await {
            Ok(()) => {
                info!(final_path = %final_path.display(), "build artifact published");
                (self.on_succeeded)(final_path);
                BuildState::Succeeded
            }
            Err(e) => {
                self.cleanup(spec).await;
                self.fail(FailureReason::Internal, format!("publish rename failed: {e}"))
            }
        }
    }
}
