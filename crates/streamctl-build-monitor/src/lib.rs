//! Build Monitor: supervises one external VOD build process —
//! contract check, heartbeat-based stall detection, atomic publish, cleanup
//! on every failure path — driven entirely by an injectable clock so stall
//! tests never touch the wall clock.

mod clock;
mod monitor;
mod runner;

pub use clock::{Clock, MockClock, SystemClock};
pub use monitor::{BuildMonitor, BuildMonitorConfig, BuildState, FailureCallback, FailureReason, SuccessCallback};
pub use runner::{
    BuildSpec, Handle, MockHandle, MockHandleController, MockRunner, MockRunnerBehavior, ProgressEvent,
    Runner, RunnerError,
};

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use chrono::{Duration, Utc};
    use streamctl_adapters::MockFs;
    use streamctl_types::ProfileSpec;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn build_spec(work_dir: &str, final_path: Option<&str>) -> BuildSpec {
        BuildSpec {
            input: "recording-cache-key".to_string(),
            work_dir: PathBuf::from(work_dir),
            output_temp: "output.m3u8".to_string(),
            profile: ProfileSpec::Default,
            final_path: final_path.map(PathBuf::from),
        }
    }

    struct Outcome {
        succeeded: Arc<Mutex<Option<PathBuf>>>,
        failed: Arc<Mutex<Option<(FailureReason, String)>>>,
    }

    fn callbacks() -> (SuccessCallback, FailureCallback, Outcome) {
        let succeeded = Arc::new(Mutex::new(None));
        let failed = Arc::new(Mutex::new(None));
        let s2 = succeeded.clone();
        let f2 = failed.clone();
        let on_succeeded: SuccessCallback = Box::new(move |path| {
            *s2.lock().unwrap() = Some(path.to_path_buf());
        });
        let on_failed: FailureCallback = Box::new(move |reason, detail| {
            *f2.lock().unwrap() = Some((reason, detail.to_string()));
        });
        (on_succeeded, on_failed, Outcome { succeeded, failed })
    }

    async fn controller_of(runner: &MockRunner) -> MockHandleController {
        loop {
            if let Some(c) = runner.last_controller() {
                return c;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
    }

    // S5: atomic publish success.
    #[tokio::test]
    async fn atomic_publish_renames_exactly_once_on_success() {
        let fs = Arc::new(MockFs::new());
        let clock = Arc::new(MockClock::new(Utc::now()));
        let runner = Arc::new(MockRunner::new(MockRunnerBehavior::Healthy, fs.clone()));
        let (on_succeeded, on_failed, outcome) = callbacks();
        let monitor = Arc::new(BuildMonitor::new(
            runner.clone(),
            clock.clone(),
            fs.clone(),
            BuildMonitorConfig::default(),
            on_succeeded,
            on_failed,
        ));

        let spec = build_spec("/work/build1", Some("/out/x.m3u8"));
        let cancel = CancellationToken::new();

        let run_future = {
            let monitor = monitor.clone();
            let spec = spec.clone();
            tokio::spawn(async move { monitor.run(spec, cancel).await })
        };

        let controller = controller_of(&runner).await;
        controller.emit_progress("heartbeat-1").await;
        controller.complete();

        let state = run_future.await.unwrap();
        assert_eq!(state, BuildState::Succeeded);
        assert_eq!(*outcome.succeeded.lock().unwrap(), Some(PathBuf::from("/out/x.m3u8")));
        assert!(outcome.failed.lock().unwrap().is_none());
        assert!(!fs.exists(&spec.output_temp_path()).await);
        assert_eq!(
            fs.read_to_string(std::path::Path::new("/out/x.m3u8")).await.unwrap(),
            "minimal-artifact"
        );
    }

    // S4: heartbeat stall.
    #[tokio::test]
    async fn stalled_heartbeat_stops_the_process_exactly_once_and_never_touches_final_path() {
        let fs = Arc::new(MockFs::new());
        let clock = Arc::new(MockClock::new(Utc::now()));
        let runner = Arc::new(MockRunner::new(MockRunnerBehavior::Healthy, fs.clone()));
        let (on_succeeded, on_failed, outcome) = callbacks();
        let config = BuildMonitorConfig { heartbeat_timeout: Duration::seconds(15), ..Default::default() };
        let monitor = Arc::new(BuildMonitor::new(
            runner.clone(),
            clock.clone(),
            fs.clone(),
            config,
            on_succeeded,
            on_failed,
        ));

        let spec = build_spec("/work/build2", Some("/out/y.m3u8"));
        let cancel = CancellationToken::new();
        let run_future = {
            let monitor = monitor.clone();
            let spec = spec.clone();
            tokio::spawn(async move { monitor.run(spec, cancel).await })
        };

        let controller = controller_of(&runner).await;
        controller.emit_progress("heartbeat-at-t0").await;
        // Let the heartbeat arm, then advance straight past the timeout
        // without any further progress events.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        clock.advance(Duration::seconds(16));

        let state = run_future.await.unwrap();
        assert_eq!(state, BuildState::Failed(FailureReason::Stall));
        assert_eq!(controller.stop_call_count(), 1);
        assert!(!fs.exists(std::path::Path::new("/work/build2")).await, "work dir must be cleaned up");
        assert!(!fs.exists(std::path::Path::new("/out/y.m3u8")).await, "final path must be untouched");
        match outcome.failed.lock().unwrap().as_ref() {
            Some((FailureReason::Stall, _)) => {}
            other => panic!("expected a Stall failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn heartbeat_exactly_at_timeout_is_not_yet_a_stall() {
        let fs = Arc::new(MockFs::new());
        let clock = Arc::new(MockClock::new(Utc::now()));
        let runner = Arc::new(MockRunner::new(MockRunnerBehavior::Healthy, fs.clone()));
        let (on_succeeded, on_failed, _outcome) = callbacks();
        let config = BuildMonitorConfig { heartbeat_timeout: Duration::seconds(15), ..Default::default() };
        let monitor = Arc::new(BuildMonitor::new(
            runner.clone(),
            clock.clone(),
            fs.clone(),
            config,
            on_succeeded,
            on_failed,
        ));

        let spec = build_spec("/work/build3", Some("/out/z.m3u8"));
        let cancel = CancellationToken::new();
        let run_future = {
            let monitor = monitor.clone();
            let spec = spec.clone();
            tokio::spawn(async move { monitor.run(spec, cancel).await })
        };

        let controller = controller_of(&runner).await;
        controller.emit_progress("heartbeat-at-t0").await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        // Exactly at the boundary: not a stall yet.
        clock.advance(Duration::seconds(15));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(controller.stop_call_count(), 0);

        controller.complete();
        let state = run_future.await.unwrap();
        assert_eq!(state, BuildState::Succeeded);
    }

    #[tokio::test]
    async fn start_failure_never_touches_final_path() {
        let fs = Arc::new(MockFs::new());
        let clock = Arc::new(MockClock::new(Utc::now()));
        let runner = Arc::new(MockRunner::new(MockRunnerBehavior::StartFails("no ffmpeg binary".to_string()), fs.clone()));
        let (on_succeeded, on_failed, outcome) = callbacks();
        let monitor = BuildMonitor::new(runner, clock, fs.clone(), BuildMonitorConfig::default(), on_succeeded, on_failed);

        let spec = build_spec("/work/build4", Some("/out/w.m3u8"));
        let state = monitor.run(spec, CancellationToken::new()).await;

        assert_eq!(state, BuildState::Failed(FailureReason::StartFail));
        assert!(!fs.exists(std::path::Path::new("/out/w.m3u8")).await);
        match outcome.failed.lock().unwrap().as_ref() {
            Some((FailureReason::StartFail, _)) => {}
            other => panic!("expected StartFail, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_start_artifact_is_a_contract_violation() {
        let fs = Arc::new(MockFs::new());
        let clock = Arc::new(MockClock::new(Utc::now()));
        let runner = Arc::new(MockRunner::new(MockRunnerBehavior::Healthy, fs.clone()).without_artifact());
        let (on_succeeded, on_failed, _outcome) = callbacks();
        let config = BuildMonitorConfig { build_start_timeout: std::time::Duration::from_millis(30), ..Default::default() };
        let monitor = BuildMonitor::new(runner, clock.clone(), fs.clone(), config, on_succeeded, on_failed);

        let spec = build_spec("/work/build5", Some("/out/v.m3u8"));
        let run = tokio::spawn(async move { monitor.run(spec, CancellationToken::new()).await });

        // Advance the clock past the start timeout since nothing will ever
        // produce the artifact.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        clock.advance(Duration::milliseconds(40));

        let state = run.await.unwrap();
        assert_eq!(state, BuildState::Failed(FailureReason::ContractViolation));
    }

    #[tokio::test]
    async fn crash_before_completion_cleans_up_and_never_publishes() {
        let fs = Arc::new(MockFs::new());
        let clock = Arc::new(MockClock::new(Utc::now()));
        let runner = Arc::new(MockRunner::new(MockRunnerBehavior::CanCrash, fs.clone()));
        let (on_succeeded, on_failed, outcome) = callbacks();
        let monitor = Arc::new(BuildMonitor::new(runner.clone(), clock, fs.clone(), BuildMonitorConfig::default(), on_succeeded, on_failed));

        let spec = build_spec("/work/build6", Some("/out/u.m3u8"));
        let run_future = {
            let monitor = monitor.clone();
            let spec = spec.clone();
            tokio::spawn(async move { monitor.run(spec, CancellationToken::new()).await })
        };

        let controller = controller_of(&runner).await;
        controller.emit_progress("heartbeat").await;
        controller.crash();

        let state = run_future.await.unwrap();
        assert_eq!(state, BuildState::Failed(FailureReason::Crash));
        assert!(!fs.exists(std::path::Path::new("/out/u.m3u8")).await);
        assert!(matches!(outcome.failed.lock().unwrap().as_ref(), Some((FailureReason::Crash, _))));
    }

    #[tokio::test]
    async fn cancellation_stops_the_process_and_reports_canceled() {
        let fs = Arc::new(MockFs::new());
        let clock = Arc::new(MockClock::new(Utc::now()));
        let runner = Arc::new(MockRunner::new(MockRunnerBehavior::Healthy, fs.clone()));
        let (on_succeeded, on_failed, _outcome) = callbacks();
        let monitor = Arc::new(BuildMonitor::new(runner.clone(), clock, fs.clone(), BuildMonitorConfig::default(), on_succeeded, on_failed));

        let spec = build_spec("/work/build7", Some("/out/t.m3u8"));
        let cancel = CancellationToken::new();
        let run_future = {
            let monitor = monitor.clone();
            let spec = spec.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { monitor.run(spec, cancel).await })
        };

        let controller = controller_of(&runner).await;
        controller.emit_progress("heartbeat").await;
        cancel.cancel();

        let state = run_future.await.unwrap();
        assert_eq!(state, BuildState::Canceled);
        assert_eq!(controller.stop_call_count(), 1);
    }
}
