//! Transcoder adapter. `Start` is one-shot: a fresh trait object
//! per attempt, never restarted in place (a repair retry constructs a
//! brand new instance via the factory).

use std::sync::Mutex;

use async_trait::async_trait;
use streamctl_types::{ProfileSpec, SessionId};

use crate::error::AdapterError;

/// What `Wait` returns on a clean process exit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub exit_code: Option<i32>,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn start(
        &mut self,
        session_id: &SessionId,
        source: &str,
        profile: &ProfileSpec,
        start_ms: i64,
    ) -> Result<(), AdapterError>;

    async fn wait(&mut self) -> Result<ExitInfo, AdapterError>;

    async fn stop(&mut self) -> Result<(), AdapterError>;

    async fn last_log_lines(&self, n: usize) -> Vec<String>;
}

/// `NewTranscoder() -> Transcoder`.
pub trait TranscoderFactory: Send + Sync {
    fn new_transcoder(&self) -> Box<dyn Transcoder>;
}

/// Known corruption signatures the repair-retry classifier looks for in the
/// transcoder's last log lines.
pub const CORRUPTION_SIGNATURES: &[&str] = &[
    "decode error",
    "missing pps",
    "missing sps",
    "mmco failure",
];

pub fn contains_corruption_signature(lines: &[String]) -> bool {
    lines.iter().any(|line| {
        let lower = line.to_ascii_lowercase();
        CORRUPTION_SIGNATURES.iter().any(|sig| lower.contains(sig))
    })
}

/// Scripted behavior for [`MockTranscoder`]. Each variant models one shape
/// of real transcoder behavior exercised by the orchestrator's tests.
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// `Wait` never returns until `stop` is called (simulates a healthy,
    /// indefinitely-running process, stopped by the session's own lifecycle).
    RunsUntilStopped,
    /// `start` itself fails (`FfmpegStartFailed`).
    StartFails(String),
    /// The process exits cleanly on its own, unprompted (`ProcessEnded`
    /// for a live session, or a completed VOD build).
    ExitsCleanly(Option<i32>),
    /// `wait` never returns and log lines carry a corruption signature,
    /// modeling an upstream-corrupt stall for the repair-retry test.
    HangsWithCorruptionSignature,
}

pub struct MockTranscoder {
    behavior: MockBehavior,
    stopped: Mutex<bool>,
    log_lines: Vec<String>,
}

impl MockTranscoder {
    pub fn new(behavior: MockBehavior) -> Self {
        let log_lines = match &behavior {
            MockBehavior::HangsWithCorruptionSignature => {
                vec!["frame 10: decode error, missing PPS".to_string()]
            }
            _ => Vec::new(),
        };
        Self { behavior, stopped: Mutex::new(false), log_lines }
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    async fn start(
        &mut self,
        _session_id: &SessionId,
        _source: &str,
        _profile: &ProfileSpec,
        _start_ms: i64,
    ) -> Result<(), AdapterError> {
        match &self.behavior {
            MockBehavior::StartFails(detail) => Err(AdapterError::StartFailed(detail.clone())),
            _ => Ok(()),
        }
    }

    async fn wait(&mut self) -> Result<ExitInfo, AdapterError> {
        match &self.behavior {
            MockBehavior::ExitsCleanly(code) => Ok(ExitInfo { exit_code: *code }),
            MockBehavior::RunsUntilStopped | MockBehavior::HangsWithCorruptionSignature => {
                loop {
                    if *self.stopped.lock().expect("mutex poisoned") {
                        return Ok(ExitInfo { exit_code: Some(0) });
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                }
            }
            MockBehavior::StartFails(detail) => Err(AdapterError::StartFailed(detail.clone())),
        }
    }

    async fn stop(&mut self) -> Result<(), AdapterError> {
        *self.stopped.lock().expect("mutex poisoned") = true;
        Ok(())
    }

    async fn last_log_lines(&self, n: usize) -> Vec<String> {
        self.log_lines.iter().rev().take(n).rev().cloned().collect()
    }
}

pub struct MockTranscoderFactory {
    behavior: MockBehavior,
}

impl MockTranscoderFactory {
    pub fn new(behavior: MockBehavior) -> Self {
        Self { behavior }
    }
}

impl TranscoderFactory for MockTranscoderFactory {
    fn new_transcoder(&self) -> Box<dyn Transcoder> {
        Box::new(MockTranscoder::new(self.behavior.clone()))
    }
}

#[cfg(feature = "process-adapters")]
pub mod process {
    //! Real transcoder backed by an external transcode process. Not exercised by the default test
    //! suite, which runs entirely against [`super::MockTranscoder`].

    use std::process::Stdio;
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::process::Child;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;

    pub struct ProcessTranscoder {
        binary: String,
        child: Option<Child>,
        log_tail: Arc<AsyncMutex<Vec<String>>>,
    }

    impl ProcessTranscoder {
        pub fn new(binary: impl Into<String>) -> Self {
            Self { binary: binary.into(), child: None, log_tail: Arc::new(AsyncMutex::new(Vec::new())) }
        }
    }

    #[async_trait]
    impl Transcoder for ProcessTranscoder {
        async fn start(
            &mut self,
            session_id: &SessionId,
            source: &str,
            profile: &ProfileSpec,
            start_ms: i64,
        ) -> Result<(), AdapterError> {
            let mut child = tokio::process::Command::new(&self.binary)
                .arg("--session")
                .arg(session_id.as_str())
                .arg("--source")
                .arg(source)
                .arg("--profile")
                .arg(profile.as_label())
                .arg("--start-ms")
                .arg(start_ms.to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| AdapterError::StartFailed(e.to_string()))?;

            if let Some(stderr) = child.stderr.take() {
                let log_tail = self.log_tail.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let mut tail = log_tail.lock().await;
                        tail.push(line);
                        if tail.len() > 200 {
                            tail.remove(0);
                        }
                    }
                });
            }

            self.child = Some(child);
            Ok(())
        }

        async fn wait(&mut self) -> Result<ExitInfo, AdapterError> {
            let child = self.child.as_mut().ok_or_else(|| {
                AdapterError::ProcessError("wait called before start".to_string())
            })?;
            let status = child.wait().await.map_err(|e| AdapterError::ProcessError(e.to_string()))?;
            Ok(ExitInfo { exit_code: status.code() })
        }

        async fn stop(&mut self) -> Result<(), AdapterError> {
            if let Some(child) = self.child.as_mut() {
                let _ = child.start_kill();
            }
            Ok(())
        }

        async fn last_log_lines(&self, n: usize) -> Vec<String> {
            let tail = self.log_tail.lock().await;
            tail.iter().rev().take(n).rev().cloned().collect()
        }
    }

    pub struct ProcessTranscoderFactory {
        binary: String,
    }

    impl ProcessTranscoderFactory {
        pub fn new(binary: impl Into<String>) -> Self {
            Self { binary: binary.into() }
        }
    }

    impl TranscoderFactory for ProcessTranscoderFactory {
        fn new_transcoder(&self) -> Box<dyn Transcoder> {
            Box::new(ProcessTranscoder::new(self.binary.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_known_corruption_signatures_case_insensitively() {
        let lines = vec!["Frame 42: DECODE ERROR near keyframe".to_string()];
        assert!(contains_corruption_signature(&lines));
    }

    #[test]
    fn clean_log_lines_are_not_flagged_as_corrupt() {
        let lines = vec!["frame 42: ok".to_string()];
        assert!(!contains_corruption_signature(&lines));
    }

    #[tokio::test]
    async fn exits_cleanly_behavior_returns_immediately() {
        let mut t = MockTranscoder::new(MockBehavior::ExitsCleanly(Some(0)));
        let sid = SessionId::parse("s1").unwrap();
        t.start(&sid, "src", &ProfileSpec::Default, 0).await.unwrap();
        let exit = t.wait().await.unwrap();
        assert_eq!(exit.exit_code, Some(0));
    }

    #[tokio::test]
    async fn stop_unblocks_a_running_mock() {
        let mut t = MockTranscoder::new(MockBehavior::RunsUntilStopped);
        let sid = SessionId::parse("s1").unwrap();
        t.start(&sid, "src", &ProfileSpec::Default, 0).await.unwrap();
        t.stop().await.unwrap();
        let exit = tokio::time::timeout(std::time::Duration::from_secs(1), t.wait())
            .await
            .expect("wait should unblock after stop")
            .unwrap();
        assert_eq!(exit.exit_code, Some(0));
    }
}
