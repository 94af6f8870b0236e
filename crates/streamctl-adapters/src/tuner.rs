//! Tuner adapter: `NewTuner(slot) -> Tuner`, `Tune`, `Close`.

use async_trait::async_trait;
use streamctl_types::StreamInfo;

use crate::error::AdapterError;

/// One upstream receiver's capacity to deliver a single stream, already
/// bound to a tuner slot by the factory that created it.
#[async_trait]
pub trait Tuner: Send + Sync {
    async fn tune(&self, service_ref: &str) -> Result<(), AdapterError>;

    /// Source stream characteristics for `DecideProfile`.
    /// Only meaningful after a successful `tune`; implementations that
    /// can't probe codec info default to an empty `StreamInfo`, which
    /// `DecideProfile` treats as browser-compatible.
    async fn probe(&self) -> StreamInfo {
        StreamInfo::default()
    }

    async fn close(&self);
}

/// `NewTuner(slot) -> Tuner`. Implementations own whatever
/// per-slot hardware/driver state a real tuner needs; the orchestrator only
/// ever sees the trait object.
pub trait TunerFactory: Send + Sync {
    fn new_tuner(&self, slot: u32) -> Box<dyn Tuner>;
}

/// Scripted mock tuner for tests.
pub struct MockTuner {
    fail_with: Option<String>,
    delay: Option<std::time::Duration>,
    stream_info: StreamInfo,
}

impl MockTuner {
    pub fn succeeding() -> Self {
        Self { fail_with: None, delay: None, stream_info: StreamInfo::default() }
    }

    pub fn failing(detail: impl Into<String>) -> Self {
        Self { fail_with: Some(detail.into()), delay: None, stream_info: StreamInfo::default() }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_stream_info(mut self, info: StreamInfo) -> Self {
        self.stream_info = info;
        self
    }
}

#[async_trait]
impl Tuner for MockTuner {
    async fn tune(&self, _service_ref: &str) -> Result<(), AdapterError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.fail_with {
            Some(detail) => Err(AdapterError::TuneFailed(detail.clone())),
            None => Ok(()),
        }
    }

    async fn probe(&self) -> StreamInfo {
        self.stream_info.clone()
    }

    async fn close(&self) {}
}

/// Builds whatever `MockTuner` the test configured for a given slot,
/// regardless of which slot is requested (tests construct one factory per
/// scenario, not per slot).
pub struct MockTunerFactory {
    succeed: bool,
}

impl MockTunerFactory {
    pub fn always_succeeds() -> Self {
        Self { succeed: true }
    }

    pub fn always_fails() -> Self {
        Self { succeed: false }
    }
}

impl TunerFactory for MockTunerFactory {
    fn new_tuner(&self, _slot: u32) -> Box<dyn Tuner> {
        if self.succeed {
            Box::new(MockTuner::succeeding())
        } else {
            Box::new(MockTuner::failing("mock tuner configured to fail"))
        }
    }
}
