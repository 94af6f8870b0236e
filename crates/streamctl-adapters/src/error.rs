//! Adapter-level errors. These are about the *collaborator's*
//! failure to do its job; the orchestrator is the one place that turns them
//! into a [`streamctl_types::ReasonCode`] via `reason_hint`.

use streamctl_types::ReasonCode;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("tune failed: {0}")]
    TuneFailed(String),

    #[error("tune deadline exceeded")]
    TuneTimeout,

    #[error("transcoder failed to start: {0}")]
    StartFailed(String),

    #[error("transcoder process error: {0}")]
    ProcessError(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// The `ReasonCode` this error maps to when it is already specific
    /// enough that `classify_reason`'s `Unknown` fallback shouldn't apply.
    pub fn reason_hint(&self) -> Option<ReasonCode> {
        match self {
            AdapterError::TuneFailed(_) => Some(ReasonCode::TuneFailed),
            AdapterError::TuneTimeout => Some(ReasonCode::TuneTimeout),
            AdapterError::StartFailed(_) => Some(ReasonCode::FfmpegStartFailed),
            AdapterError::Cancelled => Some(ReasonCode::ClientStop),
            AdapterError::ProcessError(_) | AdapterError::Io(_) => None,
        }
    }
}
