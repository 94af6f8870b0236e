//! Canonical reason-code taxonomy and the error classification rules that
//! map a raised cause onto one of them.

use serde::{Deserialize, Serialize};

/// Canonical, stable, lowercase/snake_case reason taxonomy used both in
/// stored records and as metric label values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    None,
    Unknown,
    ClientStop,
    Cancelled,
    NotFound,
    InvariantViolation,
    LeaseBusy,
    LeaseExpired,
    TuneFailed,
    TuneTimeout,
    FfmpegStartFailed,
    PackagerFailed,
    UpstreamCorrupt,
    ProcessEnded,
}

impl ReasonCode {
    /// The stable label string used in metrics and stored records.
    pub fn as_label(&self) -> &'static str {
        match self {
            ReasonCode::None => "none",
            ReasonCode::Unknown => "unknown",
            ReasonCode::ClientStop => "client_stop",
            ReasonCode::Cancelled => "cancelled",
            ReasonCode::NotFound => "not_found",
            ReasonCode::InvariantViolation => "invariant_violation",
            ReasonCode::LeaseBusy => "lease_busy",
            ReasonCode::LeaseExpired => "lease_expired",
            ReasonCode::TuneFailed => "tune_failed",
            ReasonCode::TuneTimeout => "tune_timeout",
            ReasonCode::FfmpegStartFailed => "ffmpeg_start_failed",
            ReasonCode::PackagerFailed => "packager_failed",
            ReasonCode::UpstreamCorrupt => "upstream_corrupt",
            ReasonCode::ProcessEnded => "process_ended",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// An outcome carrying a [`ReasonCode`], free-text detail, and (in-process
/// only, never serialized) the wrapped source error.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {detail}")]
pub struct ReasonError {
    pub code: ReasonCode,
    pub detail: String,
    #[source]
    pub wrapped: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Sentinel detail string for the dedup-lease replay loser. The finalizer matches on [`ReasonError::is_dedup_busy`] rather
/// than the string directly, but the string is kept stable since it also
/// appears in `ReasonDetail` on stored records for operator visibility.
pub const DEDUP_LEASE_HELD_DETAIL: &str = "dedup lease held";

impl ReasonError {
    pub fn new(code: ReasonCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            wrapped: None,
        }
    }

    pub fn wrapping(
        code: ReasonCode,
        detail: impl Into<String>,
        wrapped: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            detail: detail.into(),
            wrapped: Some(Box::new(wrapped)),
        }
    }

    /// The distinguished "replay loser" sentinel: a losing dedup-lease
    /// acquisition. The finalizer recognizes this and performs zero side
    /// effects.
    pub fn dedup_busy() -> Self {
        Self::new(ReasonCode::LeaseBusy, DEDUP_LEASE_HELD_DETAIL)
    }

    pub fn is_dedup_busy(&self) -> bool {
        self.code == ReasonCode::LeaseBusy && self.detail == DEDUP_LEASE_HELD_DETAIL
    }

    /// Cause classification at cancellation time, independent of
    /// `classify_reason` below: used when a session is cancelled through the
    /// stop path rather than surfacing an underlying adapter error.
    pub fn client_stop() -> Self {
        Self::new(ReasonCode::ClientStop, "stopped by client request")
    }
}

/// One classified cause a start handler, heartbeat loop, or finalizer can
/// observe, prior to being turned into a [`ReasonError`] by
/// [`classify_reason`].
#[derive(Debug)]
pub enum Cause {
    /// The session's cancellation token fired.
    Cancelled,
    /// A deadline elapsed outside of the tuning step (tuning deadlines map
    /// to `TuneTimeout` directly via `classify_reason`'s `during_tune` flag).
    DeadlineExceeded,
    /// A specific, already-classified reason (e.g. from an adapter).
    Specific(ReasonCode, String),
    /// An error with no dedicated classification.
    Other(String),
}

/// Maps a [`Cause`] to a [`ReasonError`] `classifyReason`:
/// cancel -> `ClientStop`; deadline-exceeded -> `TuneTimeout` (if
/// `during_tune`) else left to the caller (callers outside tuning should use
/// `Cause::Specific` instead); known sentinels -> their codes; anything else
/// -> `Unknown` with the error message as detail.
pub fn classify_reason(cause: Cause, during_tune: bool) -> ReasonError {
    match cause {
        Cause::Cancelled => ReasonError::client_stop(),
        Cause::DeadlineExceeded if during_tune => {
            ReasonError::new(ReasonCode::TuneTimeout, "tune deadline exceeded")
        }
        Cause::DeadlineExceeded => {
            ReasonError::new(ReasonCode::TuneTimeout, "deadline exceeded")
        }
        Cause::Specific(code, detail) => ReasonError::new(code, detail),
        Cause::Other(detail) => ReasonError::new(ReasonCode::Unknown, detail),
    }
}
