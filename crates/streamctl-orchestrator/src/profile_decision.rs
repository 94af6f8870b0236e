//! `DecideProfile`: a pure function from source stream
//! characteristics to a VOD profile choice plus a human-readable rationale,
//! independently testable without an orchestrator.

use streamctl_types::{ProfileSpec, StreamInfo};

/// HEVC, 10-bit H.264, or MPEG-2 force `High` (full transcode,
/// browser-incompatible); everything else gets `Default` (smart-copy).
pub fn decide_profile(info: &StreamInfo) -> (ProfileSpec, String) {
    match info.high_profile_reason() {
        Some(reason) => (ProfileSpec::High, reason.to_string()),
        None => (
            ProfileSpec::Default,
            "source is browser-compatible: smart-copy video, ensure AAC audio".to_string(),
        ),
    }
}
