//! Codec/bitrate/VOD profile selection.

use serde::{Deserialize, Serialize};

/// A named transcode profile. `Default` and `High` are the two outcomes of
/// `DecideProfile`; `Repair` is the two-stage fallback profile used
/// by the upstream-corruption repair retry. `Custom` covers
/// operator-supplied profile ids passed in on `StartSessionEvent` that don't
/// map to one of the built-ins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileSpec {
    /// Smart-copy: copy video, ensure AAC audio.
    Default,
    /// Forced full transcode (HEVC, 10-bit, or MPEG-2 source).
    High,
    /// Upstream-corruption repair fallback, two stages in order.
    Repair(RepairStage),
    /// Operator/intake-supplied profile id not covered by the built-ins.
    Custom(String),
}

/// The two repair stages, tried in order and never revisited within one
/// session (the repair retry runs at most once).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairStage {
    /// Video copy + AAC audio (tried first).
    CopyVideoAacAudio,
    /// Full transcode, CRF 24, no deinterlace, 192k audio (tried second).
    CrfTranscode,
}

impl RepairStage {
    /// The stage tried after this one, if any. `CrfTranscode` is terminal:
    /// a second repair failure is always a terminal classification.
    pub fn next(self) -> Option<Self> {
        match self {
            RepairStage::CopyVideoAacAudio => Some(RepairStage::CrfTranscode),
            RepairStage::CrfTranscode => None,
        }
    }
}

impl ProfileSpec {
    /// The metric label value for this profile.
    pub fn as_label(&self) -> String {
        match self {
            ProfileSpec::Default => "default".to_string(),
            ProfileSpec::High => "high".to_string(),
            ProfileSpec::Repair(RepairStage::CopyVideoAacAudio) => "repair_copy".to_string(),
            ProfileSpec::Repair(RepairStage::CrfTranscode) => "repair_crf24".to_string(),
            ProfileSpec::Custom(id) => id.clone(),
        }
    }
}

/// Source stream characteristics fed into `DecideProfile`. Populated
/// by the tuner/probe adapter, not by this crate.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamInfo {
    pub video_codec: String,
    pub bit_depth: Option<u8>,
    pub pixel_format: Option<String>,
}

impl StreamInfo {
    fn is_hevc(&self) -> bool {
        let codec = self.video_codec.to_ascii_lowercase();
        codec.contains("hevc") || codec.contains("h265") || codec.contains("h.265")
    }

    fn is_mpeg2(&self) -> bool {
        let codec = self.video_codec.to_ascii_lowercase();
        codec.contains("mpeg2") || codec.contains("mpeg-2")
    }

    fn is_10bit_h264(&self) -> bool {
        let is_h264 = {
            let codec = self.video_codec.to_ascii_lowercase();
            codec.contains("h264") || codec.contains("h.264") || codec.contains("avc")
        };
        if !is_h264 {
            return false;
        }
        let deep_bit_depth = self.bit_depth.map(|b| b >= 10).unwrap_or(false);
        let deep_pixel_format = self
            .pixel_format
            .as_deref()
            .map(|fmt| fmt.contains("10"))
            .unwrap_or(false);
        deep_bit_depth || deep_pixel_format
    }

    /// Rationale string for `DecideProfile`'s second return value.
    pub fn high_profile_reason(&self) -> Option<&'static str> {
        if self.is_hevc() {
            Some("hevc/h.265 source requires transcode: browser-incompatible")
        } else if self.is_10bit_h264() {
            Some("10-bit h.264 source requires transcode: browser-incompatible")
        } else if self.is_mpeg2() {
            Some("mpeg-2 video requires transcode: browser-incompatible")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_stage_advances_once_then_terminates() {
        assert_eq!(
            RepairStage::CopyVideoAacAudio.next(),
            Some(RepairStage::CrfTranscode)
        );
        assert_eq!(RepairStage::CrfTranscode.next(), None);
    }

    #[test]
    fn hevc_source_requires_high_profile() {
        let info = StreamInfo {
            video_codec: "hevc".to_string(),
            ..Default::default()
        };
        assert!(info.high_profile_reason().is_some());
    }

    #[test]
    fn ten_bit_h264_requires_high_profile() {
        let info = StreamInfo {
            video_codec: "h264".to_string(),
            bit_depth: Some(10),
            ..Default::default()
        };
        assert!(info.high_profile_reason().is_some());

        let info_by_pixfmt = StreamInfo {
            video_codec: "h264".to_string(),
            pixel_format: Some("yuv420p10le".to_string()),
            ..Default::default()
        };
        assert!(info_by_pixfmt.high_profile_reason().is_some());
    }

    #[test]
    fn eight_bit_h264_does_not_require_high_profile() {
        let info = StreamInfo {
            video_codec: "h264".to_string(),
            bit_depth: Some(8),
            pixel_format: Some("yuv420p".to_string()),
            ..Default::default()
        };
        assert!(info.high_profile_reason().is_none());
    }

    #[test]
    fn mpeg2_requires_high_profile() {
        let info = StreamInfo {
            video_codec: "mpeg2video".to_string(),
            ..Default::default()
        };
        assert!(info.high_profile_reason().is_some());
    }
}
