//! The playlist-readiness gate:
//! the manifest must exist, be non-empty, contain `#EXTM3U`, and reference a
//! segment (first for LIVE, last for VOD) that itself exists with nonzero
//! size.

use std::path::Path;

use streamctl_adapters::Fs;
use streamctl_types::Mode;

fn segment_lines(manifest: &str) -> impl Iterator<Item = &str> {
    manifest.lines().map(str::trim).filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Picks the segment URI the gate must verify: the first for LIVE (we only
/// need proof the stream has started), the last for VOD (proof the whole
/// build, not just its opening segment, landed on disk).
fn gate_segment_uri(manifest: &str, mode: Mode) -> Option<&str> {
    match mode {
        Mode::Live => segment_lines(manifest).next(),
        Mode::Recording => segment_lines(manifest).last(),
    }
}

/// The result of one gate check: whether the manifest+segment are ready,
/// and (if not) whether any segment has been written at all — used by the
/// corruption classifier in step 9 ("no segment was written").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateCheck {
    pub ready: bool,
    pub any_segment_written: bool,
}

pub async fn check_playlist_ready(fs: &dyn Fs, session_dir: &Path, mode: Mode) -> GateCheck {
    let manifest_path = session_dir.join("index.m3u8");
    let Ok(manifest) = fs.read_to_string(&manifest_path).await else {
        return GateCheck { ready: false, any_segment_written: false };
    };
    if manifest.is_empty() || !manifest.contains("#EXTM3U") {
        return GateCheck { ready: false, any_segment_written: false };
    }

    let mut any_segment_written = false;
    for uri in segment_lines(&manifest) {
        if let Some(size) = fs.file_size(&session_dir.join(uri)).await {
            if size > 0 {
                any_segment_written = true;
                break;
            }
        }
    }

    let ready = match gate_segment_uri(&manifest, mode) {
        None => false,
        Some(uri) => matches!(fs.file_size(&session_dir.join(uri)).await, Some(size) if size > 0),
    };

    GateCheck { ready, any_segment_written }
}

/// Polls [`check_playlist_ready`] until it reports ready or `timeout`
/// elapses. Returns `Some(())` on success, `None` on timeout — the caller
/// is responsible for the corruption-vs-packager-failed
/// classification on a `None`.
pub async fn poll_until_ready(
    fs: &dyn Fs,
    session_dir: &Path,
    mode: Mode,
    timeout: std::time::Duration,
) -> Option<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let check = check_playlist_ready(fs, session_dir, mode).await;
        if check.ready {
            return Some(());
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep_until(std::cmp::min(
            tokio::time::Instant::now() + std::time::Duration::from_millis(100),
            deadline,
        ))
        .await;
    }
}

/// Whether any segment exists on disk at all, used by the caller when a
/// poll times out to decide corruption-vs-packager-failed independent of
/// the last `check_playlist_ready` call.
pub async fn any_segment_written(fs: &dyn Fs, session_dir: &Path, mode: Mode) -> bool {
    check_playlist_ready(fs, session_dir, mode).await.any_segment_written
}
