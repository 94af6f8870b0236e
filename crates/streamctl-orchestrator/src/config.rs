//! `OrchestratorConfig`: every timeout,
//! TTL, and slot list the orchestrator needs, loadable from a TOML file the
//! way a surrounding deployment's config loader would produce one (that
//! loader itself is out of scope — this is the typed seam it
//! fills).

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Every timeout, TTL, the tuner slot pool, and `hls_root`. Every `*_secs`
/// field is TOML-friendly (plain integers); callers needing a typed
/// duration use the accessor methods.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Root of the HLS artifact tree: `<hls_root>/sessions/<id>`.
    pub hls_root: PathBuf,
    /// The fixed pool of tuner slot integers.
    pub tuner_slots: Vec<u32>,
    /// `LeaseTTL`, default 30s.
    pub lease_ttl_secs: u64,
    /// Dedup lease TTL. Intentionally independent of the tuner lease's
    /// TTL: the dedup lease is transient, so a shorter TTL is appropriate.
    /// Defaults to a quarter of `lease_ttl_secs`, resolved explicitly when
    /// `dedup_lease_ttl_secs` is left at its sentinel `0`.
    pub dedup_lease_ttl_secs: u64,
    /// `HeartbeatEvery`, default 10s.
    pub heartbeat_every_secs: u64,
    /// Deadline for the tuner adapter's `Tune` call; a deadline exceeded
    /// here maps to `TuneTimeout`. Explicit and configurable rather than
    /// hardcoded, defaulting to 10s.
    pub tune_timeout_secs: u64,
    /// Playlist readiness timeout, LIVE sessions. Default 10s.
    pub playlist_ready_timeout_live_secs: u64,
    /// Playlist readiness timeout, VOD sessions. Default 120s (2min).
    pub playlist_ready_timeout_vod_secs: u64,
    /// Playlist readiness timeout on the single repair-retry attempt.
    /// Default 20s.
    pub playlist_ready_timeout_repair_secs: u64,
    /// Stop grace before a kill signal. Default 2s.
    pub stop_grace_secs: u64,
    /// Kill delay after grace elapses. Default 5s.
    pub stop_kill_secs: u64,
    /// How long a terminal session record (and its recovery-probe leases)
    /// must sit untouched before the sweeper reclaims it.
    /// Default 300s.
    pub retention_secs: u64,
    /// Explicit sweeper interval override. `None` resolves to the formula
    /// `min(5min, idle_timeout/2, floor 10s)`, reading `retention_secs` as
    /// the idle timeout.
    pub sweeper_interval_secs: Option<u64>,
    /// TTL used for the throwaway probe lease during stale-lease recovery.
    /// Default 50ms.
    pub recovery_probe_ttl_millis: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            hls_root: PathBuf::from("/var/lib/streamctl/hls"),
            tuner_slots: Vec::new(),
            lease_ttl_secs: 30,
            dedup_lease_ttl_secs: 0,
            heartbeat_every_secs: 10,
            tune_timeout_secs: 10,
            playlist_ready_timeout_live_secs: 10,
            playlist_ready_timeout_vod_secs: 120,
            playlist_ready_timeout_repair_secs: 20,
            stop_grace_secs: 2,
            stop_kill_secs: 5,
            retention_secs: 300,
            sweeper_interval_secs: None,
            recovery_probe_ttl_millis: 50,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

impl OrchestratorConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        Self::from_toml_str(&raw)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::seconds(self.lease_ttl_secs as i64)
    }

    /// Defaults to a quarter of `lease_ttl`, unless the operator set an
    /// explicit `dedup_lease_ttl_secs`.
    pub fn dedup_lease_ttl(&self) -> Duration {
        if self.dedup_lease_ttl_secs == 0 {
            Duration::seconds((self.lease_ttl_secs / 4).max(1) as i64)
        } else {
            Duration::seconds(self.dedup_lease_ttl_secs as i64)
        }
    }

    pub fn heartbeat_every(&self) -> StdDuration {
        StdDuration::from_secs(self.heartbeat_every_secs)
    }

    pub fn tune_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.tune_timeout_secs)
    }

    pub fn playlist_ready_timeout(&self, during_repair: bool, mode_is_recording: bool) -> StdDuration {
        if during_repair {
            StdDuration::from_secs(self.playlist_ready_timeout_repair_secs)
        } else if mode_is_recording {
            StdDuration::from_secs(self.playlist_ready_timeout_vod_secs)
        } else {
            StdDuration::from_secs(self.playlist_ready_timeout_live_secs)
        }
    }

    pub fn stop_grace(&self) -> StdDuration {
        StdDuration::from_secs(self.stop_grace_secs)
    }

    pub fn stop_kill(&self) -> StdDuration {
        StdDuration::from_secs(self.stop_kill_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::seconds(self.retention_secs as i64)
    }

    pub fn recovery_probe_ttl(&self) -> Duration {
        Duration::milliseconds(self.recovery_probe_ttl_millis as i64)
    }

    /// `min(5min, idle_timeout/2, floor 10s)`, i.e. half the
    /// retention window, clamped between 10s and 5 minutes.
    pub fn sweeper_interval(&self) -> StdDuration {
        if let Some(secs) = self.sweeper_interval_secs {
            return StdDuration::from_secs(secs);
        }
        let half_retention = StdDuration::from_secs(self.retention_secs / 2);
        half_retention.clamp(StdDuration::from_secs(10), StdDuration::from_secs(300))
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.hls_root.join("sessions")
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(session_id)
    }
}
