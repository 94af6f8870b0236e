//! Lease key namespace and the on-disk lease shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A canonical lease key. Only two shapes are legal: `tuner:<slot>`
/// and `service:<ref>`. Changing the scheme is a breaking change, so the
/// constructors are the only place that formats them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseKey(String);

impl LeaseKey {
    pub fn tuner(slot: u32) -> Self {
        Self(format!("tuner:{slot}"))
    }

    pub fn service(service_ref: &str) -> Self {
        Self(format!("service:{service_ref}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A held or expired lease as returned by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub key: LeaseKey,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
