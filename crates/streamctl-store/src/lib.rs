//! The State Store: durable session records and leases behind an
//! atomic read-modify-write primitive, with single-process exclusivity.

mod error;
mod memory;
mod sqlite;

pub use error::StoreError;
pub use memory::InMemoryStateStore;
pub use sqlite::SqliteStateStore;

use chrono::{DateTime, Utc};
use streamctl_types::{LeaseKey, LeaseRecord, SessionId, SessionRecord, SessionState};

/// Filter for `list_sessions`.
#[derive(Clone, Debug, Default)]
pub struct SessionFilter {
    /// Only sessions currently in one of these states. Empty means "any".
    pub states: Vec<SessionState>,
    /// Only sessions not updated since before this instant.
    pub updated_before: Option<DateTime<Utc>>,
}

impl SessionFilter {
    pub fn matches(&self, record: &SessionRecord) -> bool {
        if !self.states.is_empty() && !self.states.contains(&record.state) {
            return false;
        }
        if let Some(cutoff) = self.updated_before {
            if record.updated_at_unix >= cutoff.timestamp() {
                return false;
            }
        }
        true
    }
}

/// The mutator callback passed to `update_session`. It sees a fresh copy of
/// the record and may abort the whole update by returning `Err`.
pub type Mutator<'a> = dyn FnMut(&mut SessionRecord) -> Result<(), StoreError> + 'a;

/// The State Store contract. All mutations are serialized
/// per-key; the store guarantees `UpdateSession`'s mutator runs against a
/// fresh copy and that the persisted result reflects exactly what the
/// mutator produced, with `StateGen`/`UpdatedAtUnix` bumped unconditionally
/// on every successful call.
pub trait StateStore: Send + Sync {
    fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError>;

    fn put_session(&self, record: SessionRecord) -> Result<(), StoreError>;

    /// Atomic read-modify-write. Returns the persisted record.
    fn update_session(
        &self,
        id: &SessionId,
        mutator: &mut Mutator<'_>,
    ) -> Result<SessionRecord, StoreError>;

    fn delete_session(&self, id: &SessionId) -> Result<(), StoreError>;

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>, StoreError>;

    /// Returns `(lease, acquired)`. `acquired` is `true` only if the key was
    /// free or its prior lease had expired.
    fn try_acquire_lease(
        &self,
        key: &LeaseKey,
        owner: &str,
        ttl: chrono::Duration,
    ) -> Result<(LeaseRecord, bool), StoreError>;

    /// Returns `(lease, renewed)`. `renewed` is `true` only if `owner` holds
    /// the current, unexpired lease.
    fn renew_lease(
        &self,
        key: &LeaseKey,
        owner: &str,
        ttl: chrono::Duration,
    ) -> Result<(LeaseRecord, bool), StoreError>;

    /// Idempotent; releasing a lease you don't own is a no-op.
    fn release_lease(&self, key: &LeaseKey, owner: &str) -> Result<(), StoreError>;

    /// Discards every lease unconditionally. Used at startup once the store
    /// has asserted single-writer exclusivity.
    fn delete_all_leases(&self) -> Result<u64, StoreError>;

    /// TTL eviction first, then oldest-first truncation to `max_entries`.
    fn prune_metadata(
        &self,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
        max_entries: usize,
    ) -> Result<u64, StoreError>;
}
