//! Lease Manager: a thin wrapper over the state store's lease
//! primitives plus a key-naming convention, and stale-lease recovery.
//!
//! Modeled as a trait (`LeaseManager`) and one generic implementation
//! composed over a store, rather than talking to a backing database
//! directly.

use chrono::Duration;
use streamctl_store::{SessionFilter, StateStore, StoreError};
use streamctl_types::{LeaseKey, LeaseRecord, SessionId, SessionState};
use tracing::{info, instrument, warn};

/// Lease coordination abstraction. Implementations never talk to
/// a backing database directly — only through a `StateStore`.
pub trait LeaseManager: Send + Sync {
    /// Attempts to acquire `key` for `owner`. Returns `(lease, acquired)`.
    fn try_acquire(
        &self,
        key: &LeaseKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<(LeaseRecord, bool), StoreError>;

    /// Renews `key` for `owner` if still held by them. Returns `(lease, renewed)`.
    /// Callers treat `renewed == false` as a terminal signal for whatever the
    /// lease was protecting.
    fn renew(
        &self,
        key: &LeaseKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<(LeaseRecord, bool), StoreError>;

    /// Idempotent release; releasing a lease you don't own is a no-op.
    fn release(&self, key: &LeaseKey, owner: &str) -> Result<(), StoreError>;
}

/// The one real `LeaseManager` implementation, composed over any `StateStore`.
pub struct StoreLeaseManager<S: StateStore> {
    store: S,
}

impl<S: StateStore> StoreLeaseManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: StateStore> LeaseManager for StoreLeaseManager<S> {
    #[instrument(skip(self), fields(key = %key.as_str(), owner))]
    fn try_acquire(
        &self,
        key: &LeaseKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<(LeaseRecord, bool), StoreError> {
        let (lease, acquired) = self.store.try_acquire_lease(key, owner, ttl)?;
        if acquired {
            info!("lease acquired");
        } else {
            warn!("lease busy");
        }
        Ok((lease, acquired))
    }

    #[instrument(skip(self), fields(key = %key.as_str(), owner))]
    fn renew(
        &self,
        key: &LeaseKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<(LeaseRecord, bool), StoreError> {
        let (lease, renewed) = self.store.renew_lease(key, owner, ttl)?;
        if !renewed {
            warn!("lease renewal failed, lease lost");
        }
        Ok((lease, renewed))
    }

    #[instrument(skip(self), fields(key = %key.as_str(), owner))]
    fn release(&self, key: &LeaseKey, owner: &str) -> Result<(), StoreError> {
        self.store.release_lease(key, owner)
    }
}

/// Outcome of a single session's stale-lease probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// The session's leases were stale; it was reset to `New`.
    Reset,
    /// A live owner still holds at least one of the session's leases; left alone.
    LeftAlone,
}

/// Per-session probe-and-reset recovery: derive
/// the expected lease keys from the record's context, probe each with a
/// throwaway owner and tiny TTL, and reset to `New` only if every key was
/// free.
#[instrument(skip(store))]
pub fn recover_stale_leases<S: StateStore>(
    store: &S,
) -> Result<Vec<(SessionId, RecoveryAction)>, StoreError> {
    let non_terminal = store.list_sessions(&SessionFilter {
        states: non_terminal_states(),
        updated_before: None,
    })?;

    let probe_ttl = Duration::milliseconds(50);
    let mut results = Vec::with_capacity(non_terminal.len());

    for record in non_terminal {
        let mut keys = Vec::new();
        keys.push(LeaseKey::service(&record.service_ref));
        if let Some(slot) = record.context.tuner_slot() {
            keys.push(LeaseKey::tuner(slot));
        }

        let probe_owner = format!("recovery-probe:{}", record.id);
        let mut all_free = true;
        let mut acquired_probes = Vec::new();
        for key in &keys {
            let (_, acquired) = store.try_acquire_lease(key, &probe_owner, probe_ttl)?;
            if acquired {
                acquired_probes.push(key.clone());
            } else {
                all_free = false;
            }
        }
        for key in &acquired_probes {
            store.release_lease(key, &probe_owner)?;
        }

        let action = if all_free {
            let id = record.id.clone();
            store.update_session(&id, &mut |r| {
                r.state = SessionState::New;
                r.context.set_recovered();
                Ok(())
            })?;
            info!(session_id = %record.id, "stale leases recovered, session reset to New");
            RecoveryAction::Reset
        } else {
            warn!(session_id = %record.id, "live owner still holds a lease, leaving session alone");
            RecoveryAction::LeftAlone
        };
        results.push((record.id, action));
    }

    Ok(results)
}

/// Flush-then-reset-all recovery: used when
/// the store can assert single-writer exclusivity, which holds for every
/// `StateStore` in this crate (the SQLite store's process lock, or the
/// in-process store's exclusive ownership).
#[instrument(skip(store))]
pub fn recover_by_flushing_all_leases<S: StateStore>(store: &S) -> Result<Vec<SessionId>, StoreError> {
    let flushed = store.delete_all_leases()?;
    info!(flushed, "flushed all leases ahead of full session reset");

    let non_terminal = store.list_sessions(&SessionFilter {
        states: non_terminal_states(),
        updated_before: None,
    })?;
    let mut reset = Vec::with_capacity(non_terminal.len());
    for record in non_terminal {
        let id = record.id.clone();
        store.update_session(&id, &mut |r| {
            r.state = SessionState::New;
            r.context.set_recovered();
            Ok(())
        })?;
        reset.push(id);
    }
    info!(count = reset.len(), "non-terminal sessions reset to New");
    Ok(reset)
}

fn non_terminal_states() -> Vec<SessionState> {
    vec![
        SessionState::New,
        SessionState::Starting,
        SessionState::Priming,
        SessionState::Ready,
        SessionState::Stopping,
        SessionState::Draining,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamctl_store::InMemoryStateStore;
    use streamctl_types::{Mode, ProfileSpec, SessionRecord};

    fn live_record(id: &str, service_ref: &str) -> SessionRecord {
        let mut record = SessionRecord::new(
            SessionId::parse(id).unwrap(),
            service_ref,
            ProfileSpec::Default,
            Mode::Live,
        );
        record.state = SessionState::Ready;
        record.context.set_tuner_slot(0);
        record
    }

    #[test]
    fn try_acquire_then_renew_then_release_round_trips() {
        let store = InMemoryStateStore::new();
        let manager = StoreLeaseManager::new(store);
        let key = LeaseKey::tuner(0);

        let (_, acquired) = manager.try_acquire(&key, "owner-a", Duration::seconds(30)).unwrap();
        assert!(acquired);

        let (_, renewed) = manager.renew(&key, "owner-a", Duration::seconds(30)).unwrap();
        assert!(renewed);

        manager.release(&key, "owner-a").unwrap();
        let (_, reacquired) = manager.try_acquire(&key, "owner-b", Duration::seconds(30)).unwrap();
        assert!(reacquired);
    }

    #[test]
    fn renewal_by_a_non_owner_reports_lease_loss() {
        let store = InMemoryStateStore::new();
        let manager = StoreLeaseManager::new(store);
        let key = LeaseKey::service("bbc1");
        manager.try_acquire(&key, "owner-a", Duration::seconds(30)).unwrap();
        let (_, renewed) = manager.renew(&key, "owner-b", Duration::seconds(30)).unwrap();
        assert!(!renewed);
    }

    #[test]
    fn stale_lease_recovery_resets_sessions_whose_leases_are_free() {
        let store = InMemoryStateStore::new();
        store.put_session(live_record("s1", "bbc1")).unwrap();
        // No lease is actually held for s1's tuner/service keys, so the probe
        // should find both free and reset the session.
        let results = recover_stale_leases(&store).unwrap();
        assert_eq!(results, vec![(SessionId::parse("s1").unwrap(), RecoveryAction::Reset)]);
        let fetched = store.get_session(&SessionId::parse("s1").unwrap()).unwrap().unwrap();
        assert_eq!(fetched.state, SessionState::New);
        assert!(fetched.context.is_recovered());
    }

    #[test]
    fn stale_lease_recovery_leaves_sessions_alone_when_a_live_owner_holds_the_lease() {
        let store = InMemoryStateStore::new();
        store.put_session(live_record("s1", "bbc1")).unwrap();
        store
            .try_acquire_lease(&LeaseKey::tuner(0), "still-alive-owner", Duration::seconds(30))
            .unwrap();

        let results = recover_stale_leases(&store).unwrap();
        assert_eq!(
            results,
            vec![(SessionId::parse("s1").unwrap(), RecoveryAction::LeftAlone)]
        );
        let fetched = store.get_session(&SessionId::parse("s1").unwrap()).unwrap().unwrap();
        assert_eq!(fetched.state, SessionState::Ready);
    }

    #[test]
    fn flush_then_reset_all_clears_every_lease_and_resets_every_non_terminal_session() {
        let store = InMemoryStateStore::new();
        store.put_session(live_record("s1", "bbc1")).unwrap();
        store.put_session(live_record("s2", "bbc2")).unwrap();
        store
            .try_acquire_lease(&LeaseKey::tuner(0), "owner-a", Duration::seconds(30))
            .unwrap();

        let reset = recover_by_flushing_all_leases(&store).unwrap();
        assert_eq!(reset.len(), 2);
        for id in ["s1", "s2"] {
            let fetched = store.get_session(&SessionId::parse(id).unwrap()).unwrap().unwrap();
            assert_eq!(fetched.state, SessionState::New);
        }
        assert_eq!(store.delete_all_leases().unwrap(), 0);
    }
}
