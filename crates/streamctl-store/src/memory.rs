//! In-memory `StateStore`, used by tests and by embedders that don't need
//! cross-restart durability.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use streamctl_types::{LeaseKey, LeaseRecord, SessionId, SessionRecord};

use crate::{Mutator, SessionFilter, StateStore, StoreError};

#[derive(Default)]
pub struct InMemoryStateStore {
    sessions: Mutex<HashMap<SessionId, SessionRecord>>,
    leases: Mutex<HashMap<LeaseKey, LeaseRecord>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let sessions = self.sessions.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sessions.get(id).cloned())
    }

    fn put_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::LockPoisoned)?;
        sessions.insert(record.id.clone(), record);
        Ok(())
    }

    fn update_session(
        &self,
        id: &SessionId,
        mutator: &mut Mutator<'_>,
    ) -> Result<SessionRecord, StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::LockPoisoned)?;
        let record = sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut next = record;
        mutator(&mut next)?;
        next.state_gen += 1;
        next.updated_at_unix = Utc::now().timestamp();
        sessions.insert(id.clone(), next.clone());
        Ok(next)
    }

    fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::LockPoisoned)?;
        sessions.remove(id);
        Ok(())
    }

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>, StoreError> {
        let sessions = self.sessions.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sessions
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }

    fn try_acquire_lease(
        &self,
        key: &LeaseKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<(LeaseRecord, bool), StoreError> {
        let mut leases = self.leases.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Utc::now();
        let free = match leases.get(key) {
            None => true,
            Some(existing) => existing.is_expired(now) || existing.owner == owner,
        };
        if free {
            let lease = LeaseRecord {
                key: key.clone(),
                owner: owner.to_string(),
                expires_at: now + ttl,
            };
            leases.insert(key.clone(), lease.clone());
            Ok((lease, true))
        } else {
            Ok((leases.get(key).cloned().unwrap(), false))
        }
    }

    fn renew_lease(
        &self,
        key: &LeaseKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<(LeaseRecord, bool), StoreError> {
        let mut leases = self.leases.lock().map_err(|_| StoreError::LockPoisoned)?;
        let now = Utc::now();
        match leases.get(key) {
            Some(existing) if existing.owner == owner && !existing.is_expired(now) => {
                let lease = LeaseRecord {
                    key: key.clone(),
                    owner: owner.to_string(),
                    expires_at: now + ttl,
                };
                leases.insert(key.clone(), lease.clone());
                Ok((lease, true))
            }
            Some(existing) => Ok((existing.clone(), false)),
            None => Ok((
                LeaseRecord {
                    key: key.clone(),
                    owner: owner.to_string(),
                    expires_at: now,
                },
                false,
            )),
        }
    }

    fn release_lease(&self, key: &LeaseKey, owner: &str) -> Result<(), StoreError> {
        let mut leases = self.leases.lock().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(existing) = leases.get(key) {
            if existing.owner == owner {
                leases.remove(key);
            }
        }
        Ok(())
    }

    fn delete_all_leases(&self) -> Result<u64, StoreError> {
        let mut leases = self.leases.lock().map_err(|_| StoreError::LockPoisoned)?;
        let count = leases.len() as u64;
        leases.clear();
        Ok(count)
    }

    fn prune_metadata(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        max_entries: usize,
    ) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::LockPoisoned)?;
        let cutoff = (now - ttl).timestamp();
        let stale: Vec<SessionId> = sessions
            .values()
            .filter(|r| r.state.is_terminal() && r.updated_at_unix < cutoff)
            .map(|r| r.id.clone())
            .collect();
        let mut pruned = 0u64;
        for id in stale {
            sessions.remove(&id);
            pruned += 1;
        }
        if sessions.len() > max_entries {
            let mut remaining: Vec<SessionRecord> = sessions.values().cloned().collect();
            remaining.sort_by_key(|r| r.updated_at_unix);
            let overflow = remaining.len() - max_entries;
            for record in remaining.into_iter().take(overflow) {
                sessions.remove(&record.id);
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}
