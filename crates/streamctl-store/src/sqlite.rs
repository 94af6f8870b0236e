//! SQLite-backed `StateStore`: single-process, file-lock-backed
//! durability, atomic read-modify-write via an explicit `BEGIN IMMEDIATE`
//! transaction (SQLite has no row-level locking to rely on instead).
//!
//! A schema bootstrap step, a connection held behind a lock, and queries
//! built per call rather than prepared once, against `rusqlite`
//! (synchronous, so no `tokio::runtime`/`block_on` bridging is needed)
//! since this is meant to be a single-process file-lock store, not a
//! networked database.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use streamctl_types::{LeaseKey, LeaseRecord, SessionId, SessionRecord, SessionState};

use crate::{Mutator, SessionFilter, StateStore, StoreError};

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// A crude advisory lock: an exclusively-created sibling file, removed on
/// drop. Stands in for flock-style exclusivity (the store guarantees
/// single-writer access via a process lock) without pulling in a
/// platform-specific file-locking crate.
struct ProcessLock {
    path: PathBuf,
}

impl ProcessLock {
    fn acquire(db_path: &Path) -> Result<Self, StoreError> {
        let path = db_path.with_extension("lock");
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                StoreError::Driver(format!(
                    "failed to acquire exclusive store lock at {}: {e}",
                    path.display()
                ))
            })?;
        Ok(Self { path })
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct SqliteStateStore {
    conn: Mutex<Connection>,
    _lock: ProcessLock,
}

impl SqliteStateStore {
    /// Opens (creating if needed) a SQLite-backed store at `db_path`,
    /// bootstrapping its schema and taking the process lock.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        let lock = ProcessLock::acquire(db_path)?;
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS sessions (
                 id TEXT PRIMARY KEY,
                 state TEXT NOT NULL,
                 updated_at_unix INTEGER NOT NULL,
                 payload TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state);
             CREATE INDEX IF NOT EXISTS idx_sessions_updated_at ON sessions(updated_at_unix);
             CREATE TABLE IF NOT EXISTS leases (
                 key TEXT PRIMARY KEY,
                 owner TEXT NOT NULL,
                 expires_at_ms INTEGER NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            _lock: lock,
        })
    }

    fn load_row(conn: &Connection, id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM sessions WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match payload {
            Some(json) => Some(serde_json::from_str(&json).map_err(|e| StoreError::Driver(e.to_string()))?),
            None => None,
        })
    }

    fn write_row(conn: &Connection, record: &SessionRecord) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record).map_err(|e| StoreError::Driver(e.to_string()))?;
        let state_label = format!("{:?}", record.state);
        conn.execute(
            "INSERT INTO sessions (id, state, updated_at_unix, payload) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state,
                 updated_at_unix = excluded.updated_at_unix, payload = excluded.payload",
            params![record.id.as_str(), state_label, record.updated_at_unix, payload],
        )?;
        Ok(())
    }
}

impl StateStore for SqliteStateStore {
    fn get_session(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        Self::load_row(&conn, id)
    }

    fn put_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        Self::write_row(&conn, &record)
    }

    fn update_session(
        &self,
        id: &SessionId,
        mutator: &mut Mutator<'_>,
    ) -> Result<SessionRecord, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let mut record = {
            let payload: Option<String> = tx
                .query_row(
                    "SELECT payload FROM sessions WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            match payload {
                Some(json) => serde_json::from_str(&json).map_err(|e| StoreError::Driver(e.to_string()))?,
                None => return Err(StoreError::NotFound(id.to_string())),
            }
        };
        mutator(&mut record)?;
        record.state_gen += 1;
        record.updated_at_unix = Utc::now().timestamp();
        let payload = serde_json::to_string(&record).map_err(|e| StoreError::Driver(e.to_string()))?;
        let state_label = format!("{:?}", record.state);
        tx.execute(
            "UPDATE sessions SET state = ?2, updated_at_unix = ?3, payload = ?4 WHERE id = ?1",
            params![id.as_str(), state_label, record.updated_at_unix, payload],
        )?;
        tx.commit().map_err(StoreError::from)?;
        Ok(record)
    }

    fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![id.as_str()])?;
        Ok(())
    }

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut stmt = conn.prepare("SELECT payload FROM sessions")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            let json = row?;
            let record: SessionRecord =
                serde_json::from_str(&json).map_err(|e| StoreError::Driver(e.to_string()))?;
            if filter.matches(&record) {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn try_acquire_lease(
        &self,
        key: &LeaseKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<(LeaseRecord, bool), StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let now = Utc::now();
        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT owner, expires_at_ms FROM leases WHERE key = ?1",
                params![key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let free = match &existing {
            None => true,
            Some((existing_owner, expires_at_ms)) => {
                ms_to_dt(*expires_at_ms) <= now || existing_owner == owner
            }
        };
        if !free {
            let (existing_owner, expires_at_ms) = existing.unwrap();
            return Ok((
                LeaseRecord {
                    key: key.clone(),
                    owner: existing_owner,
                    expires_at: ms_to_dt(expires_at_ms),
                },
                false,
            ));
        }
        let expires_at = now + ttl;
        tx.execute(
            "INSERT INTO leases (key, owner, expires_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET owner = excluded.owner, expires_at_ms = excluded.expires_at_ms",
            params![key.as_str(), owner, dt_to_ms(expires_at)],
        )?;
        tx.commit().map_err(StoreError::from)?;
        Ok((
            LeaseRecord {
                key: key.clone(),
                owner: owner.to_string(),
                expires_at,
            },
            true,
        ))
    }

    fn renew_lease(
        &self,
        key: &LeaseKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<(LeaseRecord, bool), StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let now = Utc::now();
        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT owner, expires_at_ms FROM leases WHERE key = ?1",
                params![key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match existing {
            Some((existing_owner, expires_at_ms))
                if existing_owner == owner && ms_to_dt(expires_at_ms) > now =>
            {
                let expires_at = now + ttl;
                tx.execute(
                    "UPDATE leases SET expires_at_ms = ?2 WHERE key = ?1",
                    params![key.as_str(), dt_to_ms(expires_at)],
                )?;
                tx.commit().map_err(StoreError::from)?;
                Ok((
                    LeaseRecord {
                        key: key.clone(),
                        owner: owner.to_string(),
                        expires_at,
                    },
                    true,
                ))
            }
            Some((existing_owner, expires_at_ms)) => Ok((
                LeaseRecord {
                    key: key.clone(),
                    owner: existing_owner,
                    expires_at: ms_to_dt(expires_at_ms),
                },
                false,
            )),
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
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute(
            "DELETE FROM leases WHERE key = ?1 AND owner = ?2",
            params![key.as_str(), owner],
        )?;
        Ok(())
    }

    fn delete_all_leases(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let count = conn.execute("DELETE FROM leases", [])?;
        Ok(count as u64)
    }

    fn prune_metadata(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
        max_entries: usize,
    ) -> Result<u64, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let cutoff = (now - ttl).timestamp();
        let terminal_labels = [
            format!("{:?}", SessionState::Stopped),
            format!("{:?}", SessionState::Failed),
            format!("{:?}", SessionState::Succeeded),
        ];
        let mut pruned: u64 = 0;
        for label in &terminal_labels {
            pruned += conn.execute(
                "DELETE FROM sessions WHERE state = ?1 AND updated_at_unix < ?2",
                params![label, cutoff],
            )? as u64;
        }
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        if (total as usize) > max_entries {
            let overflow = total as usize - max_entries;
            pruned += conn.execute(
                "DELETE FROM sessions WHERE id IN (
                     SELECT id FROM sessions ORDER BY updated_at_unix ASC LIMIT ?1
                 )",
                params![overflow as i64],
            )? as u64;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamctl_types::{Mode, ProfileSpec};
    use tempfile::tempdir;

    fn record(id: &str) -> SessionRecord {
        SessionRecord::new(SessionId::parse(id).unwrap(), "svc", ProfileSpec::Default, Mode::Live)
    }

    #[test]
    fn put_then_get_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let store = SqliteStateStore::open(dir.path().join("state.db")).unwrap();
        let id = SessionId::parse("s1").unwrap();
        store.put_session(record("s1")).unwrap();
        let fetched = store.get_session(&id).unwrap().unwrap();
        assert_eq!(fetched.id, id);
    }

    #[test]
    fn opening_the_same_db_twice_fails_the_process_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let _first = SqliteStateStore::open(&path).unwrap();
        let second = SqliteStateStore::open(&path);
        assert!(second.is_err());
    }

    #[test]
    fn update_session_persists_across_reopen_of_the_connection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let id = SessionId::parse("s1").unwrap();
        {
            let store = SqliteStateStore::open(&path).unwrap();
            store.put_session(record("s1")).unwrap();
            store
                .update_session(&id, &mut |r| {
                    r.reason_detail = "updated".to_string();
                    Ok(())
                })
                .unwrap();
        }
        // Process lock file is removed on drop, so reopening is legal.
        let store = SqliteStateStore::open(&path).unwrap();
        let fetched = store.get_session(&id).unwrap().unwrap();
        assert_eq!(fetched.reason_detail, "updated");
        assert_eq!(fetched.state_gen, 1);
    }

    #[test]
    fn lease_try_acquire_then_release_then_reacquire() {
        let dir = tempdir().unwrap();
        let store = SqliteStateStore::open(dir.path().join("state.db")).unwrap();
        let key = LeaseKey::tuner(0);
        let (_, acquired) = store.try_acquire_lease(&key, "w1", Duration::seconds(30)).unwrap();
        assert!(acquired);
        let (_, blocked) = store.try_acquire_lease(&key, "w2", Duration::seconds(30)).unwrap();
        assert!(!blocked);
        store.release_lease(&key, "w1").unwrap();
        let (_, reacquired) = store.try_acquire_lease(&key, "w2", Duration::seconds(30)).unwrap();
        assert!(reacquired);
    }
}
