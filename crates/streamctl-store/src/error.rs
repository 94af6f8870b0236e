//! Store-level errors.

/// Errors the state store can surface. Distinct from `streamctl_types::ReasonError`:
/// this crate's errors are about the *store's* ability to do its job (not
/// found, poisoned lock, driver failure), not about session outcomes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("mutator aborted the update: {0}")]
    MutatorAborted(String),

    #[error("store lock poisoned")]
    LockPoisoned,

    #[error("sqlite driver error: {0}")]
    Driver(String),

    #[error("invalid session id: {0}")]
    InvalidId(#[from] streamctl_types::InvalidSessionId),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Driver(err.to_string())
    }
}
