//! The concurrent cancellation registry: a map from
//! `session_id` to the cancel handle for its currently-active start
//! handler. `Stop` consults it to trigger in-process cancellation; entries
//! are removed when the start handler returns.
//!
//! Guarded by a plain `std::sync::Mutex`, never held across an `.await`
//!.

use std::collections::HashMap;
use std::sync::Mutex;

use streamctl_types::SessionId;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct CancellationRegistry {
    inner: Mutex<HashMap<SessionId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: SessionId, token: CancellationToken) {
        self.inner.lock().expect("registry mutex poisoned").insert(id, token);
    }

    pub fn cancel(&self, id: &SessionId) -> bool {
        match self.inner.lock().expect("registry mutex poisoned").get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &SessionId) {
        self.inner.lock().expect("registry mutex poisoned").remove(id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every registered handler: orchestrator shutdown fans out to
    /// every session's cancel handle.
    pub fn cancel_all(&self) {
        for token in self.inner.lock().expect("registry mutex poisoned").values() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamctl_types::SessionId;

    #[test]
    fn cancel_of_unregistered_session_reports_false() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel(&SessionId::parse("s1").unwrap()));
    }

    #[test]
    fn register_then_cancel_fires_the_token() {
        let registry = CancellationRegistry::new();
        let id = SessionId::parse("s1").unwrap();
        let token = CancellationToken::new();
        registry.register(id.clone(), token.clone());
        assert!(registry.cancel(&id));
        assert!(token.is_cancelled());
    }

    #[test]
    fn remove_drops_the_entry() {
        let registry = CancellationRegistry::new();
        let id = SessionId::parse("s1").unwrap();
        registry.register(id.clone(), CancellationToken::new());
        assert_eq!(registry.len(), 1);
        registry.remove(&id);
        assert_eq!(registry.len(), 0);
    }
}
