//! Injectable clock: every heartbeat/stall
//! comparison goes through this trait. Wall-clock is forbidden in the
//! heartbeat path; tests drive [`MockClock`] explicitly instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Blocks until the next tick worth checking liveness against. For
    /// [`SystemClock`] this is a short wall-clock sleep; for [`MockClock`]
    /// it resolves exactly when a test calls [`MockClock::advance`].
    async fn tick(&self);
}

/// Real clock, used outside tests.
pub struct SystemClock {
    poll_interval: std::time::Duration,
}

impl SystemClock {
    pub fn new(poll_interval: std::time::Duration) -> Self {
        Self { poll_interval }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(std::time::Duration::from_millis(200))
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn tick(&self) {
        tokio::time::sleep(self.poll_interval).await;
    }
}

struct MockClockState {
    now: DateTime<Utc>,
}

/// Deterministic clock for tests. `advance` moves time forward and wakes
/// every task blocked in `tick`, which then re-checks `now()` against
/// whatever deadline it is watching.
pub struct MockClock {
    state: std::sync::Mutex<MockClockState>,
    notify: Notify,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { state: std::sync::Mutex::new(MockClockState { now: start }), notify: Notify::new() }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        {
            let mut state = self.state.lock().expect("mock clock mutex poisoned");
            state.now += delta;
        }
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().expect("mock clock mutex poisoned").now
    }

    async fn tick(&self) {
        self.notify.notified().await;
    }
}
