//! In-process event bus: two topics, `EventStartSession` and
//! `EventStopSession`, at-least-once delivery, bounded subscription buffers
//! with publisher backpressure.

use std::sync::Mutex;

use async_trait::async_trait;
use streamctl_types::{CorrelationId, ReasonCode, SessionId};
use tokio::sync::mpsc;

/// `StartSessionEvent`.
#[derive(Clone, Debug)]
pub struct StartSessionEvent {
    pub session_id: SessionId,
    pub service_ref: String,
    pub profile_id: String,
    pub start_ms: i64,
    pub correlation_id: CorrelationId,
}

/// `StopSessionEvent`.
#[derive(Clone, Debug)]
pub struct StopSessionEvent {
    pub session_id: SessionId,
    pub reason: ReasonCode,
    pub correlation_id: CorrelationId,
}

/// A cancellable subscription handle ("a cancellable channel plus
/// a `Close()` method").
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    fn subscribe_start(&self) -> Subscription<StartSessionEvent>;
    fn subscribe_stop(&self) -> Subscription<StopSessionEvent>;
    async fn publish_start(&self, event: StartSessionEvent);
    async fn publish_stop(&self, event: StopSessionEvent);
}

/// The one bus implementation in this crate: bounded in-process mpsc
/// channels per topic. Each topic supports exactly one live subscriber at a
/// time; a second `subscribe_*` call
/// panics rather than silently returning a dead receiver, since that would
/// indicate a wiring bug, not a runtime condition.
pub struct InMemoryEventBus {
    start_tx: mpsc::Sender<StartSessionEvent>,
    start_rx: Mutex<Option<mpsc::Receiver<StartSessionEvent>>>,
    stop_tx: mpsc::Sender<StopSessionEvent>,
    stop_rx: Mutex<Option<mpsc::Receiver<StopSessionEvent>>>,
}

impl InMemoryEventBus {
    pub fn new(buffer: usize) -> Self {
        let (start_tx, start_rx) = mpsc::channel(buffer);
        let (stop_tx, stop_rx) = mpsc::channel(buffer);
        Self {
            start_tx,
            start_rx: Mutex::new(Some(start_rx)),
            stop_tx,
            stop_rx: Mutex::new(Some(stop_rx)),
        }
    }

    /// A clonable publishing handle for intake paths that live outside the
    /// orchestrator.
    pub fn publisher(&self) -> BusPublisher {
        BusPublisher { start_tx: self.start_tx.clone(), stop_tx: self.stop_tx.clone() }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    fn subscribe_start(&self) -> Subscription<StartSessionEvent> {
        let rx = self
            .start_rx
            .lock()
            .expect("bus mutex poisoned")
            .take()
            .expect("EventStartSession already has a live subscriber");
        Subscription { rx }
    }

    fn subscribe_stop(&self) -> Subscription<StopSessionEvent> {
        let rx = self
            .stop_rx
            .lock()
            .expect("bus mutex poisoned")
            .take()
            .expect("EventStopSession already has a live subscriber");
        Subscription { rx }
    }

    async fn publish_start(&self, event: StartSessionEvent) {
        if self.start_tx.send(event).await.is_err() {
            tracing::warn!("EventStartSession publish dropped: no subscriber");
        }
    }

    async fn publish_stop(&self, event: StopSessionEvent) {
        if self.stop_tx.send(event).await.is_err() {
            tracing::warn!("EventStopSession publish dropped: no subscriber");
        }
    }
}

/// A cheaply-clonable publish-only view of an [`InMemoryEventBus`].
#[derive(Clone)]
pub struct BusPublisher {
    start_tx: mpsc::Sender<StartSessionEvent>,
    stop_tx: mpsc::Sender<StopSessionEvent>,
}

impl BusPublisher {
    pub async fn publish_start(&self, event: StartSessionEvent) {
        let _ = self.start_tx.send(event).await;
    }

    pub async fn publish_stop(&self, event: StopSessionEvent) {
        let _ = self.stop_tx.send(event).await;
    }
}
