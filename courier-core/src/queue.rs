use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, Mutex};

use crate::types::OutboundMessageEvent;

/// Returned by queue operations after `close()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue closed")
    }
}

impl std::error::Error for QueueClosed {}

/// A single receive of an event, carrying ack/nack callbacks supplied by the
/// queue implementation. The in-memory queue wires no-ops; a durable queue
/// would use them to commit or redeliver.
pub struct Delivery {
    pub event: OutboundMessageEvent,
    ack: Option<Box<dyn FnOnce() + Send>>,
    nack: Option<Box<dyn FnOnce(&anyhow::Error) + Send>>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

impl Delivery {
    pub fn new(
        event: OutboundMessageEvent,
        ack: Option<Box<dyn FnOnce() + Send>>,
        nack: Option<Box<dyn FnOnce(&anyhow::Error) + Send>>,
    ) -> Self {
        Self { event, ack, nack }
    }

    /// Mark the delivery as successfully processed.
    pub fn ack(mut self) {
        if let Some(f) = self.ack.take() {
            f();
        }
    }

    /// Mark the delivery as failed and eligible for redelivery.
    pub fn nack(mut self, err: &anyhow::Error) {
        if let Some(f) = self.nack.take() {
            f(err);
        }
    }
}

/// Minimal contract for the input-events queue.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Enqueue an event, suspending while the queue is full. Returns the
    /// event's idempotency key when the caller attached one, else empty.
    async fn publish(&self, evt: OutboundMessageEvent) -> Result<String, QueueClosed>;

    /// Block until a delivery is available or the queue is closed and drained.
    async fn receive(&self) -> Result<Delivery, QueueClosed>;

    /// Best-effort count of buffered events.
    fn depth(&self) -> usize;
}

/// Bounded in-memory FIFO for single-process deployments. Reliability comes
/// from the persist-then-publish ordering at intake: a lost publication still
/// has its message row, which a reconciliation pass can re-publish.
pub struct MemoryQueue {
    tx: StdMutex<Option<mpsc::Sender<OutboundMessageEvent>>>,
    rx: Mutex<mpsc::Receiver<OutboundMessageEvent>>,
    depth: AtomicUsize,
}

impl MemoryQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { 1024 } else { capacity };
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
        }
    }

    /// Idempotent. Publishers observe `QueueClosed` immediately; receivers
    /// drain buffered events first.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    fn sender(&self) -> Option<mpsc::Sender<OutboundMessageEvent>> {
        self.tx.lock().unwrap().clone()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn publish(&self, evt: OutboundMessageEvent) -> Result<String, QueueClosed> {
        let tx = self.sender().ok_or(QueueClosed)?;
        let key = evt.idempotency_key.clone().unwrap_or_default();
        tx.send(evt).await.map_err(|_| QueueClosed)?;
        self.depth.fetch_add(1, Ordering::Relaxed);
        Ok(key)
    }

    async fn receive(&self) -> Result<Delivery, QueueClosed> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(event) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                Ok(Delivery::new(event, None, None))
            }
            None => Err(QueueClosed),
        }
    }

    fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}
