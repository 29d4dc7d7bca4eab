// SensorCache - Sensor telemetry cache and aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Message transport abstraction
//!
//! The queued ingestion path publishes serialized readings to a
//! [`MessageTransport`] and a single consumer task drains them through a
//! [`QueueConsumer`]. Delivery is at-least-once with no ordering guarantee.
//!
//! [`MemoryQueue`] is a bounded in-process transport. Its consumer hands the
//! receiving end back when dropped, so consumption can be restarted without
//! losing queued messages.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{Result, TelemetryError};

/// Default number of messages a [`MemoryQueue`] holds before rejecting
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Statistics about transport usage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportMetrics {
    /// Total messages accepted
    pub messages_published: u64,
    /// Total bytes accepted
    pub bytes_published: u64,
    /// Total messages rejected (full or closed)
    pub messages_rejected: u64,
}

/// Trait for ingestion message transports
pub trait MessageTransport: Send + Sync {
    /// Publish one message; `Ok` means the transport accepted it
    fn publish(&self, payload: Vec<u8>) -> Result<()>;

    /// Attach the consumer
    fn consume(&self) -> Result<QueueConsumer>;

    /// Check if the transport accepts messages
    fn is_available(&self) -> bool;

    /// Stop accepting messages; already queued ones stay consumable
    fn close(&self);

    /// Get transport metrics
    fn metrics(&self) -> TransportMetrics;
}

type ReceiverSlot = Arc<Mutex<Option<mpsc::Receiver<Vec<u8>>>>>;

/// Receiving end of a transport
#[derive(Debug)]
pub struct QueueConsumer {
    rx: Option<mpsc::Receiver<Vec<u8>>>,
    slot: Option<ReceiverSlot>,
}

impl QueueConsumer {
    /// Wrap a receiver that is not owned by any transport
    pub fn detached(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx: Some(rx),
            slot: None,
        }
    }

    fn attached(rx: mpsc::Receiver<Vec<u8>>, slot: ReceiverSlot) -> Self {
        Self {
            rx: Some(rx),
            slot: Some(slot),
        }
    }

    /// Wait for the next message; `None` once every sender is gone
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Take a message only if one is already waiting
    pub fn try_next(&mut self) -> Option<Vec<u8>> {
        self.rx.as_mut().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for QueueConsumer {
    fn drop(&mut self) {
        if let (Some(rx), Some(slot)) = (self.rx.take(), self.slot.as_ref()) {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(rx);
        }
    }
}

/// Bounded in-process message queue
#[derive(Debug)]
pub struct MemoryQueue {
    tx: mpsc::Sender<Vec<u8>>,
    slot: ReceiverSlot,
    capacity: usize,
    is_open: AtomicBool,
    published: AtomicU64,
    bytes: AtomicU64,
    rejected: AtomicU64,
}

impl MemoryQueue {
    /// Create a queue with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a queue holding at most `capacity` undelivered messages
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            slot: Arc::new(Mutex::new(Some(rx))),
            capacity,
            is_open: AtomicBool::new(true),
            published: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Messages accepted but not yet consumed
    pub fn pending(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Maximum undelivered messages
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn reject(&self, reason: String) -> TelemetryError {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        TelemetryError::Transient(reason)
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageTransport for MemoryQueue {
    fn publish(&self, payload: Vec<u8>) -> Result<()> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(self.reject("Queue is closed".to_string()));
        }

        let size = payload.len() as u64;
        match self.tx.try_send(payload) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::SeqCst);
                self.bytes.fetch_add(size, Ordering::SeqCst);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                Err(self.reject(format!("Queue full ({} messages)", self.capacity)))
            }
            Err(TrySendError::Closed(_)) => Err(self.reject("Queue receiver gone".to_string())),
        }
    }

    fn consume(&self) -> Result<QueueConsumer> {
        let rx = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| TelemetryError::Transient("Queue consumer already attached".to_string()))?;
        Ok(QueueConsumer::attached(rx, Arc::clone(&self.slot)))
    }

    fn is_available(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.is_open.store(false, Ordering::SeqCst);
    }

    fn metrics(&self) -> TransportMetrics {
        TransportMetrics {
            messages_published: self.published.load(Ordering::SeqCst),
            bytes_published: self.bytes.load(Ordering::SeqCst),
            messages_rejected: self.rejected.load(Ordering::SeqCst),
        }
    }
}
