// SensorCache - Sensor telemetry cache and aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Ingestion path
//!
//! [`Ingestor`] merges readings into the shared cache under its lock.
//! [`QueuePublisher`] is the request side of the queued path, and
//! [`run_consumer`] is the single task that drains the transport into the
//! ingestor.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::SharedCache;
use crate::error::Result;
use crate::record::Reading;
use crate::shutdown::ShutdownListener;
use crate::stats::ServiceStats;
use crate::transport::{MessageTransport, QueueConsumer};

/// Merges readings into the shared cache
#[derive(Debug, Clone)]
pub struct Ingestor {
    cache: SharedCache,
    stats: Arc<ServiceStats>,
}

impl Ingestor {
    pub fn new(cache: SharedCache, stats: Arc<ServiceStats>) -> Self {
        Self { cache, stats }
    }

    /// Validate and merge one reading
    pub async fn ingest(&self, reading: &Reading) -> Result<()> {
        reading.validate()?;
        self.cache.lock().await.merge(reading);
        self.stats.record_ingested();
        Ok(())
    }

    /// Decode and merge one queue message; malformed messages are dropped
    pub async fn handle_message(&self, payload: &[u8]) -> Result<()> {
        let reading = match Reading::from_message(payload) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Dropping malformed message ({} bytes): {}", payload.len(), e);
                self.stats.record_malformed();
                return Err(e);
            }
        };
        debug!(
            "Consumed reading sensor={} date={} hour={}",
            reading.sensor_id, reading.date, reading.hour
        );
        self.ingest(&reading).await
    }
}

/// Request side of the queued ingestion path
#[derive(Clone)]
pub struct QueuePublisher {
    transport: Arc<dyn MessageTransport>,
    stats: Arc<ServiceStats>,
}

impl QueuePublisher {
    pub fn new(transport: Arc<dyn MessageTransport>, stats: Arc<ServiceStats>) -> Self {
        Self { transport, stats }
    }

    /// Serialize and publish; `Ok` once the transport accepted the message
    pub fn publish(&self, reading: &Reading) -> Result<()> {
        reading.validate()?;
        let payload = reading.to_message()?;
        match self.transport.publish(payload) {
            Ok(()) => {
                self.stats.record_published();
                Ok(())
            }
            Err(e) => {
                warn!("Could not publish reading for sensor {}: {}", reading.sensor_id, e);
                self.stats.record_publish_failure();
                Err(e)
            }
        }
    }

    pub fn transport(&self) -> &Arc<dyn MessageTransport> {
        &self.transport
    }
}

impl std::fmt::Debug for QueuePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuePublisher")
            .field("available", &self.transport.is_available())
            .finish()
    }
}

/// Drain `consumer` into `ingestor` one message at a time until shutdown is
/// triggered or the transport ends. Returns the number of messages merged.
///
/// Dropping the consumer on exit hands the receiver back to its transport.
pub async fn run_consumer(
    mut consumer: QueueConsumer,
    ingestor: Ingestor,
    mut shutdown: ShutdownListener,
) -> u64 {
    info!("Queue consumer started");
    let mut merged = 0u64;

    loop {
        if shutdown.is_triggered() {
            break;
        }
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            message = consumer.next() => match message {
                Some(payload) => {
                    if ingestor.handle_message(&payload).await.is_ok() {
                        merged += 1;
                    }
                }
                None => {
                    info!("Queue closed, consumer exiting");
                    break;
                }
            },
        }
    }

    info!("Queue consumer stopped after {} messages", merged);
    merged
}
