// SensorCache - Sensor telemetry cache and aggregation engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Admission control
//!
//! Bounds how many requests run at once. A request first waits for a
//! semaphore permit, then runs; both phases share one deadline. A request
//! that misses its deadline is abandoned and reported as
//! [`TelemetryError::Timeout`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{Result, TelemetryError};
use crate::stats::ServiceStats;

/// Concurrency limit with an optional per-request deadline
#[derive(Debug)]
pub struct AdmissionControl {
    semaphore: Semaphore,
    capacity: usize,
    timeout: Option<Duration>,
    stats: Arc<ServiceStats>,
}

impl AdmissionControl {
    /// Admit at most `capacity` concurrent requests
    pub fn new(capacity: usize, timeout: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
            timeout,
            stats: Arc::new(ServiceStats::new()),
        }
    }

    /// Count rejections in a shared stats block
    pub fn with_stats(mut self, stats: Arc<ServiceStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Run `work` once a slot frees up, within the deadline if one is set
    pub async fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let admitted = async {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|_| TelemetryError::Transient("Admission control closed".to_string()))?;
            Ok(work.await)
        };

        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, admitted).await {
                Ok(result) => result,
                Err(_) => {
                    debug!("Request abandoned after {:?}", limit);
                    self.stats.record_admission_rejected();
                    Err(TelemetryError::Timeout(limit))
                }
            },
            None => admitted.await,
        }
    }

    /// Requests currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_run_returns_output() {
        let admission = AdmissionControl::new(2, Some(Duration::from_secs(1)));
        let value = admission.run(async { 41 + 1 }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(admission.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_times_out() {
        let stats = Arc::new(ServiceStats::new());
        let admission = Arc::new(
            AdmissionControl::new(1, Some(Duration::from_millis(100))).with_stats(stats.clone()),
        );
        let (release, hold) = oneshot::channel::<()>();

        let holder = {
            let admission = admission.clone();
            tokio::spawn(async move {
                admission
                    .run(async move {
                        let _ = hold.await;
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(admission.in_flight(), 1);

        let result = admission.run(async {}).await;
        assert!(matches!(result, Err(TelemetryError::Timeout(_))));
        assert!(stats.snapshot().admission_rejected >= 1);

        let _ = release.send(());
        // The holder also ran past its deadline while waiting on `hold`
        let _ = holder.await.unwrap();
        assert_eq!(admission.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_no_timeout_waits_for_slot() {
        let admission = Arc::new(AdmissionControl::new(1, None));
        let (release, hold) = oneshot::channel::<()>();

        let holder = {
            let admission = admission.clone();
            tokio::spawn(async move {
                admission
                    .run(async move {
                        let _ = hold.await;
                        "first"
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.run(async { "second" }).await })
        };

        let _ = release.send(());
        assert_eq!(holder.await.unwrap().unwrap(), "first");
        assert_eq!(waiter.await.unwrap().unwrap(), "second");
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let admission = AdmissionControl::new(0, None);
        assert_eq!(admission.capacity(), 1);
        assert!(admission.timeout().is_none());
    }
}
