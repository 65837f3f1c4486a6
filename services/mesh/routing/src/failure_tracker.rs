//! Per-transport send failure tracking.

use mesh_transport::TransportKind;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Tracks consecutive send failures per transport to flag degraded media
#[derive(Debug)]
pub struct TransportFailureTracker {
    failures: RwLock<HashMap<TransportKind, FailureInfo>>,
    /// Failures within the window before a transport counts as degraded
    failure_threshold: u32,
    failure_window: Duration,
}

#[derive(Debug, Clone)]
struct FailureInfo {
    count: u32,
    first_failure: Instant,
    degraded_notified: bool,
}

impl TransportFailureTracker {
    /// Create a tracker
    pub fn new(failure_threshold: u32, failure_window: Duration) -> Self {
        Self {
            failures: RwLock::new(HashMap::new()),
            failure_threshold,
            failure_window,
        }
    }

    /// Record a failed send; returns the running count and whether the
    /// transport just crossed the degraded threshold
    pub async fn record_failure(&self, kind: TransportKind) -> (u32, bool) {
        let mut failures = self.failures.write().await;
        let now = Instant::now();

        let info = failures.entry(kind).or_insert(FailureInfo {
            count: 0,
            first_failure: now,
            degraded_notified: false,
        });

        if now.duration_since(info.first_failure) > self.failure_window {
            info.count = 1;
            info.first_failure = now;
            info.degraded_notified = false;
        } else {
            info.count += 1;
        }

        let should_notify = info.count >= self.failure_threshold && !info.degraded_notified;
        if should_notify {
            info.degraded_notified = true;
            warn!("Transport {} degraded after {} failed sends", kind, info.count);
        }

        debug!("Recorded send failure on {} (count: {})", kind, info.count);
        (info.count, should_notify)
    }

    /// Record a successful send; returns whether the transport was degraded
    pub async fn record_success(&self, kind: TransportKind) -> bool {
        let mut failures = self.failures.write().await;
        match failures.remove(&kind) {
            Some(info) if info.degraded_notified => {
                info!("Transport {} recovered", kind);
                true
            }
            _ => false,
        }
    }

    /// Current consecutive failure count
    pub async fn failure_count(&self, kind: TransportKind) -> u32 {
        let failures = self.failures.read().await;
        failures.get(&kind).map(|info| info.count).unwrap_or(0)
    }

    /// Whether the transport crossed the threshold and has not recovered
    pub async fn is_degraded(&self, kind: TransportKind) -> bool {
        let failures = self.failures.read().await;
        failures
            .get(&kind)
            .map(|info| info.degraded_notified)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_threshold_notifies_once() {
        let tracker = TransportFailureTracker::new(2, Duration::from_secs(60));

        assert_eq!(tracker.record_failure(TransportKind::Relay).await, (1, false));
        assert_eq!(tracker.record_failure(TransportKind::Relay).await, (2, true));
        assert_eq!(tracker.record_failure(TransportKind::Relay).await, (3, false));
        assert!(tracker.is_degraded(TransportKind::Relay).await);
        assert_eq!(tracker.failure_count(TransportKind::DirectRadio).await, 0);
    }

    #[tokio::test]
    async fn test_success_clears() {
        let tracker = TransportFailureTracker::new(1, Duration::from_secs(60));
        tracker.record_failure(TransportKind::Relay).await;

        assert!(tracker.record_success(TransportKind::Relay).await);
        assert_eq!(tracker.failure_count(TransportKind::Relay).await, 0);
        assert!(!tracker.record_success(TransportKind::Relay).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_count() {
        let tracker = TransportFailureTracker::new(5, Duration::from_secs(10));
        tracker.record_failure(TransportKind::Relay).await;
        tracker.record_failure(TransportKind::Relay).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(tracker.record_failure(TransportKind::Relay).await, (1, false));
    }
}
