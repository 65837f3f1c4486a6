//! Priority-ordered delivery with store-and-forward fallback.

use crate::config::{ConfigUpdate, MeshConfig};
use crate::failure_tracker::TransportFailureTracker;
use crate::message_queue::{MessageQueue, QueueStats};
use bytes::Bytes;
use mesh_transport::{InboundFrame, Transport, TransportKind};
use mesh_wire::{serialize_packet, Packet, WireError, MAX_CLOCK_SKEW_SECS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Consecutive failures before a transport is reported as degraded
const DEGRADED_THRESHOLD: u32 = 3;

/// Window over which consecutive failures are counted
const FAILURE_WINDOW: Duration = Duration::from_secs(300);

/// Longest a packet may wait in the queue. Its header timestamp is fixed
/// when sealed and receivers reject anything older than the skew window.
const MAX_QUEUE_AGE: Duration = Duration::from_secs(MAX_CLOCK_SKEW_SECS);

/// Routing errors returned to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// Packet could not be framed
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// What happened to a packet handed to [`Router::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted by the given transport
    Delivered(TransportKind),
    /// Held in the store-and-forward queue
    Queued,
}

/// Reason a queued packet was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Evicted to make room for a newer packet
    QueueOverflow,
    /// TTL elapsed before any transport accepted it
    Expired,
    /// Retry budget spent
    RetriesExhausted,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::QueueOverflow => write!(f, "queue overflow"),
            DropReason::Expired => write!(f, "TTL expired"),
            DropReason::RetriesExhausted => write!(f, "retries exhausted"),
        }
    }
}

/// Status of one transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStatus {
    /// Medium
    pub kind: TransportKind,
    /// Result of the availability check
    pub available: bool,
    /// Largest packet the medium accepts
    pub max_packet_size: usize,
    /// Failed sends since the last success
    pub consecutive_failures: u32,
    /// Failure threshold crossed without recovery
    pub degraded: bool,
}

/// Router counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    /// Packets accepted by a transport on the first attempt
    pub packets_sent: u64,
    /// Packets that went to the queue
    pub packets_queued: u64,
    /// Queued packets delivered by a retry pass
    pub packets_delivered_from_queue: u64,
    /// Queued packets dropped for any reason
    pub packets_dropped: u64,
    /// Drop counts keyed by reason
    pub drop_reasons: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    queued: AtomicU64,
    delivered_from_queue: AtomicU64,
}

/// Sends packets over the highest-priority available transport and queues
/// them when none accepts
pub struct Router {
    transports: Vec<Arc<dyn Transport>>,
    config: RwLock<MeshConfig>,
    queue: Mutex<MessageQueue>,
    /// Held while packets go out so a retry pass and a direct send never interleave
    delivery: Mutex<()>,
    failures: TransportFailureTracker,
    counters: Counters,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

impl Router {
    /// Create a router; transports are ordered by priority, not by argument order
    pub fn new(config: MeshConfig, mut transports: Vec<Arc<dyn Transport>>) -> Self {
        transports.sort_by_key(|t| t.kind().priority());
        Self {
            transports,
            queue: Mutex::new(MessageQueue::new(config.max_queue_size)),
            config: RwLock::new(config),
            delivery: Mutex::new(()),
            failures: TransportFailureTracker::new(DEGRADED_THRESHOLD, FAILURE_WINDOW),
            counters: Counters::default(),
            retry_task: Mutex::new(None),
        }
    }

    /// Transports in delivery order
    pub fn transports(&self) -> &[Arc<dyn Transport>] {
        &self.transports
    }

    /// Current configuration
    pub async fn config(&self) -> MeshConfig {
        self.config.read().await.clone()
    }

    /// Eagerly connect every transport; failures are logged and left to lazy reconnect
    pub async fn connect(&self) {
        for transport in &self.transports {
            if let Err(e) = transport.connect().await {
                warn!("Transport {} failed to connect: {}", transport.kind(), e);
            }
        }
    }

    /// Register one sink on every transport and return its receiving end
    pub async fn attach_inbound(&self) -> mpsc::UnboundedReceiver<InboundFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        for transport in &self.transports {
            transport.on_message(tx.clone()).await;
        }
        rx
    }

    /// Serialize and send a packet, queueing it with the default TTL on failure
    pub async fn send(&self, packet: &Packet) -> Result<SendOutcome, RoutingError> {
        self.send_with_ttl(packet, None).await
    }

    /// Like [`Router::send`]; `ttl` shortens the queue lifetime but never extends
    /// it past the configured default or the receivers' clock-skew window
    pub async fn send_with_ttl(
        &self,
        packet: &Packet,
        ttl: Option<Duration>,
    ) -> Result<SendOutcome, RoutingError> {
        let bytes = serialize_packet(packet)?;
        Ok(self.send_bytes(bytes, ttl).await)
    }

    /// Send already-framed bytes
    pub async fn send_bytes(&self, bytes: Bytes, ttl: Option<Duration>) -> SendOutcome {
        let config = self.config.read().await.clone();
        let _delivery = self.delivery.lock().await;

        if config.auto_mode {
            // Receivers reject counters at or below the last one seen, so a
            // packet must not overtake older queued ones.
            if self.has_backlog().await && self.any_available() {
                self.flush_queue().await;
            }
            if !self.has_backlog().await {
                if let Some(kind) = self.deliver(&bytes).await {
                    self.counters.sent.fetch_add(1, Ordering::Relaxed);
                    return SendOutcome::Delivered(kind);
                }
                debug!("No transport accepted {} byte packet, queueing", bytes.len());
            } else {
                debug!("Queueing {} byte packet behind backlog", bytes.len());
            }
        } else {
            debug!("Manual mode, queueing {} byte packet", bytes.len());
        }

        let ttl = ttl
            .map_or(config.default_ttl, |t| t.min(config.default_ttl))
            .min(MAX_QUEUE_AGE);
        self.queue.lock().await.push(bytes, ttl);
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        SendOutcome::Queued
    }

    /// Re-attempt every live queued packet once; returns how many were delivered.
    ///
    /// In manual mode only expired entries are dropped.
    pub async fn retry_queued(&self) -> usize {
        if !self.config.read().await.auto_mode {
            let dropped = self.queue.lock().await.prune_expired();
            if dropped > 0 {
                debug!("Dropped {} expired packets while in manual mode", dropped);
            }
            return 0;
        }

        let _delivery = self.delivery.lock().await;
        self.flush_queue().await
    }

    /// One pass over the queue; the caller holds `delivery`
    async fn flush_queue(&self) -> usize {
        let entries = self.queue.lock().await.take_live();
        if entries.is_empty() {
            return 0;
        }
        debug!("Retrying {} queued packets", entries.len());

        let mut delivered = 0;
        let mut remaining = Vec::new();
        for mut entry in entries {
            if self.deliver(&entry.packet).await.is_some() {
                delivered += 1;
            } else {
                entry.retry_count += 1;
                remaining.push(entry);
            }
        }

        self.queue.lock().await.restore(remaining);
        if delivered > 0 {
            self.counters
                .delivered_from_queue
                .fetch_add(delivered as u64, Ordering::Relaxed);
            info!("Delivered {} queued packets", delivered);
        }
        delivered
    }

    async fn has_backlog(&self) -> bool {
        !self.queue.lock().await.is_empty()
    }

    fn any_available(&self) -> bool {
        self.transports.iter().any(|t| t.available())
    }

    /// Try each transport in priority order
    async fn deliver(&self, bytes: &Bytes) -> Option<TransportKind> {
        for transport in &self.transports {
            let kind = transport.kind();
            if !transport.available() {
                continue;
            }
            if bytes.len() > transport.max_packet_size() {
                debug!(
                    "Skipping {}: {} byte packet exceeds {} byte limit",
                    kind,
                    bytes.len(),
                    transport.max_packet_size()
                );
                continue;
            }
            match transport.send(bytes.clone()).await {
                Ok(()) => {
                    self.failures.record_success(kind).await;
                    debug!("Sent {} byte packet via {}", bytes.len(), kind);
                    return Some(kind);
                }
                Err(e) => {
                    warn!("Send via {} failed, trying next transport: {}", kind, e);
                    self.failures.record_failure(kind).await;
                }
            }
        }
        None
    }

    /// Start the periodic retry timer. Warns and does nothing if it already runs.
    pub async fn start_retry_task(self: &Arc<Self>) {
        let mut handle = self.retry_task.lock().await;
        if handle.is_some() {
            warn!("Retry processor already running");
            return;
        }

        let period = self.config.read().await.retry_interval;
        let router = Arc::downgrade(self);
        *handle = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(router) = router.upgrade() else {
                    break;
                };
                router.retry_queued().await;
            }
        }));
        info!("Started retry processor (interval {:?})", period);
    }

    /// Stop the retry timer if it runs
    pub async fn stop_retry_task(&self) {
        if let Some(handle) = self.retry_task.lock().await.take() {
            handle.abort();
            info!("Stopped retry processor");
        }
    }

    /// Apply a partial configuration change
    pub async fn update_config(self: &Arc<Self>, update: ConfigUpdate) {
        let (old, new) = {
            let mut config = self.config.write().await;
            let old = config.clone();
            config.apply(&update);
            (old, config.clone())
        };

        if new.max_queue_size != old.max_queue_size {
            self.queue.lock().await.set_max_size(new.max_queue_size);
        }
        if new.retry_interval != old.retry_interval && self.retry_task.lock().await.is_some() {
            self.stop_retry_task().await;
            self.start_retry_task().await;
        }
        info!("Router configuration updated: {:?}", new);
    }

    /// Per-transport status in delivery order
    pub async fn get_transport_status(&self) -> Vec<TransportStatus> {
        let mut status = Vec::with_capacity(self.transports.len());
        for transport in &self.transports {
            let kind = transport.kind();
            status.push(TransportStatus {
                kind,
                available: transport.available(),
                max_packet_size: transport.max_packet_size(),
                consecutive_failures: self.failures.failure_count(kind).await,
                degraded: self.failures.is_degraded(kind).await,
            });
        }
        status
    }

    /// Queue snapshot
    pub async fn get_queue_stats(&self) -> QueueStats {
        self.queue.lock().await.stats()
    }

    /// Router counters, including queue drops by reason
    pub async fn stats(&self) -> RouterStats {
        let queue = self.get_queue_stats().await;
        let mut drop_reasons = HashMap::new();
        for (reason, count) in [
            (DropReason::QueueOverflow, queue.evicted),
            (DropReason::Expired, queue.expired),
            (DropReason::RetriesExhausted, queue.exhausted),
        ] {
            if count > 0 {
                drop_reasons.insert(reason.to_string(), count);
            }
        }

        RouterStats {
            packets_sent: self.counters.sent.load(Ordering::Relaxed),
            packets_queued: self.counters.queued.load(Ordering::Relaxed),
            packets_delivered_from_queue: self.counters.delivered_from_queue.load(Ordering::Relaxed),
            packets_dropped: queue.evicted + queue.expired + queue.exhausted,
            drop_reasons,
        }
    }

    /// Stop the retry timer and close every transport
    pub async fn disconnect(&self) {
        self.stop_retry_task().await;
        for transport in &self.transports {
            transport.disconnect().await;
        }
        info!("Router disconnected");
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<TransportKind> = self.transports.iter().map(|t| t.kind()).collect();
        f.debug_struct("Router").field("transports", &kinds).finish()
    }
}
