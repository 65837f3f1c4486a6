//! Bounded store-and-forward queue with per-entry expiry and retry budget.

use crate::config::MAX_RETRIES;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Serialized packet waiting for a transport
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Wire bytes, already encrypted and framed
    pub packet: Bytes,
    /// When the packet was queued
    pub queued_at: Instant,
    /// When the packet stops being deliverable
    pub expires_at: Instant,
    /// Failed delivery attempts so far
    pub retry_count: u32,
    /// Attempts allowed before the packet is dropped
    pub max_retries: u32,
}

impl QueuedMessage {
    /// Whether the TTL has elapsed at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Whether the retry budget is spent
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Queue snapshot for operational tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Entries currently queued
    pub size: usize,
    /// Configured bound
    pub max_size: usize,
    /// Age of the oldest entry
    pub oldest_age: Option<Duration>,
    /// Entries dropped to make room
    pub evicted: u64,
    /// Entries dropped after their TTL
    pub expired: u64,
    /// Entries dropped after their retry budget
    pub exhausted: u64,
}

/// FIFO queue of undelivered packets
#[derive(Debug)]
pub struct MessageQueue {
    entries: VecDeque<QueuedMessage>,
    max_size: usize,
    evicted: u64,
    expired: u64,
    exhausted: u64,
}

impl MessageQueue {
    /// Create an empty queue holding at most `max_size` entries
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size,
            evicted: 0,
            expired: 0,
            exhausted: 0,
        }
    }

    /// Queue a packet that stays deliverable for `ttl`.
    ///
    /// Returns the number of older entries evicted to make room.
    pub fn push(&mut self, packet: Bytes, ttl: Duration) -> usize {
        let now = Instant::now();
        self.entries.push_back(QueuedMessage {
            packet,
            queued_at: now,
            expires_at: now + ttl,
            retry_count: 0,
            max_retries: MAX_RETRIES,
        });
        debug!("Queued packet ({} queued)", self.entries.len());
        self.enforce_bound()
    }

    /// Remove every entry for a retry pass, dropping the expired ones
    pub fn take_live(&mut self) -> Vec<QueuedMessage> {
        let now = Instant::now();
        let mut live = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.is_expired(now) {
                self.expired += 1;
                debug!("Dropping queued packet after TTL ({:?} old)", now - entry.queued_at);
            } else {
                live.push(entry);
            }
        }
        live
    }

    /// Drop expired entries without touching the rest
    pub fn prune_expired(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|entry| !entry.is_expired(now));
        let dropped = before - self.entries.len();
        self.expired += dropped as u64;
        dropped
    }

    /// Put back entries that are still undelivered after a retry pass.
    ///
    /// They go ahead of anything queued during the pass so FIFO order holds.
    /// Entries whose retry budget is spent are dropped here.
    pub fn restore(&mut self, entries: Vec<QueuedMessage>) -> usize {
        for entry in entries.into_iter().rev() {
            if entry.is_exhausted() {
                self.exhausted += 1;
                warn!(
                    "Dropping queued packet after {} failed attempts",
                    entry.retry_count
                );
                continue;
            }
            self.entries.push_front(entry);
        }
        self.enforce_bound()
    }

    /// Change the bound, evicting the oldest entries if needed
    pub fn set_max_size(&mut self, max_size: usize) -> usize {
        self.max_size = max_size;
        self.enforce_bound()
    }

    /// Entries currently queued
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest entry, if any
    pub fn front(&self) -> Option<&QueuedMessage> {
        self.entries.front()
    }

    /// Snapshot of the queue counters
    pub fn stats(&self) -> QueueStats {
        let now = Instant::now();
        QueueStats {
            size: self.entries.len(),
            max_size: self.max_size,
            oldest_age: self.entries.front().map(|e| now - e.queued_at),
            evicted: self.evicted,
            expired: self.expired,
            exhausted: self.exhausted,
        }
    }

    fn enforce_bound(&mut self) -> usize {
        let mut evicted = 0;
        while self.entries.len() > self.max_size {
            if let Some(oldest) = self.entries.pop_front() {
                evicted += 1;
                warn!(
                    "Message queue full ({}), evicting packet queued {:?} ago: data lost",
                    self.max_size,
                    Instant::now() - oldest.queued_at
                );
            }
        }
        self.evicted += evicted as u64;
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 4])
    }

    #[tokio::test]
    async fn test_bound_evicts_oldest() {
        let mut queue = MessageQueue::new(3);
        for tag in 0..4u8 {
            queue.push(packet(tag), Duration::from_secs(60));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.front().unwrap().packet, packet(1));
        assert_eq!(queue.stats().evicted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_dropped() {
        let mut queue = MessageQueue::new(10);
        queue.push(packet(1), Duration::from_secs(10));
        queue.push(packet(2), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(11)).await;
        let live = queue.take_live();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].packet, packet(2));
        assert_eq!(queue.stats().expired, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_restore_keeps_order_and_drops_exhausted() {
        let mut queue = MessageQueue::new(10);
        queue.push(packet(1), Duration::from_secs(60));
        queue.push(packet(2), Duration::from_secs(60));

        let mut live = queue.take_live();
        queue.push(packet(3), Duration::from_secs(60));

        live[0].retry_count = 1;
        live[1].retry_count = MAX_RETRIES;
        queue.restore(live);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front().unwrap().packet, packet(1));
        assert_eq!(queue.stats().exhausted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_report_oldest_age() {
        let mut queue = MessageQueue::new(10);
        assert_eq!(queue.stats().oldest_age, None);

        queue.push(packet(1), Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(queue.stats().oldest_age, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_shrinking_bound_evicts() {
        let mut queue = MessageQueue::new(10);
        for tag in 0..5u8 {
            queue.push(packet(tag), Duration::from_secs(60));
        }
        assert_eq!(queue.set_max_size(2), 3);
        assert_eq!(queue.front().unwrap().packet, packet(3));
    }
}
