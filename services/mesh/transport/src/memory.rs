//! In-process network for tests and local demos.
//!
//! Every endpoint attached to a [`MemoryNetwork`] behaves like a node on a
//! shared broadcast medium: a send reaches every other endpoint that is
//! currently available and has registered a sink.

use crate::radio::check_size;
use crate::{InboundFrame, Transport, TransportError, TransportKind};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

#[derive(Debug)]
struct Endpoint {
    kind: TransportKind,
    available: AtomicBool,
    fail_sends: AtomicBool,
    sink: Mutex<Option<mpsc::UnboundedSender<InboundFrame>>>,
}

/// Shared medium connecting [`MemoryTransport`]s
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<DashMap<u64, Arc<Endpoint>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint of the given kind (initially available)
    pub fn endpoint(&self, kind: TransportKind) -> MemoryTransport {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let endpoint = Arc::new(Endpoint {
            kind,
            available: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            sink: Mutex::new(None),
        });
        self.endpoints.insert(id, endpoint.clone());
        MemoryTransport {
            id,
            endpoint,
            network: self.clone(),
            sent: AtomicU64::new(0),
        }
    }

    /// Number of attached endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether no endpoints are attached
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// One endpoint on a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryTransport {
    id: u64,
    endpoint: Arc<Endpoint>,
    network: MemoryNetwork,
    sent: AtomicU64,
}

impl MemoryTransport {
    /// Switch reachability
    pub fn set_available(&self, available: bool) {
        self.endpoint.available.store(available, Ordering::SeqCst);
    }

    /// Make sends fail while still reporting available
    pub fn set_fail_sends(&self, fail: bool) {
        self.endpoint.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Packets successfully sent from this endpoint
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.endpoint.kind
    }

    fn available(&self) -> bool {
        self.endpoint.available.load(Ordering::SeqCst)
    }

    async fn send(&self, packet: Bytes) -> Result<(), TransportError> {
        check_size(&packet, self.max_packet_size())?;
        if !self.available() {
            return Err(TransportError::Unavailable("memory link down".into()));
        }
        if self.endpoint.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("memory link failing".into()));
        }

        let peers: Vec<Arc<Endpoint>> = self
            .network
            .endpoints
            .iter()
            .filter(|e| *e.key() != self.id)
            .map(|e| e.value().clone())
            .collect();

        let mut delivered = 0;
        for peer in peers {
            if !peer.available.load(Ordering::SeqCst) {
                continue;
            }
            if let Some(sink) = peer.sink.lock().await.as_ref() {
                let frame = InboundFrame {
                    transport: peer.kind,
                    bytes: packet.clone(),
                };
                if sink.send(frame).is_ok() {
                    delivered += 1;
                }
            }
        }

        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Memory endpoint {} sent {} bytes to {} peers",
            self.id,
            packet.len(),
            delivered
        );
        Ok(())
    }

    async fn on_message(&self, sink: mpsc::UnboundedSender<InboundFrame>) {
        *self.endpoint.sink.lock().await = Some(sink);
    }

    async fn disconnect(&self) {
        self.set_available(false);
        self.endpoint.sink.lock().await.take();
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.endpoints.remove(&self.id);
    }
}
