//! Internet relay over TCP.
//!
//! Frames are a big-endian u16 length followed by the packet bytes. The
//! client connects lazily on the first send (or an explicit
//! [`Transport::connect`]) and drops the connection on any I/O error so the
//! next send reconnects. After a failed attempt the transport reports
//! unavailable for one backoff period, letting the router fall through to the
//! next medium instead of blocking on connect timeouts.

use crate::radio::check_size;
use crate::{InboundFrame, Transport, TransportError, TransportKind};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Relay client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay hub address, `host:port`
    pub addr: String,
    /// Bound on each connection attempt
    #[serde(with = "crate::humantime_duration")]
    pub connect_timeout: Duration,
    /// How long to report unavailable after a failed attempt
    #[serde(with = "crate::humantime_duration")]
    pub retry_backoff: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7700".to_string(),
            connect_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct RelayInner {
    config: RelayConfig,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    sink: Mutex<Option<mpsc::UnboundedSender<InboundFrame>>>,
    connected: AtomicBool,
    closed: AtomicBool,
    /// Millis since `epoch` of the last failed attempt, 0 if none
    failed_at: AtomicU64,
    epoch: Instant,
}

impl RelayInner {
    fn record_failure(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.failed_at.store(elapsed.max(1), Ordering::SeqCst);
    }

    fn in_backoff(&self) -> bool {
        let failed_at = self.failed_at.load(Ordering::SeqCst);
        if failed_at == 0 {
            return false;
        }
        let now = self.epoch.elapsed().as_millis() as u64;
        now.saturating_sub(failed_at) < self.config.retry_backoff.as_millis() as u64
    }
}

/// TCP client for a relay hub
#[derive(Debug, Clone)]
pub struct RelayTransport {
    inner: Arc<RelayInner>,
}

impl RelayTransport {
    /// Create a client; nothing connects until the first send
    pub fn new(config: RelayConfig) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                config,
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                sink: Mutex::new(None),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                failed_at: AtomicU64::new(0),
                epoch: Instant::now(),
            }),
        }
    }

    /// Whether a connection is currently open
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn ensure_connected(&self) -> Result<(), TransportError> {
        let mut writer = self.inner.writer.lock().await;
        if writer.is_some() {
            return Ok(());
        }

        let addr = &self.inner.config.addr;
        let stream = match timeout(self.inner.config.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.inner.record_failure();
                return Err(TransportError::Io(e));
            }
            Err(_) => {
                self.inner.record_failure();
                return Err(TransportError::Unavailable(format!(
                    "connect to {} timed out",
                    addr
                )));
            }
        };
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        *writer = Some(write_half);
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.failed_at.store(0, Ordering::SeqCst);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            read_loop(inner, read_half).await;
        });
        if let Some(old) = self.inner.reader.lock().await.replace(handle) {
            old.abort();
        }

        info!("Connected to relay {}", addr);
        Ok(())
    }
}

async fn read_loop(inner: Arc<RelayInner>, mut reader: OwnedReadHalf) {
    loop {
        match read_frame(&mut reader).await {
            Ok(bytes) => {
                if let Some(sink) = inner.sink.lock().await.as_ref() {
                    let _ = sink.send(InboundFrame {
                        transport: TransportKind::Relay,
                        bytes,
                    });
                }
            }
            Err(e) => {
                debug!("Relay read loop ended: {}", e);
                break;
            }
        }
    }
    inner.connected.store(false, Ordering::SeqCst);
    inner.writer.lock().await.take();
}

#[async_trait]
impl Transport for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    fn available(&self) -> bool {
        if self.inner.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.is_connected() || !self.inner.in_backoff()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("relay disconnected".into()));
        }
        self.ensure_connected().await
    }

    async fn send(&self, packet: Bytes) -> Result<(), TransportError> {
        check_size(&packet, self.max_packet_size())?;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("relay disconnected".into()));
        }
        self.ensure_connected().await?;

        let mut buf = BytesMut::with_capacity(2 + packet.len());
        buf.put_u16(packet.len() as u16);
        buf.put_slice(&packet);

        let mut writer = self.inner.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(TransportError::Unavailable("relay connection lost".into()));
        };
        if let Err(e) = stream.write_all(&buf).await {
            warn!("Relay write failed: {}", e);
            writer.take();
            self.inner.record_failure();
            return Err(TransportError::Io(e));
        }
        Ok(())
    }

    async fn on_message(&self, sink: mpsc::UnboundedSender<InboundFrame>) {
        *self.inner.sink.lock().await = Some(sink);
    }

    async fn disconnect(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.reader.lock().await.take() {
            handle.abort();
        }
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        debug!("Relay transport disconnected");
    }
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> std::io::Result<Bytes> {
    let len = reader.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, frame: &[u8]) -> std::io::Result<()> {
    writer.write_u16(frame.len() as u16).await?;
    writer.write_all(frame).await
}

/// Fan-out hub: every frame from one client is forwarded to all others
#[derive(Debug)]
pub struct RelayHub {
    listener: TcpListener,
    clients: Arc<DashMap<u64, mpsc::UnboundedSender<Bytes>>>,
}

impl RelayHub {
    /// Bind the hub
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            clients: Arc::new(DashMap::new()),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Accept clients until the task is cancelled
    pub async fn run(self) -> std::io::Result<()> {
        info!("Relay hub listening on {}", self.listener.local_addr()?);
        let mut next_id = 0u64;
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let _ = stream.set_nodelay(true);
            next_id += 1;
            let id = next_id;
            info!("Relay client {} connected from {}", id, peer);

            let (tx, rx) = mpsc::unbounded_channel();
            self.clients.insert(id, tx);
            tokio::spawn(serve_client(id, stream, rx, self.clients.clone()));
        }
    }
}

async fn serve_client(
    id: u64,
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    clients: Arc<DashMap<u64, mpsc::UnboundedSender<Bytes>>>,
) {
    let (mut reader, mut writer) = stream.into_split();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if write_frame(&mut writer, &frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        match read_frame(&mut reader).await {
            Ok(frame) => {
                let mut forwarded = 0;
                for client in clients.iter() {
                    if *client.key() != id && client.value().send(frame.clone()).is_ok() {
                        forwarded += 1;
                    }
                }
                debug!(
                    "Relay client {} frame of {} bytes forwarded to {}",
                    id,
                    frame.len(),
                    forwarded
                );
            }
            Err(_) => break,
        }
    }

    clients.remove(&id);
    writer_task.abort();
    info!("Relay client {} disconnected", id);
}
