//! Radio transports.
//!
//! Neither radio has a driver on the platforms this crate targets, so both
//! report unavailable. They still enforce their size budgets so callers see
//! the same errors they will once a driver exists.

use crate::{InboundFrame, Transport, TransportError, TransportKind};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

/// Short-range direct radio (BLE-class links)
#[derive(Debug, Default)]
pub struct DirectRadioTransport;

impl DirectRadioTransport {
    /// Create the transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for DirectRadioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::DirectRadio
    }

    fn available(&self) -> bool {
        false
    }

    async fn send(&self, packet: Bytes) -> Result<(), TransportError> {
        check_size(&packet, self.max_packet_size())?;
        Err(TransportError::Unavailable(
            "no direct radio on this device".into(),
        ))
    }

    async fn on_message(&self, _sink: mpsc::UnboundedSender<InboundFrame>) {
        debug!("Direct radio has no receiver; sink ignored");
    }

    async fn disconnect(&self) {}
}

/// Long-range low-bandwidth radio bridge (LoRa-class links)
#[derive(Debug, Default)]
pub struct LongRangeBridgeTransport;

impl LongRangeBridgeTransport {
    /// Create the transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for LongRangeBridgeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LongRangeBridge
    }

    fn available(&self) -> bool {
        false
    }

    async fn send(&self, packet: Bytes) -> Result<(), TransportError> {
        check_size(&packet, self.max_packet_size())?;
        Err(TransportError::Unavailable("no long-range bridge attached".into()))
    }

    async fn on_message(&self, _sink: mpsc::UnboundedSender<InboundFrame>) {
        debug!("Long-range bridge has no receiver; sink ignored");
    }

    async fn disconnect(&self) {}
}

pub(crate) fn check_size(packet: &Bytes, max: usize) -> Result<(), TransportError> {
    if packet.len() > max {
        return Err(TransportError::PacketTooLarge {
            size: packet.len(),
            max,
        });
    }
    Ok(())
}
