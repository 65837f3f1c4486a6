//! Transport abstraction, TCP relay client and hub, radio stubs and in-memory
//! links for sacred mesh.
//!
//! Every physical medium implements [`Transport`]: a cheap availability check,
//! a send that may connect lazily, a single inbound sink, and an idempotent
//! disconnect. Transports carry opaque byte packets and know nothing about
//! their contents.
//!
//! ## Features
//!
//! - **Relay**: TCP client with u16 length-prefixed frames and lazy reconnect
//! - **Relay Hub**: fan-out server that forwards every frame to all other clients
//! - **Radio Stubs**: direct radio and long-range bridge with fixed size budgets
//! - **Memory**: in-process network with switchable availability, for tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod humantime_duration;
pub mod memory;
pub mod radio;
pub mod relay;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use radio::{DirectRadioTransport, LongRangeBridgeTransport};
pub use relay::{RelayConfig, RelayHub, RelayTransport};

/// Physical medium, in fixed priority order (lower sorts first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportKind {
    /// Internet relay socket
    Relay,
    /// Short-range direct radio
    DirectRadio,
    /// Long-range low-bandwidth radio bridge
    LongRangeBridge,
}

impl TransportKind {
    /// Position in the delivery order; 0 is tried first
    pub fn priority(self) -> u8 {
        match self {
            TransportKind::Relay => 0,
            TransportKind::DirectRadio => 1,
            TransportKind::LongRangeBridge => 2,
        }
    }

    /// Largest packet the medium can carry
    pub fn max_packet_size(self) -> usize {
        match self {
            TransportKind::Relay => u16::MAX as usize,
            TransportKind::DirectRadio => 512,
            TransportKind::LongRangeBridge => 255,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Relay => write!(f, "relay"),
            TransportKind::DirectRadio => write!(f, "direct-radio"),
            TransportKind::LongRangeBridge => write!(f, "long-range"),
        }
    }
}

/// Bytes received on a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Medium the frame arrived on
    pub transport: TransportKind,
    /// Raw frame bytes
    pub bytes: Bytes,
}

/// Transport errors. These stay local to one transport and trigger fallback.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Medium not reachable right now
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Packet exceeds the medium's budget
    #[error("packet of {size} bytes exceeds limit of {max}")]
    PacketTooLarge {
        /// Packet size
        size: usize,
        /// Medium limit
        max: usize,
    },

    /// Socket error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Uniform interface over one physical medium
#[async_trait]
pub trait Transport: Send + Sync {
    /// Medium tag
    fn kind(&self) -> TransportKind;

    /// Cheap, non-blocking reachability check
    fn available(&self) -> bool;

    /// Largest packet accepted by [`Transport::send`]
    fn max_packet_size(&self) -> usize {
        self.kind().max_packet_size()
    }

    /// Establish the link eagerly. Transports that connect lazily may ignore this.
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Send one packet, connecting first if needed
    async fn send(&self, packet: Bytes) -> Result<(), TransportError>;

    /// Register the inbound sink, replacing any previous one
    async fn on_message(&self, sink: mpsc::UnboundedSender<InboundFrame>);

    /// Tear down; safe to call repeatedly
    async fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let mut kinds = vec![
            TransportKind::LongRangeBridge,
            TransportKind::Relay,
            TransportKind::DirectRadio,
        ];
        kinds.sort_by_key(|k| k.priority());
        assert_eq!(
            kinds,
            vec![
                TransportKind::Relay,
                TransportKind::DirectRadio,
                TransportKind::LongRangeBridge
            ]
        );
    }

    #[test]
    fn test_long_range_budget() {
        assert_eq!(TransportKind::LongRangeBridge.max_packet_size(), 255);
        assert_eq!(TransportKind::LongRangeBridge.to_string(), "long-range");
    }
}
