//! Messages, events and status reported by the facade.

use chrono::{DateTime, Utc};
use mesh_discovery::DiscoveryEvent;
use mesh_routing::{MeshConfig, QueueStats, RouterStats, SendOutcome, TransportStatus};
use mesh_transport::TransportKind;
use mesh_wire::{MeshMessage, MsgType};
use serde::Serialize;

/// A decrypted, validated message from a contact
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Contact id of the sender
    pub from: String,
    /// Decoded payload
    pub message: MeshMessage,
    /// Packet type it arrived as
    pub msg_type: MsgType,
    /// Medium it arrived on
    pub transport: TransportKind,
    /// Local receive time
    pub received_at: DateTime<Utc>,
}

/// Lifecycle and traffic notifications
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// A message left the facade
    MessageSent {
        /// Recipient contact id
        recipient: String,
        /// Delivered now or queued
        outcome: SendOutcome,
    },
    /// An inbound packet was dropped
    PacketDropped {
        /// Why
        reason: String,
    },
    /// A contact was created, explicitly or by an incoming handshake
    ContactAdded {
        /// Contact id
        id: String,
        /// Identity fingerprint
        fingerprint: String,
    },
    /// A contact was removed explicitly
    ContactRemoved {
        /// Contact id
        id: String,
    },
    /// Forwarded from peer discovery
    Discovery(DiscoveryEvent),
}

/// Snapshot returned by [`crate::SacredMesh::get_status`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshStatus {
    /// Configured node id
    pub node_id: String,
    /// Whether `initialize()` has completed
    pub initialized: bool,
    /// Identity fingerprint, once initialized
    pub fingerprint: Option<String>,
    /// Per-transport status in delivery order
    pub transports: Vec<TransportStatus>,
    /// Store-and-forward queue, once initialized
    pub queue: Option<QueueStats>,
    /// Router counters, once initialized
    pub router: Option<RouterStats>,
    /// Known contacts
    pub contacts: usize,
    /// Live discovered peers
    pub peers: usize,
    /// Active router configuration
    pub config: MeshConfig,
}
