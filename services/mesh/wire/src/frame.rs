//! Packet and frame structures.
//!
//! A packet is the header plus an encrypted body. Handshake packets carry the
//! initiator's identity key, ephemeral key and the id of the one-time prekey
//! they consumed ahead of the session fields, so the recipient can derive the
//! session without any prior exchange.

use crate::header::PacketHeader;
use bytes::Bytes;
use mesh_crypto::{NONCE_SIZE, TAG_SIZE};

/// Maximum serialized size for the long-range low-bandwidth transport
pub const LORA_MAX_PACKET_SIZE: usize = 255;

/// Public key length carried in the handshake section
pub const HANDSHAKE_KEY_SIZE: usize = 32;

/// Session initiation material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeInit {
    /// Initiator's identity public key
    pub identity_key: [u8; HANDSHAKE_KEY_SIZE],
    /// Initiator's ephemeral agreement key
    pub ephemeral_key: [u8; HANDSHAKE_KEY_SIZE],
    /// One-time prekey consumed by the initiator, if any
    pub one_time_key_id: Option<u32>,
}

impl HandshakeInit {
    /// Encoded length of this section
    pub fn encoded_size(&self) -> usize {
        HANDSHAKE_KEY_SIZE * 2 + 1 + if self.one_time_key_id.is_some() { 4 } else { 0 }
    }
}

/// Encrypted packet body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBody {
    /// Present iff the header type is HANDSHAKE
    pub handshake: Option<HandshakeInit>,
    /// Session the message belongs to
    pub session_id: u32,
    /// Position of the message key in the sending chain
    pub message_number: u32,
    /// AEAD nonce (sent in front of the ciphertext)
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext without nonce or tag
    pub ciphertext: Bytes,
    /// Detached authentication tag
    pub auth_tag: [u8; TAG_SIZE],
}

/// Complete wire packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Cleartext header
    pub header: PacketHeader,
    /// Encrypted body
    pub body: PacketBody,
}

impl Packet {
    /// Create a new packet
    pub fn new(header: PacketHeader, body: PacketBody) -> Self {
        Self { header, body }
    }
}

/// Anything that can arrive on a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Encrypted message packet
    Packet(Packet),
    /// CBOR discovery beacon
    Beacon(Bytes),
}
