//! Fixed packet header.
//!
//! The 26-byte header is the only part of a packet readable without keys. It
//! carries a hash of the sender id rather than the id itself, and the encoded
//! bytes double as AEAD associated data so the counter and timestamp cannot
//! be altered in flight.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mesh_crypto::{SenderIdHash, SENDER_HASH_SIZE};
use serde::{Deserialize, Serialize};

/// Wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 2 + SENDER_HASH_SIZE + 4 + 4;

/// Message types as defined in the wire protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgType {
    /// One-to-one message on an established session
    Direct = 0x01,
    /// Message addressed to a circle (group)
    Circle = 0x02,
    /// Broadcast message
    Broadcast = 0x03,
    /// Message carrying session initiation material
    Handshake = 0x04,
    /// Acknowledgment
    Ack = 0x05,
    /// Discovery beacon (unencrypted, no packet body)
    Beacon = 0x06,
}

impl TryFrom<u8> for MsgType {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MsgType::Direct),
            0x02 => Ok(MsgType::Circle),
            0x03 => Ok(MsgType::Broadcast),
            0x04 => Ok(MsgType::Handshake),
            0x05 => Ok(MsgType::Ack),
            0x06 => Ok(MsgType::Beacon),
            _ => Err(crate::WireError::Type(value)),
        }
    }
}

/// Packet header (26 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Protocol version (must be 1)
    pub version: u8,
    /// Message type
    pub msg_type: MsgType,
    /// Hash of the sender's node id
    pub sender_id_hash: SenderIdHash,
    /// Monotonically increasing per sender, starts at 1
    pub counter: u32,
    /// Seconds since the Unix epoch (UTC)
    pub timestamp: u32,
}

impl PacketHeader {
    /// Create a new header for the current wire version
    pub fn new(msg_type: MsgType, sender_id_hash: SenderIdHash, counter: u32, timestamp: u32) -> Self {
        Self {
            version: WIRE_VERSION,
            msg_type,
            sender_id_hash,
            counter,
            timestamp,
        }
    }

    /// Encode the header to bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.msg_type as u8);
        buf.put_slice(self.sender_id_hash.as_bytes());
        buf.put_u32(self.counter);
        buf.put_u32(self.timestamp);
    }

    /// Encoded header as a standalone buffer, used as AEAD associated data
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode the header from bytes (big-endian).
    ///
    /// Any version is accepted here; `validate_packet` rejects unsupported ones.
    pub fn decode(buf: &mut Bytes) -> Result<Self, crate::WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(crate::WireError::Incomplete);
        }

        let version = buf.get_u8();
        let msg_type = MsgType::try_from(buf.get_u8())?;
        let mut hash = [0u8; SENDER_HASH_SIZE];
        buf.copy_to_slice(&mut hash);
        let counter = buf.get_u32();
        let timestamp = buf.get_u32();

        Ok(Self {
            version,
            msg_type,
            sender_id_hash: SenderIdHash(hash),
            counter,
            timestamp,
        })
    }
}
