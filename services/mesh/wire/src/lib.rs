//! Compact packet headers, body framing, replay and skew validation, and CBOR
//! payloads for sacred mesh.
//!
//! This crate provides the wire format exchanged between mesh nodes. It never
//! encrypts anything itself: the session layer hands it ciphertext, nonce and
//! tag, and it lays them out as compactly as possible so that a packet fits
//! inside a single long-range radio frame.
//!
//! ## Features
//!
//! - **Fixed Header**: 26 bytes, carries a sender hash instead of an identity
//! - **Handshake Section**: X3DH initiation material inline in the first packets
//! - **Freshness Checks**: version, replay counter and clock skew validated independently
//! - **Size Budget**: packet size computable without serializing
//! - **CBOR Payloads**: short-keyed application messages
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | Header (26B)         | ver, type, sender, ctr, ts |
//! +----------------------+----------------------------+
//! | Handshake (opt)      | 65 or 69 bytes             |
//! +----------------------+----------------------------+
//! | Session fields       | session id, msg number     |
//! +----------------------+----------------------------+
//! | u16 + nonce + cipher | nonce-prefixed ciphertext  |
//! +----------------------+----------------------------+
//! | Auth tag (16B)       | Poly1305                   |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod header;
pub mod message;

// Re-export main types
pub use codec::{
    calculate_packet_size, decode_frame, deserialize_packet, encode_beacon_frame,
    is_lora_compatible, serialize_packet, unix_now, validate_packet, validate_packet_at,
    MAX_CLOCK_SKEW_SECS,
};
pub use error::{ProtocolError, WireError};
pub use frame::{Frame, HandshakeInit, Packet, PacketBody, HANDSHAKE_KEY_SIZE, LORA_MAX_PACKET_SIZE};
pub use header::{MsgType, PacketHeader, HEADER_SIZE, WIRE_VERSION};
pub use message::{MeshMessage, MAX_NOTE_BYTES};
