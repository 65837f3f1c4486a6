//! Encoding, decoding and validation of packets.
//!
//! ```text
//! +----------------------+----------------------------------------+
//! | header (26B)         | version, type, sender hash, counter, ts|
//! +----------------------+----------------------------------------+
//! | handshake (opt)      | identity 32 | ephemeral 32 | otk flag  |
//! |                      | (+ otk id u32)  only for HANDSHAKE     |
//! +----------------------+----------------------------------------+
//! | u32 session_id       |                                        |
//! | u32 message_number   |                                        |
//! +----------------------+----------------------------------------+
//! | u16 cipher_len       | nonce + ciphertext length              |
//! | nonce (12B)          |                                        |
//! | ciphertext           |                                        |
//! +----------------------+----------------------------------------+
//! | auth tag (16B)       |                                        |
//! +----------------------+----------------------------------------+
//! ```

use crate::error::{ProtocolError, WireError};
use crate::frame::{
    Frame, HandshakeInit, Packet, PacketBody, HANDSHAKE_KEY_SIZE, LORA_MAX_PACKET_SIZE,
};
use crate::header::{MsgType, PacketHeader, HEADER_SIZE, WIRE_VERSION};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use mesh_crypto::{NONCE_SIZE, TAG_SIZE};
use std::time::{SystemTime, UNIX_EPOCH};

/// Tolerated difference between packet timestamp and local clock
pub const MAX_CLOCK_SKEW_SECS: u64 = 300;

const SESSION_FIELDS_SIZE: usize = 4 + 4 + 2;

/// Serialized size of a packet, computed without serializing it
pub fn calculate_packet_size(packet: &Packet) -> usize {
    let mut size = HEADER_SIZE;
    if let Some(ref handshake) = packet.body.handshake {
        size += handshake.encoded_size();
    }
    size += SESSION_FIELDS_SIZE;
    size += NONCE_SIZE + packet.body.ciphertext.len();
    size += TAG_SIZE;
    size
}

/// Whether the packet fits the long-range bridge budget
pub fn is_lora_compatible(packet: &Packet) -> bool {
    calculate_packet_size(packet) <= LORA_MAX_PACKET_SIZE
}

/// Serialize a packet to its compact binary form
pub fn serialize_packet(packet: &Packet) -> Result<Bytes, WireError> {
    let body = &packet.body;
    let is_handshake = packet.header.msg_type == MsgType::Handshake;
    if is_handshake != body.handshake.is_some() || packet.header.msg_type == MsgType::Beacon {
        return Err(WireError::Malformed);
    }

    let cipher_len = NONCE_SIZE + body.ciphertext.len();
    if cipher_len > u16::MAX as usize {
        return Err(WireError::Size(cipher_len));
    }

    let mut buf = BytesMut::with_capacity(calculate_packet_size(packet));
    packet.header.encode(&mut buf);

    if let Some(ref handshake) = body.handshake {
        buf.put_slice(&handshake.identity_key);
        buf.put_slice(&handshake.ephemeral_key);
        match handshake.one_time_key_id {
            Some(id) => {
                buf.put_u8(1);
                buf.put_u32(id);
            }
            None => buf.put_u8(0),
        }
    }

    buf.put_u32(body.session_id);
    buf.put_u32(body.message_number);
    buf.put_u16(cipher_len as u16);
    buf.put_slice(&body.nonce);
    buf.put_slice(&body.ciphertext);
    buf.put_slice(&body.auth_tag);

    Ok(buf.freeze())
}

/// Deserialize a packet. Trailing bytes are rejected.
pub fn deserialize_packet(mut buf: Bytes) -> Result<Packet, WireError> {
    let header = PacketHeader::decode(&mut buf)?;
    if header.msg_type == MsgType::Beacon {
        return Err(WireError::Malformed);
    }

    let handshake = if header.msg_type == MsgType::Handshake {
        if buf.len() < HANDSHAKE_KEY_SIZE * 2 + 1 {
            return Err(WireError::Incomplete);
        }
        let mut identity_key = [0u8; HANDSHAKE_KEY_SIZE];
        let mut ephemeral_key = [0u8; HANDSHAKE_KEY_SIZE];
        buf.copy_to_slice(&mut identity_key);
        buf.copy_to_slice(&mut ephemeral_key);
        let one_time_key_id = match buf.get_u8() {
            0 => None,
            1 => {
                if buf.len() < 4 {
                    return Err(WireError::Incomplete);
                }
                Some(buf.get_u32())
            }
            _ => return Err(WireError::Malformed),
        };
        Some(HandshakeInit {
            identity_key,
            ephemeral_key,
            one_time_key_id,
        })
    } else {
        None
    };

    if buf.len() < SESSION_FIELDS_SIZE {
        return Err(WireError::Incomplete);
    }
    let session_id = buf.get_u32();
    let message_number = buf.get_u32();
    let cipher_len = buf.get_u16() as usize;

    if cipher_len < NONCE_SIZE {
        return Err(WireError::Malformed);
    }
    if buf.len() < cipher_len + TAG_SIZE {
        return Err(WireError::Incomplete);
    }
    if buf.len() > cipher_len + TAG_SIZE {
        return Err(WireError::Malformed);
    }

    let mut nonce = [0u8; NONCE_SIZE];
    buf.copy_to_slice(&mut nonce);
    let ciphertext = buf.split_to(cipher_len - NONCE_SIZE);
    let mut auth_tag = [0u8; TAG_SIZE];
    buf.copy_to_slice(&mut auth_tag);

    Ok(Packet {
        header,
        body: PacketBody {
            handshake,
            session_id,
            message_number,
            nonce,
            ciphertext,
            auth_tag,
        },
    })
}

/// Prefix a CBOR beacon with the version and BEACON type bytes
pub fn encode_beacon_frame(beacon: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + beacon.len());
    buf.put_u8(WIRE_VERSION);
    buf.put_u8(MsgType::Beacon as u8);
    buf.put_slice(beacon);
    buf.freeze()
}

/// Decode anything received from a transport
pub fn decode_frame(buf: Bytes) -> Result<Frame, WireError> {
    if buf.len() < 2 {
        return Err(WireError::Incomplete);
    }
    match MsgType::try_from(buf[1])? {
        MsgType::Beacon if buf[0] != WIRE_VERSION => Err(WireError::Version(buf[0])),
        MsgType::Beacon => Ok(Frame::Beacon(buf.slice(2..))),
        // Packet versions are checked by `validate_packet`
        _ => deserialize_packet(buf).map(Frame::Packet),
    }
}

/// Validate version, replay counter and clock skew against the local clock
pub fn validate_packet(packet: &Packet, last_seen_counter: u32) -> Result<(), ProtocolError> {
    validate_packet_at(packet, last_seen_counter, unix_now())
}

/// Validate against an explicit `now` (seconds since the Unix epoch).
///
/// The checks are independent: version, then replay, then skew.
pub fn validate_packet_at(
    packet: &Packet,
    last_seen_counter: u32,
    now: u64,
) -> Result<(), ProtocolError> {
    let header = &packet.header;
    if header.version != WIRE_VERSION {
        return Err(ProtocolError::UnsupportedVersion(header.version));
    }

    if header.counter <= last_seen_counter {
        return Err(ProtocolError::Replay {
            counter: header.counter,
            last_seen: last_seen_counter,
        });
    }

    let skew_secs = now.abs_diff(header.timestamp as u64);
    if skew_secs > MAX_CLOCK_SKEW_SECS {
        return Err(ProtocolError::ClockSkew { skew_secs });
    }

    Ok(())
}

/// Current time in whole seconds since the Unix epoch
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_crypto::hash_sender_id;

    const NOW: u64 = 1_700_000_000;

    fn packet(msg_type: MsgType, counter: u32, timestamp: u32, payload_len: usize) -> Packet {
        let handshake = (msg_type == MsgType::Handshake).then(|| HandshakeInit {
            identity_key: [1u8; 32],
            ephemeral_key: [2u8; 32],
            one_time_key_id: Some(7),
        });
        Packet::new(
            PacketHeader::new(msg_type, hash_sender_id("bob"), counter, timestamp),
            PacketBody {
                handshake,
                session_id: 0xDEAD_BEEF,
                message_number: 3,
                nonce: [9u8; NONCE_SIZE],
                ciphertext: Bytes::from(vec![0xAB; payload_len]),
                auth_tag: [5u8; TAG_SIZE],
            },
        )
    }

    #[test]
    fn test_packet_serialize_deserialize() {
        for msg_type in [MsgType::Direct, MsgType::Circle, MsgType::Handshake] {
            let original = packet(msg_type, 10, NOW as u32, 40);
            let bytes = serialize_packet(&original).unwrap();
            assert_eq!(bytes.len(), calculate_packet_size(&original));
            assert_eq!(deserialize_packet(bytes).unwrap(), original);
        }
    }

    #[test]
    fn test_handshake_without_one_time_key() {
        let mut original = packet(MsgType::Handshake, 1, NOW as u32, 8);
        if let Some(ref mut handshake) = original.body.handshake {
            handshake.one_time_key_id = None;
        }
        let bytes = serialize_packet(&original).unwrap();
        assert_eq!(bytes.len(), calculate_packet_size(&original));
        assert_eq!(deserialize_packet(bytes).unwrap(), original);
    }

    #[test]
    fn test_handshake_section_must_match_type() {
        let mut direct = packet(MsgType::Direct, 1, NOW as u32, 8);
        direct.body.handshake = packet(MsgType::Handshake, 1, 0, 0).body.handshake;
        assert_eq!(serialize_packet(&direct), Err(WireError::Malformed));

        let mut handshake = packet(MsgType::Handshake, 1, NOW as u32, 8);
        handshake.body.handshake = None;
        assert_eq!(serialize_packet(&handshake), Err(WireError::Malformed));
    }

    #[test]
    fn test_deserialize_rejects_truncation_and_trailing_bytes() {
        let bytes = serialize_packet(&packet(MsgType::Direct, 1, NOW as u32, 20)).unwrap();

        let truncated = bytes.slice(..bytes.len() - 1);
        assert_eq!(deserialize_packet(truncated), Err(WireError::Incomplete));

        let mut extended = bytes.to_vec();
        extended.push(0);
        assert_eq!(
            deserialize_packet(Bytes::from(extended)),
            Err(WireError::Malformed)
        );
    }

    #[test]
    fn test_lora_budget() {
        let small = packet(MsgType::Handshake, 1, NOW as u32, 80);
        assert!(is_lora_compatible(&small));

        // header 26 + session fields 10 + nonce 12 + tag 16 = 64 bytes overhead
        let exact = packet(MsgType::Direct, 1, NOW as u32, LORA_MAX_PACKET_SIZE - 64);
        assert_eq!(calculate_packet_size(&exact), LORA_MAX_PACKET_SIZE);
        assert!(is_lora_compatible(&exact));

        let over = packet(MsgType::Direct, 1, NOW as u32, LORA_MAX_PACKET_SIZE - 63);
        assert!(!is_lora_compatible(&over));
    }

    #[test]
    fn test_validate_version() {
        let mut p = packet(MsgType::Direct, 5, NOW as u32, 4);
        p.header.version = 2;
        assert_eq!(
            validate_packet_at(&p, 0, NOW),
            Err(ProtocolError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_validate_replay() {
        let p = packet(MsgType::Direct, 5, NOW as u32, 4);
        assert!(validate_packet_at(&p, 4, NOW).is_ok());
        assert!(validate_packet_at(&p, 0, NOW).is_ok());
        for last_seen in [5, 6, 100, u32::MAX] {
            assert_eq!(
                validate_packet_at(&p, last_seen, NOW),
                Err(ProtocolError::Replay {
                    counter: 5,
                    last_seen
                })
            );
        }
    }

    #[test]
    fn test_validate_clock_skew_boundary() {
        let at_limit = packet(MsgType::Direct, 1, (NOW - 300) as u32, 4);
        assert!(validate_packet_at(&at_limit, 0, NOW).is_ok());

        let past_limit = packet(MsgType::Direct, 1, (NOW - 301) as u32, 4);
        assert_eq!(
            validate_packet_at(&past_limit, 0, NOW),
            Err(ProtocolError::ClockSkew { skew_secs: 301 })
        );

        let future = packet(MsgType::Direct, 1, (NOW + 301) as u32, 4);
        assert!(validate_packet_at(&future, 0, NOW).is_err());
        let near_future = packet(MsgType::Direct, 1, (NOW + 300) as u32, 4);
        assert!(validate_packet_at(&near_future, 0, NOW).is_ok());
    }

    #[test]
    fn test_validate_current_clock() {
        let p = packet(MsgType::Direct, 1, unix_now() as u32, 4);
        assert!(validate_packet(&p, 0).is_ok());
    }

    #[test]
    fn test_decode_frame_dispatch() {
        let beacon = encode_beacon_frame(b"\xA0");
        assert_eq!(
            decode_frame(beacon).unwrap(),
            Frame::Beacon(Bytes::from_static(b"\xA0"))
        );

        let original = packet(MsgType::Direct, 3, NOW as u32, 12);
        let bytes = serialize_packet(&original).unwrap();
        assert_eq!(decode_frame(bytes).unwrap(), Frame::Packet(original));

        assert_eq!(decode_frame(Bytes::from_static(&[1])), Err(WireError::Incomplete));
        assert_eq!(
            decode_frame(Bytes::from(vec![9, MsgType::Beacon as u8, 0xA0])),
            Err(WireError::Version(9))
        );
    }

    #[test]
    fn test_unsupported_version_reported_by_validation() {
        let mut original = packet(MsgType::Direct, 3, NOW as u32, 12);
        original.header.version = 2;
        let bytes = serialize_packet(&original).unwrap();

        let Frame::Packet(decoded) = decode_frame(bytes).unwrap() else {
            panic!("expected a packet frame");
        };
        assert_eq!(decoded.header.version, 2);
        assert_eq!(
            validate_packet_at(&decoded, 0, NOW),
            Err(ProtocolError::UnsupportedVersion(2))
        );
    }
}
