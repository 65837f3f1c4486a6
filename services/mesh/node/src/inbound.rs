//! Outbound sealing and the inbound packet pipeline.
//!
//! Inbound frames are handled one at a time in arrival order. Every failure
//! here is per-packet: it is logged, reported as a `PacketDropped` event and
//! never reaches the application as plaintext.

use crate::error::MeshError;
use crate::events::{MeshEvent, ReceivedMessage};
use crate::mesh::Running;
use bytes::Bytes;
use chrono::Utc;
use mesh_crypto::{AgreementPublicKey, IdentityPublicKey};
use mesh_session::{HandshakeInfo, HeaderInfo};
use mesh_transport::{InboundFrame, TransportKind};
use mesh_wire::{
    decode_frame, unix_now, validate_packet, Frame, HandshakeInit, MeshMessage, MsgType, Packet,
    PacketBody, PacketHeader,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

impl Running {
    /// Encrypt `plaintext` for `recipient` under a header bound as associated data
    pub(crate) async fn seal(
        &self,
        recipient: &str,
        circle: bool,
        counter: u32,
        plaintext: &[u8],
    ) -> Result<Packet, MeshError> {
        let sender = self.node_hash;
        let timestamp = unix_now() as u32;
        let header_for = |handshake: bool| {
            let msg_type = if handshake {
                MsgType::Handshake
            } else if circle {
                MsgType::Circle
            } else {
                MsgType::Direct
            };
            PacketHeader::new(msg_type, sender, counter, timestamp)
        };

        let sealed = self
            .sessions
            .encrypt_message_with_aad(recipient, plaintext, |handshake| {
                header_for(handshake).to_bytes().to_vec()
            })
            .await?;
        let info = sealed.header_info;

        Ok(Packet::new(
            header_for(info.handshake.is_some()),
            PacketBody {
                handshake: info.handshake.map(|h| HandshakeInit {
                    identity_key: *h.identity_key.as_bytes(),
                    ephemeral_key: *h.ephemeral_key.as_bytes(),
                    one_time_key_id: h.one_time_key_id,
                }),
                session_id: info.session_id,
                message_number: info.message_number,
                nonce: info.nonce,
                ciphertext: Bytes::from(sealed.ciphertext),
                auth_tag: sealed.auth_tag,
            },
        ))
    }

    pub(crate) fn spawn_inbound(
        state: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<InboundFrame>,
    ) -> JoinHandle<()> {
        let state = Arc::downgrade(state);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let Some(state) = state.upgrade() else {
                    break;
                };
                state.handle_frame(frame).await;
            }
            debug!("Inbound pipeline stopped");
        })
    }

    pub(crate) fn spawn_discovery_forwarder(state: &Arc<Self>) -> JoinHandle<()> {
        let mut discovery = state.discovery.subscribe();
        let events = state.events.clone();
        tokio::spawn(async move {
            loop {
                match discovery.recv().await {
                    Ok(event) => {
                        let _ = events.send(MeshEvent::Discovery(event));
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Dropped {} discovery events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_frame(&self, frame: InboundFrame) {
        match decode_frame(frame.bytes) {
            Ok(Frame::Packet(packet)) => self.handle_packet(packet, frame.transport).await,
            Ok(Frame::Beacon(body)) => {
                if let Err(e) = self.discovery.handle_beacon(body, frame.transport).await {
                    debug!("Ignoring beacon: {}", e);
                }
            }
            Err(e) => self.drop_packet(format!("undecodable frame on {}: {}", frame.transport, e)),
        }
    }

    async fn handle_packet(&self, packet: Packet, transport: TransportKind) {
        let header = packet.header;
        let sender = header.sender_id_hash;
        if sender == self.node_hash {
            return;
        }

        let last_seen = self.last_seen.get(&sender).map(|c| *c).unwrap_or(0);
        if let Err(e) = validate_packet(&packet, last_seen) {
            self.drop_packet(format!("from {}: {}", sender, e));
            return;
        }

        let aad = header.to_bytes();
        let body = &packet.body;
        let header_info = HeaderInfo {
            handshake: body.handshake.map(|h| HandshakeInfo {
                identity_key: IdentityPublicKey::from_bytes(h.identity_key),
                ephemeral_key: AgreementPublicKey::from_bytes(h.ephemeral_key),
                one_time_key_id: h.one_time_key_id,
            }),
            session_id: body.session_id,
            message_number: body.message_number,
            nonce: body.nonce,
        };

        let opened = match header.msg_type {
            MsgType::Handshake => {
                match self
                    .sessions
                    .accept_handshake(sender, &body.ciphertext, &body.auth_tag, &header_info, &aad)
                    .await
                {
                    Ok(accepted) => {
                        if accepted.new_session {
                            self.announce_contact(&accepted.contact_id).await;
                        }
                        Ok((accepted.contact_id, accepted.plaintext))
                    }
                    Err(e) => Err(e),
                }
            }
            MsgType::Direct | MsgType::Circle | MsgType::Broadcast => {
                let Some(contact_id) = self.sessions.contact_for_sender(&sender) else {
                    self.drop_packet(format!("from unknown sender {}", sender));
                    return;
                };
                self.sessions
                    .decrypt_message_with_aad(
                        &contact_id,
                        &body.ciphertext,
                        &body.auth_tag,
                        &header_info,
                        &aad,
                    )
                    .await
                    .map(|plaintext| (contact_id, plaintext))
            }
            MsgType::Ack | MsgType::Beacon => {
                debug!("Ignoring {:?} packet from {}", header.msg_type, sender);
                return;
            }
        };

        let (from, plaintext) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.drop_packet(format!("from {}: {}", sender, e));
                return;
            }
        };

        // Only authenticated packets move the replay window
        self.last_seen
            .entry(sender)
            .and_modify(|c| *c = (*c).max(header.counter))
            .or_insert(header.counter);

        let message = match MeshMessage::decode(&plaintext) {
            Ok(message) => message,
            Err(e) => {
                self.drop_packet(format!("invalid payload from {}: {}", from, e));
                return;
            }
        };

        debug!("Received {:?} message from {} via {}", header.msg_type, from, transport);
        let received = ReceivedMessage {
            from,
            message,
            msg_type: header.msg_type,
            transport,
            received_at: Utc::now(),
        };
        if self.messages.send(received).is_err() {
            debug!("No message subscribers");
        }
    }

    async fn announce_contact(&self, contact_id: &str) {
        if let Some(contact) = self.sessions.contact(contact_id).await {
            info!(
                "New contact {} from handshake, fingerprint {} (unverified)",
                contact.id, contact.fingerprint
            );
            let _ = self.events.send(MeshEvent::ContactAdded {
                id: contact.id,
                fingerprint: contact.fingerprint,
            });
        }
    }

    fn drop_packet(&self, reason: String) {
        warn!("Dropped packet {}", reason);
        let _ = self.events.send(MeshEvent::PacketDropped { reason });
    }
}
