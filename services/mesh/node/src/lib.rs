//! Sacred mesh facade: wires sessions, codec, router and discovery into one node.
//!
//! [`SacredMesh`] is what applications talk to. Outgoing messages are
//! validated, encrypted under the recipient's session with the packet header
//! bound as associated data, serialized and handed to the router. Incoming
//! frames are decoded, checked for version, replay and clock skew,
//! decrypted, and published to every [`SacredMesh::on_message`] subscriber.
//!
//! ## Features
//!
//! - **Lifecycle**: `initialize()` loads or creates keys and starts timers; `disconnect()` is always safe
//! - **Messaging**: `send()` and a broadcast channel of received messages
//! - **Contacts**: key bundles, QR payload import, fingerprints, explicit removal
//! - **Status**: transport, queue and router snapshots plus a typed event stream
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_node::{NodeConfig, SacredMesh};
//! use mesh_wire::MeshMessage;
//!
//! # async fn example() -> Result<(), mesh_node::MeshError> {
//! let mesh = SacredMesh::new(NodeConfig::for_node("bob"));
//! mesh.initialize().await?;
//!
//! let mut inbox = mesh.on_message();
//! mesh.import_contact("alice", r#"{"identity":[],"preKey":[],"signature":[],"timestamp":0}"#)
//!     .await?;
//! mesh.send(&MeshMessage::new(vec!["☉".into()], 0.8), "alice").await?;
//!
//! if let Ok(received) = inbox.recv().await {
//!     println!("{} sent {:?}", received.from, received.message.sigils);
//! }
//! mesh.disconnect().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
mod inbound;
pub mod mesh;

// Re-export main types
pub use config::{NodeConfig, DEFAULT_NODE_ID};
pub use error::MeshError;
pub use events::{MeshEvent, MeshStatus, ReceivedMessage};
pub use mesh::SacredMesh;
