//! Key bundles, X3DH-style handshakes and per-direction ratchets for sacred mesh.
//!
//! This crate owns everything secret about a node's relationships: its
//! identity, its prekeys, and one forward-secret session per contact. It
//! knows nothing about packets or transports; callers pass ciphertext, tag and
//! [`HeaderInfo`] in and out.
//!
//! ## Features
//!
//! - **Key Bundles**: signed prekey plus a bounded pool of one-time prekeys
//! - **Handshake**: four-way Diffie-Hellman into a root key, carried inline in the first packets
//! - **Ratchet**: separate sending and receiving chains, single-use message keys
//! - **Out-of-order Tolerance**: bounded cache of skipped message keys
//! - **Contacts**: per-contact locking, trust levels, explicit removal
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_session::SessionManager;
//!
//! # async fn example() -> Result<(), mesh_session::SessionError> {
//! let alice = SessionManager::generate("alice")?;
//! let bob = SessionManager::generate("bob")?;
//!
//! let bundle = alice.generate_key_bundle().await?;
//! let contact = bob.add_contact("alice", bundle).await?;
//! println!("alice is {}", contact.fingerprint);
//!
//! let sealed = bob.encrypt_message("alice", b"hello").await?;
//! println!("session {:08x}", sealed.header_info.session_id);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bundle;
pub mod contact;
pub mod error;
pub mod handshake;
pub mod manager;
pub mod prekeys;
pub mod ratchet;

// Re-export main types
pub use bundle::{KeyBundle, KeyBundlePayload, OneTimePreKey};
pub use contact::{Contact, ContactInfo, SessionState, TrustLevel};
pub use error::SessionError;
pub use handshake::{session_id_for, HandshakeInfo};
pub use manager::{AcceptedHandshake, EncryptedMessage, HeaderInfo, SessionManager, MAX_NODE_ID_LEN};
pub use prekeys::{MAX_ONE_TIME_KEYS, ONE_TIME_KEYS_PER_BUNDLE};
pub use ratchet::{RatchetState, MAX_SKIPPED_KEYS};
