//! Presence beacons and a staleness-bounded peer registry for sacred mesh.
//!
//! Each node periodically broadcasts a CBOR beacon on every transport with
//! its node id, capability tags and, optionally, its key-bundle payload.
//! Receivers track peers until they fall silent for longer than the
//! staleness window, and open an unverified session with peers they have no
//! contact for yet.
//!
//! ## Features
//!
//! - **Beacons**: short-keyed CBOR, skipped on media too small to carry them
//! - **Registry**: last-seen tracking, per-transport views, capability ranking
//! - **Opportunistic Sessions**: never replaces or upgrades an existing contact
//! - **Events**: typed broadcast channel for discovered, lost and added peers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod beacon;
pub mod discovery;
pub mod registry;

// Re-export main types
pub use beacon::{BeaconError, DiscoveryBeacon, DEFAULT_CAPABILITIES, MESH_VERSION};
pub use discovery::{DiscoveryConfig, DiscoveryError, DiscoveryEvent, PeerDiscovery};
pub use registry::{PeerInfo, PeerRegistry, RegistryStats};
