//! Priority transport selection and store-and-forward queueing for sacred mesh.
//!
//! The router tries its transports in fixed priority order and hands a packet
//! to the first one that is available, large enough and does not fail. When
//! none accepts, the packet waits in a bounded queue that a periodic retry
//! task drains as connectivity comes back.
//!
//! ## Features
//!
//! - **Fallback**: transport errors move on to the next medium, never to the caller
//! - **Store-and-Forward**: bounded FIFO, oldest evicted, TTL and retry budget per entry
//! - **Manual Mode**: queue everything until automatic delivery is re-enabled
//! - **Introspection**: transport status, queue stats and drop counters

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod failure_tracker;
pub mod message_queue;
pub mod router;

// Re-export main types
pub use config::{ConfigUpdate, MeshConfig, MAX_RETRIES};
pub use failure_tracker::TransportFailureTracker;
pub use message_queue::{MessageQueue, QueueStats, QueuedMessage};
pub use router::{DropReason, Router, RouterStats, RoutingError, SendOutcome, TransportStatus};
