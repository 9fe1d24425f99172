//! Multicast transport and heartbeat-driven event loop for ReplFS.
//!
//! `spec.md` §4.2: a single-process-wide multicast channel with optional
//! outbound drop simulation, and one blocking event source that yields
//! either a decoded packet or a heartbeat tick on a fixed cadence.

mod error;
mod events;
mod socket;

pub use error::TransportError;
pub use events::{Event, EventSource, DEFAULT_HEARTBEAT};
pub use socket::{MulticastChannel, MULTICAST_GROUP, MULTICAST_TTL};
