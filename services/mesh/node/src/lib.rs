//! The hypha mesh node.
//!
//! Ties the codec, routing, identity and transfer crates together around a
//! single owned [`Node`] context:
//!
//! - **Receive path**: decode, verify announces, route, deliver, reassemble
//! - **Send path**: sign, optionally encrypt, route or flood, fragment
//! - **Maintenance**: periodic announces, retransmission, expiry
//! - **Serial bridge**: the device side of the KISS file protocol
//!
//! The core never performs I/O and never reads the clock. Drivers implement
//! [`Link`], crypto comes from a [`CryptoProvider`], and time from a
//! [`Clock`]. [`SharedNode`] runs the same core from tokio tasks.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod link;
pub mod node;
pub mod serial;
pub mod shared;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{NodeConfig, Profile, TransferSettings};
pub use crypto::{CryptoError, CryptoProvider, Signature};
pub use error::NodeError;
pub use events::{EventEnvelope, EventNotifier, NodeEvent};
pub use link::{Link, LinkError, Received};
pub use node::{Node, NodeStats, Transmission};
pub use serial::{SerialBridge, SerialOutput};
pub use shared::{transmit, SharedNode};
