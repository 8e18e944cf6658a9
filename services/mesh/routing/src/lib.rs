//! Route table, announce propagation and forwarding decisions for the hypha mesh.
//!
//! This crate provides the routing half of the transport core: interface modes
//! and their bandwidth policy, the announce-learned route table, duplicate
//! suppression, per-interface announce queues, and the forwarding engine that
//! turns each received packet into a deliver/forward/drop decision.
//!
//! Everything here is synchronous and owned; time is passed in explicitly.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod announce;
pub mod dedup;
pub mod engine;
pub mod mode;
pub mod next_hop;
pub mod router;
pub mod table;

pub use announce::*;
pub use dedup::*;
pub use engine::*;
pub use mode::*;
pub use next_hop::*;
pub use router::*;
pub use table::*;
