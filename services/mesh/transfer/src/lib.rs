//! Fragmentation and reassembly of hypha mesh transfers.
//!
//! Payloads too large for one radio packet travel as a transfer: a random
//! 128-bit id, fragments indexed from 0, FINAL on the last. This crate keeps
//! the per-transfer state for both directions:
//!
//! - [`InboundTransfer`]: reorder-tolerant reassembly keyed by fragment index
//! - [`OutboundTransfer`]: windowed sending with per-fragment acks and resends,
//!   or a single pass when acks are not wanted
//! - [`TransferManager`]: bounded registries, timeouts and progress events
//! - [`FileMetadata`]: the `key=value` header in front of file data

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod inbound;
pub mod manager;
pub mod metadata;
pub mod outbound;

pub use error::{Direction, TransferError};
pub use inbound::{InboundStatus, InboundTransfer};
pub use manager::{
    OutgoingFragment, TransferConfig, TransferEvent, TransferManager, TransferStats,
    DEFAULT_INACTIVITY_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_MAX_TRANSFERS,
    DEFAULT_MAX_TRANSFER_SIZE, DEFAULT_RETRANSMIT_TIMEOUT, DEFAULT_WINDOW,
};
pub use metadata::FileMetadata;
pub use outbound::OutboundTransfer;
