//! Transfer errors

use mesh_wire::{TransferId, WireError};
use thiserror::Error;

/// Which side of a transfer an event or error concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Fragments arriving from a peer
    Inbound,
    /// Fragments this node sends
    Outbound,
}

/// Errors raised while sending or reassembling transfers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// A start was requested for an id that is still live
    #[error("Transfer {0} already in progress")]
    DuplicateTransferStart(TransferId),

    /// FINAL arrived but lower indices are missing
    #[error("Transfer {transfer_id} incomplete: {received} fragments held, missing {missing:?}")]
    IncompleteTransfer {
        /// Transfer concerned
        transfer_id: TransferId,
        /// Indices below FINAL that have not arrived
        missing: Vec<u8>,
        /// Fragments held so far
        received: usize,
    },

    /// No activity within the inactivity timeout
    #[error("Transfer {transfer_id} timed out after {received} fragments")]
    TransferTimeout {
        /// Transfer concerned
        transfer_id: TransferId,
        /// Fragments received or acknowledged before the timeout
        received: usize,
        /// Total fragments, if known
        expected: Option<usize>,
    },

    /// A fragment went unacknowledged through every retry
    #[error("Transfer {transfer_id} fragment {index} unacknowledged after {attempts} attempts")]
    RetriesExhausted {
        /// Transfer concerned
        transfer_id: TransferId,
        /// Fragment that failed
        index: u8,
        /// Transmissions made
        attempts: u32,
    },

    /// Data exceeds the transfer size limit
    #[error("Transfer of {size} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Offending size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// No transfer with that id
    #[error("Unknown transfer {0}")]
    UnknownTransfer(TransferId),

    /// Outbound registry is full
    #[error("Too many concurrent transfers (limit {0})")]
    TooManyTransfers(usize),

    /// Data was appended to a stream that has already finished
    #[error("Transfer {0} stream already finished")]
    StreamFinished(TransferId),

    /// Metadata header could not be parsed
    #[error("Malformed metadata header: {0}")]
    Metadata(&'static str),

    /// Fragment encoding failure
    #[error("Fragment error: {0}")]
    Fragment(#[from] WireError),
}

impl TransferError {
    /// Short label for counters and logs
    pub fn label(&self) -> &'static str {
        match self {
            TransferError::DuplicateTransferStart(_) => "duplicate_start",
            TransferError::IncompleteTransfer { .. } => "incomplete",
            TransferError::TransferTimeout { .. } => "timeout",
            TransferError::RetriesExhausted { .. } => "retries_exhausted",
            TransferError::TooLarge { .. } => "too_large",
            TransferError::UnknownTransfer(_) => "unknown_transfer",
            TransferError::TooManyTransfers(_) => "too_many_transfers",
            TransferError::StreamFinished(_) => "stream_finished",
            TransferError::Metadata(_) => "metadata",
            TransferError::Fragment(_) => "fragment",
        }
    }
}
