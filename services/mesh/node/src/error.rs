//! Node errors

use mesh_storage::StorageError;
use mesh_transfer::TransferError;
use mesh_wire::{Address, FrameError, WireError};
use thiserror::Error;

use crate::{CryptoError, LinkError};

/// Errors surfaced by node operations
#[derive(Error, Debug)]
pub enum NodeError {
    /// Packet or fragment could not be built
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// Serial frame could not be interpreted
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Transfer manager rejected the operation
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Identity storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Crypto provider failure
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Link failure
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// No route and flooding disabled
    #[error("No route to {0}")]
    NoRoute(Address),

    /// Encryption needs keys that have not been announced
    #[error("No identity known for {0}")]
    UnknownIdentity(Address),

    /// Serial client broke the command sequence
    #[error("Protocol error: {0}")]
    Protocol(&'static str),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
