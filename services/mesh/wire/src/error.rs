//! Wire protocol error types.

use thiserror::Error;

/// Errors raised while building or interpreting wire structures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Unknown packet type
    #[error("unknown packet type {0:#04x}")]
    Type(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Buffer too short for the structure being parsed
    #[error("truncated: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required
        need: usize,
        /// Bytes available
        have: usize,
    },

    /// Field contents are not valid
    #[error("malformed {0}")]
    Malformed(&'static str),
}

/// Packet decode failures. Every variant results in a silent drop plus a counter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer than 32 bytes available
    #[error("truncated packet: {0} bytes")]
    Truncated(usize),

    /// `payload_len` does not match the bytes that follow the header
    #[error("length mismatch: header says {declared}, buffer holds {actual}")]
    LengthMismatch {
        /// Payload length plus trailer the header implies
        declared: usize,
        /// Bytes actually present after the header
        actual: usize,
    },

    /// Payload hash does not match the header
    #[error("payload hash mismatch")]
    HashMismatch,

    /// Unknown packet type
    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),
}

impl DecodeError {
    /// Short label used as a counter key
    pub fn label(&self) -> &'static str {
        match self {
            DecodeError::Truncated(_) => "truncated",
            DecodeError::LengthMismatch { .. } => "length_mismatch",
            DecodeError::HashMismatch => "hash_mismatch",
            DecodeError::UnknownType(_) => "unknown_type",
        }
    }
}

/// Serial framing protocol errors. The decoder resynchronises after each one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Escape byte followed by something other than TFEND/TFESC
    #[error("invalid escape sequence 0xdb {0:#04x}")]
    InvalidEscape(u8),

    /// Frame grew past the configured maximum
    #[error("frame exceeds {0} bytes")]
    Oversize(usize),

    /// Command byte outside the known vocabulary
    #[error("unknown command {command:#04x}")]
    UnknownCommand {
        /// Raw command byte
        command: u8,
        /// Unescaped payload that came with it
        payload: Vec<u8>,
    },

    /// Known command with a payload that does not parse
    #[error("bad payload for {command}: {reason}")]
    BadPayload {
        /// Command name
        command: &'static str,
        /// What was wrong
        reason: &'static str,
    },
}
