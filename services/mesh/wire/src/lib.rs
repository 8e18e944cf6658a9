//! Wire formats for the hypha mesh.
//!
//! This crate holds every byte layout the mesh speaks, with no I/O and no
//! routing state:
//!
//! - **Addresses**: 16-byte truncated SHA-256 of the signing key
//! - **Packets**: 32-byte fixed header, payload, optional 64-byte signature
//! - **Fragments**: transfer id, index and flags in front of up to 200 data bytes
//! - **Serial framing**: KISS-style escaped frames with a one-byte command
//!
//! ## Packet Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | Header (32B)         | flags, ttl, hops, type,    |
//! |                      | destination, len, hash     |
//! +----------------------+----------------------------+
//! | Payload              | 0..65535 bytes             |
//! +----------------------+----------------------------+
//! | Signature (opt)      | 64 bytes iff SIGNED        |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod control;
pub mod error;
pub mod fragment;
pub mod header;
pub mod kiss;
pub mod packet;

// Re-export main types
pub use address::{Address, PublicIdentity, ADDRESS_SIZE, KEY_SIZE, PUBLIC_IDENTITY_SIZE};
pub use control::{Command, ControlMessage, FileOffer, FILE_DATA_CHUNK};
pub use error::{DecodeError, FrameError, WireError};
pub use fragment::{
    fragment_count, split, Fragment, FragmentAck, FragmentFlags, TransferId, FRAGMENT_HEADER_SIZE,
    MAX_FRAGMENTS, MAX_FRAGMENT_DATA, TRANSFER_ID_SIZE,
};
pub use header::{
    payload_hash, Flags, PacketHeader, PacketType, DEFAULT_TTL, HEADER_SIZE, PAYLOAD_HASH_SIZE,
};
pub use kiss::{encode_frame, KissDecoder, KissFrame, StreamItem, DEFAULT_MAX_FRAME_SIZE};
pub use packet::{signing_input, Packet, PacketBuilder, MAX_PAYLOAD_SIZE, SIGNATURE_SIZE};
