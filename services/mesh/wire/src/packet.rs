//! Packet encoding and decoding.
//!
//! A packet is the 32-byte header, the payload, and a 64-byte signature that is
//! present exactly when the SIGNED flag is set. Decoding is strict: the buffer
//! must hold precisely what the header declares.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::address::Address;
use crate::header::{payload_hash, Flags, PacketHeader, PacketType, HEADER_SIZE};
use crate::{DecodeError, WireError};

/// Signature trailer size
pub const SIGNATURE_SIZE: usize = 64;

/// Largest payload the 16-bit length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// A complete packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Fixed header
    pub header: PacketHeader,
    /// Payload bytes
    pub payload: Bytes,
    /// Signature over [`Packet::signing_input`], present iff SIGNED
    pub signature: Option<[u8; SIGNATURE_SIZE]>,
}

impl Packet {
    /// Total encoded size
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + self.signature.map_or(0, |_| SIGNATURE_SIZE)
    }

    /// Encode to a contiguous buffer
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.header.encode(&mut buf);
        buf.put_slice(&self.payload);
        if let Some(sig) = &self.signature {
            buf.put_slice(sig);
        }
        buf.freeze()
    }

    /// Decode and verify length and payload hash.
    ///
    /// Only the payload region is copied out of `data` (zero-copy when the input
    /// is already `Bytes`).
    pub fn decode(data: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let mut data: Bytes = data.into();
        let header = PacketHeader::decode(&mut data)?;

        let signed = header.flags.contains(Flags::SIGNED);
        let declared =
            header.payload_len as usize + if signed { SIGNATURE_SIZE } else { 0 };
        if data.remaining() != declared {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: data.remaining(),
            });
        }

        let payload = data.split_to(header.payload_len as usize);
        if payload_hash(&payload) != header.payload_hash {
            return Err(DecodeError::HashMismatch);
        }

        let signature = if signed {
            let mut sig = [0u8; SIGNATURE_SIZE];
            data.copy_to_slice(&mut sig);
            Some(sig)
        } else {
            None
        };

        Ok(Self {
            header,
            payload,
            signature,
        })
    }

    /// Bytes a signature covers: normalized header followed by the payload
    pub fn signing_input(&self) -> Bytes {
        signing_input(&self.header, &self.payload)
    }

    /// Copy of this packet as a relay transmits it
    pub fn forwarded(&self) -> Self {
        Self {
            header: self.header.forwarded(),
            payload: self.payload.clone(),
            signature: self.signature,
        }
    }

    /// Packet type shortcut
    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    /// Destination shortcut
    pub fn destination(&self) -> Address {
        self.header.destination
    }
}

/// Signature input for a header/payload pair
pub fn signing_input(header: &PacketHeader, payload: &[u8]) -> Bytes {
    let mut buf = header.signing_bytes();
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Builder for locally originated packets
#[derive(Debug)]
pub struct PacketBuilder {
    header: PacketHeader,
    payload: Bytes,
}

impl PacketBuilder {
    /// Start a packet of the given type to `destination`
    pub fn new(packet_type: PacketType, destination: Address) -> Self {
        Self {
            header: PacketHeader::new(packet_type, destination),
            payload: Bytes::new(),
        }
    }

    /// Set the initial TTL
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.header.ttl = ttl;
        self
    }

    /// Add flags. SIGNED is managed by [`PacketBuilder::sign_with`] and ignored here.
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.header.flags |= flags - Flags::SIGNED;
        self
    }

    /// Set the payload
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Finalize header fields without a signature
    pub fn build(self) -> Result<Packet, WireError> {
        let header = self.finish_header(false)?;
        Ok(Packet {
            header,
            payload: self.payload,
            signature: None,
        })
    }

    /// Finalize and sign. `sign` receives the signing input.
    pub fn sign_with<F>(self, sign: F) -> Result<Packet, WireError>
    where
        F: FnOnce(&[u8]) -> [u8; SIGNATURE_SIZE],
    {
        let header = self.finish_header(true)?;
        let signature = sign(&signing_input(&header, &self.payload));
        Ok(Packet {
            header,
            payload: self.payload,
            signature: Some(signature),
        })
    }

    fn finish_header(&self, signed: bool) -> Result<PacketHeader, WireError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::Size(self.payload.len()));
        }
        let mut header = self.header;
        header.flags.set(Flags::SIGNED, signed);
        header.payload_len = self.payload.len() as u16;
        header.payload_hash = payload_hash(&self.payload);
        Ok(header)
    }
}
