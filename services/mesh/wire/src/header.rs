//! Fixed packet header.
//!
//! Every packet starts with a 32-byte big-endian header that carries everything
//! a relay needs to route it without looking at the payload:
//!
//! ```text
//! +-------+-----+-----------+------+-------------+-------------+--------------+----------+
//! | flags | ttl | hop_count | type | destination | payload_len | payload_hash | reserved |
//! |  1B   | 1B  |    1B     |  1B  |     16B     |   2B (BE)   |      8B      |    2B    |
//! +-------+-----+-----------+------+-------------+-------------+--------------+----------+
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::{Address, ADDRESS_SIZE};
use crate::DecodeError;

/// Header size in bytes
pub const HEADER_SIZE: usize = 32;

/// Truncated payload hash size
pub const PAYLOAD_HASH_SIZE: usize = 8;

/// TTL given to locally originated packets
pub const DEFAULT_TTL: u8 = 32;

/// Packet types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    /// Application data or a transfer fragment
    Data = 0x01,
    /// Identity and presence announcement
    Announce = 0x02,
    /// Request for a route to a destination
    PathRequest = 0x03,
    /// Answer to a path request
    PathResponse = 0x04,
    /// Fragment acknowledgement
    Ack = 0x05,
    /// Link liveness
    Keepalive = 0x06,
}

impl TryFrom<u8> for PacketType {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(PacketType::Data),
            0x02 => Ok(PacketType::Announce),
            0x03 => Ok(PacketType::PathRequest),
            0x04 => Ok(PacketType::PathResponse),
            0x05 => Ok(PacketType::Ack),
            0x06 => Ok(PacketType::Keepalive),
            _ => Err(crate::WireError::Type(value)),
        }
    }
}

bitflags! {
    /// Packet flags. Bits 3..0 are reserved: cleared on send, ignored on receive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Flags: u8 {
        /// Payload is encrypted to the destination
        const ENCRYPTED = 1 << 7;
        /// A 64-byte signature trails the payload
        const SIGNED = 1 << 6;
        /// Jump the transmit queue
        const PRIORITY = 1 << 5;
        /// Payload is a transfer fragment
        const FRAGMENTED = 1 << 4;
    }
}

/// Compute the truncated SHA-256 payload hash
pub fn payload_hash(payload: &[u8]) -> [u8; PAYLOAD_HASH_SIZE] {
    let digest: [u8; 32] = Sha256::digest(payload).into();
    let mut out = [0u8; PAYLOAD_HASH_SIZE];
    out.copy_from_slice(&digest[..PAYLOAD_HASH_SIZE]);
    out
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Packet flags
    pub flags: Flags,
    /// Remaining hops; decremented on every forward
    pub ttl: u8,
    /// Hops travelled so far; incremented on every forward
    pub hop_count: u8,
    /// Packet type
    pub packet_type: PacketType,
    /// Destination address (the originator's own address for announces)
    pub destination: Address,
    /// Payload length in bytes
    pub payload_len: u16,
    /// First 8 bytes of SHA-256 over the payload
    pub payload_hash: [u8; PAYLOAD_HASH_SIZE],
}

impl PacketHeader {
    /// Create a header for a fresh packet with default TTL and an empty payload
    pub fn new(packet_type: PacketType, destination: Address) -> Self {
        Self {
            flags: Flags::empty(),
            ttl: DEFAULT_TTL,
            hop_count: 0,
            packet_type,
            destination,
            payload_len: 0,
            payload_hash: payload_hash(&[]),
        }
    }

    /// Encode to 32 bytes (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_SIZE);
        buf.put_u8(self.flags.bits());
        buf.put_u8(self.ttl);
        buf.put_u8(self.hop_count);
        buf.put_u8(self.packet_type as u8);
        buf.put_slice(self.destination.as_bytes());
        buf.put_u16(self.payload_len);
        buf.put_slice(&self.payload_hash);
        buf.put_u16(0);
    }

    /// Decode from the front of `buf`, advancing it by 32 bytes
    pub fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(DecodeError::Truncated(buf.remaining()));
        }

        let flags = Flags::from_bits_truncate(buf.get_u8());
        let ttl = buf.get_u8();
        let hop_count = buf.get_u8();
        let raw_type = buf.get_u8();
        let packet_type =
            PacketType::try_from(raw_type).map_err(|_| DecodeError::UnknownType(raw_type))?;

        let mut destination = [0u8; ADDRESS_SIZE];
        buf.copy_to_slice(&mut destination);
        let payload_len = buf.get_u16();
        let mut hash = [0u8; PAYLOAD_HASH_SIZE];
        buf.copy_to_slice(&mut hash);
        let _reserved = buf.get_u16();

        Ok(Self {
            flags,
            ttl,
            hop_count,
            packet_type,
            destination: Address(destination),
            payload_len,
            payload_hash: hash,
        })
    }

    /// Header bytes covered by a signature: ttl and hop_count are zeroed so that
    /// relays can rewrite them without breaking verification.
    pub fn signing_bytes(&self) -> BytesMut {
        let mut normalized = *self;
        normalized.ttl = 0;
        normalized.hop_count = 0;
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        normalized.encode(&mut buf);
        buf
    }

    /// Header as it leaves a relay: ttl down one, hop count up one
    pub fn forwarded(&self) -> Self {
        let mut next = *self;
        next.ttl = self.ttl.saturating_sub(1);
        next.hop_count = self.hop_count.saturating_add(1);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_conversion() {
        assert_eq!(PacketType::try_from(0x01).unwrap(), PacketType::Data);
        assert_eq!(PacketType::try_from(0x06).unwrap(), PacketType::Keepalive);
        assert!(PacketType::try_from(0x00).is_err());
        assert!(PacketType::try_from(0x07).is_err());
    }

    #[test]
    fn test_flags_bit_positions() {
        assert_eq!(Flags::ENCRYPTED.bits(), 0x80);
        assert_eq!(Flags::SIGNED.bits(), 0x40);
        assert_eq!(Flags::PRIORITY.bits(), 0x20);
        assert_eq!(Flags::FRAGMENTED.bits(), 0x10);
    }

    #[test]
    fn test_header_encode_decode() {
        let mut header = PacketHeader::new(PacketType::Data, Address([9u8; 16]));
        header.flags = Flags::PRIORITY | Flags::FRAGMENTED;
        header.ttl = 7;
        header.hop_count = 3;
        header.payload_len = 5;
        header.payload_hash = payload_hash(b"hello");

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[4..20], &[9u8; 16]);
        assert_eq!(&buf[20..22], &[0, 5]);
        assert_eq!(&buf[30..32], &[0, 0]);

        let decoded = PacketHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_reserved_bits_ignored_on_receive() {
        let header = PacketHeader::new(PacketType::Keepalive, Address([1u8; 16]));
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        buf[0] |= 0x0F;
        buf[30] = 0xFF;

        let decoded = PacketHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded.flags, Flags::empty());
    }

    #[test]
    fn test_decode_short_buffer() {
        let mut short = bytes::Bytes::from_static(&[0u8; 31]);
        assert_eq!(
            PacketHeader::decode(&mut short),
            Err(DecodeError::Truncated(31))
        );
    }

    #[test]
    fn test_signing_bytes_ignore_ttl_and_hops() {
        let header = PacketHeader::new(PacketType::Announce, Address([4u8; 16]));
        let relayed = header.forwarded().forwarded();
        assert_ne!(header, relayed);
        assert_eq!(header.signing_bytes(), relayed.signing_bytes());
    }

    #[test]
    fn test_forwarded_saturates() {
        let mut header = PacketHeader::new(PacketType::Data, Address([0u8; 16]));
        header.ttl = 0;
        header.hop_count = 255;
        let next = header.forwarded();
        assert_eq!(next.ttl, 0);
        assert_eq!(next.hop_count, 255);
    }
}
