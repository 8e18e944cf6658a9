//! Transfer fragment payloads.
//!
//! A fragment rides as the payload of a DATA packet with the FRAGMENTED flag:
//!
//! ```text
//! +------------------+-------+-------+-------------+
//! | transfer_id 16B  | index | flags | data ≤ 200B |
//! +------------------+-------+-------+-------------+
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::WireError;

/// Transfer identifier length
pub const TRANSFER_ID_SIZE: usize = 16;

/// Fixed prefix before fragment data
pub const FRAGMENT_HEADER_SIZE: usize = TRANSFER_ID_SIZE + 2;

/// Largest data slice a fragment may carry
pub const MAX_FRAGMENT_DATA: usize = 200;

/// An 8-bit index limits a transfer to this many fragments
pub const MAX_FRAGMENTS: usize = 256;

/// Random 128-bit identifier shared by all fragments of one transfer
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub [u8; TRANSFER_ID_SIZE]);

impl TransferId {
    /// Build from a slice that must be exactly 16 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        let arr: [u8; TRANSFER_ID_SIZE] = bytes.try_into().map_err(|_| WireError::Truncated {
            need: TRANSFER_ID_SIZE,
            have: bytes.len(),
        })?;
        Ok(TransferId(arr))
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({})", hex::encode(&self.0[..4]))
    }
}

bitflags! {
    /// Per-fragment flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FragmentFlags: u8 {
        /// Last fragment of the transfer
        const FINAL = 0x01;
    }
}

/// One fragment of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Owning transfer
    pub transfer_id: TransferId,
    /// Position within the transfer, from 0
    pub index: u8,
    /// Fragment flags
    pub flags: FragmentFlags,
    /// Data slice
    pub data: Bytes,
}

impl Fragment {
    /// Whether this fragment closes the transfer
    pub fn is_final(&self) -> bool {
        self.flags.contains(FragmentFlags::FINAL)
    }

    /// Encode as a packet payload
    pub fn encode(&self) -> Result<Bytes, WireError> {
        if self.data.len() > MAX_FRAGMENT_DATA {
            return Err(WireError::Size(self.data.len()));
        }
        let mut buf = BytesMut::with_capacity(FRAGMENT_HEADER_SIZE + self.data.len());
        buf.put_slice(&self.transfer_id.0);
        buf.put_u8(self.index);
        buf.put_u8(self.flags.bits());
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }

    /// Parse a packet payload
    pub fn decode(mut payload: Bytes) -> Result<Self, WireError> {
        if payload.len() < FRAGMENT_HEADER_SIZE {
            return Err(WireError::Truncated {
                need: FRAGMENT_HEADER_SIZE,
                have: payload.len(),
            });
        }
        if payload.len() > FRAGMENT_HEADER_SIZE + MAX_FRAGMENT_DATA {
            return Err(WireError::Size(payload.len() - FRAGMENT_HEADER_SIZE));
        }
        let mut id = [0u8; TRANSFER_ID_SIZE];
        payload.copy_to_slice(&mut id);
        let index = payload.get_u8();
        let flags = FragmentFlags::from_bits_truncate(payload.get_u8());
        Ok(Self {
            transfer_id: TransferId(id),
            index,
            flags,
            data: payload,
        })
    }
}

/// Split `data` into fragments of at most `fragment_size` bytes, FINAL on the last.
///
/// An empty input yields a single empty FINAL fragment.
pub fn split(
    transfer_id: TransferId,
    data: &Bytes,
    fragment_size: usize,
) -> Result<Vec<Fragment>, WireError> {
    if fragment_size == 0 || fragment_size > MAX_FRAGMENT_DATA {
        return Err(WireError::Size(fragment_size));
    }
    let count = fragment_count(data.len(), fragment_size);
    if count > MAX_FRAGMENTS {
        return Err(WireError::Size(data.len()));
    }

    let mut fragments = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * fragment_size;
        let end = usize::min(start + fragment_size, data.len());
        let flags = if i + 1 == count {
            FragmentFlags::FINAL
        } else {
            FragmentFlags::empty()
        };
        fragments.push(Fragment {
            transfer_id,
            index: i as u8,
            flags,
            data: data.slice(start..end),
        });
    }
    Ok(fragments)
}

/// Number of fragments needed for `len` bytes (at least one)
pub fn fragment_count(len: usize, fragment_size: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(fragment_size.max(1))
    }
}

/// Acknowledgement payload carried by ACK packets: transfer id and fragment index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentAck {
    /// Acknowledged transfer
    pub transfer_id: TransferId,
    /// Acknowledged fragment
    pub index: u8,
}

impl FragmentAck {
    /// Encoded size
    pub const SIZE: usize = TRANSFER_ID_SIZE + 1;

    /// Encode as a packet payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_slice(&self.transfer_id.0);
        buf.put_u8(self.index);
        buf.freeze()
    }

    /// Parse a packet payload
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        if payload.len() != Self::SIZE {
            return Err(WireError::Truncated {
                need: Self::SIZE,
                have: payload.len(),
            });
        }
        Ok(Self {
            transfer_id: TransferId::from_slice(&payload[..TRANSFER_ID_SIZE])?,
            index: payload[TRANSFER_ID_SIZE],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: TransferId = TransferId([0x11; 16]);

    #[test]
    fn test_fragment_encode_decode() {
        let fragment = Fragment {
            transfer_id: ID,
            index: 7,
            flags: FragmentFlags::FINAL,
            data: Bytes::from_static(b"tail"),
        };
        let payload = fragment.encode().unwrap();
        assert_eq!(payload.len(), FRAGMENT_HEADER_SIZE + 4);
        assert_eq!(payload[16], 7);
        assert_eq!(payload[17], 0x01);

        let parsed = Fragment::decode(payload).unwrap();
        assert_eq!(parsed, fragment);
        assert!(parsed.is_final());
    }

    #[test]
    fn test_fragment_rejects_oversize_and_short() {
        let fragment = Fragment {
            transfer_id: ID,
            index: 0,
            flags: FragmentFlags::empty(),
            data: Bytes::from(vec![0u8; MAX_FRAGMENT_DATA + 1]),
        };
        assert!(fragment.encode().is_err());
        assert!(Fragment::decode(Bytes::from_static(&[0u8; 17])).is_err());
    }

    #[test]
    fn test_split_450_bytes() {
        let data = Bytes::from((0..450u32).map(|i| i as u8).collect::<Vec<_>>());
        let fragments = split(ID, &data, MAX_FRAGMENT_DATA).unwrap();
        let sizes: Vec<_> = fragments.iter().map(|f| f.data.len()).collect();
        assert_eq!(sizes, vec![200, 200, 50]);
        assert!(!fragments[0].is_final());
        assert!(!fragments[1].is_final());
        assert!(fragments[2].is_final());
        assert_eq!(fragments[2].index, 2);
    }

    #[test]
    fn test_split_limits() {
        assert_eq!(split(ID, &Bytes::new(), 200).unwrap().len(), 1);
        assert!(split(ID, &Bytes::from(vec![0u8; 10]), 0).is_err());
        assert!(split(ID, &Bytes::from(vec![0u8; 256 * 200 + 1]), 200).is_err());
        assert_eq!(split(ID, &Bytes::from(vec![0u8; 256 * 200]), 200).unwrap().len(), 256);
    }

    #[test]
    fn test_ack_payload() {
        let ack = FragmentAck {
            transfer_id: ID,
            index: 3,
        };
        assert_eq!(FragmentAck::decode(&ack.encode()).unwrap(), ack);
        assert!(FragmentAck::decode(&[0u8; 5]).is_err());
    }
}
