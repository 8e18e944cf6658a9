//! Reassembly of one inbound transfer.
//!
//! Fragments are stored by index as they arrive, in any order; a repeated index
//! overwrites the earlier copy. Completion is decided only once a FINAL
//! fragment has been seen: every index from 0 through the FINAL index must then
//! be present.

use bytes::{Bytes, BytesMut};
use mesh_wire::{Address, Fragment, TransferId, MAX_FRAGMENTS};
use std::time::Instant;
use tracing::debug;

use crate::TransferError;

/// State after accepting a fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundStatus {
    /// More fragments are needed
    Pending {
        /// Fragments held
        received: usize,
        /// Total fragments, known once FINAL has arrived
        expected: Option<usize>,
    },
    /// All fragments through FINAL are present
    Complete(Bytes),
    /// FINAL arrived with gaps below it
    Incomplete {
        /// Missing indices
        missing: Vec<u8>,
        /// Fragments held
        received: usize,
    },
}

/// Reassembly buffer for one transfer id
#[derive(Debug)]
pub struct InboundTransfer {
    id: TransferId,
    source: Option<Address>,
    slots: Vec<Option<Bytes>>,
    final_index: Option<u8>,
    received: usize,
    bytes: usize,
    started: Instant,
    last_activity: Instant,
}

impl InboundTransfer {
    /// Empty buffer for `id`
    pub fn new(id: TransferId, source: Option<Address>, now: Instant) -> Self {
        Self {
            id,
            source,
            slots: Vec::new(),
            final_index: None,
            received: 0,
            bytes: 0,
            started: now,
            last_activity: now,
        }
    }

    /// Transfer id
    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Authenticated sender, if known
    pub fn source(&self) -> Option<Address> {
        self.source
    }

    /// Record the sender once a fragment from it has been authenticated
    pub fn note_source(&mut self, source: Address) {
        self.source.get_or_insert(source);
    }

    /// Distinct fragments held
    pub fn received(&self) -> usize {
        self.received
    }

    /// Data bytes held
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Total fragments, once FINAL has arrived
    pub fn expected(&self) -> Option<usize> {
        self.final_index.map(|i| i as usize + 1)
    }

    /// When the first fragment arrived
    pub fn started(&self) -> Instant {
        self.started
    }

    /// When the last fragment arrived
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Store `fragment`; the transfer aborts with `TooLarge` past `max_bytes`
    pub fn accept(
        &mut self,
        fragment: Fragment,
        max_bytes: usize,
        now: Instant,
    ) -> Result<InboundStatus, TransferError> {
        self.last_activity = now;

        let index = fragment.index as usize;
        let is_final = fragment.is_final();
        if self.slots.len() <= index {
            self.slots.resize(index + 1, None);
        }

        // An empty FINAL over a filled slot only marks where the transfer ends
        let marker = is_final && fragment.data.is_empty() && self.slots[index].is_some();
        if !marker {
            let len = fragment.data.len();
            match self.slots[index].replace(fragment.data) {
                Some(old) => self.bytes = self.bytes - old.len() + len,
                None => {
                    self.received += 1;
                    self.bytes += len;
                }
            }
        }

        if self.bytes > max_bytes {
            return Err(TransferError::TooLarge {
                size: self.bytes,
                limit: max_bytes,
            });
        }

        if is_final {
            self.final_index = Some(fragment.index);
        }

        let Some(last) = self.final_index else {
            return Ok(InboundStatus::Pending {
                received: self.received,
                expected: None,
            });
        };

        let missing = self.missing_below(last);
        if missing.is_empty() {
            return Ok(InboundStatus::Complete(self.assemble(last)));
        }
        if is_final {
            debug!(
                transfer = %self.id,
                received = self.received,
                missing = missing.len(),
                "FINAL fragment arrived with gaps"
            );
            Ok(InboundStatus::Incomplete {
                missing,
                received: self.received,
            })
        } else {
            Ok(InboundStatus::Pending {
                received: self.received,
                expected: self.expected(),
            })
        }
    }

    /// Indices through FINAL not yet received (empty until FINAL is known)
    pub fn missing(&self) -> Vec<u8> {
        self.final_index
            .map(|last| self.missing_below(last))
            .unwrap_or_default()
    }

    fn missing_below(&self, last: u8) -> Vec<u8> {
        (0..=last)
            .filter(|&i| !matches!(self.slots.get(i as usize), Some(Some(_))))
            .collect()
    }

    fn assemble(&self, last: u8) -> Bytes {
        let count = (last as usize + 1).min(MAX_FRAGMENTS);
        let mut out = BytesMut::with_capacity(self.bytes);
        for slot in self.slots.iter().take(count).flatten() {
            out.extend_from_slice(slot);
        }
        out.freeze()
    }
}
