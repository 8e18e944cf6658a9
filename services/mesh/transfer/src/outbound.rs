//! Scheduling of one outbound transfer.
//!
//! With acknowledgements enabled, at most `window` fragments are in flight;
//! a fragment not acknowledged within the retransmit timeout is sent again,
//! and the transfer fails once a fragment has used up its retries. Without
//! acknowledgements every fragment is sent exactly once.
//!
//! A streaming transfer grows as data is appended. The newest full fragment is
//! held back until more data arrives or the stream finishes, so the fragment
//! that ends up last can carry FINAL.

use bytes::{Bytes, BytesMut};
use mesh_wire::{split, Address, Fragment, FragmentFlags, TransferId, MAX_FRAGMENTS};
use std::time::Instant;
use tracing::debug;

use crate::{TransferConfig, TransferError};

#[derive(Debug)]
struct Slot {
    fragment: Fragment,
    attempts: u32,
    sent_at: Option<Instant>,
    acked: bool,
}

impl Slot {
    fn new(fragment: Fragment) -> Self {
        Self {
            fragment,
            attempts: 0,
            sent_at: None,
            acked: false,
        }
    }

    fn in_flight(&self) -> bool {
        self.sent_at.is_some() && !self.acked
    }
}

/// Send-side state for one transfer id
#[derive(Debug)]
pub struct OutboundTransfer {
    id: TransferId,
    destination: Address,
    require_ack: bool,
    fragment_size: usize,
    slots: Vec<Slot>,
    /// Unfragmented tail of an open stream; `None` once all data is known
    pending: Option<BytesMut>,
    total_bytes: usize,
    acked: usize,
    last_activity: Instant,
}

impl OutboundTransfer {
    /// Transfer of a complete buffer
    pub fn new(
        id: TransferId,
        destination: Address,
        data: &Bytes,
        fragment_size: usize,
        require_ack: bool,
        now: Instant,
    ) -> Result<Self, TransferError> {
        let slots = split(id, data, fragment_size)?
            .into_iter()
            .map(Slot::new)
            .collect();
        Ok(Self {
            id,
            destination,
            require_ack,
            fragment_size,
            slots,
            pending: None,
            total_bytes: data.len(),
            acked: 0,
            last_activity: now,
        })
    }

    /// Open a stream that is filled with [`append`](Self::append)
    pub fn stream(
        id: TransferId,
        destination: Address,
        fragment_size: usize,
        require_ack: bool,
        now: Instant,
    ) -> Self {
        Self {
            id,
            destination,
            require_ack,
            fragment_size: fragment_size.max(1),
            slots: Vec::new(),
            pending: Some(BytesMut::new()),
            total_bytes: 0,
            acked: 0,
            last_activity: now,
        }
    }

    /// Transfer id
    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Receiving node
    pub fn destination(&self) -> Address {
        self.destination
    }

    /// Whether more data may still be appended
    pub fn is_streaming(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes accepted so far
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Fragments acknowledged (or, without acknowledgements, sent)
    pub fn acked(&self) -> usize {
        self.acked
    }

    /// Total fragments once the data is complete
    pub fn total(&self) -> Option<usize> {
        if self.is_streaming() {
            None
        } else {
            Some(self.slots.len())
        }
    }

    /// Last append, transmission or acknowledgement
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Every fragment has been delivered
    pub fn is_complete(&self) -> bool {
        !self.is_streaming() && self.acked == self.slots.len()
    }

    /// Add `data` to an open stream, returning how many fragments it released
    pub fn append(
        &mut self,
        data: &[u8],
        max_bytes: usize,
        now: Instant,
    ) -> Result<usize, TransferError> {
        let Some(pending) = self.pending.as_mut() else {
            return Err(TransferError::StreamFinished(self.id));
        };
        let size = self.total_bytes + data.len();
        if size > max_bytes {
            return Err(TransferError::TooLarge {
                size,
                limit: max_bytes,
            });
        }

        pending.extend_from_slice(data);
        self.total_bytes = size;
        self.last_activity = now;

        let mut released = Vec::new();
        while pending.len() > self.fragment_size {
            released.push(pending.split_to(self.fragment_size).freeze());
        }
        let count = released.len();
        for chunk in released {
            self.push(chunk, FragmentFlags::empty())?;
        }
        Ok(count)
    }

    /// Close an open stream; the held-back tail becomes the FINAL fragment
    pub fn finish(&mut self, now: Instant) -> Result<usize, TransferError> {
        let Some(tail) = self.pending.take() else {
            return Err(TransferError::StreamFinished(self.id));
        };
        self.last_activity = now;
        self.push(tail.freeze(), FragmentFlags::FINAL)?;
        Ok(self.slots.len())
    }

    fn push(&mut self, data: Bytes, flags: FragmentFlags) -> Result<(), TransferError> {
        if self.slots.len() >= MAX_FRAGMENTS {
            return Err(TransferError::TooLarge {
                size: self.total_bytes,
                limit: MAX_FRAGMENTS * self.fragment_size,
            });
        }
        self.slots.push(Slot::new(Fragment {
            transfer_id: self.id,
            index: self.slots.len() as u8,
            flags,
            data,
        }));
        Ok(())
    }

    /// Fragments due for (re)transmission at `now`
    pub fn poll(
        &mut self,
        config: &TransferConfig,
        now: Instant,
    ) -> Result<Vec<Fragment>, TransferError> {
        let mut due = Vec::new();

        if !self.require_ack {
            for slot in self.slots.iter_mut().filter(|s| s.sent_at.is_none()) {
                slot.sent_at = Some(now);
                slot.attempts = 1;
                slot.acked = true;
                self.acked += 1;
                due.push(slot.fragment.clone());
            }
            if !due.is_empty() {
                self.last_activity = now;
            }
            return Ok(due);
        }

        for slot in self.slots.iter_mut().filter(|s| s.in_flight()) {
            let Some(sent_at) = slot.sent_at else {
                continue;
            };
            if now.saturating_duration_since(sent_at) < config.retransmit_timeout {
                continue;
            }
            if slot.attempts > config.max_retries {
                return Err(TransferError::RetriesExhausted {
                    transfer_id: self.id,
                    index: slot.fragment.index,
                    attempts: slot.attempts,
                });
            }
            debug!(
                transfer = %self.id,
                index = slot.fragment.index,
                attempt = slot.attempts + 1,
                "Retransmitting fragment"
            );
            slot.attempts += 1;
            slot.sent_at = Some(now);
            due.push(slot.fragment.clone());
        }

        let mut in_flight = self.slots.iter().filter(|s| s.in_flight()).count();
        for slot in self.slots.iter_mut().filter(|s| s.sent_at.is_none()) {
            if in_flight >= config.window.max(1) {
                break;
            }
            slot.attempts = 1;
            slot.sent_at = Some(now);
            in_flight += 1;
            due.push(slot.fragment.clone());
        }

        if !due.is_empty() {
            self.last_activity = now;
        }
        Ok(due)
    }

    /// Mark `index` delivered; returns true the first time
    pub fn acknowledge(&mut self, index: u8, now: Instant) -> bool {
        match self.slots.get_mut(index as usize) {
            Some(slot) if slot.sent_at.is_some() && !slot.acked => {
                slot.acked = true;
                self.acked += 1;
                self.last_activity = now;
                true
            }
            _ => false,
        }
    }
}
