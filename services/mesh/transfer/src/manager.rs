//! Registry of live transfers in both directions.
//!
//! Inbound and outbound transfers live in fixed-capacity arenas keyed by
//! transfer id. A full inbound registry evicts its least recently active
//! transfer (reported as a timeout); a full outbound registry rejects new
//! sends. The caller drives time: [`TransferManager::poll`] yields fragments
//! due for transmission and [`TransferManager::expire`] reaps idle state.

use bytes::Bytes;
use mesh_storage::LruArena;
use mesh_wire::{
    Address, Fragment, TransferId, MAX_FRAGMENTS, MAX_FRAGMENT_DATA, TRANSFER_ID_SIZE,
};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{Direction, InboundStatus, InboundTransfer, OutboundTransfer, TransferError};

/// Default fragments in flight per acknowledged transfer
pub const DEFAULT_WINDOW: usize = 4;

/// Default wait for an acknowledgement before resending
pub const DEFAULT_RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default resends per fragment
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default idle time after which transfer state is dropped
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default largest transfer, 256 full fragments
pub const DEFAULT_MAX_TRANSFER_SIZE: usize = MAX_FRAGMENTS * MAX_FRAGMENT_DATA;

/// Default concurrent transfers per direction
pub const DEFAULT_MAX_TRANSFERS: usize = 8;

/// Minimum number of completed inbound ids remembered
const RECENT_COMPLETIONS: usize = 16;

/// Transfer manager configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Data bytes per fragment (at most 200)
    pub fragment_size: usize,
    /// Largest transfer accepted in either direction
    pub max_transfer_size: usize,
    /// Concurrent inbound transfers
    pub max_inbound: usize,
    /// Concurrent outbound transfers
    pub max_outbound: usize,
    /// Unacknowledged fragments in flight
    pub window: usize,
    /// Wait before resending an unacknowledged fragment
    pub retransmit_timeout: Duration,
    /// Resends per fragment before the transfer fails
    pub max_retries: u32,
    /// Idle time after which inbound state and open streams are dropped
    pub inactivity_timeout: Duration,
    /// Whether new outbound transfers wait for per-fragment acks
    pub require_ack: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            fragment_size: MAX_FRAGMENT_DATA,
            max_transfer_size: DEFAULT_MAX_TRANSFER_SIZE,
            max_inbound: DEFAULT_MAX_TRANSFERS,
            max_outbound: DEFAULT_MAX_TRANSFERS,
            window: DEFAULT_WINDOW,
            retransmit_timeout: DEFAULT_RETRANSMIT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            require_ack: true,
        }
    }
}

/// Something the application should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Fragments received or acknowledged so far
    Progress {
        /// Transfer concerned
        transfer_id: TransferId,
        /// Which side
        direction: Direction,
        /// Fragments received (inbound) or acknowledged (outbound)
        done: usize,
        /// Total fragments, if known
        total: Option<usize>,
    },
    /// An inbound transfer reassembled
    Received {
        /// Transfer concerned
        transfer_id: TransferId,
        /// Authenticated sender, if known
        source: Option<Address>,
        /// Reassembled data
        data: Bytes,
    },
    /// Every fragment of an outbound transfer was delivered
    Sent {
        /// Transfer concerned
        transfer_id: TransferId,
        /// Receiving node
        destination: Address,
    },
    /// A transfer was abandoned
    Failed {
        /// Transfer concerned
        transfer_id: TransferId,
        /// Which side
        direction: Direction,
        /// Why
        error: TransferError,
    },
}

/// A fragment to put on the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFragment {
    /// Receiving node
    pub destination: Address,
    /// Fragment to send as a DATA packet payload
    pub fragment: Fragment,
}

/// Transfer counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferStats {
    /// Inbound transfers created
    pub inbound_started: u64,
    /// Inbound transfers reassembled
    pub inbound_completed: u64,
    /// Outbound transfers created
    pub outbound_started: u64,
    /// Outbound transfers fully delivered
    pub outbound_completed: u64,
    /// Transfers abandoned (timeout, retries, size)
    pub failed: u64,
    /// Transfers cancelled locally
    pub cancelled: u64,
    /// Inbound transfers evicted by capacity pressure
    pub evicted: u64,
    /// Fragments handed out for transmission, including resends
    pub fragments_sent: u64,
    /// Fragments accepted from peers
    pub fragments_received: u64,
}

/// Registry and scheduler for every live transfer
#[derive(Debug)]
pub struct TransferManager {
    config: TransferConfig,
    inbound: LruArena<TransferId, InboundTransfer>,
    outbound: LruArena<TransferId, OutboundTransfer>,
    /// Recently reassembled ids, so late retransmissions are not taken as new transfers
    completed: LruArena<TransferId, ()>,
    /// Failures noticed outside of `poll`/`expire`, reported by the next of either
    deferred: Vec<TransferEvent>,
    stats: TransferStats,
}

impl TransferManager {
    /// Create a manager
    pub fn new(config: TransferConfig) -> Self {
        let mut config = config;
        config.fragment_size = config.fragment_size.clamp(1, MAX_FRAGMENT_DATA);
        Self {
            inbound: LruArena::new(config.max_inbound),
            outbound: LruArena::new(config.max_outbound),
            completed: LruArena::new((config.max_inbound * 4).max(RECENT_COMPLETIONS)),
            deferred: Vec::new(),
            stats: TransferStats::default(),
            config,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Counters
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Live inbound transfers
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Live outbound transfers
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Inbound state for `id`
    pub fn inbound(&self, id: &TransferId) -> Option<&InboundTransfer> {
        self.inbound.get(id)
    }

    /// Outbound state for `id`
    pub fn outbound(&self, id: &TransferId) -> Option<&OutboundTransfer> {
        self.outbound.get(id)
    }

    /// Fragments a buffer of `len` bytes will need
    pub fn fragments_for(&self, len: usize) -> usize {
        mesh_wire::fragment_count(len, self.config.fragment_size)
    }

    fn fresh_id(&self) -> TransferId {
        loop {
            let id = TransferId(rand::random::<[u8; TRANSFER_ID_SIZE]>());
            if !self.outbound.contains_key(&id) && !self.inbound.contains_key(&id) {
                return id;
            }
        }
    }

    fn check_outbound_room(&self) -> Result<(), TransferError> {
        if self.outbound.is_full() {
            return Err(TransferError::TooManyTransfers(self.outbound.capacity()));
        }
        Ok(())
    }

    /// Start sending `data` with the configured acknowledgement mode
    pub fn send(
        &mut self,
        destination: Address,
        data: Bytes,
        now: Instant,
    ) -> Result<TransferId, TransferError> {
        self.send_with(destination, data, self.config.require_ack, now)
    }

    /// Start sending `data`, choosing whether to wait for acknowledgements
    pub fn send_with(
        &mut self,
        destination: Address,
        data: Bytes,
        require_ack: bool,
        now: Instant,
    ) -> Result<TransferId, TransferError> {
        if data.len() > self.config.max_transfer_size {
            return Err(TransferError::TooLarge {
                size: data.len(),
                limit: self.config.max_transfer_size,
            });
        }
        self.check_outbound_room()?;

        let id = self.fresh_id();
        let transfer = OutboundTransfer::new(
            id,
            destination,
            &data,
            self.config.fragment_size,
            require_ack,
            now,
        )?;
        info!(
            transfer = %id,
            destination = %destination,
            bytes = data.len(),
            fragments = transfer.total().unwrap_or_default(),
            require_ack,
            "Outbound transfer started"
        );
        self.outbound.insert(id, transfer);
        self.stats.outbound_started += 1;
        Ok(id)
    }

    /// Open a streaming transfer under a fresh id
    pub fn open_stream(
        &mut self,
        destination: Address,
        now: Instant,
    ) -> Result<TransferId, TransferError> {
        let id = self.fresh_id();
        self.start_stream(id, destination, now)?;
        Ok(id)
    }

    /// Open a streaming transfer under a caller-chosen id
    pub fn start_stream(
        &mut self,
        id: TransferId,
        destination: Address,
        now: Instant,
    ) -> Result<(), TransferError> {
        if self.outbound.contains_key(&id) {
            return Err(TransferError::DuplicateTransferStart(id));
        }
        self.check_outbound_room()?;
        let transfer = OutboundTransfer::stream(
            id,
            destination,
            self.config.fragment_size,
            self.config.require_ack,
            now,
        );
        info!(transfer = %id, destination = %destination, "Outbound stream opened");
        self.outbound.insert(id, transfer);
        self.stats.outbound_started += 1;
        Ok(())
    }

    /// Add data to an open stream
    pub fn append(
        &mut self,
        id: &TransferId,
        data: &[u8],
        now: Instant,
    ) -> Result<usize, TransferError> {
        let limit = self.config.max_transfer_size;
        let transfer = self
            .outbound
            .get_mut(id)
            .ok_or(TransferError::UnknownTransfer(*id))?;
        let released = transfer.append(data, limit, now)?;
        self.outbound.touch(id);
        Ok(released)
    }

    /// Close an open stream, returning its fragment count
    pub fn finish(&mut self, id: &TransferId, now: Instant) -> Result<usize, TransferError> {
        let transfer = self
            .outbound
            .get_mut(id)
            .ok_or(TransferError::UnknownTransfer(*id))?;
        let total = transfer.finish(now)?;
        debug!(transfer = %id, fragments = total, "Outbound stream finished");
        self.outbound.touch(id);
        Ok(total)
    }

    /// Drop a transfer in either direction; returns whether it existed
    pub fn cancel(&mut self, id: &TransferId) -> bool {
        let removed = self.outbound.remove(id).is_some() | self.inbound.remove(id).is_some();
        if removed {
            info!(transfer = %id, "Transfer cancelled");
            self.stats.cancelled += 1;
        }
        removed
    }

    /// Record a peer's acknowledgement of fragment `index`
    pub fn acknowledge(
        &mut self,
        id: &TransferId,
        index: u8,
        now: Instant,
    ) -> Option<TransferEvent> {
        let transfer = self.outbound.get_mut(id)?;
        if !transfer.acknowledge(index, now) {
            return None;
        }
        if transfer.is_complete() {
            let destination = transfer.destination();
            self.outbound.remove(id);
            self.stats.outbound_completed += 1;
            info!(transfer = %id, destination = %destination, "Outbound transfer delivered");
            return Some(TransferEvent::Sent {
                transfer_id: *id,
                destination,
            });
        }
        let event = TransferEvent::Progress {
            transfer_id: *id,
            direction: Direction::Outbound,
            done: transfer.acked(),
            total: transfer.total(),
        };
        self.outbound.touch(id);
        Some(event)
    }

    /// Accept a fragment from the air
    ///
    /// Returns `Received` once the transfer reassembles and `Progress`
    /// otherwise, or `None` for a late copy of a transfer that already
    /// completed. A FINAL with gaps yields `IncompleteTransfer` but the state
    /// stays so late fragments can still complete it.
    pub fn handle_fragment(
        &mut self,
        fragment: Fragment,
        source: Option<Address>,
        now: Instant,
    ) -> Result<Option<TransferEvent>, TransferError> {
        let id = fragment.transfer_id;
        self.stats.fragments_received += 1;

        if self.completed.contains_key(&id) {
            debug!(transfer = %id, index = fragment.index, "Fragment for completed transfer");
            return Ok(None);
        }

        if !self.inbound.contains_key(&id) {
            let transfer = InboundTransfer::new(id, source, now);
            if let Some((evicted_id, evicted)) = self.inbound.insert(id, transfer) {
                warn!(transfer = %evicted_id, "Inbound registry full, evicting transfer");
                self.stats.evicted += 1;
                self.stats.failed += 1;
                self.deferred.push(TransferEvent::Failed {
                    transfer_id: evicted_id,
                    direction: Direction::Inbound,
                    error: TransferError::TransferTimeout {
                        transfer_id: evicted_id,
                        received: evicted.received(),
                        expected: evicted.expected(),
                    },
                });
            }
            self.stats.inbound_started += 1;
            debug!(transfer = %id, "Inbound transfer started");
        }
        self.inbound.touch(&id);

        let limit = self.config.max_transfer_size;
        let Some(transfer) = self.inbound.get_mut(&id) else {
            return Err(TransferError::UnknownTransfer(id));
        };
        if let Some(source) = source {
            transfer.note_source(source);
        }

        match transfer.accept(fragment, limit, now) {
            Ok(InboundStatus::Complete(data)) => {
                let source = transfer.source();
                self.inbound.remove(&id);
                self.completed.insert(id, ());
                self.stats.inbound_completed += 1;
                info!(transfer = %id, bytes = data.len(), "Inbound transfer complete");
                Ok(Some(TransferEvent::Received {
                    transfer_id: id,
                    source,
                    data,
                }))
            }
            Ok(InboundStatus::Pending { received, expected }) => {
                Ok(Some(TransferEvent::Progress {
                    transfer_id: id,
                    direction: Direction::Inbound,
                    done: received,
                    total: expected,
                }))
            }
            Ok(InboundStatus::Incomplete { missing, received }) => {
                Err(TransferError::IncompleteTransfer {
                    transfer_id: id,
                    missing,
                    received,
                })
            }
            Err(e) => {
                warn!(transfer = %id, error = %e, "Inbound transfer aborted");
                self.inbound.remove(&id);
                self.stats.failed += 1;
                Err(e)
            }
        }
    }

    /// Fragments due for transmission, plus deliveries and failures
    pub fn poll(&mut self, now: Instant) -> (Vec<OutgoingFragment>, Vec<TransferEvent>) {
        let mut outgoing = Vec::new();
        let mut events = std::mem::take(&mut self.deferred);
        let mut finished = Vec::new();

        for (id, transfer) in self.outbound.iter_mut() {
            match transfer.poll(&self.config, now) {
                Ok(fragments) => {
                    let destination = transfer.destination();
                    outgoing.extend(fragments.into_iter().map(|fragment| OutgoingFragment {
                        destination,
                        fragment,
                    }));
                    if transfer.is_complete() {
                        finished.push((*id, Ok(destination)));
                    }
                }
                Err(e) => finished.push((*id, Err(e))),
            }
        }

        for (id, result) in finished {
            self.outbound.remove(&id);
            match result {
                Ok(destination) => {
                    self.stats.outbound_completed += 1;
                    info!(transfer = %id, destination = %destination, "Outbound transfer sent");
                    events.push(TransferEvent::Sent {
                        transfer_id: id,
                        destination,
                    });
                }
                Err(error) => {
                    warn!(transfer = %id, error = %error, "Outbound transfer failed");
                    self.stats.failed += 1;
                    events.push(TransferEvent::Failed {
                        transfer_id: id,
                        direction: Direction::Outbound,
                        error,
                    });
                }
            }
        }

        self.stats.fragments_sent += outgoing.len() as u64;
        (outgoing, events)
    }

    /// Drop inbound transfers and open streams idle past the inactivity timeout
    pub fn expire(&mut self, now: Instant) -> Vec<TransferEvent> {
        let timeout = self.config.inactivity_timeout;
        let idle = |last: Instant| now.saturating_duration_since(last) >= timeout;
        let mut events = std::mem::take(&mut self.deferred);

        for (id, transfer) in self.inbound.retain(|_, t| !idle(t.last_activity())) {
            self.stats.failed += 1;
            debug!(transfer = %id, received = transfer.received(), "Inbound transfer timed out");
            events.push(TransferEvent::Failed {
                transfer_id: id,
                direction: Direction::Inbound,
                error: TransferError::TransferTimeout {
                    transfer_id: id,
                    received: transfer.received(),
                    expected: transfer.expected(),
                },
            });
        }

        let stale = self
            .outbound
            .retain(|_, t| !(t.is_streaming() && idle(t.last_activity())));
        for (id, transfer) in stale {
            self.stats.failed += 1;
            debug!(transfer = %id, "Outbound stream timed out");
            events.push(TransferEvent::Failed {
                transfer_id: id,
                direction: Direction::Outbound,
                error: TransferError::TransferTimeout {
                    transfer_id: id,
                    received: transfer.acked(),
                    expected: None,
                },
            });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_wire::{split, FragmentFlags};

    const PEER: Address = Address([3u8; 16]);

    fn manager() -> TransferManager {
        TransferManager::new(TransferConfig::default())
    }

    fn ordered(fragments: &[Fragment], order: &[usize]) -> Vec<Fragment> {
        order.iter().map(|&i| fragments[i].clone()).collect()
    }

    fn deliver(
        mgr: &mut TransferManager,
        fragments: Vec<Fragment>,
        now: Instant,
    ) -> Vec<Result<Option<TransferEvent>, TransferError>> {
        fragments
            .into_iter()
            .map(|f| mgr.handle_fragment(f, Some(PEER), now))
            .collect()
    }

    fn received_data(result: &Result<Option<TransferEvent>, TransferError>) -> Option<Bytes> {
        match result {
            Ok(Some(TransferEvent::Received { data, .. })) => Some(data.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_reassembly_tolerates_reorder_and_duplicates() {
        let now = Instant::now();
        let id = TransferId([1u8; 16]);
        let data = Bytes::from((0..450u32).map(|i| (i % 251) as u8).collect::<Vec<_>>());
        let fragments = split(id, &data, 200).unwrap();

        let mut in_order = manager();
        let results = deliver(&mut in_order, ordered(&fragments, &[0, 1, 2]), now);
        let expected = received_data(&results[2]).unwrap();
        assert_eq!(expected, data);

        let mut shuffled = manager();
        let results = deliver(&mut shuffled, ordered(&fragments, &[1, 0, 2, 1]), now);
        assert_eq!(received_data(&results[2]).unwrap(), expected);
        // the late copy of 1 does not open a new transfer
        assert_eq!(results[3], Ok(None));
        assert_eq!(shuffled.inbound_len(), 0);
    }

    #[test]
    fn test_duplicate_before_final_is_idempotent() {
        let now = Instant::now();
        let id = TransferId([2u8; 16]);
        let data = Bytes::from(vec![0xAB; 450]);
        let fragments = split(id, &data, 200).unwrap();

        let mut mgr = manager();
        let results = deliver(&mut mgr, ordered(&fragments, &[1, 0, 1, 2]), now);
        assert!(matches!(
            results[2],
            Ok(Some(TransferEvent::Progress { done: 2, total: None, .. }))
        ));
        let out = received_data(&results[3]).unwrap();
        assert_eq!(out.len(), 450);
        assert_eq!(out, data);
    }

    #[test]
    fn test_gap_reports_incomplete() {
        let now = Instant::now();
        let id = TransferId([4u8; 16]);
        let fragments = split(id, &Bytes::from(vec![1u8; 450]), 200).unwrap();

        let mut mgr = manager();
        let results = deliver(&mut mgr, ordered(&fragments, &[0, 2]), now);
        assert_eq!(
            results[1],
            Err(TransferError::IncompleteTransfer {
                transfer_id: id,
                missing: vec![1],
                received: 2
            })
        );
        assert_eq!(mgr.inbound_len(), 1);

        let events = mgr.expire(now + DEFAULT_INACTIVITY_TIMEOUT);
        assert!(matches!(
            events[0],
            TransferEvent::Failed {
                error: TransferError::TransferTimeout { received: 2, expected: Some(3), .. },
                ..
            }
        ));
        assert_eq!(mgr.inbound_len(), 0);
    }

    #[test]
    fn test_send_and_ack_to_completion() {
        let now = Instant::now();
        let mut mgr = manager();
        let id = mgr.send(PEER, Bytes::from(vec![5u8; 450]), now).unwrap();

        let (out, events) = mgr.poll(now);
        assert_eq!(out.len(), 3);
        assert!(events.is_empty());
        assert!(out.iter().all(|o| o.destination == PEER));

        assert!(matches!(
            mgr.acknowledge(&id, 0, now),
            Some(TransferEvent::Progress { done: 1, total: Some(3), .. })
        ));
        mgr.acknowledge(&id, 1, now);
        assert_eq!(
            mgr.acknowledge(&id, 2, now),
            Some(TransferEvent::Sent {
                transfer_id: id,
                destination: PEER
            })
        );
        assert_eq!(mgr.outbound_len(), 0);
        assert_eq!(mgr.stats().outbound_completed, 1);
    }

    #[test]
    fn test_unacked_send_fails_after_retries() {
        let start = Instant::now();
        let mut mgr = manager();
        let id = mgr.send(PEER, Bytes::from_static(b"ping"), start).unwrap();

        let mut sent = 0;
        let mut failure = None;
        for step in 0..10u64 {
            let (out, events) = mgr.poll(start + DEFAULT_RETRANSMIT_TIMEOUT * step as u32);
            sent += out.len();
            if let Some(event) = events.into_iter().next() {
                failure = Some(event);
                break;
            }
        }
        assert_eq!(sent, 1 + DEFAULT_MAX_RETRIES as usize);
        assert!(matches!(
            failure,
            Some(TransferEvent::Failed { transfer_id, direction: Direction::Outbound, .. }) if transfer_id == id
        ));
        assert_eq!(mgr.outbound_len(), 0);
    }

    #[test]
    fn test_fire_and_forget_reports_sent() {
        let now = Instant::now();
        let mut mgr = manager();
        let id = mgr
            .send_with(PEER, Bytes::from(vec![0u8; 10]), false, now)
            .unwrap();
        let (out, events) = mgr.poll(now);
        assert_eq!(out.len(), 1);
        assert_eq!(
            events,
            vec![TransferEvent::Sent {
                transfer_id: id,
                destination: PEER
            }]
        );
    }

    #[test]
    fn test_cancel_stops_retransmission() {
        let now = Instant::now();
        let mut mgr = manager();
        let id = mgr.send(PEER, Bytes::from(vec![0u8; 100]), now).unwrap();
        mgr.poll(now);
        assert!(mgr.cancel(&id));
        assert!(!mgr.cancel(&id));

        let (out, events) = mgr.poll(now + Duration::from_secs(60));
        assert!(out.is_empty());
        assert!(events.is_empty());
        assert_eq!(mgr.acknowledge(&id, 0, now), None);
    }

    #[test]
    fn test_duplicate_stream_start_rejected() {
        let now = Instant::now();
        let mut mgr = manager();
        let id = TransferId([8u8; 16]);
        mgr.start_stream(id, PEER, now).unwrap();
        mgr.append(&id, b"first", now).unwrap();

        assert_eq!(
            mgr.start_stream(id, PEER, now),
            Err(TransferError::DuplicateTransferStart(id))
        );
        // the existing stream is untouched
        assert_eq!(mgr.outbound(&id).unwrap().total_bytes(), 5);
    }

    #[test]
    fn test_outbound_capacity() {
        let now = Instant::now();
        let mut mgr = TransferManager::new(TransferConfig {
            max_outbound: 1,
            ..TransferConfig::default()
        });
        mgr.send(PEER, Bytes::from_static(b"a"), now).unwrap();
        assert_eq!(
            mgr.send(PEER, Bytes::from_static(b"b"), now),
            Err(TransferError::TooManyTransfers(1))
        );
    }

    #[test]
    fn test_inbound_eviction_reported() {
        let now = Instant::now();
        let mut mgr = TransferManager::new(TransferConfig {
            max_inbound: 1,
            ..TransferConfig::default()
        });
        let frag = |n: u8| Fragment {
            transfer_id: TransferId([n; 16]),
            index: 0,
            flags: FragmentFlags::empty(),
            data: Bytes::from_static(b"x"),
        };
        mgr.handle_fragment(frag(1), None, now).unwrap();
        mgr.handle_fragment(frag(2), None, now).unwrap();
        assert_eq!(mgr.inbound_len(), 1);

        let events = mgr.expire(now);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            TransferEvent::Failed { transfer_id, direction: Direction::Inbound, .. } if *transfer_id == TransferId([1; 16])
        ));
        assert_eq!(mgr.stats().evicted, 1);
    }

    #[test]
    fn test_stream_end_to_end() {
        let now = Instant::now();
        let mut sender = TransferManager::new(TransferConfig {
            require_ack: false,
            ..TransferConfig::default()
        });
        let mut receiver = manager();

        let id = sender.open_stream(PEER, now).unwrap();
        sender.append(&id, &[1u8; 150], now).unwrap();
        sender.append(&id, &[2u8; 150], now).unwrap();
        assert_eq!(sender.finish(&id, now).unwrap(), 2);

        let (out, events) = sender.poll(now);
        assert_eq!(events.len(), 1);
        let results: Vec<_> = out
            .into_iter()
            .map(|o| receiver.handle_fragment(o.fragment, None, now))
            .collect();
        let data = received_data(&results[1]).unwrap();
        assert_eq!(data.len(), 300);
        assert_eq!(&data[..150], &[1u8; 150][..]);
    }

    #[test]
    fn test_oversize_inbound_aborts() {
        let now = Instant::now();
        let mut mgr = TransferManager::new(TransferConfig {
            max_transfer_size: 300,
            ..TransferConfig::default()
        });
        let id = TransferId([6u8; 16]);
        let fragments = split(id, &Bytes::from(vec![0u8; 600]), 200).unwrap();
        mgr.handle_fragment(fragments[0].clone(), None, now).unwrap();
        assert!(matches!(
            mgr.handle_fragment(fragments[1].clone(), None, now),
            Err(TransferError::TooLarge { .. })
        ));
        assert_eq!(mgr.inbound_len(), 0);
    }
}
