//! Multi-node scenarios over a simulated radio segment

mod common;

use bytes::Bytes;
use common::{peer_of, Mesh};
use mesh_node::{Clock, NodeEvent};
use mesh_transfer::{Direction, FileMetadata};
use mesh_wire::{Flags, Packet};
use std::time::Duration;

#[test]
fn test_announce_chain_learns_two_hop_route() {
    let mut mesh = Mesh::chain(3);
    let a = mesh.nodes[0].address();
    let now = mesh.clock.now();

    let out = mesh.nodes[0].node.announce(now).unwrap();
    mesh.pump(0, out);

    let b_route = mesh.nodes[1].node.engine().routes().lookup(&a, now).unwrap();
    assert_eq!(b_route.hop_count, 1);
    assert_eq!(b_route.next_hop.peer, peer_of(0));

    let c_route = mesh.nodes[2].node.engine().routes().lookup(&a, now).unwrap();
    assert_eq!(c_route.hop_count, 2);
    assert_eq!(c_route.next_hop.peer, peer_of(1));
    assert!(mesh.nodes[2].node.identities().lookup(&a).is_some());

    let discovered = mesh.nodes[2].drain();
    assert!(discovered.iter().any(|e| matches!(
        e,
        NodeEvent::PeerDiscovered { address, hop_count: 2, .. } if *address == a
    )));
}

#[test]
fn test_data_crosses_relay() {
    let mut mesh = Mesh::chain(3);
    mesh.announce_all();
    let a = mesh.nodes[0].address();
    let c = mesh.nodes[2].address();
    mesh.nodes[2].drain();

    let now = mesh.clock.now();
    let out = mesh.nodes[0]
        .node
        .send_data(c, Bytes::from_static(b"over the hill"), true, now)
        .unwrap();
    assert_eq!(out[0].peer, Some(peer_of(1)));
    mesh.pump(0, out);

    let events = mesh.nodes[2].drain();
    assert_eq!(
        events,
        vec![NodeEvent::DataReceived {
            source: Some(a),
            payload: Bytes::from_static(b"over the hill"),
            hop_count: 1,
            encrypted: true,
        }]
    );
    assert_eq!(mesh.nodes[1].node.router_stats().packets_forwarded, 1);
    assert!(mesh.nodes[1].drain().iter().all(|e| !matches!(e, NodeEvent::DataReceived { .. })));
}

#[test]
fn test_file_transfer_across_relay() {
    let mut mesh = Mesh::chain(3);
    mesh.announce_all();
    let a = mesh.nodes[0].address();
    let c = mesh.nodes[2].address();
    mesh.nodes[0].drain();
    mesh.nodes[2].drain();

    let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let metadata = FileMetadata::new("survey.csv", 1000).with_mime_type("text/csv");
    let now = mesh.clock.now();
    let id = mesh.nodes[0]
        .node
        .send_file(c, &metadata, &data, now)
        .unwrap();

    for _ in 0..4 {
        mesh.tick_all();
    }

    let sent = mesh.nodes[0].drain();
    assert!(sent.contains(&NodeEvent::TransferSent {
        transfer_id: id,
        destination: c,
    }));
    assert!(sent.iter().any(|e| matches!(
        e,
        NodeEvent::TransferProgress { direction: Direction::Outbound, .. }
    )));

    let received = mesh.nodes[2]
        .drain()
        .into_iter()
        .find(|e| matches!(e, NodeEvent::FileReceived { .. }))
        .unwrap();
    assert_eq!(
        received,
        NodeEvent::FileReceived {
            transfer_id: id,
            source: Some(a),
            metadata: Some(metadata),
            data: Bytes::from(data),
        }
    );
}

#[test]
fn test_lost_fragment_is_retransmitted() {
    let mut mesh = Mesh::chain(2);
    mesh.announce_all();
    let b = mesh.nodes[1].address();
    mesh.nodes[0].drain();

    let now = mesh.clock.now();
    let id = mesh.nodes[0]
        .node
        .send_transfer(b, Bytes::from(vec![3u8; 450]), now)
        .unwrap();

    // Lose the first fragment on the air
    let out = mesh.nodes[0].node.tick(now);
    let mut dropped = false;
    mesh.pump_filtered(0, out, |_, _, bytes| {
        let fragmented = Packet::decode(bytes.clone())
            .map(|p| p.header.flags.contains(Flags::FRAGMENTED))
            .unwrap_or(false);
        if fragmented && !dropped {
            dropped = true;
            return false;
        }
        true
    });
    assert!(dropped);
    assert!(mesh.nodes[0].node.transfers().outbound(&id).is_some());

    mesh.clock.advance(Duration::from_secs(11));
    mesh.tick_all();

    assert!(mesh.nodes[0].drain().contains(&NodeEvent::TransferSent {
        transfer_id: id,
        destination: b,
    }));
    assert!(mesh.nodes[1]
        .drain()
        .iter()
        .any(|e| matches!(e, NodeEvent::FileReceived { data, .. } if data.len() == 450)));
}

#[test]
fn test_unreachable_destination_times_out() {
    let mut mesh = Mesh::chain(2);
    mesh.announce_all();
    let b = mesh.nodes[1].address();
    mesh.nodes[0].drain();

    let now = mesh.clock.now();
    let id = mesh.nodes[0]
        .node
        .send_transfer(b, Bytes::from(vec![1u8; 100]), now)
        .unwrap();

    // Nothing reaches the far side any more
    for _ in 0..7 {
        let now = mesh.clock.now();
        let out = mesh.nodes[0].node.tick(now);
        mesh.pump_filtered(0, out, |_, _, _| false);
        mesh.clock.advance(Duration::from_secs(11));
    }

    let events = mesh.nodes[0].drain();
    assert!(events.iter().any(|e| matches!(
        e,
        NodeEvent::TransferFailed { transfer_id, direction: Direction::Outbound, .. } if *transfer_id == id
    )));
    assert!(mesh.nodes[0].node.transfers().outbound(&id).is_none());
}
