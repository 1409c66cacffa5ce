//! End-to-end tests for the membership loop.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use corelib::{HashRing, Locator, RingMember};
use membership::{
    ChannelGossip, EventKind, GossipMember, GossipProvider, MemberEvent, MembershipError,
    MembershipSync, SyncConfig,
};

fn peer(i: u8) -> GossipMember {
    GossipMember::new(format!("node-{i}"), IpAddr::V4(Ipv4Addr::new(10, 0, 0, i)))
}

async fn wait_for(ring: &HashRing, members: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while ring.member_count() != members {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("ring never reached expected size");
}

#[tokio::test]
async fn test_loop_tracks_joins_and_failures() {
    let ring = Arc::new(HashRing::new());
    let (gossip, events) = ChannelGossip::new(peer(0));
    let gossip = Arc::new(gossip);
    let sync = Arc::new(MembershipSync::new(
        ring.clone(),
        gossip.clone(),
        SyncConfig::new("node-0", 3478).with_default_weight(50),
    ));
    let handle = sync.spawn(events);

    for i in 0..4 {
        gossip.join(peer(i)).unwrap();
    }
    wait_for(&ring, 3).await;
    assert_eq!(ring.weight_of(&RingMember::new("10.0.0.1:3478")), Some(50));

    gossip.fail(peer(2)).unwrap();
    wait_for(&ring, 2).await;
    assert!(!ring.contains(&RingMember::new("10.0.0.2:3478")));

    handle.shutdown().await.unwrap();
    assert!(gossip.has_left());
    assert!(gossip.is_shut_down());
}

#[tokio::test]
async fn test_shutdown_reports_both_failures() {
    let ring = Arc::new(HashRing::new());
    let (gossip, events) = ChannelGossip::new(peer(0));
    let gossip = Arc::new(gossip);
    // Already torn down: leave and shutdown will both fail.
    gossip.shutdown().await.unwrap();

    let sync = Arc::new(MembershipSync::new(ring, gossip, SyncConfig::new("node-0", 3478)));
    let err = sync.spawn(events).shutdown().await.unwrap_err();
    assert!(matches!(err, MembershipError::LeaveAndShutdown { .. }), "{err:?}");
}

#[tokio::test]
async fn test_closed_stream_waits_for_shutdown() {
    let ring = Arc::new(HashRing::new());
    let (gossip, _unused) = ChannelGossip::new(peer(0));
    let (tx, events) = tokio::sync::mpsc::unbounded_channel();
    tx.send(MemberEvent::single(EventKind::Join, peer(7))).unwrap();
    drop(tx);

    let sync = Arc::new(MembershipSync::new(
        ring.clone(),
        Arc::new(gossip),
        SyncConfig::new("node-0", 3478),
    ));
    let handle = sync.spawn(events);
    wait_for(&ring, 1).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(ring.member_count(), 1);
    handle.shutdown().await.unwrap();
}
