//! Gossip membership providers.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{MembershipError, Result};
use crate::event::{EventKind, GossipMember, MemberEvent};

/// The half of a gossip implementation the synchronizer drives directly.
///
/// Events flow the other way, through the receiver handed to
/// [`MembershipSync::run`](crate::MembershipSync::run).
#[async_trait]
pub trait GossipProvider: Send + Sync + 'static {
    /// Name this node gossips under.
    fn local_name(&self) -> &str;

    /// Broadcasts this node's departure to its peers.
    async fn leave(&self) -> Result<()>;

    /// Tears down local gossip state. Call after [`leave`](Self::leave).
    async fn shutdown(&self) -> Result<()>;
}

/// In-process provider: events are published by hand and delivered through
/// an unbounded channel.
///
/// Useful for single-node deployments, static clusters and tests.
pub struct ChannelGossip {
    local: GossipMember,
    tx: Mutex<Option<mpsc::UnboundedSender<MemberEvent>>>,
    left: AtomicBool,
}

impl ChannelGossip {
    pub fn new(local: GossipMember) -> (Self, mpsc::UnboundedReceiver<MemberEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gossip = Self {
            local,
            tx: Mutex::new(Some(tx)),
            left: AtomicBool::new(false),
        };
        (gossip, rx)
    }

    pub fn publish(&self, event: MemberEvent) -> Result<()> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(MembershipError::Closed)?;
        tx.send(event).map_err(|_| MembershipError::Closed)
    }

    pub fn join(&self, member: GossipMember) -> Result<()> {
        self.publish(MemberEvent::single(EventKind::Join, member))
    }

    pub fn fail(&self, member: GossipMember) -> Result<()> {
        self.publish(MemberEvent::single(EventKind::Failed, member))
    }

    pub fn has_left(&self) -> bool {
        self.left.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.tx.lock().is_none()
    }
}

#[async_trait]
impl GossipProvider for ChannelGossip {
    fn local_name(&self) -> &str {
        &self.local.name
    }

    async fn leave(&self) -> Result<()> {
        if self.left.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(MembershipError::Leave("gossip already shut down".into()));
        };
        // Nobody listening is not a failure to leave.
        let _ = tx.send(MemberEvent::single(EventKind::Leave, self.local.clone()));
        debug!(node = %self.local.name, "left gossip cluster");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if self.tx.lock().take().is_none() {
            return Err(MembershipError::Shutdown("gossip already shut down".into()));
        }
        debug!(node = %self.local.name, "gossip shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn local() -> GossipMember {
        GossipMember::new("node-0", IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[tokio::test]
    async fn test_publish_delivers_events() {
        let (gossip, mut rx) = ChannelGossip::new(local());
        let peer = GossipMember::new("node-1", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        gossip.join(peer.clone()).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Join);
        assert_eq!(event.members, vec![peer]);
    }

    #[tokio::test]
    async fn test_leave_then_shutdown() {
        let (gossip, mut rx) = ChannelGossip::new(local());
        gossip.leave().await.unwrap();
        assert!(gossip.has_left());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Leave);

        gossip.shutdown().await.unwrap();
        assert!(gossip.is_shut_down());
        assert!(rx.recv().await.is_none());
        assert_eq!(gossip.join(local()), Err(MembershipError::Closed));
        assert!(matches!(gossip.shutdown().await, Err(MembershipError::Shutdown(_))));
    }
}
