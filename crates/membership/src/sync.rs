//! The membership event loop.

use std::sync::Arc;

use corelib::{Locator, RingMember, TOP_WEIGHT};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MembershipError, Result};
use crate::event::{GossipMember, MemberEvent};
use crate::provider::GossipProvider;

/// How gossip peers become ring members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Our own gossip name; events about it are ignored.
    pub node_name: String,
    /// Port peers serve permission checks on. Combined with each peer's
    /// gossip IP to form its ring address.
    pub service_port: u16,
    /// Weight new members join the ring with.
    pub default_weight: u32,
}

impl SyncConfig {
    pub fn new(node_name: impl Into<String>, service_port: u16) -> Self {
        Self {
            node_name: node_name.into(),
            service_port,
            default_weight: TOP_WEIGHT,
        }
    }

    pub fn with_default_weight(mut self, weight: u32) -> Self {
        self.default_weight = weight;
        self
    }
}

/// Applies gossip membership events to a shared ring.
pub struct MembershipSync {
    ring: Arc<dyn Locator>,
    gossip: Arc<dyn GossipProvider>,
    config: SyncConfig,
}

impl MembershipSync {
    pub fn new(ring: Arc<dyn Locator>, gossip: Arc<dyn GossipProvider>, config: SyncConfig) -> Self {
        Self { ring, gossip, config }
    }

    pub fn ring(&self) -> &Arc<dyn Locator> {
        &self.ring
    }

    fn ring_member(&self, member: &GossipMember) -> RingMember {
        RingMember::new(member.service_address(self.config.service_port))
    }

    /// Applies one event. Returns how many ring mutations it caused.
    ///
    /// Duplicate and out-of-order events are harmless: joins of known members
    /// and departures of unknown ones are skipped.
    pub fn handle_event(&self, event: &MemberEvent) -> usize {
        let mut changed = 0;
        for member in &event.members {
            if member.name == self.config.node_name {
                continue;
            }
            let ring_member = self.ring_member(member);
            let applied = if event.kind.is_departure() {
                self.ring.contains(&ring_member) && self.ring.remove(&ring_member)
            } else {
                !self.ring.contains(&ring_member)
                    && self.ring.add_with_weight(ring_member.clone(), self.config.default_weight)
            };
            if applied {
                info!(kind = %event.kind, node = %member.name, member = %ring_member, "ring membership updated");
                changed += 1;
            } else {
                debug!(kind = %event.kind, node = %member.name, member = %ring_member, "membership event ignored");
            }
        }
        changed
    }

    /// Consumes events until `shutdown` flips, then leaves the gossip cluster.
    ///
    /// A closed event stream does not end the loop; the ring simply stops
    /// changing until shutdown.
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<MemberEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut open = true;
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can ask us to stop any more.
                        break;
                    }
                }
                event = events.recv(), if open => match event {
                    Some(event) => {
                        self.handle_event(&event);
                    }
                    None => {
                        warn!(node = %self.config.node_name, "membership event stream closed");
                        open = false;
                    }
                },
            }
        }
        self.leave_cluster().await
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self: Arc<Self>, events: mpsc::UnboundedReceiver<MemberEvent>) -> SyncHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(events, shutdown_rx).await });
        SyncHandle { shutdown_tx, task }
    }

    /// Leaves the cluster, then shuts gossip down; both run even if the
    /// first fails.
    async fn leave_cluster(&self) -> Result<()> {
        let left = self.gossip.leave().await;
        let shut = self.gossip.shutdown().await;
        match (left, shut) {
            (Ok(()), Ok(())) => {
                info!(node = %self.gossip.local_name(), "left gossip cluster");
                Ok(())
            }
            (Err(leave), Ok(())) => Err(leave),
            (Ok(()), Err(shutdown)) => Err(shutdown),
            (Err(leave), Err(shutdown)) => Err(MembershipError::LeaveAndShutdown {
                leave: leave.to_string(),
                shutdown: shutdown.to_string(),
            }),
        }
    }
}

/// Handle to a spawned [`MembershipSync`] loop.
pub struct SyncHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl SyncHandle {
    /// Signals shutdown and waits for the loop to leave the cluster.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.task
            .await
            .map_err(|e| MembershipError::Task(e.to_string()))?
    }
}
