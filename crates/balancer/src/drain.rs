//! Graceful drain of connections that are due for replacement.
//!
//! Every pick registers two [`PickAssignment`]s on a shared queue: one that
//! completes with the caller's request and one "shadow" that completes after a
//! fixed lifetime. A connection's outstanding counter tracks both. The
//! balancer only rebuilds a connection marked for replacement once its
//! counter is back at zero, so requests already routed to it are never cut
//! off, while the shadow lifetime bounds how long one pick can delay a rebuild.

use std::collections::HashMap;
use std::time::Duration;

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::connection::ConnectionId;
use crate::context::RequestContext;

#[derive(Debug, Clone)]
enum Expiry {
    /// Done when the request completes, or at the shadow deadline if it
    /// never does.
    Request {
        ctx: RequestContext,
        limit: Instant,
    },
    Shadow(Instant),
}

/// One outstanding claim on a connection.
#[derive(Debug, Clone)]
pub struct PickAssignment {
    pub id: ConnectionId,
    expiry: Expiry,
}

impl PickAssignment {
    pub fn is_done_at(&self, now: Instant) -> bool {
        match &self.expiry {
            Expiry::Request { ctx, limit } => now >= *limit || ctx.is_done_at(now),
            Expiry::Shadow(deadline) => now >= *deadline,
        }
    }

    pub fn is_shadow(&self) -> bool {
        matches!(self.expiry, Expiry::Shadow(_))
    }
}

pub struct DrainManager {
    queue: SegQueue<PickAssignment>,
    outstanding: Mutex<HashMap<ConnectionId, usize>>,
    shadow_lifetime: Duration,
}

impl DrainManager {
    pub fn new(shadow_lifetime: Duration) -> Self {
        Self {
            queue: SegQueue::new(),
            outstanding: Mutex::new(HashMap::new()),
            shadow_lifetime,
        }
    }

    pub fn shadow_lifetime(&self) -> Duration {
        self.shadow_lifetime
    }

    /// Registers a pick of connection `id` for the request `ctx`.
    pub fn register(&self, id: ConnectionId, ctx: &RequestContext) {
        let limit = Instant::now() + self.shadow_lifetime;
        *self.outstanding.lock().entry(id).or_default() += 2;
        self.queue.push(PickAssignment {
            id,
            expiry: Expiry::Request {
                ctx: ctx.clone(),
                limit,
            },
        });
        self.queue.push(PickAssignment {
            id,
            expiry: Expiry::Shadow(limit),
        });
    }

    /// Outstanding claims on `id`.
    pub fn outstanding(&self, id: ConnectionId) -> usize {
        self.outstanding.lock().get(&id).copied().unwrap_or(0)
    }

    /// Assignments still queued.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Makes one pass over the queue, retiring completed assignments and
    /// re-queueing the rest.
    ///
    /// Returns the connections whose outstanding counter reached zero and
    /// how many assignments were retired.
    pub fn drain_round(&self, now: Instant) -> (Vec<ConnectionId>, usize) {
        let mut drained = Vec::new();
        let mut retired = 0;
        for _ in 0..self.queue.len() {
            let Some(assignment) = self.queue.pop() else {
                break;
            };
            if !assignment.is_done_at(now) {
                self.queue.push(assignment);
                continue;
            }
            retired += 1;
            let mut outstanding = self.outstanding.lock();
            if let Some(count) = outstanding.get_mut(&assignment.id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    outstanding.remove(&assignment.id);
                    trace!(conn = %assignment.id, "connection fully drained");
                    drained.push(assignment.id);
                }
            }
        }
        (drained, retired)
    }
}
