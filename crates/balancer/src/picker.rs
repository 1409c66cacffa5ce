//! Per-request connection selection.

use std::collections::HashMap;
use std::sync::Arc;

use corelib::Locator;
use rand::Rng;
use tracing::trace;

use crate::connection::ConnectionHandle;
use crate::context::RequestContext;
use crate::drain::DrainManager;
use crate::error::{BalancerError, Result};

/// The connection chosen for one call.
#[derive(Debug, Clone)]
pub struct PickResult {
    pub handle: ConnectionHandle,
}

/// Chooses a connection for a call. Never blocks.
pub trait Picker: Send + Sync + 'static {
    fn pick(&self, ctx: &RequestContext) -> Result<PickResult>;
}

/// Fails every pick with the same error.
#[derive(Debug, Clone)]
pub struct ErrPicker {
    err: BalancerError,
}

impl ErrPicker {
    pub fn new(err: BalancerError) -> Self {
        Self { err }
    }
}

impl Picker for ErrPicker {
    fn pick(&self, _ctx: &RequestContext) -> Result<PickResult> {
        metrics::counter!("balancer_pick_failures_total").increment(1);
        Err(self.err.clone())
    }
}

/// Picks among the `width` ring members closest to the call's routing key.
///
/// Bound to the usable connections at the time it was built; the balancer
/// swaps in a new picker whenever that set changes.
pub struct RingPicker {
    ring: Arc<dyn Locator>,
    handles: HashMap<String, ConnectionHandle>,
    width: usize,
    drain: Arc<DrainManager>,
}

impl RingPicker {
    pub fn new(
        ring: Arc<dyn Locator>,
        handles: impl IntoIterator<Item = ConnectionHandle>,
        width: usize,
        drain: Arc<DrainManager>,
    ) -> Self {
        Self {
            ring,
            handles: handles.into_iter().map(|h| (h.member().key(), h)).collect(),
            width: width.max(1),
            drain,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl Picker for RingPicker {
    fn pick(&self, ctx: &RequestContext) -> Result<PickResult> {
        let key = ctx.routing_key();
        let candidates: Vec<&ConnectionHandle> = self
            .ring
            .closest_n(&key, self.width)
            .iter()
            .filter_map(|m| self.handles.get(&m.key()))
            .collect();

        let handle = match candidates.len() {
            0 => {
                metrics::counter!("balancer_pick_failures_total").increment(1);
                return Err(BalancerError::NoBackendAvailable);
            }
            1 => candidates[0],
            n => candidates[random_index(n)],
        };
        trace!(method = ctx.method(), address = handle.address(), "picked connection");
        self.drain.register(handle.id(), ctx);
        metrics::counter!("balancer_picks_total").increment(1);
        Ok(PickResult {
            handle: handle.clone(),
        })
    }
}

/// Uniform index in `0..len` from the thread-local CSPRNG.
fn random_index(len: usize) -> usize {
    rand::rng().random_range(0..len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{BackendConnection, ConnectionId};
    use corelib::{HashRing, RingMember};
    use std::collections::HashSet;
    use std::time::Duration;

    struct Noop;

    impl BackendConnection for Noop {
        fn connect(&self) {}
        fn shutdown(&self) {}
    }

    fn handle(id: u64, address: &str) -> ConnectionHandle {
        ConnectionHandle::new(ConnectionId(id), RingMember::new(address), Arc::new(Noop))
    }

    fn setup(width: usize) -> (RingPicker, Arc<DrainManager>) {
        let ring = Arc::new(HashRing::new());
        let mut handles = Vec::new();
        for i in 0..4u64 {
            let address = format!("10.0.0.{i}:3478");
            ring.add(RingMember::new(address.clone()));
            handles.push(handle(i, &address));
        }
        let drain = Arc::new(DrainManager::new(Duration::from_secs(5)));
        (RingPicker::new(ring, handles, width, drain.clone()), drain)
    }

    #[tokio::test]
    async fn test_width_one_follows_ring_owner() {
        let (picker, drain) = setup(1);
        let ctx = RequestContext::new("m").with_routing_key("tenant-key");
        let first = picker.pick(&ctx).unwrap().handle;
        for _ in 0..10 {
            assert_eq!(picker.pick(&ctx).unwrap().handle, first);
        }
        let owner = picker.ring.locate(b"tenant-key").unwrap();
        assert_eq!(first.member(), &owner);
        assert_eq!(drain.outstanding(first.id()), 22);
    }

    #[tokio::test]
    async fn test_wider_pick_stays_within_candidates() {
        let (picker, _) = setup(2);
        let ctx = RequestContext::new("m").with_routing_key("tenant-key");
        let allowed: HashSet<String> = picker
            .ring
            .closest_n(b"tenant-key", 2)
            .into_iter()
            .map(|m| m.address)
            .collect();
        for _ in 0..50 {
            let picked = picker.pick(&ctx).unwrap().handle;
            assert!(allowed.contains(picked.address()));
        }
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let drain = Arc::new(DrainManager::new(Duration::from_secs(5)));
        let picker = RingPicker::new(Arc::new(HashRing::new()), Vec::new(), 1, drain.clone());
        let err = picker.pick(&RequestContext::new("m")).unwrap_err();
        assert_eq!(err, BalancerError::NoBackendAvailable);
        assert_eq!(drain.queued(), 0);
    }

    #[test]
    fn test_err_picker() {
        let picker = ErrPicker::new(BalancerError::TransientFailure("down".into()));
        assert!(picker.pick(&RequestContext::new("m")).unwrap_err().is_unavailable());
    }

    #[test]
    fn test_random_index_in_range() {
        for len in 1..10 {
            assert!(random_index(len) < len);
        }
    }
}
