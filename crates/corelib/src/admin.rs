//! Operator-facing view of ring assignments.

use std::sync::Arc;

use tracing::info;

use crate::member::RingMember;
use crate::ring::Locator;

/// Where a key currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub member: RingMember,
    pub pinned: bool,
}

/// What [`RingAdmin::set`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Added,
    Reweighted,
    Removed,
    /// Weight 0 for a member that was not on the ring.
    Unchanged,
}

/// Inspect and adjust a shared ring for diagnostics.
#[derive(Clone)]
pub struct RingAdmin {
    ring: Arc<dyn Locator>,
}

impl RingAdmin {
    pub fn new(ring: Arc<dyn Locator>) -> Self {
        Self { ring }
    }

    pub fn get(&self, key: &[u8]) -> Option<Assignment> {
        let member = self.ring.locate(key)?;
        Some(Assignment {
            member,
            pinned: self.ring.is_pinned(key),
        })
    }

    /// Adds the member, re-weights it if already present, or removes it when
    /// `weight` is 0.
    ///
    /// Re-weighting replaces the member's replicas under one ring write, so
    /// pins bound to the member are released.
    pub fn set(&self, member: RingMember, weight: u32) -> SetOutcome {
        let outcome = if weight == 0 {
            if self.ring.remove(&member) {
                SetOutcome::Removed
            } else {
                SetOutcome::Unchanged
            }
        } else if self.ring.reweight(&member, weight) {
            SetOutcome::Reweighted
        } else if self.ring.add_with_weight(member.clone(), weight) {
            SetOutcome::Added
        } else {
            // Added concurrently between the two calls.
            self.ring.reweight(&member, weight);
            SetOutcome::Reweighted
        };
        info!(member = %member, weight, ?outcome, "admin ring update");
        outcome
    }

    pub fn pin(&self, key: &[u8]) -> bool {
        self.ring.pin(key)
    }

    pub fn members(&self) -> Vec<RingMember> {
        self.ring.members()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::HashRing;

    fn admin() -> RingAdmin {
        RingAdmin::new(Arc::new(HashRing::new()))
    }

    #[test]
    fn test_get_on_empty_ring() {
        assert!(admin().get(b"k").is_none());
    }

    #[test]
    fn test_set_lifecycle() {
        let admin = admin();
        let m = RingMember::new("10.0.0.1:3478");
        assert_eq!(admin.set(m.clone(), 100), SetOutcome::Added);
        assert_eq!(admin.set(m.clone(), 50), SetOutcome::Reweighted);
        assert_eq!(admin.members(), vec![m.clone()]);
        assert_eq!(admin.set(m.clone(), 0), SetOutcome::Removed);
        assert_eq!(admin.set(m, 0), SetOutcome::Unchanged);
        assert!(admin.members().is_empty());
    }

    #[test]
    fn test_get_reports_pin() {
        let admin = admin();
        admin.set(RingMember::new("10.0.0.1:3478"), 100);
        assert_eq!(admin.get(b"key").map(|a| a.pinned), Some(false));
        assert!(admin.pin(b"key"));
        let got = admin.get(b"key").unwrap();
        assert!(got.pinned);
        assert_eq!(got.member.address, "10.0.0.1:3478");
    }
}
