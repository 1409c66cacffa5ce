//! The contract shared by every ring implementation.

use crate::config::{RingConfig, TOP_WEIGHT};
use crate::error::Result;
use crate::member::RingMember;

/// Assigns routing keys to ring members.
///
/// # Thread Safety
///
/// Implementations are shared behind `Arc<dyn Locator>` by the membership
/// synchronizer, the balancer and the router at the same time. Mutations
/// take an exclusive lock; `locate` and `closest_n` may run concurrently with
/// each other.
pub trait Locator: Send + Sync + 'static {
    /// Adds `member` at [`TOP_WEIGHT`]. Returns `false` if it was already present.
    fn add(&self, member: RingMember) -> bool {
        self.add_with_weight(member, TOP_WEIGHT)
    }

    /// Adds `member` with a relative weight. No-op (returns `false`) if the
    /// member already exists, even when `weight` differs.
    fn add_with_weight(&self, member: RingMember, weight: u32) -> bool;

    /// Removes `member` and everything bound to it. Returns `false` if absent.
    fn remove(&self, member: &RingMember) -> bool;

    /// Replaces the weight of a present member in one step, so concurrent
    /// lookups never observe it missing. Pins bound to the member are
    /// released. Returns `false` if absent.
    fn reweight(&self, member: &RingMember, weight: u32) -> bool;

    /// Whether `member` is currently on the ring.
    fn contains(&self, member: &RingMember) -> bool;

    /// Owner of `key`, or `None` when the ring has no members.
    fn locate(&self, key: &[u8]) -> Option<RingMember>;

    /// Up to `n` distinct members, walking clockwise from `hash(key)`.
    /// The first element is `locate(key)`.
    fn closest_n(&self, key: &[u8], n: usize) -> Vec<RingMember>;

    /// Binds `key` to its current owner so later topology changes do not move
    /// it until that owner is removed. Fails when the ring is empty or the key
    /// is already pinned.
    fn pin(&self, key: &[u8]) -> bool;

    /// Whether `key` is currently pinned.
    fn is_pinned(&self, key: &[u8]) -> bool;

    /// Snapshot of all members, sorted by key.
    fn members(&self) -> Vec<RingMember>;

    fn member_count(&self) -> usize;

    /// Current configuration snapshot.
    fn config(&self) -> RingConfig;

    /// Rebuilds the ring from the current member set under `config`.
    fn apply_config(&self, config: RingConfig) -> Result<()>;

    /// Implementation name (for logging/debugging).
    fn name(&self) -> &'static str;
}
