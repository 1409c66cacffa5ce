//! Weighted consistent hash ring.
//!
//! # Layout
//!
//! ```text
//! keys:    [t0 < t1 < t2 < ... < tn]      sorted tokens
//! entries: { t -> VirtualNode(owner) }    one owner per token
//! nodes:   { member key -> MemberEntry }  weight + tokens it owns
//! ```
//!
//! A key is owned by the first token `>= hash(key)`, wrapping to `t0`.
//!
//! # Performance
//!
//! - **Lookup**: O(log n) binary search over `keys`
//! - **Add/Remove**: O(r * n) for r replicas (sorted insertion / retain)
//! - **ClosestN**: O(log n + k) where k is the number of tokens walked

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::config::{RingConfig, TOP_WEIGHT};
use crate::error::Result;
use crate::hasher::{KeyHasher, Xxh3Hasher};
use crate::member::RingMember;
use crate::ring::locator::Locator;
use crate::token::Token;
use crate::vnode::VirtualNode;

#[derive(Debug, Clone)]
struct MemberEntry {
    member: RingMember,
    weight: u32,
    /// Replica and pin tokens owned by this member.
    tokens: Vec<Token>,
}

#[derive(Debug, Default)]
struct RingState {
    config: RingConfig,
    keys: Vec<Token>,
    entries: HashMap<Token, VirtualNode>,
    nodes: HashMap<String, MemberEntry>,
}

impl RingState {
    /// Index of the first token `>= token`, wrapping to 0.
    fn search(&self, token: Token) -> Option<usize> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.keys.partition_point(|k| *k < token);
        Some(if idx == self.keys.len() { 0 } else { idx })
    }

    fn owner_at(&self, token: Token) -> Option<&VirtualNode> {
        let idx = self.search(token)?;
        self.entries.get(&self.keys[idx])
    }

    /// Inserts a ring entry, keeping `keys` sorted. Returns `false` on a
    /// token collision; the existing entry wins.
    fn insert_entry(&mut self, vnode: VirtualNode) -> bool {
        match self.keys.binary_search(&vnode.token) {
            Ok(_) => false,
            Err(pos) => {
                self.keys.insert(pos, vnode.token);
                self.entries.insert(vnode.token, vnode);
                true
            }
        }
    }

    fn place_replicas(&mut self, hasher: &dyn KeyHasher, member: RingMember, weight: u32) {
        let key = member.key();
        let replicas = self.config.replicas_for_weight(weight);
        let mut tokens = Vec::with_capacity(replicas as usize);
        for index in 0..replicas {
            let token = hasher.hash(VirtualNode::replica_key(&key, index).as_bytes());
            if self.insert_entry(VirtualNode::replica(token, key.clone(), index)) {
                tokens.push(token);
            } else {
                trace!(member = %key, replica = index, %token, "replica token collision, skipped");
            }
        }
        self.nodes.insert(
            key,
            MemberEntry {
                member,
                weight,
                tokens,
            },
        );
    }

    fn drop_member(&mut self, key: &str) -> Option<MemberEntry> {
        let entry = self.nodes.remove(key)?;
        let removed: HashSet<Token> = entry.tokens.iter().copied().collect();
        for token in &removed {
            self.entries.remove(token);
        }
        self.keys.retain(|t| !removed.contains(t));
        Some(entry)
    }
}

/// Weighted consistent hash ring over virtual replicas.
///
/// Safe for concurrent use: one writer at a time (`add`, `remove`, `pin`,
/// `apply_config`), many concurrent readers (`locate`, `closest_n`).
pub struct HashRing {
    hasher: Arc<dyn KeyHasher>,
    state: RwLock<RingState>,
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("HashRing")
            .field("hasher", &self.hasher.name())
            .field("members", &state.nodes.len())
            .field("tokens", &state.keys.len())
            .finish()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

impl HashRing {
    /// Empty ring with the default config and the XXH3 hasher.
    pub fn new() -> Self {
        Self::with_config(RingConfig::default())
    }

    pub fn with_config(config: RingConfig) -> Self {
        Self::with_hasher(config, Arc::new(Xxh3Hasher))
    }

    pub fn with_hasher(config: RingConfig, hasher: Arc<dyn KeyHasher>) -> Self {
        Self {
            hasher,
            state: RwLock::new(RingState {
                config: config.normalized(),
                ..RingState::default()
            }),
        }
    }

    /// Token a key hashes to.
    pub fn token_for(&self, key: &[u8]) -> Token {
        self.hasher.hash(key)
    }

    pub fn hasher_name(&self) -> &'static str {
        self.hasher.name()
    }

    /// Total ring entries (replicas plus pins).
    pub fn token_count(&self) -> usize {
        self.state.read().keys.len()
    }

    /// Virtual replicas placed for one member, or `None` if it is not on the ring.
    pub fn replica_count(&self, member: &RingMember) -> Option<usize> {
        let state = self.state.read();
        let entry = state.nodes.get(&member.key())?;
        Some(
            entry
                .tokens
                .iter()
                .filter(|t| state.entries.get(t).is_some_and(|v| !v.is_pinned()))
                .count(),
        )
    }

    pub fn weight_of(&self, member: &RingMember) -> Option<u32> {
        self.state.read().nodes.get(&member.key()).map(|e| e.weight)
    }

    /// All ring entries in clockwise order (for debugging).
    pub fn vnodes(&self) -> Vec<VirtualNode> {
        let state = self.state.read();
        state
            .keys
            .iter()
            .filter_map(|t| state.entries.get(t).cloned())
            .collect()
    }

    /// Pinned entries in clockwise order.
    pub fn pinned_keys(&self) -> Vec<VirtualNode> {
        self.vnodes().into_iter().filter(|v| v.is_pinned()).collect()
    }

    /// Fraction of the hash space each member owns, keyed by member key.
    ///
    /// Fractions sum to 1.0 for a non-empty ring.
    pub fn ownership(&self) -> HashMap<String, f64> {
        let state = self.state.read();
        let mut owned: HashMap<String, f64> = HashMap::new();
        if state.keys.len() == 1 {
            if let Some(v) = state.entries.get(&state.keys[0]) {
                owned.insert(v.owner.clone(), 1.0);
            }
            return owned;
        }
        const RING_SIZE: f64 = u64::MAX as f64 + 1.0;
        for (i, token) in state.keys.iter().enumerate() {
            let prev = if i == 0 {
                state.keys[state.keys.len() - 1]
            } else {
                state.keys[i - 1]
            };
            if let Some(v) = state.entries.get(token) {
                *owned.entry(v.owner.clone()).or_default() +=
                    prev.distance_to(token) as f64 / RING_SIZE;
            }
        }
        owned
    }

    fn record_size(count: usize) {
        metrics::gauge!("ring_members").set(count as f64);
    }
}

impl Locator for HashRing {
    fn add_with_weight(&self, member: RingMember, weight: u32) -> bool {
        let mut state = self.state.write();
        if state.nodes.contains_key(&member.key()) {
            return false;
        }
        debug!(member = %member, weight, "adding member to ring");
        state.place_replicas(self.hasher.as_ref(), member, weight);
        Self::record_size(state.nodes.len());
        true
    }

    fn remove(&self, member: &RingMember) -> bool {
        let mut state = self.state.write();
        let Some(entry) = state.drop_member(&member.key()) else {
            return false;
        };
        debug!(member = %member, tokens = entry.tokens.len(), "removed member from ring");
        Self::record_size(state.nodes.len());
        true
    }

    fn reweight(&self, member: &RingMember, weight: u32) -> bool {
        let mut state = self.state.write();
        let Some(entry) = state.drop_member(&member.key()) else {
            return false;
        };
        debug!(member = %member, from = entry.weight, to = weight, "re-weighting member");
        state.place_replicas(self.hasher.as_ref(), entry.member, weight);
        true
    }

    fn contains(&self, member: &RingMember) -> bool {
        self.state.read().nodes.contains_key(&member.key())
    }

    fn locate(&self, key: &[u8]) -> Option<RingMember> {
        let token = self.hasher.hash(key);
        let state = self.state.read();
        let vnode = state.owner_at(token)?;
        state.nodes.get(&vnode.owner).map(|e| e.member.clone())
    }

    fn closest_n(&self, key: &[u8], n: usize) -> Vec<RingMember> {
        let token = self.hasher.hash(key);
        let state = self.state.read();
        let Some(start) = state.search(token) else {
            return Vec::new();
        };
        let want = n.min(state.nodes.len());
        let mut seen: HashSet<&str> = HashSet::with_capacity(want);
        let mut out = Vec::with_capacity(want);
        let len = state.keys.len();
        for step in 0..len {
            if out.len() >= want {
                break;
            }
            let Some(vnode) = state.entries.get(&state.keys[(start + step) % len]) else {
                continue;
            };
            if !seen.insert(vnode.owner.as_str()) {
                continue;
            }
            if let Some(entry) = state.nodes.get(&vnode.owner) {
                out.push(entry.member.clone());
            }
        }
        out
    }

    fn pin(&self, key: &[u8]) -> bool {
        let token = self.hasher.hash(key);
        let mut state = self.state.write();
        if state.entries.contains_key(&token) {
            // Already pinned, or the key lands exactly on a replica.
            return false;
        }
        let Some(owner) = state.owner_at(token).map(|v| v.owner.clone()) else {
            return false;
        };
        state.insert_entry(VirtualNode::pinned(token, owner.clone()));
        if let Some(entry) = state.nodes.get_mut(&owner) {
            entry.tokens.push(token);
        }
        debug!(%token, member = %owner, "pinned key");
        true
    }

    fn is_pinned(&self, key: &[u8]) -> bool {
        let token = self.hasher.hash(key);
        self.state
            .read()
            .entries
            .get(&token)
            .is_some_and(|v| v.is_pinned())
    }

    fn members(&self) -> Vec<RingMember> {
        let state = self.state.read();
        let mut members: Vec<RingMember> = state.nodes.values().map(|e| e.member.clone()).collect();
        members.sort();
        members
    }

    fn member_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    fn config(&self) -> RingConfig {
        self.state.read().config
    }

    fn apply_config(&self, config: RingConfig) -> Result<()> {
        let config = config.normalized();
        let mut state = self.state.write();
        let members: Vec<(RingMember, u32)> = state
            .nodes
            .values()
            .map(|e| (e.member.clone(), e.weight))
            .collect();
        let pins: Vec<VirtualNode> = state
            .entries
            .values()
            .filter(|v| v.is_pinned())
            .cloned()
            .collect();

        *state = RingState {
            config,
            ..RingState::default()
        };
        for (member, weight) in members {
            state.place_replicas(self.hasher.as_ref(), member, weight);
        }
        for pin in pins {
            let (token, owner) = (pin.token, pin.owner.clone());
            if state.nodes.contains_key(&owner) && state.insert_entry(pin) {
                if let Some(entry) = state.nodes.get_mut(&owner) {
                    entry.tokens.push(token);
                }
            }
        }
        debug!(
            replication_factor = config.replication_factor,
            members = state.nodes.len(),
            tokens = state.keys.len(),
            "rebuilt ring under new config"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "HashRing"
    }
}

/// Builder for a [`HashRing`] with an initial member set.
///
/// # Example
///
/// ```rust
/// use corelib::{Locator, RingBuilder, RingMember};
///
/// let ring = RingBuilder::new()
///     .with_replicas(8)
///     .add_member(RingMember::new("10.0.0.1:3478"))
///     .add_member_with_weight(RingMember::new("10.0.0.2:3478"), 200)
///     .build();
/// assert_eq!(ring.member_count(), 2);
/// ```
pub struct RingBuilder {
    config: RingConfig,
    hasher: Arc<dyn KeyHasher>,
    members: Vec<(RingMember, u32)>,
}

impl Default for RingBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RingBuilder {
    pub fn new() -> Self {
        Self {
            config: RingConfig::default(),
            hasher: Arc::new(Xxh3Hasher),
            members: Vec::new(),
        }
    }

    /// Virtual replicas for a member of full weight.
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.config.replication_factor = replicas;
        self
    }

    pub fn with_config(mut self, config: RingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn KeyHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn add_member(self, member: RingMember) -> Self {
        self.add_member_with_weight(member, TOP_WEIGHT)
    }

    pub fn add_member_with_weight(mut self, member: RingMember, weight: u32) -> Self {
        self.members.push((member, weight));
        self
    }

    pub fn build(self) -> HashRing {
        let ring = HashRing::with_hasher(self.config, self.hasher);
        for (member, weight) in self.members {
            ring.add_with_weight(member, weight);
        }
        ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_stay_sorted_after_mutations() {
        let ring = RingBuilder::new().with_replicas(16).build();
        for i in 0..8 {
            ring.add(RingMember::new(format!("10.0.0.{i}:3478")));
        }
        ring.remove(&RingMember::new("10.0.0.3:3478"));
        ring.pin(b"some-key");

        let state = ring.state.read();
        assert!(state.keys.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(state.keys.len(), state.entries.len());
        let owned: usize = state.nodes.values().map(|e| e.tokens.len()).sum();
        assert_eq!(owned, state.keys.len());
    }

    #[test]
    fn test_search_wraps_past_last_token() {
        let ring = RingBuilder::new().with_replicas(4).build();
        ring.add(RingMember::new("a:1"));
        let state = ring.state.read();
        let last = *state.keys.last().unwrap();
        if last.0 < u64::MAX {
            assert_eq!(state.search(Token(last.0 + 1)), Some(0));
        }
        assert_eq!(state.search(Token(0)), Some(0));
    }

    #[test]
    fn test_ownership_sums_to_one() {
        let ring = RingBuilder::new()
            .with_replicas(32)
            .add_member(RingMember::new("a:1"))
            .add_member(RingMember::new("b:1"))
            .add_member(RingMember::new("c:1"))
            .build();
        let total: f64 = ring.ownership().values().sum();
        assert!((total - 1.0).abs() < 1e-9, "total = {total}");
    }

    #[test]
    fn test_single_token_owns_everything() {
        let ring = RingBuilder::new().with_replicas(1).build();
        ring.add_with_weight(RingMember::new("a:1"), 1);
        assert_eq!(ring.ownership().get("a:1"), Some(&1.0));
    }
}
