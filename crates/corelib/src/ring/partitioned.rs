//! Bounded-load partitioned ring.
//!
//! # Algorithm
//!
//! 1. Every member places `replicas_for_weight(weight)` tokens on the ring.
//! 2. The key space is cut into `partition_count` partitions; partition `p`
//!    hashes to `hash(p as u64 little-endian)`.
//! 3. Each partition is assigned to the first member clockwise from its token
//!    whose load is still below `ceil(partition_count / members * load)`.
//! 4. A key belongs to partition `hash(key) % partition_count`.
//!
//! The load bound keeps any member from holding much more than its fair
//! share even with few members or unlucky token placement. Every membership
//! change redistributes all partitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::RingConfig;
use crate::error::{Error, Result};
use crate::hasher::{KeyHasher, Xxh3Hasher};
use crate::member::RingMember;
use crate::ring::locator::Locator;
use crate::token::Token;
use crate::vnode::VirtualNode;

#[derive(Debug, Default)]
struct PartitionedState {
    config: RingConfig,
    sorted: Vec<Token>,
    ring: HashMap<Token, String>,
    members: HashMap<String, (RingMember, u32)>,
    /// Owner key per partition, indexed by partition id.
    partitions: Vec<String>,
    loads: HashMap<String, f64>,
    pins: HashMap<Token, String>,
}

impl PartitionedState {
    fn average_load(&self) -> f64 {
        if self.members.is_empty() {
            return 0.0;
        }
        let fair = f64::from(self.config.partition_count) / self.members.len() as f64;
        (fair * self.config.load).ceil()
    }

    fn place_tokens(&mut self, hasher: &dyn KeyHasher, key: &str, weight: u32) {
        for index in 0..self.config.replicas_for_weight(weight) {
            let token = hasher.hash(VirtualNode::replica_key(key, index).as_bytes());
            if self.ring.contains_key(&token) {
                continue;
            }
            self.ring.insert(token, key.to_string());
            self.sorted.push(token);
        }
    }

    /// Drops every token and pin owned by `key`.
    fn drop_tokens(&mut self, key: &str) {
        self.ring.retain(|_, owner| owner != key);
        let ring = std::mem::take(&mut self.ring);
        self.sorted.retain(|t| ring.contains_key(t));
        self.ring = ring;
        self.pins.retain(|_, owner| owner != key);
    }

    fn distribute(&mut self, hasher: &dyn KeyHasher) -> Result<()> {
        if self.members.is_empty() {
            self.partitions.clear();
            self.loads.clear();
            return Ok(());
        }
        let max_load = self.average_load();
        let mut loads: HashMap<String, f64> = HashMap::with_capacity(self.members.len());
        let mut partitions = Vec::with_capacity(self.config.partition_count as usize);

        for partition in 0..u64::from(self.config.partition_count) {
            let token = hasher.hash(&partition.to_le_bytes());
            let mut idx = self.sorted.partition_point(|t| *t < token);
            let mut assigned = false;
            for _ in 0..self.sorted.len() {
                if idx >= self.sorted.len() {
                    idx = 0;
                }
                let owner = &self.ring[&self.sorted[idx]];
                let load = loads.entry(owner.clone()).or_default();
                if *load + 1.0 <= max_load {
                    *load += 1.0;
                    partitions.push(owner.clone());
                    assigned = true;
                    break;
                }
                idx += 1;
            }
            if !assigned {
                return Err(Error::InsufficientCapacity {
                    partitions: u64::from(self.config.partition_count),
                    members: self.members.len(),
                    max_load,
                });
            }
        }

        self.partitions = partitions;
        self.loads = loads;
        Ok(())
    }

    fn partition_id(&self, token: Token) -> usize {
        (token.0 % u64::from(self.config.partition_count)) as usize
    }

    fn owner_of(&self, token: Token) -> Option<&String> {
        if let Some(owner) = self.pins.get(&token) {
            return Some(owner);
        }
        self.partitions.get(self.partition_id(token))
    }
}

/// Consistent hashing with partitions and a per-member load bound.
pub struct PartitionedRing {
    hasher: Arc<dyn KeyHasher>,
    state: RwLock<PartitionedState>,
}

impl Default for PartitionedRing {
    fn default() -> Self {
        Self::new(RingConfig::default())
    }
}

impl PartitionedRing {
    pub fn new(config: RingConfig) -> Self {
        Self::with_hasher(config, Arc::new(Xxh3Hasher))
    }

    pub fn with_hasher(config: RingConfig, hasher: Arc<dyn KeyHasher>) -> Self {
        Self {
            hasher,
            state: RwLock::new(PartitionedState {
                config: config.normalized(),
                ..PartitionedState::default()
            }),
        }
    }

    /// Partition a key falls into.
    pub fn partition_id(&self, key: &[u8]) -> usize {
        self.state.read().partition_id(self.hasher.hash(key))
    }

    /// Owner of a partition, `None` for an empty ring or out-of-range id.
    pub fn partition_owner(&self, partition: usize) -> Option<RingMember> {
        let state = self.state.read();
        let owner = state.partitions.get(partition)?;
        state.members.get(owner).map(|(m, _)| m.clone())
    }

    /// Upper bound on partitions per member under the current member set.
    pub fn average_load(&self) -> f64 {
        self.state.read().average_load()
    }

    /// Partitions held by each member, keyed by member key.
    pub fn load_distribution(&self) -> HashMap<String, f64> {
        self.state.read().loads.clone()
    }

    fn redistribute(&self, state: &mut PartitionedState) {
        let previous = (std::mem::take(&mut state.partitions), std::mem::take(&mut state.loads));
        if let Err(err) = state.distribute(self.hasher.as_ref()) {
            warn!(error = %err, "partition redistribution failed, keeping previous assignment");
            state.partitions = previous.0;
            state.loads = previous.1;
        }
    }
}

impl Locator for PartitionedRing {
    fn add_with_weight(&self, member: RingMember, weight: u32) -> bool {
        let key = member.key();
        let mut state = self.state.write();
        if state.members.contains_key(&key) {
            return false;
        }
        state.place_tokens(self.hasher.as_ref(), &key, weight);
        state.sorted.sort_unstable();
        state.members.insert(key.clone(), (member, weight));
        self.redistribute(&mut state);
        debug!(member = %key, members = state.members.len(), "added member to partitioned ring");
        metrics::gauge!("ring_members").set(state.members.len() as f64);
        true
    }

    fn remove(&self, member: &RingMember) -> bool {
        let key = member.key();
        let mut state = self.state.write();
        if state.members.remove(&key).is_none() {
            return false;
        }
        state.drop_tokens(&key);
        self.redistribute(&mut state);
        debug!(member = %key, members = state.members.len(), "removed member from partitioned ring");
        metrics::gauge!("ring_members").set(state.members.len() as f64);
        true
    }

    fn reweight(&self, member: &RingMember, weight: u32) -> bool {
        let key = member.key();
        let mut state = self.state.write();
        let Some(entry) = state.members.get_mut(&key) else {
            return false;
        };
        entry.1 = weight;
        state.drop_tokens(&key);
        state.place_tokens(self.hasher.as_ref(), &key, weight);
        state.sorted.sort_unstable();
        self.redistribute(&mut state);
        debug!(member = %key, weight, "re-weighted member on partitioned ring");
        true
    }

    fn contains(&self, member: &RingMember) -> bool {
        self.state.read().members.contains_key(&member.key())
    }

    fn locate(&self, key: &[u8]) -> Option<RingMember> {
        let token = self.hasher.hash(key);
        let state = self.state.read();
        let owner = state.owner_of(token)?;
        state.members.get(owner).map(|(m, _)| m.clone())
    }

    fn closest_n(&self, key: &[u8], n: usize) -> Vec<RingMember> {
        let token = self.hasher.hash(key);
        let state = self.state.read();
        let Some(owner) = state.owner_of(token) else {
            return Vec::new();
        };

        // Members ordered by the hash of their key; walk clockwise from the owner.
        let mut by_hash: Vec<(Token, &String)> = state
            .members
            .keys()
            .map(|k| (self.hasher.hash(k.as_bytes()), k))
            .collect();
        by_hash.sort();
        let start = by_hash.iter().position(|(_, k)| *k == owner).unwrap_or(0);

        let want = n.min(by_hash.len());
        let mut seen = HashSet::with_capacity(want);
        let mut out = Vec::with_capacity(want);
        for step in 0..by_hash.len() {
            if out.len() >= want {
                break;
            }
            let (_, k) = by_hash[(start + step) % by_hash.len()];
            if seen.insert(k) {
                if let Some((m, _)) = state.members.get(k) {
                    out.push(m.clone());
                }
            }
        }
        out
    }

    fn pin(&self, key: &[u8]) -> bool {
        let token = self.hasher.hash(key);
        let mut state = self.state.write();
        if state.pins.contains_key(&token) {
            return false;
        }
        let Some(owner) = state.owner_of(token).cloned() else {
            return false;
        };
        state.pins.insert(token, owner);
        true
    }

    fn is_pinned(&self, key: &[u8]) -> bool {
        self.state.read().pins.contains_key(&self.hasher.hash(key))
    }

    fn members(&self) -> Vec<RingMember> {
        let mut members: Vec<RingMember> = self
            .state
            .read()
            .members
            .values()
            .map(|(m, _)| m.clone())
            .collect();
        members.sort();
        members
    }

    fn member_count(&self) -> usize {
        self.state.read().members.len()
    }

    fn config(&self) -> RingConfig {
        self.state.read().config
    }

    fn apply_config(&self, config: RingConfig) -> Result<()> {
        let mut state = self.state.write();
        let members: Vec<(String, u32)> = state
            .members
            .iter()
            .map(|(k, (_, w))| (k.clone(), *w))
            .collect();
        state.config = config.normalized();
        state.ring.clear();
        state.sorted.clear();
        for (key, weight) in &members {
            state.place_tokens(self.hasher.as_ref(), key, *weight);
        }
        state.sorted.sort_unstable();
        state.distribute(self.hasher.as_ref())
    }

    fn name(&self) -> &'static str {
        "PartitionedRing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(n: usize, config: RingConfig) -> PartitionedRing {
        let ring = PartitionedRing::new(config);
        for i in 0..n {
            ring.add(RingMember::new(format!("10.0.0.{i}:3478")));
        }
        ring
    }

    #[test]
    fn test_empty_ring_locates_nothing() {
        let ring = PartitionedRing::default();
        assert!(ring.locate(b"k").is_none());
        assert!(ring.closest_n(b"k", 3).is_empty());
        assert!(!ring.pin(b"k"));
        assert_eq!(ring.average_load(), 0.0);
    }

    #[test]
    fn test_loads_respect_bound() {
        let ring = ring_with(7, RingConfig::default());
        let bound = ring.average_load();
        let loads = ring.load_distribution();
        let total: f64 = loads.values().sum();
        assert_eq!(total, 271.0);
        assert!(loads.values().all(|l| *l <= bound), "{loads:?} over {bound}");
    }

    #[test]
    fn test_more_members_than_partitions() {
        let config = RingConfig {
            partition_count: 3,
            replication_factor: 4,
            ..RingConfig::default()
        };
        let ring = ring_with(5, config);
        // Every partition still has an owner.
        for p in 0..3 {
            assert!(ring.partition_owner(p).is_some());
        }
        assert!(ring.locate(b"anything").is_some());
    }

    #[test]
    fn test_locate_matches_partition_owner() {
        let ring = ring_with(4, RingConfig::default());
        for i in 0..100 {
            let key = format!("key-{i}");
            let pid = ring.partition_id(key.as_bytes());
            assert_eq!(ring.locate(key.as_bytes()), ring.partition_owner(pid));
        }
    }

    #[test]
    fn test_closest_n_starts_at_owner_and_is_distinct() {
        let ring = ring_with(5, RingConfig::default());
        let owner = ring.locate(b"user:1").unwrap();
        let closest = ring.closest_n(b"user:1", 3);
        assert_eq!(closest.len(), 3);
        assert_eq!(closest[0], owner);
        let unique: HashSet<_> = closest.iter().collect();
        assert_eq!(unique.len(), 3);
        assert_eq!(ring.closest_n(b"user:1", 10).len(), 5);
    }

    #[test]
    fn test_pin_survives_join_until_owner_leaves() {
        let ring = ring_with(2, RingConfig::default());
        let owner = ring.locate(b"pinned").unwrap();
        assert!(ring.pin(b"pinned"));
        assert!(!ring.pin(b"pinned"));
        for i in 10..20 {
            ring.add(RingMember::new(format!("10.0.0.{i}:3478")));
            assert_eq!(ring.locate(b"pinned").as_ref(), Some(&owner));
        }
        ring.remove(&owner);
        assert!(!ring.is_pinned(b"pinned"));
        assert_ne!(ring.locate(b"pinned").as_ref(), Some(&owner));
    }

    #[test]
    fn test_reweight_redistributes_in_place() {
        let ring = ring_with(3, RingConfig::default());
        let target = RingMember::new("10.0.0.0:3478");
        assert!(ring.reweight(&target, 10));
        assert_eq!(ring.member_count(), 3);
        assert!(ring.contains(&target));
        let loads = ring.load_distribution();
        let total: f64 = loads.values().sum();
        assert_eq!(total, f64::from(crate::config::DEFAULT_PARTITION_COUNT));
        assert!(!ring.reweight(&RingMember::new("10.9.9.9:1"), 10));
    }

    #[test]
    fn test_remove_clears_tokens() {
        let ring = ring_with(3, RingConfig::with_replicas(8));
        let gone = RingMember::new("10.0.0.1:3478");
        assert!(ring.remove(&gone));
        assert!(!ring.remove(&gone));
        let state = ring.state.read();
        assert_eq!(state.sorted.len(), state.ring.len());
        assert!(state.ring.values().all(|o| *o != gone.key()));
        assert!(state.partitions.iter().all(|o| *o != gone.key()));
    }

    #[test]
    fn test_apply_config_redistributes() {
        let ring = ring_with(3, RingConfig::default());
        ring.apply_config(RingConfig {
            partition_count: 50,
            ..RingConfig::default()
        })
        .unwrap();
        assert_eq!(ring.config().partition_count, 50);
        let total: f64 = ring.load_distribution().values().sum();
        assert_eq!(total, 50.0);
    }
}
