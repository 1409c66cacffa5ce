//! Ring configuration.
//!
//! A [`RingConfig`] is an immutable snapshot; applying a new one rebuilds the
//! ring from its current member set (see [`Locator::apply_config`]).
//!
//! [`Locator::apply_config`]: crate::ring::Locator::apply_config

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default number of partitions for the bounded-load ring.
pub const DEFAULT_PARTITION_COUNT: u32 = 271;
/// Default number of virtual replicas per member at full weight.
pub const DEFAULT_REPLICATION_FACTOR: u32 = 20;
/// Default maximum load factor for each member.
pub const DEFAULT_LOAD: f64 = 1.25;
/// Default number of candidates a picker chooses between.
pub const DEFAULT_PICKER_WIDTH: u32 = 1;
/// Weight that maps to exactly `replication_factor` replicas.
pub const TOP_WEIGHT: u32 = 100;

/// Partition / replica / load / candidate-width parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RingConfig {
    /// Partitions hashed onto members by the bounded-load ring.
    pub partition_count: u32,
    /// Virtual replicas for a member of weight [`TOP_WEIGHT`].
    pub replication_factor: u32,
    /// Bounded-load factor; a member may hold up to `load` times its fair share.
    pub load: f64,
    /// Distinct members a picker chooses between for one key.
    pub picker_width: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            partition_count: DEFAULT_PARTITION_COUNT,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            load: DEFAULT_LOAD,
            picker_width: DEFAULT_PICKER_WIDTH,
        }
    }
}

impl RingConfig {
    /// Config with a custom replica count and defaults elsewhere.
    pub fn with_replicas(replication_factor: u32) -> Self {
        Self {
            replication_factor,
            ..Self::default()
        }
    }

    /// Replaces zero / out-of-range fields with their defaults.
    pub fn normalized(mut self) -> Self {
        if self.partition_count == 0 {
            self.partition_count = DEFAULT_PARTITION_COUNT;
        }
        if self.replication_factor == 0 {
            self.replication_factor = DEFAULT_REPLICATION_FACTOR;
        }
        if !self.load.is_finite() || self.load <= 1.0 {
            self.load = DEFAULT_LOAD;
        }
        if self.picker_width == 0 {
            self.picker_width = DEFAULT_PICKER_WIDTH;
        }
        self
    }

    /// Parses a balancer config object such as
    /// `{"partitionCount":100,"replicationFactor":3,"load":1.25,"pickerWidth":2}`.
    ///
    /// Missing fields take defaults; the result is normalized.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: RingConfig = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidConfig(format!("unable to parse {raw:?}: {e}")))?;
        Ok(config.normalized())
    }

    /// Renders the RPC service config that selects `policy` with this config:
    /// `{"loadBalancingConfig":[{"<policy>":{...}}]}`.
    pub fn service_config_json(&self, policy: &str) -> Result<String> {
        let inner = serde_json::to_value(self.normalized())
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let mut entry = serde_json::Map::new();
        entry.insert(policy.to_string(), inner);
        let wrapper = serde_json::json!({
            "loadBalancingConfig": [serde_json::Value::Object(entry)]
        });
        serde_json::to_string(&wrapper).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Replica count for a member of the given weight.
    ///
    /// `replication_factor * weight / TOP_WEIGHT` with `weight` capped at
    /// [`TOP_WEIGHT`], so the result lies in `1..=replication_factor`.
    pub fn replicas_for_weight(&self, weight: u32) -> u32 {
        let weight = weight.min(TOP_WEIGHT);
        let replicas = u64::from(self.replication_factor) * u64::from(weight) / u64::from(TOP_WEIGHT);
        replicas.clamp(1, u64::from(self.replication_factor.max(1))) as u32
    }
}
