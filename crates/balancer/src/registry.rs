//! Named balancer policies.
//!
//! An RPC runtime selects a balancer by policy name from its service config:
//!
//! ```text
//! {"loadBalancingConfig":[{"consistenthashpolicy":{"partitionCount":271,...}}]}
//! ```
//!
//! Builders are registered explicitly on a [`PolicyRegistry`] instance.

use std::collections::HashMap;
use std::sync::Arc;

use corelib::{HashRing, Locator, PartitionedRing, RingConfig};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::balancer::{Balancer, BalancerOptions};
use crate::connection::ConnectionFactory;
use crate::error::{BalancerError, Result};

/// Policy name of the consistent-hash balancer.
pub const POLICY_NAME: &str = "consistenthashpolicy";

/// Creates balancers for one policy.
pub trait BalancerBuilder: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Parses this policy's entry of a service config.
    fn parse_config(&self, raw: &Value) -> Result<RingConfig>;

    fn build(&self, factory: Arc<dyn ConnectionFactory>, config: RingConfig) -> Arc<Balancer>;
}

/// Which ring a consistent-hash balancer routes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RingKind {
    Weighted,
    /// Bounded-load partitions, driven by `partitionCount` and `load`.
    #[default]
    Partitioned,
}

#[derive(Debug, Clone, Default)]
pub struct ConsistentHashBuilder {
    options: BalancerOptions,
    ring: RingKind,
}

impl ConsistentHashBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: BalancerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_ring_kind(mut self, ring: RingKind) -> Self {
        self.ring = ring;
        self
    }
}

impl BalancerBuilder for ConsistentHashBuilder {
    fn name(&self) -> &str {
        POLICY_NAME
    }

    fn parse_config(&self, raw: &Value) -> Result<RingConfig> {
        let config: RingConfig = serde_json::from_value(raw.clone())
            .map_err(|e| BalancerError::Config(format!("unable to unmarshal {raw}: {e}")))?;
        Ok(config.normalized())
    }

    fn build(&self, factory: Arc<dyn ConnectionFactory>, config: RingConfig) -> Arc<Balancer> {
        let ring: Arc<dyn Locator> = match self.ring {
            RingKind::Weighted => Arc::new(HashRing::with_config(config)),
            RingKind::Partitioned => Arc::new(PartitionedRing::new(config)),
        };
        debug!(policy = POLICY_NAME, ring = ring.name(), ?config, "building balancer");
        Arc::new(Balancer::new(ring, factory, self.options))
    }
}

/// Name to builder table.
#[derive(Default)]
pub struct PolicyRegistry {
    builders: RwLock<HashMap<String, Arc<dyn BalancerBuilder>>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the consistent-hash policy registered.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(ConsistentHashBuilder::new()));
        registry
    }

    /// Registers `builder` under its name, returning any builder it replaced.
    pub fn register(&self, builder: Arc<dyn BalancerBuilder>) -> Option<Arc<dyn BalancerBuilder>> {
        let name = builder.name().to_string();
        self.builders.write().insert(name, builder)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BalancerBuilder>> {
        self.builders.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds a balancer from a service config, using the first
    /// `loadBalancingConfig` entry whose policy is registered.
    pub fn build_from_service_config(
        &self,
        service_config: &str,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Arc<Balancer>> {
        let value: Value = serde_json::from_str(service_config)
            .map_err(|e| BalancerError::Config(format!("invalid service config: {e}")))?;
        let entries = value
            .get("loadBalancingConfig")
            .and_then(Value::as_array)
            .ok_or_else(|| BalancerError::Config("missing loadBalancingConfig".into()))?;

        let mut requested = Vec::new();
        for entry in entries {
            let Some(object) = entry.as_object() else {
                continue;
            };
            for (name, raw) in object {
                if let Some(builder) = self.get(name) {
                    let config = builder.parse_config(raw)?;
                    return Ok(builder.build(factory, config));
                }
                requested.push(name.clone());
            }
        }
        Err(BalancerError::UnknownPolicy(requested.join(",")))
    }
}
