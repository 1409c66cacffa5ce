//! The local router.

use std::sync::Arc;
use std::time::Duration;

use corelib::Locator;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::{Result, RouterError};
use crate::key::routing_key;
use crate::model::{CheckRequest, CheckResponse};
use crate::rpc::{Evaluator, PermissionClient, RpcClientFactory};

/// Upper bound on one forwarded call, connect included.
pub const DEFAULT_HOP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// This node's address as it appears on the ring (`ip:port`).
    pub local_address: String,
    pub hop_timeout: Duration,
    /// Pin every previously unseen routing key to its current owner before
    /// routing it.
    pub pin_keys: bool,
}

impl RouterConfig {
    pub fn new(local_address: impl Into<String>) -> Self {
        Self {
            local_address: local_address.into(),
            hop_timeout: DEFAULT_HOP_TIMEOUT,
            pin_keys: false,
        }
    }

    pub fn with_hop_timeout(mut self, timeout: Duration) -> Self {
        self.hop_timeout = timeout;
        self
    }

    pub fn with_pin_keys(mut self, pin_keys: bool) -> Self {
        self.pin_keys = pin_keys;
        self
    }
}

/// Serves a check locally when this node owns its routing key, and forwards
/// it exactly once otherwise.
///
/// A failed hop is returned to the caller as is; there is no retry against
/// another member.
pub struct LocalRouter {
    ring: Arc<dyn Locator>,
    evaluator: Arc<dyn Evaluator>,
    factory: Arc<dyn RpcClientFactory>,
    clients: DashMap<String, Arc<dyn PermissionClient>>,
    config: RouterConfig,
}

impl LocalRouter {
    pub fn new(
        ring: Arc<dyn Locator>,
        evaluator: Arc<dyn Evaluator>,
        factory: Arc<dyn RpcClientFactory>,
        config: RouterConfig,
    ) -> Self {
        Self {
            ring,
            evaluator,
            factory,
            clients: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Remote addresses with a cached client.
    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }

    pub async fn route(&self, request: &CheckRequest) -> Result<CheckResponse> {
        let key = routing_key(request);
        if self.config.pin_keys && !self.ring.is_pinned(key.as_bytes()) && self.ring.pin(key.as_bytes()) {
            info!(key = %key, "pinned routing key");
        }

        let Some(owner) = self.ring.locate(key.as_bytes()) else {
            return Err(RouterError::NoOwner { key });
        };

        if owner.address == self.config.local_address {
            metrics::counter!("router_local_checks_total").increment(1);
            return self
                .evaluator
                .check(request)
                .await
                .map_err(RouterError::Evaluator);
        }

        debug!(key = %key, owner = %owner.address, "forwarding check");
        metrics::counter!("router_forwarded_checks_total").increment(1);
        let result = self.forward(&owner.address, request).await;
        if result.is_err() {
            metrics::counter!("router_forward_failures_total").increment(1);
        }
        result
    }

    async fn forward(&self, address: &str, request: &CheckRequest) -> Result<CheckResponse> {
        let hop = async {
            let client = self.client(address).await?;
            client.check(request).await.map_err(|source| RouterError::Forward {
                address: address.to_string(),
                source,
            })
        };
        let result = match tokio::time::timeout(self.config.hop_timeout, hop).await {
            Ok(result) => result,
            Err(_) => Err(RouterError::HopTimeout {
                address: address.to_string(),
                timeout: self.config.hop_timeout,
            }),
        };
        if let Err(err) = &result {
            warn!(address, error = %err, "forwarded check failed, dropping client");
            self.evict(address).await;
        }
        result
    }

    async fn client(&self, address: &str) -> Result<Arc<dyn PermissionClient>> {
        if let Some(client) = self.clients.get(address).map(|c| Arc::clone(c.value())) {
            return Ok(client);
        }
        let client = self
            .factory
            .connect(address)
            .await
            .map_err(|source| RouterError::Forward {
                address: address.to_string(),
                source,
            })?;
        // Another task may have connected meanwhile; keep the first client.
        let client = self
            .clients
            .entry(address.to_string())
            .or_insert(client)
            .value()
            .clone();
        Ok(client)
    }

    async fn evict(&self, address: &str) {
        if let Some((_, client)) = self.clients.remove(address) {
            client.close().await;
        }
    }

    /// Closes every cached client.
    pub async fn close(&self) {
        let addresses: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        for address in addresses {
            self.evict(&address).await;
        }
    }
}
