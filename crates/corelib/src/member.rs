//! Ring members.
//!
//! A member is the logical identity of a cluster node as the ring sees it:
//! a network address plus an optional service name. Both the gossip layer and
//! the connection pool produce members; the ring only cares about
//! [`RingMember::key`].

use std::fmt;

/// Logical node participating in the ring.
///
/// Keep this struct small and cheap to clone; heavy mutable state (connections,
/// health, pick counters) lives in the balancer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RingMember {
    /// `host:port` the member serves permission checks on.
    pub address: String,
    /// Optional service name (TLS server name, resolver-provided label).
    pub service_name: Option<String>,
}

impl RingMember {
    /// Construct a member identified by its address alone.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            service_name: None,
        }
    }

    pub fn with_service_name(address: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            service_name: Some(service_name.into()),
        }
    }

    /// The string hashed to place this member's virtual replicas.
    ///
    /// `name|address` when a service name is present, otherwise the address.
    pub fn key(&self) -> String {
        match &self.service_name {
            Some(name) if !name.is_empty() => format!("{}|{}", name, self.address),
            _ => self.address.clone(),
        }
    }
}

impl fmt::Display for RingMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
