//! Error types for the balancer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BalancerError>;

/// Errors returned by pickers and the balancer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BalancerError {
    /// No usable connection exists for the request.
    #[error("no backend available")]
    NoBackendAvailable,
    /// Every connection is down; carries the last connection and resolver errors.
    #[error("all backends unavailable: {0}")]
    TransientFailure(String),
    /// The resolver produced an empty address set.
    #[error("bad resolver state: resolver produced zero addresses")]
    BadResolverState,
    /// The connection factory refused an address.
    #[error("failed to create connection to {address}: {reason}")]
    Connect {
        address: String,
        reason: String,
    },
    #[error("invalid balancer config: {0}")]
    Config(String),
    #[error("no balancer registered under policy {0:?}")]
    UnknownPolicy(String),
    #[error(transparent)]
    Ring(#[from] corelib::Error),
}

impl BalancerError {
    /// Whether the error means the request could not be routed anywhere.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            BalancerError::NoBackendAvailable | BalancerError::TransientFailure(_)
        )
    }
}

/// Combines the pool's last connection and resolver errors into one message.
pub(crate) fn merge_errors(connection: Option<&str>, resolver: Option<&str>) -> Option<String> {
    match (connection, resolver) {
        (None, None) => None,
        (Some(conn), None) => Some(format!("last connection error: {conn}")),
        (None, Some(res)) => Some(format!("last resolver error: {res}")),
        (Some(conn), Some(res)) => Some(format!(
            "last connection error: {conn}; last resolver error: {res}"
        )),
    }
}
