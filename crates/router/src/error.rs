use std::time::Duration;

use thiserror::Error;

/// Errors from collaborators (evaluator, RPC transport) are carried opaquely.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Debug, Error)]
pub enum RouterError {
    /// The ring has no members.
    #[error("no node owns routing key {key:?}")]
    NoOwner { key: String },
    /// The remote hop failed.
    #[error("forwarding check to {address} failed")]
    Forward {
        address: String,
        #[source]
        source: BoxError,
    },
    /// The remote hop did not finish within the per-hop timeout.
    #[error("forwarding check to {address} timed out after {timeout:?}")]
    HopTimeout { address: String, timeout: Duration },
    /// The local evaluator failed.
    #[error("local check failed")]
    Evaluator(#[source] BoxError),
}
