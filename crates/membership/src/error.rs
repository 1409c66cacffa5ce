use thiserror::Error;

pub type Result<T> = std::result::Result<T, MembershipError>;

/// Errors raised while synchronizing membership or leaving the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembershipError {
    /// Broadcasting our departure to peers failed.
    #[error("failed to leave gossip cluster: {0}")]
    Leave(String),
    /// Tearing down local gossip state failed.
    #[error("failed to shut down gossip: {0}")]
    Shutdown(String),
    /// Both halves of a graceful shutdown failed.
    #[error("failed to leave gossip cluster: {leave}; failed to shut down gossip: {shutdown}")]
    LeaveAndShutdown {
        leave: String,
        shutdown: String,
    },
    /// The sync task panicked or was cancelled.
    #[error("membership sync task failed: {0}")]
    Task(String),
    /// The provider was already shut down.
    #[error("gossip provider is closed")]
    Closed,
}
