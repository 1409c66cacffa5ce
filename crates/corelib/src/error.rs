//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The ring has no members, so no key can be located.
    #[error("ring has no members")]
    EmptyRing,
    /// Invalid member description (empty address, zero weight where not allowed).
    #[error("invalid member: {0}")]
    InvalidMember(String),
    /// Invalid ring configuration.
    #[error("invalid ring config: {0}")]
    InvalidConfig(String),
    /// Partitions could not be spread without exceeding the load bound.
    #[error(
        "not enough capacity to distribute {partitions} partitions over {members} members \
         (max load {max_load})"
    )]
    InsufficientCapacity {
        /// Partition count being distributed.
        partitions: u64,
        /// Members available.
        members: usize,
        /// Per-member load ceiling that was exceeded.
        max_load: f64,
    },
}
