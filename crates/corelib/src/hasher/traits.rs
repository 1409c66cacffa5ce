//! Core hasher trait definitions.

use crate::token::Token;

/// A hasher converts arbitrary bytes into a ring [`Token`].
///
/// Hashers are stateless and thread-safe, allowing concurrent token
/// generation without synchronization overhead. Every member of a cluster
/// must use the same hasher, otherwise nodes disagree on key ownership.
pub trait KeyHasher: Send + Sync + 'static {
    /// Hashes `key` onto the ring.
    fn hash(&self, key: &[u8]) -> Token;

    /// Returns the name of this hasher.
    fn name(&self) -> &'static str;
}
