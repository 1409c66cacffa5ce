//! Virtual node abstractions.
//!
//! # Virtual Nodes (VNodes) Concept
//!
//! Instead of each member having a single token on the ring, each member has
//! several tokens (virtual replicas). This provides:
//!
//! 1. **Better Load Distribution**: More tokens = smoother distribution of keys
//! 2. **Weighting**: A member with twice the weight gets twice the replicas
//! 3. **Gradual Rebalancing**: When members join/leave, only about `1/N` of keys move
//!
//! A ring entry can also be a *pin*: a single token placed at `hash(key)` for
//! one caller-supplied key, bound to whichever member owned that key when it
//! was pinned.

use crate::token::Token;
use std::fmt;

/// Why a token sits on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Replica `n` of the owning member, placed at `hash(member.key() + n)`.
    Replica(u32),
    /// A pinned key.
    Pinned,
}

/// A single entry on the hash ring.
///
/// # Invariants
///
/// - No two entries in one ring share a token
/// - Every entry belongs to exactly one member, identified by its key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualNode {
    /// Token position on the ring.
    pub token: Token,
    /// Key of the member that owns this entry.
    pub owner: String,
    pub slot: Slot,
}

impl VirtualNode {
    #[inline]
    pub fn replica(token: Token, owner: impl Into<String>, index: u32) -> Self {
        Self {
            token,
            owner: owner.into(),
            slot: Slot::Replica(index),
        }
    }

    #[inline]
    pub fn pinned(token: Token, owner: impl Into<String>) -> Self {
        Self {
            token,
            owner: owner.into(),
            slot: Slot::Pinned,
        }
    }

    /// Bytes hashed to place replica `index` of the member with key `owner`.
    ///
    /// The member key and the decimal index are concatenated without a
    /// separator, so every node in a cluster derives identical positions.
    pub fn replica_key(owner: &str, index: u32) -> String {
        format!("{}{}", owner, index)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.slot == Slot::Pinned
    }
}

impl fmt::Display for VirtualNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            Slot::Replica(i) => write!(f, "VNode(token={}, owner={}, replica={})", self.token, self.owner, i),
            Slot::Pinned => write!(f, "VNode(token={}, owner={}, pinned)", self.token, self.owner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_key_concatenates() {
        assert_eq!(VirtualNode::replica_key("10.0.0.1:3478", 7), "10.0.0.1:34787");
    }

    #[test]
    fn test_slot_kinds() {
        let r = VirtualNode::replica(Token(1), "a", 0);
        let p = VirtualNode::pinned(Token(2), "a");
        assert!(!r.is_pinned());
        assert!(p.is_pinned());
    }
}
