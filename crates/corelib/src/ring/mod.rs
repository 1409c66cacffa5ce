//! Consistent hash ring implementations.
//!
//! Two rings implement the same [`Locator`] contract:
//!
//! - [`HashRing`]: weighted virtual replicas, a key belongs to the first
//!   replica clockwise from `hash(key)`.
//! - [`PartitionedRing`]: keys hash into a fixed set of partitions and every
//!   partition is assigned clockwise subject to a per-member load bound.
//!
//! Everything above the ring (membership sync, balancer, router) talks to a
//! `dyn Locator`, so either ring can be used.

pub mod locator;
pub mod partitioned;
pub mod ring;

pub use locator::Locator;
pub use partitioned::PartitionedRing;
pub use ring::{HashRing, RingBuilder};

/// Alias for the main ring type (used by lib.rs).
pub type Ring = HashRing;
