//! Core library for consistent-hash request routing.
//!
//! This crate provides the ring that assigns routing keys to cluster members:
//! - Tokens and pluggable key hashers
//! - Ring members, virtual replicas and pins
//! - The weighted [`HashRing`] and the bounded-load [`PartitionedRing`]
//! - Ring configuration and the administrative surface

pub mod admin;
pub mod config;
pub mod error;
pub mod hasher;
pub mod member;
pub mod ring;
pub mod token;
pub mod vnode;

pub use admin::{Assignment, RingAdmin, SetOutcome};
pub use config::{RingConfig, TOP_WEIGHT};
pub use error::{Error, Result};
pub use hasher::{KeyHasher, SipKeyHasher, Xxh3Hasher};
pub use member::RingMember;
pub use ring::{HashRing, Locator, PartitionedRing, Ring, RingBuilder};
pub use token::Token;
pub use vnode::{Slot, VirtualNode};
