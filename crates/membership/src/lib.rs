//! Keeps a consistent hash ring in step with gossip cluster membership.
//!
//! - [`MemberEvent`]: join / leave / failure / reap notifications
//! - [`GossipProvider`]: graceful departure from the gossip cluster
//! - [`ChannelGossip`]: in-process provider fed through a channel
//! - [`MembershipSync`]: the long-lived event loop that mutates the ring

pub mod error;
pub mod event;
pub mod provider;
pub mod sync;

pub use error::{MembershipError, Result};
pub use event::{EventKind, GossipMember, MemberEvent};
pub use provider::{ChannelGossip, GossipProvider};
pub use sync::{MembershipSync, SyncConfig, SyncHandle};
