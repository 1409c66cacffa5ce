//! Consistent-hash load balancing over a pool of backend connections.
//!
//! - [`Balancer`]: per-address connection state machine and picker regeneration
//! - [`RingPicker`]: per-request selection among the closest ring members
//! - [`DrainManager`]: keeps connections alive until routed requests finish
//! - [`PolicyRegistry`]: named balancer builders for service-config selection

pub mod balancer;
pub mod connection;
pub mod context;
pub mod drain;
pub mod error;
pub mod picker;
pub mod registry;
pub mod state;

pub use balancer::{Balancer, BalancerHandle, BalancerOptions};
pub use connection::{
    BackendConnection, ConnectionFactory, ConnectionHandle, ConnectionId, StateReporter, StateUpdate,
};
pub use context::{RequestContext, ROUTING_KEY};
pub use drain::{DrainManager, PickAssignment};
pub use error::{BalancerError, Result};
pub use picker::{ErrPicker, PickResult, Picker, RingPicker};
pub use registry::{BalancerBuilder, ConsistentHashBuilder, PolicyRegistry, RingKind, POLICY_NAME};
pub use state::ConnectivityState;
