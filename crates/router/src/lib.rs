//! Single-hop routing of permission checks to the node that owns them.
//!
//! The [`LocalRouter`] derives a routing key from each request, locates its
//! owner on the ring and either evaluates locally or forwards the request
//! once to the owner.

pub mod error;
pub mod key;
pub mod model;
pub mod router;
pub mod rpc;

pub use error::{BoxError, Result, RouterError};
pub use key::{hashed_routing_key, routing_key};
pub use model::{CheckMetadata, CheckRequest, CheckResponse, CheckResult, Entity, Subject};
pub use router::{LocalRouter, RouterConfig, DEFAULT_HOP_TIMEOUT};
pub use rpc::{Evaluator, PermissionClient, RpcClientFactory};
