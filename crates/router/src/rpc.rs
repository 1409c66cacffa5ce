//! Collaborators the router calls into.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxError;
use crate::model::{CheckRequest, CheckResponse};

/// Evaluates permission checks on this node.
#[async_trait]
pub trait Evaluator: Send + Sync + 'static {
    async fn check(&self, request: &CheckRequest) -> Result<CheckResponse, BoxError>;
}

/// A client for another node's permission service.
#[async_trait]
pub trait PermissionClient: Send + Sync + 'static {
    async fn check(&self, request: &CheckRequest) -> Result<CheckResponse, BoxError>;

    /// Releases the underlying connection.
    async fn close(&self) {}
}

/// Opens clients to remote nodes.
#[async_trait]
pub trait RpcClientFactory: Send + Sync + 'static {
    async fn connect(&self, address: &str) -> Result<Arc<dyn PermissionClient>, BoxError>;
}
