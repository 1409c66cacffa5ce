//! Request-scoped call context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

/// Metadata key the picker reads the routing key from.
pub const ROUTING_KEY: &str = "consistenthashkey";

/// What the picker knows about one call.
///
/// Clones share cancellation: cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    method: String,
    metadata: HashMap<String, Bytes>,
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl RequestContext {
    /// Context for a call to `method` (e.g. `/authz.v1.Permission/Check`).
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::default()
        }
    }

    pub fn with_routing_key(self, key: impl Into<Bytes>) -> Self {
        self.with_metadata(ROUTING_KEY, key)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn metadata(&self, key: &str) -> Option<&Bytes> {
        self.metadata.get(key)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Routing key under [`ROUTING_KEY`], falling back to the method name.
    pub fn routing_key(&self) -> Bytes {
        match self.metadata.get(ROUTING_KEY) {
            Some(key) => key.clone(),
            None => Bytes::copy_from_slice(self.method.as_bytes()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cancelled, or past its deadline at `now`.
    pub fn is_done_at(&self, now: Instant) -> bool {
        self.is_cancelled() || self.deadline.is_some_and(|d| now >= d)
    }

    pub fn is_done(&self) -> bool {
        self.is_done_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_key_falls_back_to_method() {
        let ctx = RequestContext::new("/authz.v1.Permission/Check");
        assert_eq!(ctx.routing_key(), Bytes::from_static(b"/authz.v1.Permission/Check"));
        let ctx = ctx.with_routing_key("abc");
        assert_eq!(ctx.routing_key(), Bytes::from_static(b"abc"));
    }

    #[test]
    fn test_cancel_is_shared() {
        let ctx = RequestContext::new("m");
        let clone = ctx.clone();
        assert!(!ctx.is_done());
        clone.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let ctx = RequestContext::new("m").with_timeout(Duration::from_secs(1));
        assert!(!ctx.is_done());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(ctx.is_done());
    }
}
