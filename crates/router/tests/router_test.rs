//! Local-versus-forwarded routing with mock evaluator and RPC clients.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use corelib::{HashRing, Locator, RingMember};
use router::{
    routing_key, BoxError, CheckMetadata, CheckRequest, CheckResponse, Entity, Evaluator,
    LocalRouter, PermissionClient, RouterConfig, RouterError, RpcClientFactory, Subject,
};

const LOCAL: &str = "10.0.0.1:3478";
const REMOTE: &str = "10.0.0.2:3478";

// ============================================================================
// Mocks
// ============================================================================

#[derive(Default)]
struct CountingEvaluator {
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl Evaluator for CountingEvaluator {
    async fn check(&self, _request: &CheckRequest) -> Result<CheckResponse, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err("schema not found".into());
        }
        Ok(CheckResponse::allowed(1))
    }
}

#[derive(Default)]
struct MockClient {
    calls: AtomicUsize,
    closed: AtomicBool,
}

#[async_trait]
impl PermissionClient for MockClient {
    async fn check(&self, _request: &CheckRequest) -> Result<CheckResponse, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CheckResponse::denied(3))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct FailingClient;

#[async_trait]
impl PermissionClient for FailingClient {
    async fn check(&self, _request: &CheckRequest) -> Result<CheckResponse, BoxError> {
        Err("connection reset".into())
    }
}

struct SlowClient;

#[async_trait]
impl PermissionClient for SlowClient {
    async fn check(&self, _request: &CheckRequest) -> Result<CheckResponse, BoxError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(CheckResponse::allowed(1))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Healthy,
    Failing,
    Slow,
    Unreachable,
}

struct MockFactory {
    behaviour: Behaviour,
    connects: AtomicUsize,
    last: Mutex<Option<Arc<MockClient>>>,
}

impl MockFactory {
    fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            connects: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    fn last_client(&self) -> Arc<MockClient> {
        self.last.lock().unwrap().clone().expect("no client connected")
    }
}

#[async_trait]
impl RpcClientFactory for MockFactory {
    async fn connect(&self, address: &str) -> Result<Arc<dyn PermissionClient>, BoxError> {
        assert_eq!(address, REMOTE);
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Healthy => {
                let client = Arc::new(MockClient::default());
                *self.last.lock().unwrap() = Some(client.clone());
                Ok(client)
            }
            Behaviour::Failing => Ok(Arc::new(FailingClient)),
            Behaviour::Slow => Ok(Arc::new(SlowClient)),
            Behaviour::Unreachable => Err("connection refused".into()),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn request(i: usize) -> CheckRequest {
    CheckRequest {
        tenant_id: "t1".into(),
        metadata: CheckMetadata {
            schema_version: "v1".into(),
            snap_token: "snap".into(),
            depth: 20,
        },
        entity: Entity::new("document", i.to_string()),
        permission: "view".into(),
        subject: Subject::new("user", "alice"),
    }
}

fn two_node_ring() -> Arc<HashRing> {
    let ring = Arc::new(HashRing::new());
    ring.add(RingMember::new(LOCAL));
    ring.add(RingMember::new(REMOTE));
    ring
}

/// First request whose key is owned by `address`.
fn request_owned_by(ring: &HashRing, address: &str) -> CheckRequest {
    (0..10_000)
        .map(request)
        .find(|r| {
            ring.locate(routing_key(r).as_bytes())
                .is_some_and(|m| m.address == address)
        })
        .expect("no key owned by address")
}

fn build_router(
    ring: Arc<HashRing>,
    evaluator: Arc<CountingEvaluator>,
    factory: Arc<MockFactory>,
) -> LocalRouter {
    LocalRouter::new(ring, evaluator, factory, RouterConfig::new(LOCAL))
}

// ============================================================================
// Routing Tests
// ============================================================================

#[tokio::test]
async fn test_local_owner_uses_evaluator() {
    let ring = two_node_ring();
    let req = request_owned_by(&ring, LOCAL);
    let evaluator = Arc::new(CountingEvaluator::default());
    let factory = Arc::new(MockFactory::new(Behaviour::Healthy));
    let router = build_router(ring, evaluator.clone(), factory.clone());

    let resp = router.route(&req).await.unwrap();
    assert_eq!(resp, CheckResponse::allowed(1));
    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_remote_owner_is_forwarded_and_client_reused() {
    let ring = two_node_ring();
    let req = request_owned_by(&ring, REMOTE);
    let evaluator = Arc::new(CountingEvaluator::default());
    let factory = Arc::new(MockFactory::new(Behaviour::Healthy));
    let router = build_router(ring, evaluator.clone(), factory.clone());

    for _ in 0..3 {
        assert_eq!(router.route(&req).await.unwrap(), CheckResponse::denied(3));
    }
    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
    assert_eq!(factory.last_client().calls.load(Ordering::SeqCst), 3);
    assert_eq!(router.cached_clients(), 1);

    router.close().await;
    assert_eq!(router.cached_clients(), 0);
    assert!(factory.last_client().closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_forward_failure_is_surfaced_and_evicts_client() {
    let ring = two_node_ring();
    let req = request_owned_by(&ring, REMOTE);
    let evaluator = Arc::new(CountingEvaluator::default());
    let factory = Arc::new(MockFactory::new(Behaviour::Failing));
    let router = build_router(ring, evaluator.clone(), factory.clone());

    let err = router.route(&req).await.unwrap_err();
    assert!(matches!(err, RouterError::Forward { ref address, .. } if address == REMOTE));
    // No fallback to another member.
    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(router.cached_clients(), 0);

    router.route(&req).await.unwrap_err();
    assert_eq!(factory.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_owner() {
    let ring = two_node_ring();
    let req = request_owned_by(&ring, REMOTE);
    let router = build_router(
        ring,
        Arc::new(CountingEvaluator::default()),
        Arc::new(MockFactory::new(Behaviour::Unreachable)),
    );
    let err = router.route(&req).await.unwrap_err();
    assert!(err.to_string().contains(REMOTE));
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_slow_hop_times_out() {
    let ring = two_node_ring();
    let req = request_owned_by(&ring, REMOTE);
    let router = build_router(
        ring,
        Arc::new(CountingEvaluator::default()),
        Arc::new(MockFactory::new(Behaviour::Slow)),
    );
    let err = router.route(&req).await.unwrap_err();
    match err {
        RouterError::HopTimeout { address, timeout } => {
            assert_eq!(address, REMOTE);
            assert_eq!(timeout, Duration::from_secs(1));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(router.cached_clients(), 0);
}

#[tokio::test]
async fn test_empty_ring_has_no_owner() {
    let router = build_router(
        Arc::new(HashRing::new()),
        Arc::new(CountingEvaluator::default()),
        Arc::new(MockFactory::new(Behaviour::Healthy)),
    );
    let err = router.route(&request(1)).await.unwrap_err();
    assert!(matches!(err, RouterError::NoOwner { .. }));
}

#[tokio::test]
async fn test_evaluator_error() {
    let ring = two_node_ring();
    let req = request_owned_by(&ring, LOCAL);
    let evaluator = Arc::new(CountingEvaluator::default());
    evaluator.fail.store(true, Ordering::SeqCst);
    let router = build_router(ring, evaluator, Arc::new(MockFactory::new(Behaviour::Healthy)));
    assert!(matches!(
        router.route(&req).await.unwrap_err(),
        RouterError::Evaluator(_)
    ));
}

#[tokio::test]
async fn test_pin_keys_holds_owner_across_joins() {
    let ring = Arc::new(HashRing::new());
    ring.add(RingMember::new(LOCAL));
    let evaluator = Arc::new(CountingEvaluator::default());
    let router = LocalRouter::new(
        ring.clone(),
        evaluator.clone(),
        Arc::new(MockFactory::new(Behaviour::Healthy)),
        RouterConfig::new(LOCAL).with_pin_keys(true),
    );

    let requests: Vec<CheckRequest> = (0..50).map(request).collect();
    for req in &requests {
        router.route(req).await.unwrap();
        assert!(ring.is_pinned(routing_key(req).as_bytes()));
    }

    ring.add_with_weight(RingMember::new(REMOTE), 500);
    for req in &requests {
        router.route(req).await.unwrap();
    }
    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 100);
}
