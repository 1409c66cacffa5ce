//! The connection pool and its picker.
//!
//! # State
//!
//! ```text
//! pool:   { member key -> SubConn { handle, state, marked } }
//! ids:    { ConnectionId -> member key }
//! picker: RingPicker over usable, unmarked connections | ErrPicker
//! ```
//!
//! Every mutation of `pool` happens under one mutex that is never held while
//! calling into a connection or mutating the ring. Picker regeneration and
//! ring membership updates are serialized by a second lock, always taken
//! before the pool mutex. State changes reported by connections go
//! through a channel and are applied by a single consumer task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use corelib::{Locator, RingConfig, RingMember};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::connection::{ConnectionFactory, ConnectionHandle, ConnectionId, StateReporter, StateUpdate};
use crate::context::RequestContext;
use crate::drain::DrainManager;
use crate::error::{merge_errors, BalancerError, Result};
use crate::picker::{ErrPicker, PickResult, Picker, RingPicker};
use crate::state::ConnectivityState;

/// Default lifetime of the shadow half of a pick assignment.
pub const DEFAULT_SHADOW_LIFETIME: Duration = Duration::from_secs(5);
/// Default pause of the drain worker when a pass retires nothing.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancerOptions {
    pub shadow_lifetime: Duration,
    pub drain_interval: Duration,
}

impl Default for BalancerOptions {
    fn default() -> Self {
        Self {
            shadow_lifetime: DEFAULT_SHADOW_LIFETIME,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
        }
    }
}

struct SubConn {
    handle: ConnectionHandle,
    state: ConnectivityState,
    /// Due for replacement once drained.
    marked: bool,
}

#[derive(Default)]
struct PoolState {
    conns: HashMap<String, SubConn>,
    ids: HashMap<ConnectionId, String>,
    next_id: u64,
    aggregate: ConnectivityState,
    last_connection_error: Option<String>,
    last_resolver_error: Option<String>,
}

impl PoolState {
    fn allocate_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }

    fn insert(&mut self, handle: ConnectionHandle) {
        let key = handle.member().key();
        self.ids.insert(handle.id(), key.clone());
        self.conns.insert(
            key,
            SubConn {
                handle,
                state: ConnectivityState::Idle,
                marked: false,
            },
        );
    }

    fn remove(&mut self, key: &str) -> Option<SubConn> {
        let sc = self.conns.remove(key)?;
        self.ids.remove(&sc.handle.id());
        Some(sc)
    }

    fn recompute_aggregate(&mut self) -> ConnectivityState {
        self.aggregate = ConnectivityState::aggregate(self.conns.values().map(|s| s.state));
        self.aggregate
    }

    fn unavailable_error(&self) -> BalancerError {
        match merge_errors(
            self.last_connection_error.as_deref(),
            self.last_resolver_error.as_deref(),
        ) {
            Some(msg) => BalancerError::TransientFailure(msg),
            None => BalancerError::NoBackendAvailable,
        }
    }
}

/// Consistent-hash load balancer over a set of backend connections.
pub struct Balancer {
    ring: Arc<dyn Locator>,
    factory: Arc<dyn ConnectionFactory>,
    options: BalancerOptions,
    pool: Mutex<PoolState>,
    picker: RwLock<Arc<dyn Picker>>,
    /// Serializes picker regeneration and ring membership updates.
    regen: Mutex<()>,
    drain: Arc<DrainManager>,
    updates_tx: mpsc::UnboundedSender<StateUpdate>,
    updates_rx: Mutex<Option<mpsc::UnboundedReceiver<StateUpdate>>>,
}

impl Balancer {
    /// Balancer that routes over `ring`. The ring's members are managed by
    /// the balancer and track its usable connections.
    pub fn new(ring: Arc<dyn Locator>, factory: Arc<dyn ConnectionFactory>, options: BalancerOptions) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            ring,
            factory,
            options,
            pool: Mutex::new(PoolState::default()),
            picker: RwLock::new(Arc::new(ErrPicker::new(BalancerError::NoBackendAvailable))),
            regen: Mutex::new(()),
            drain: Arc::new(DrainManager::new(options.shadow_lifetime)),
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
        }
    }

    pub fn ring(&self) -> &Arc<dyn Locator> {
        &self.ring
    }

    pub fn drain(&self) -> &Arc<DrainManager> {
        &self.drain
    }

    pub fn options(&self) -> BalancerOptions {
        self.options
    }

    /// Pool-wide connectivity state.
    pub fn state(&self) -> ConnectivityState {
        self.pool.lock().aggregate
    }

    pub fn connection(&self, member: &RingMember) -> Option<ConnectionHandle> {
        self.pool.lock().conns.get(&member.key()).map(|s| s.handle.clone())
    }

    pub fn connection_state(&self, member: &RingMember) -> Option<ConnectivityState> {
        self.pool.lock().conns.get(&member.key()).map(|s| s.state)
    }

    pub fn connection_count(&self) -> usize {
        self.pool.lock().conns.len()
    }

    /// The current picker.
    pub fn picker(&self) -> Arc<dyn Picker> {
        self.picker.read().clone()
    }

    pub fn pick(&self, ctx: &RequestContext) -> Result<PickResult> {
        self.picker().pick(ctx)
    }

    fn open(&self, id: ConnectionId, member: RingMember) -> Result<ConnectionHandle> {
        let reporter = StateReporter::new(id, self.updates_tx.clone());
        let conn = self.factory.create(&member, reporter)?;
        Ok(ConnectionHandle::new(id, member, conn))
    }

    /// Reconciles the pool with the resolver's address set.
    ///
    /// New addresses get an `Idle` connection and a connect attempt; vanished
    /// ones are shut down; the rest are left alone. An empty set shuts down
    /// every pooled connection and is then reported as a resolver error.
    pub fn update_address_set(&self, members: Vec<RingMember>) -> Result<()> {
        let empty = members.is_empty();
        let wanted: HashSet<String> = members.iter().map(RingMember::key).collect();
        let (added, removed) = {
            let mut pool = self.pool.lock();
            if !empty {
                pool.last_resolver_error = None;
            }
            let mut added: Vec<(ConnectionId, RingMember)> = Vec::new();
            for member in members {
                if !pool.conns.contains_key(&member.key()) {
                    added.push((pool.allocate_id(), member));
                }
            }
            let stale: Vec<String> = pool
                .conns
                .keys()
                .filter(|k| !wanted.contains(*k))
                .cloned()
                .collect();
            let removed: Vec<ConnectionHandle> = stale
                .iter()
                .filter_map(|k| pool.remove(k))
                .map(|sc| sc.handle)
                .collect();
            (added, removed)
        };

        for handle in &removed {
            debug!(address = handle.address(), conn = %handle.id(), "address removed, shutting down connection");
            handle.connection().shutdown();
        }

        let mut opened = Vec::with_capacity(added.len());
        for (id, member) in added {
            match self.open(id, member.clone()) {
                Ok(handle) => opened.push(handle),
                Err(err) => warn!(address = %member, error = %err, "failed to create connection"),
            }
        }
        {
            let mut pool = self.pool.lock();
            opened.retain(|handle| {
                if pool.conns.contains_key(&handle.member().key()) {
                    // Lost a race with a concurrent update.
                    handle.connection().shutdown();
                    return false;
                }
                pool.insert(handle.clone());
                true
            });
            pool.recompute_aggregate();
        }
        for handle in &opened {
            debug!(address = handle.address(), conn = %handle.id(), "new connection, requesting connect");
            handle.connection().connect();
        }

        if empty {
            // The pool is empty now, so this installs the failing picker.
            self.resolver_error(BalancerError::BadResolverState.to_string());
            return Err(BalancerError::BadResolverState);
        }
        self.regenerate_picker();
        Ok(())
    }

    /// Records a resolver failure. With nothing pooled, the balancer enters
    /// `TransientFailure` and every pick fails with the merged error.
    pub fn resolver_error(&self, err: impl Into<String>) {
        let err = err.into();
        let regenerate = {
            let mut pool = self.pool.lock();
            warn!(error = %err, "resolver error");
            pool.last_resolver_error = Some(err);
            if pool.conns.is_empty() {
                pool.aggregate = ConnectivityState::TransientFailure;
            }
            pool.aggregate == ConnectivityState::TransientFailure
        };
        if regenerate {
            self.regenerate_picker();
        }
    }

    /// Applies one connection state transition.
    pub fn handle_state_change(&self, update: StateUpdate) {
        let StateUpdate { id, state, error } = update;
        let (connect, regenerate) = {
            let mut pool = self.pool.lock();
            let Some(key) = pool.ids.get(&id).cloned() else {
                debug!(conn = %id, %state, "state change for unknown connection");
                return;
            };
            let Some(sc) = pool.conns.get_mut(&key) else {
                return;
            };
            let old = sc.state;
            if old == ConnectivityState::TransientFailure && state == ConnectivityState::Connecting {
                // Stay failed until the retry actually succeeds.
                return;
            }
            if old == state {
                return;
            }
            sc.state = state;
            trace!(conn = %id, address = %key, from = %old, to = %state, "connection state change");

            let mut connect = None;
            match state {
                ConnectivityState::Idle => connect = Some(sc.handle.clone()),
                ConnectivityState::Shutdown => {
                    pool.remove(&key);
                }
                ConnectivityState::TransientFailure => {
                    let err = error.unwrap_or_else(|| "connection failed".to_string());
                    debug!(conn = %id, address = %key, error = %err, "connection failed");
                    pool.last_connection_error = Some(err);
                }
                _ => {}
            }
            let aggregate = pool.recompute_aggregate();
            let significant = old.is_usable() != state.is_usable();
            (
                connect,
                significant || aggregate == ConnectivityState::TransientFailure,
            )
        };

        if let Some(handle) = connect {
            handle.connection().connect();
        }
        if regenerate {
            self.regenerate_picker();
        }
    }

    /// Applies queued state updates on the calling thread.
    ///
    /// Only usable before [`spawn`](Self::spawn) takes the update channel.
    pub fn apply_pending_updates(&self) -> usize {
        let mut applied = 0;
        loop {
            let update = {
                let mut rx = self.updates_rx.lock();
                match rx.as_mut().map(|rx| rx.try_recv()) {
                    Some(Ok(update)) => update,
                    _ => break,
                }
            };
            self.handle_state_change(update);
            applied += 1;
        }
        applied
    }

    /// Requests a connect on every idle connection.
    pub fn exit_idle(&self) {
        let idle: Vec<ConnectionHandle> = self
            .pool
            .lock()
            .conns
            .values()
            .filter(|s| s.state == ConnectivityState::Idle)
            .map(|s| s.handle.clone())
            .collect();
        for handle in idle {
            handle.connection().connect();
        }
    }

    /// Rebuilds the picker from the current usable, unmarked connections and
    /// brings the ring's membership in line with them.
    ///
    /// Regenerations are serialized, so the installed picker always reflects
    /// the latest pool snapshot. The pool mutex is released before the ring
    /// is touched.
    pub fn regenerate_picker(&self) {
        let _regen = self.regen.lock();
        let (usable, err) = {
            let mut pool = self.pool.lock();
            let usable: Vec<ConnectionHandle> = pool
                .conns
                .values()
                .filter(|s| s.state.is_usable() && !s.marked)
                .map(|s| s.handle.clone())
                .collect();
            let err = if usable.is_empty() {
                pool.aggregate = ConnectivityState::TransientFailure;
                Some(pool.unavailable_error())
            } else {
                None
            };
            (usable, err)
        };
        self.sync_ring(&usable);

        let picker: Arc<dyn Picker> = match err {
            Some(err) => {
                debug!(error = %err, "no usable connections, failing picks");
                Arc::new(ErrPicker::new(err))
            }
            None => {
                let width = self.ring.config().picker_width as usize;
                debug!(usable = usable.len(), width, "regenerated picker");
                Arc::new(RingPicker::new(
                    self.ring.clone(),
                    usable,
                    width,
                    self.drain.clone(),
                ))
            }
        };
        *self.picker.write() = picker;
    }

    /// Runs under the regeneration lock only.
    fn sync_ring(&self, usable: &[ConnectionHandle]) {
        let wanted: HashSet<String> = usable.iter().map(|h| h.member().key()).collect();
        for member in self.ring.members() {
            if !wanted.contains(&member.key()) {
                self.ring.remove(&member);
            }
        }
        for handle in usable {
            self.ring.add(handle.member().clone());
        }
    }

    /// Marks a connection for replacement. It stops receiving new picks and
    /// is rebuilt once every request already routed to it has drained.
    pub fn mark_for_replacement(&self, member: &RingMember) -> bool {
        {
            let mut pool = self.pool.lock();
            let Some(sc) = pool.conns.get_mut(&member.key()) else {
                return false;
            };
            if sc.marked {
                return false;
            }
            sc.marked = true;
            info!(address = %member, conn = %sc.handle.id(), "connection marked for replacement");
        }
        self.regenerate_picker();
        true
    }

    /// Replaces connection `id` with a fresh one to the same address.
    fn rebuild(&self, id: ConnectionId) {
        let (old, new_id) = {
            let mut pool = self.pool.lock();
            let Some(key) = pool.ids.get(&id).cloned() else {
                return;
            };
            let Some(sc) = pool.remove(&key) else {
                return;
            };
            (sc.handle, pool.allocate_id())
        };
        old.connection().shutdown();

        match self.open(new_id, old.member().clone()) {
            Ok(handle) => {
                let inserted = {
                    let mut pool = self.pool.lock();
                    if pool.conns.contains_key(&handle.member().key()) {
                        false
                    } else {
                        pool.insert(handle.clone());
                        pool.recompute_aggregate();
                        true
                    }
                };
                if inserted {
                    info!(address = handle.address(), old = %id, new = %new_id, "connection rebuilt");
                    metrics::counter!("balancer_connections_rebuilt_total").increment(1);
                    handle.connection().connect();
                } else {
                    handle.connection().shutdown();
                }
            }
            Err(err) => warn!(address = old.address(), error = %err, "failed to rebuild connection"),
        }
        self.regenerate_picker();
    }

    /// One drain pass: retires completed pick assignments, then rebuilds
    /// every marked connection with nothing outstanding.
    ///
    /// Returns how many assignments were retired.
    pub fn drain_tick(&self, now: Instant) -> usize {
        let (drained, retired) = self.drain.drain_round(now);
        if !drained.is_empty() {
            trace!(connections = drained.len(), "connections drained");
        }
        let marked: Vec<ConnectionId> = self
            .pool
            .lock()
            .conns
            .values()
            .filter(|s| s.marked)
            .map(|s| s.handle.id())
            .collect();
        for id in marked {
            if self.drain.outstanding(id) == 0 {
                self.rebuild(id);
            }
        }
        retired
    }

    /// Replaces the ring config and rebuilds the picker.
    pub fn update_config(&self, config: RingConfig) -> Result<()> {
        {
            let _regen = self.regen.lock();
            self.ring.apply_config(config)?;
        }
        self.regenerate_picker();
        Ok(())
    }

    /// Shuts every connection down and fails all further picks.
    pub fn close(&self) {
        let handles: Vec<ConnectionHandle> = {
            let mut pool = self.pool.lock();
            pool.ids.clear();
            pool.aggregate = ConnectivityState::Shutdown;
            pool.conns.drain().map(|(_, s)| s.handle).collect()
        };
        for handle in handles {
            handle.connection().shutdown();
        }
        let _regen = self.regen.lock();
        *self.picker.write() = Arc::new(ErrPicker::new(BalancerError::NoBackendAvailable));
    }

    /// Starts the state-update consumer and the drain worker.
    pub fn spawn(self: &Arc<Self>) -> BalancerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(2);
        if let Some(rx) = self.updates_rx.lock().take() {
            tasks.push(tokio::spawn(Arc::clone(self).consume_updates(rx, shutdown_rx.clone())));
        }
        tasks.push(tokio::spawn(Arc::clone(self).drain_loop(shutdown_rx)));
        BalancerHandle { shutdown_tx, tasks }
    }

    async fn consume_updates(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<StateUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                update = rx.recv() => match update {
                    Some(update) => self.handle_state_change(update),
                    None => break,
                },
            }
        }
        trace!("state update consumer stopped");
    }

    async fn drain_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            if self.drain_tick(Instant::now()) > 0 {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.options.drain_interval) => {}
            }
        }
        trace!("drain worker stopped");
    }
}

/// Handle to a balancer's background tasks.
pub struct BalancerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl BalancerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "balancer task failed");
            }
        }
    }
}
