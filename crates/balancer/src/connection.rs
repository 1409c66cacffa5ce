//! Backend connections and the hooks the pool drives them through.

use std::fmt;
use std::sync::Arc;

use corelib::RingMember;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::state::ConnectivityState;

/// Pool-assigned identity of one connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A transport-level connection owned by the pool.
///
/// Both calls must return promptly; progress is reported later through the
/// [`StateReporter`] the connection was created with.
pub trait BackendConnection: Send + Sync + 'static {
    /// Starts a connect attempt.
    fn connect(&self);

    /// Closes the connection. No state reports are expected afterwards.
    fn shutdown(&self);
}

/// Creates connections for newly discovered addresses.
pub trait ConnectionFactory: Send + Sync + 'static {
    fn create(&self, member: &RingMember, reporter: StateReporter) -> Result<Arc<dyn BackendConnection>>;
}

/// A connection as handed out by pickers.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    member: RingMember,
    conn: Arc<dyn BackendConnection>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: ConnectionId, member: RingMember, conn: Arc<dyn BackendConnection>) -> Self {
        Self { id, member, conn }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn member(&self) -> &RingMember {
        &self.member
    }

    pub fn address(&self) -> &str {
        &self.member.address
    }

    pub fn connection(&self) -> &Arc<dyn BackendConnection> {
        &self.conn
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("address", &self.member.address)
            .finish()
    }
}

/// A state transition reported by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub id: ConnectionId,
    pub state: ConnectivityState,
    /// Set on transitions into `TransientFailure`.
    pub error: Option<String>,
}

/// Sends state transitions of one connection to its pool.
///
/// Updates are applied in order by a single consumer task, so reporters may
/// be called from any thread.
#[derive(Debug, Clone)]
pub struct StateReporter {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<StateUpdate>,
}

impl StateReporter {
    pub(crate) fn new(id: ConnectionId, tx: mpsc::UnboundedSender<StateUpdate>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `false` once the pool has gone away.
    pub fn report(&self, state: ConnectivityState, error: Option<String>) -> bool {
        self.tx
            .send(StateUpdate {
                id: self.id,
                state,
                error,
            })
            .is_ok()
    }
}
