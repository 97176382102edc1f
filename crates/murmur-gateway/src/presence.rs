use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use murmur_types::events::GatewayEvent;

/// How long a push waits for the connection's writer to report the frame
/// as written before giving up on it.
pub const PUSH_ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PushError {
    #[error("connection closed")]
    Disconnected,
    #[error("push not acknowledged within {0:?}")]
    Timeout(Duration),
}

/// An event queued for a connection's writer, with a slot for the writer to
/// report whether the frame reached the socket.
#[derive(Debug)]
pub struct Outbound {
    pub event: GatewayEvent,
    pub ack: oneshot::Sender<bool>,
}

impl Outbound {
    /// The pusher stopped waiting (timed out or went away). Writing the frame
    /// now would deliver an event the store never recorded as delivered.
    pub fn is_abandoned(&self) -> bool {
        self.ack.is_closed()
    }

    pub fn acknowledge(self, written: bool) {
        let _ = self.ack.send(written);
    }
}

/// Handle to one live connection. Clones refer to the same connection;
/// identity is the per-connection `conn_id`.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    user_id: Uuid,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle for a newly authenticated connection. The receiver is
    /// the connection's outbox, drained by its writer loop.
    pub fn new(user_id: Uuid) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            conn_id: Uuid::new_v4(),
            user_id,
            tx,
        };
        (handle, rx)
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        self.conn_id == other.conn_id
    }

    /// Best-effort push: succeeds only once the writer confirms the frame
    /// was written. Never retried.
    pub async fn push(&self, event: GatewayEvent) -> Result<(), PushError> {
        let (ack, written) = oneshot::channel();
        self.tx
            .send(Outbound { event, ack })
            .map_err(|_| PushError::Disconnected)?;

        match tokio::time::timeout(PUSH_ACK_TIMEOUT, written).await {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) | Ok(Err(_)) => Err(PushError::Disconnected),
            Err(_) => Err(PushError::Timeout(PUSH_ACK_TIMEOUT)),
        }
    }
}

/// Which users are online, and through which connection.
///
/// One slot per user: the last connection to register wins, and only the
/// connection currently holding the slot can clear it. The lock is never
/// held across an `.await`.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<HashMap<Uuid, ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `connection` in its user's slot, displacing (but not closing) any
    /// previous connection.
    pub fn register(&self, connection: ConnectionHandle) {
        let mut slots = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        slots.insert(connection.user_id, connection);
    }

    /// Clear the user's slot if `connection` still holds it. Returns whether
    /// anything was removed; a displaced connection's deregister is a no-op.
    pub fn deregister(&self, connection: &ConnectionHandle) -> bool {
        let mut slots = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match slots.get(&connection.user_id) {
            Some(current) if current.same_connection(connection) => {
                slots.remove(&connection.user_id);
                true
            }
            _ => false,
        }
    }

    pub fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&user_id)
            .cloned()
    }

    pub fn online_count(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
