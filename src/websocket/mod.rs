use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use uuid::Uuid;

use crate::metrics;

pub mod connection;
pub mod dispatch;
pub mod events;
pub mod message_types;

pub use connection::{ConnectionState, Scope};
pub use events::OutboundEvent;
pub use message_types::InboundFrame;

/// Unique identifier for one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

struct Connection {
    id: ConnectionId,
    sender: Sender<OutboundEvent>,
    /// `None` until the first subscribe
    scope: Option<Scope>,
}

/// Live connections keyed by user id
///
/// Only lifecycle steps (register, subscribe, unregister, forced close) mutate the map.
/// `publish` only reads it and evicts overflowing connections afterwards.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<Uuid, Vec<Connection>>>,
    buffer: usize,
}

impl ConnectionRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register an authenticated connection and hand back its bounded outbound queue
    pub fn register(&self, user_id: Uuid) -> (ConnectionId, Receiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = ConnectionId::new();

        self.inner.entry(user_id).or_default().push(Connection {
            id,
            sender,
            scope: None,
        });
        metrics::connection_opened();

        tracing::debug!(user_id = %user_id, connection_id = ?id, "connection registered");
        (id, receiver)
    }

    pub fn subscribe(&self, user_id: Uuid, connection_id: ConnectionId, scope: Scope) -> bool {
        let Some(mut connections) = self.inner.get_mut(&user_id) else {
            return false;
        };
        match connections.iter_mut().find(|c| c.id == connection_id) {
            Some(connection) => {
                connection.scope = Some(scope);
                true
            }
            None => false,
        }
    }

    /// Remove a connection; dropping its sender ends the connection's outbound stream
    pub fn unregister(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        let removed = match self.inner.get_mut(&user_id) {
            Some(mut connections) => {
                let before = connections.len();
                connections.retain(|c| c.id != connection_id);
                before != connections.len()
            }
            None => false,
        };

        self.inner.remove_if(&user_id, |_, connections| connections.is_empty());

        if removed {
            metrics::connection_closed();
            tracing::debug!(user_id = %user_id, connection_id = ?connection_id, "connection unregistered");
        }
        removed
    }

    /// Deliver one event to every subscribed connection of each recipient
    ///
    /// Never blocks. A persisted event that finds a full queue closes that connection;
    /// ephemeral events are dropped instead. Returns the number of deliveries.
    pub fn publish(&self, recipients: &[Uuid], conversation_id: Uuid, event: &OutboundEvent) -> usize {
        let mut delivered = 0;
        let mut evict = Vec::new();

        for user_id in recipients {
            let Some(connections) = self.inner.get(user_id) else {
                continue;
            };

            for connection in connections.iter() {
                let in_scope = connection
                    .scope
                    .as_ref()
                    .is_some_and(|scope| scope.covers(conversation_id));
                if !in_scope {
                    continue;
                }

                match connection.sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) if event.is_ephemeral() => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            user_id = %user_id,
                            connection_id = ?connection.id,
                            event = event.event_type(),
                            "outbound buffer full, closing connection"
                        );
                        metrics::record_backpressure_drop();
                        evict.push((*user_id, connection.id));
                    }
                    Err(TrySendError::Closed(_)) => evict.push((*user_id, connection.id)),
                }
            }
        }

        for (user_id, connection_id) in evict {
            self.unregister(user_id, connection_id);
        }
        delivered
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner.get(&user_id).map(|c| c.len()).unwrap_or(0)
    }
}
