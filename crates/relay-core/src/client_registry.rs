//! Registry of connected socket clients.
//!
//! The socket server owns each connection; the registry only holds the
//! connection's outbound channel so clients can be counted and closed
//! together at shutdown.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Opaque identity assigned to a connection when it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message queued for one connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A reply line.
    Text(String),
    /// Ask the writer to close the connection.
    Close,
}

pub type ClientSender = mpsc::UnboundedSender<Outbound>;

/// Concurrent mapping from connection identity to its outbound channel.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, ClientSender>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection. Returns the number of connected clients.
    pub fn add(&self, id: ClientId, sender: ClientSender) -> usize {
        self.clients.insert(id, sender);
        self.clients.len()
    }

    /// Removes exactly this connection. Returns true if it was registered.
    pub fn remove(&self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Sends a line to every connected client. Returns how many accepted it.
    pub fn broadcast(&self, text: &str) -> usize {
        self.snapshot()
            .into_iter()
            .filter(|(_, sender)| sender.send(Outbound::Text(text.to_string())).is_ok())
            .count()
    }

    /// Asks every client to close and empties the registry.
    ///
    /// Works on a snapshot so concurrent disconnects never race the iteration.
    pub fn close_all(&self) -> usize {
        let snapshot = self.snapshot();
        for (id, sender) in &snapshot {
            if sender.send(Outbound::Close).is_err() {
                warn!(client = %id, "Client writer already gone while closing");
            }
            self.clients.remove(id);
        }
        debug!("Closed {} socket client(s)", snapshot.len());
        snapshot.len()
    }

    fn snapshot(&self) -> Vec<(ClientId, ClientSender)> {
        self.clients
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}
