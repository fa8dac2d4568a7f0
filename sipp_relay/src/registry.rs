// Client registry: the set of connections that completed the handshake.
//
// The registry is the only structure mutated from many threads at once:
// session threads add and remove themselves, the dispatch thread and command
// handlers read from it. Every operation takes the single registry mutex for
// just the map operation. Network writes never happen under that lock;
// callers take a `snapshot()` (cheap `Arc` clones) and write afterwards, so a
// slow client cannot stall joins, leaves, or other deliveries.
//
// Keys are `ConnectionId`s handed out in increasing order, so iterating the
// `BTreeMap` visits clients in registration order. That makes
// `find_by_name` deterministic when display names collide: the earliest
// registration wins.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::Connection;
use crate::error::{RelayError, Result};

/// Relay-assigned identity of one accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered client.
#[derive(Clone, Debug)]
pub struct Client {
    pub name: String,
    pub connection: Arc<Connection>,
}

impl Client {
    pub fn new(name: impl Into<String>, connection: Arc<Connection>) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn peer(&self) -> &str {
        self.connection.peer()
    }
}

#[derive(Default)]
pub struct Registry {
    clients: Mutex<BTreeMap<ConnectionId, Client>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a client. A second insert under the same id is refused and
    /// leaves the existing entry untouched.
    pub fn add(&self, client: Client) -> Result<()> {
        let id = client.id();
        let mut clients = self.clients.lock();
        if clients.contains_key(&id) {
            return Err(RelayError::AlreadyRegistered(id));
        }
        clients.insert(id, client);
        Ok(())
    }

    /// Remove a client. Removing an absent id is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Client> {
        self.clients.lock().remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Client> {
        self.clients.lock().get(&id).cloned()
    }

    /// Point-in-time copy of every client, in registration order.
    pub fn snapshot(&self) -> Vec<Client> {
        self.clients.lock().values().cloned().collect()
    }

    /// First client (in registration order) with this display name.
    pub fn find_by_name(&self, name: &str) -> Option<Client> {
        self.clients
            .lock()
            .values()
            .find(|client| client.name == name)
            .cloned()
    }

    /// Display names of everyone except `id`, in registration order.
    pub fn names_except(&self, id: ConnectionId) -> Vec<String> {
        self.clients
            .lock()
            .values()
            .filter(|client| client.id() != id)
            .map(|client| client.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}
