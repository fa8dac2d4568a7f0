// The relay's shared service object.
//
// `Hub` owns everything the session threads share: the client registry, the
// router's queue, the welcome text, the connection timeouts, the connection
// id counter and the shutdown flag. `start_relay` builds exactly one and hands an `Arc<Hub>` to
// every session, so two relays in one process (as in the tests) never see
// each other's clients.
//
// Join and leave announcements go through the router like any other
// broadcast. That keeps them ordered with chat traffic: everything a client
// said before leaving is delivered before the "left" notice.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::connection::Connection;
use crate::error::Result;
use crate::registry::{Client, ConnectionId, Registry};
use crate::router::{Envelope, Router};

pub struct Hub {
    registry: Arc<Registry>,
    router: Router,
    welcome: String,
    handshake_timeout: Option<Duration>,
    write_timeout: Duration,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
}

impl Hub {
    pub fn new(
        registry: Arc<Registry>,
        router: Router,
        welcome: String,
        handshake_timeout: Option<Duration>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            router,
            welcome,
            handshake_timeout,
            write_timeout,
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Text sent in every successful handshake response.
    pub fn welcome(&self) -> &str {
        &self.welcome
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    /// Bound on each blocked write to a client socket.
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Add a client that passed the handshake and announce it to everyone
    /// else.
    pub fn register(&self, name: String, connection: Arc<Connection>) -> Result<Client> {
        let client = Client::new(name, connection);
        self.registry.add(client.clone())?;
        tracing::info!(conn = %client.id(), peer = client.peer(), name = %client.name, "client registered");
        self.router
            .submit(Envelope::notice(client.id(), format!("{} joined", client.name)))?;
        Ok(client)
    }

    /// Remove a client, close its connection and announce the departure.
    ///
    /// Safe to call from several paths for the same connection (read error,
    /// shutdown, explicit quit): only the call that actually removes the
    /// entry closes and announces. Returns whether this call did the work.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let Some(client) = self.registry.remove(id) else {
            return false;
        };
        client.connection.close();
        tracing::info!(conn = %id, name = %client.name, "client disconnected");
        if let Err(e) = self
            .router
            .submit(Envelope::notice(id, format!("{} left", client.name)))
        {
            tracing::debug!(conn = %id, "leave notice not sent: {e}");
        }
        true
    }

    /// Queue a client message for routing. Blocks while the queue is full.
    pub fn submit(&self, envelope: Envelope) -> Result<()> {
        self.router.submit(envelope)
    }

    /// Names of every registered client except `id`, in join order.
    pub fn client_names_except(&self, id: ConnectionId) -> Vec<String> {
        self.registry.names_except(id)
    }

    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Close every registered connection. Each session thread then sees EOF
    /// and runs its own cleanup.
    pub fn close_all(&self) -> usize {
        let clients = self.registry.snapshot();
        for client in &clients {
            client.connection.close();
        }
        clients.len()
    }

    /// Tell the dispatch thread to finish.
    pub fn stop_router(&self) {
        self.router.stop();
    }
}
