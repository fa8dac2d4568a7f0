// TCP listener and relay lifecycle.
//
// Architecture: thread-per-connection with one central dispatch thread.
//
// - **Accept thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and spawns a session thread for each. It never does
//   per-client work itself, so a slow handshake cannot hold up other
//   clients.
// - **Session threads** (one per client, see `session.rs`): handshake,
//   registration, then a blocking read loop feeding the router.
// - **Dispatch thread** (see `router.rs`): drains the bounded message queue
//   in arrival order and writes to the target connections.
//
// All three share one `Hub` (registry + router + settings) through an `Arc`.
//
// Shutdown: `RelayHandle::stop` sets the hub's shutdown flag. The accept
// thread polls a non-blocking listener and exits within one poll interval,
// dropping the listener. Then every registered connection is closed, which
// unblocks each session's read and lets it clean up after itself. Finally
// the dispatch thread is told to stop and joined.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::connection::DEFAULT_WRITE_TIMEOUT;
use crate::error::{RelayError, Result};
use crate::hub::Hub;
use crate::registry::Registry;
use crate::router::{DEFAULT_QUEUE_CAPACITY, Router};
use crate::session::run_session;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 5199;

/// Handshake text used when no MOTD is configured.
pub const DEFAULT_WELCOME: &str = "Welcome to Sipp!";

/// How long the accept loop sleeps when no connection is pending.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for starting a relay server.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    /// Port 0 lets the OS pick a free port.
    pub port: u16,
    /// Message of the day, sent verbatim in every successful handshake.
    pub motd: Option<String>,
    /// Capacity of the router queue. Producers block when it is full.
    pub queue_capacity: usize,
    /// How long a new connection may take to send its handshake line.
    /// `None` waits indefinitely.
    pub handshake_timeout: Option<Duration>,
    /// How long one write to a client may block. A client whose write fails
    /// is disconnected.
    pub write_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            motd: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            handshake_timeout: Some(Duration::from_secs(5)),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl RelayConfig {
    fn welcome(&self) -> String {
        match &self.motd {
            Some(motd) if !motd.is_empty() => motd.clone(),
            _ => DEFAULT_WELCOME.into(),
        }
    }
}

/// Handle returned by `start_relay` to control the running server.
pub struct RelayHandle {
    hub: Arc<Hub>,
    accept_thread: Option<JoinHandle<()>>,
    dispatch_thread: Option<JoinHandle<()>>,
}

impl RelayHandle {
    /// Number of clients currently registered.
    pub fn client_count(&self) -> usize {
        self.hub.client_count()
    }

    /// Signal the relay to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(accept_thread) = self.accept_thread.take() else {
            return;
        };
        tracing::info!("relay shutting down");
        self.hub.begin_shutdown();
        if accept_thread.join().is_err() {
            tracing::error!("accept thread panicked");
        }

        let closed = self.hub.close_all();
        tracing::info!(closed, "closed client connections");

        self.hub.stop_router();
        if let Some(dispatch_thread) = self.dispatch_thread.take() {
            if dispatch_thread.join().is_err() {
                tracing::error!("dispatch thread panicked");
            }
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start the relay on background threads. Returns a handle for stopping it
/// and the actual bound address (useful when port 0 is used to let the OS
/// pick a free port).
pub fn start_relay(config: RelayConfig) -> Result<(RelayHandle, SocketAddr)> {
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&bind_addr).map_err(|source| RelayError::Bind {
        addr: bind_addr.clone(),
        source,
    })?;
    let addr = listener.local_addr()?;
    // Non-blocking so the accept thread can check the shutdown flag.
    listener.set_nonblocking(true)?;

    let registry = Arc::new(Registry::new());
    let (router, dispatch_thread) = Router::spawn(Arc::clone(&registry), config.queue_capacity)?;
    let hub = Arc::new(Hub::new(
        registry,
        router,
        config.welcome(),
        config.handshake_timeout,
        config.write_timeout,
    ));

    let accept_hub = Arc::clone(&hub);
    let accept_thread = thread::Builder::new()
        .name("sipp-accept".into())
        .spawn(move || accept_loop(listener, accept_hub))?;

    tracing::info!(%addr, "relay listening");
    Ok((
        RelayHandle {
            hub,
            accept_thread: Some(accept_thread),
            dispatch_thread: Some(dispatch_thread),
        },
        addr,
    ))
}

/// Accept connections until shutdown. Transient errors are logged and the
/// loop keeps going.
fn accept_loop(listener: TcpListener, hub: Arc<Hub>) {
    while !hub.is_shutting_down() {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::info!(%peer, "client connected");
                spawn_session(&hub, stream, peer);
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    tracing::debug!("accept loop stopped");
}

fn spawn_session(hub: &Arc<Hub>, stream: TcpStream, peer: SocketAddr) {
    // Accepted sockets may inherit non-blocking mode from the listener.
    if let Err(e) = stream.set_nonblocking(false) {
        tracing::warn!(%peer, "could not make socket blocking: {e}");
        return;
    }
    let hub = Arc::clone(hub);
    let spawned = thread::Builder::new()
        .name(format!("sipp-session-{peer}"))
        .spawn(move || run_session(hub, stream, peer));
    if let Err(e) = spawned {
        tracing::error!(%peer, "could not start session thread: {e}");
    }
}
