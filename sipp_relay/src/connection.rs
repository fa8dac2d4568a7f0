// Shared write handle for one client connection.
//
// A `Connection` is created by the session thread that owns the socket and is
// shared (via `Arc`) with the registry, so the dispatch thread can deliver to
// it. Two threads may therefore write to the same socket: the session thread
// (handshake response, command replies) and the dispatch thread (routed
// messages). Every write goes through the per-connection `writer` mutex, so
// whole lines never interleave.
//
// Reading is not done here. The session thread keeps its own `BufReader` over
// a cloned stream; `close()` shuts the socket down in both directions, which
// is what unblocks that reader during shutdown.

use std::io::BufWriter;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sipp_protocol::framing::write_line;

use crate::error::{RelayError, Result};
use crate::registry::ConnectionId;

/// Default upper bound on a single blocked write. A write that hits it fails,
/// and the router closes the connection.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Connection {
    id: ConnectionId,
    peer: String,
    writer: Mutex<BufWriter<TcpStream>>,
    /// Second handle on the same socket, used only for `shutdown`.
    socket: TcpStream,
    closed: AtomicBool,
}

impl Connection {
    /// Wrap an accepted stream. The stream is cloned internally; the caller
    /// keeps its own clone for reading.
    pub fn new(id: ConnectionId, stream: TcpStream, write_timeout: Duration) -> Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".into());
        stream.set_write_timeout(Some(write_timeout))?;
        let socket = stream.try_clone()?;
        Ok(Self {
            id,
            peer,
            writer: Mutex::new(BufWriter::new(stream)),
            socket,
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, informational only.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Serialize one record and write it as a single line.
    pub fn send<T: Serialize>(&self, record: &T) -> Result<()> {
        self.send_all(std::slice::from_ref(record))
    }

    /// Write several records back to back while holding the write lock, so
    /// no routed message lands in the middle of them.
    pub fn send_all<T: Serialize>(&self, records: &[T]) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::ConnectionClosed);
        }
        let lines = records
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut writer = self.writer.lock();
        for line in &lines {
            write_line(&mut *writer, line)?;
        }
        Ok(())
    }

    /// Shut the socket down. Returns `true` only for the call that actually
    /// closed it; later calls are no-ops.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            // Already gone on the peer side; nothing left to release.
            tracing::debug!(conn = %self.id, "socket shutdown: {e}");
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
