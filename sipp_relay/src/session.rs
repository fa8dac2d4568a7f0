// Per-connection session: handshake, registration, read loop, cleanup.
//
// Every accepted connection gets its own thread running `run_session`. The
// thread owns the read half of the socket for the connection's whole life
// and walks it through a small state machine:
//
//   Connecting -> Handshaking -> Registered -> Closing -> Closed
//
// A rejected or unreadable handshake skips `Registered` and goes straight to
// `Closing`; such a connection is never added to the registry and never
// reaches the router.
//
// While registered, each line is one `ChatMessage` record. Its content is
// trimmed and HTML-escaped; lines starting with `/` are commands handled
// right here on the session thread (`/list` writes straight back to the
// requester without touching the router queue). Everything else becomes an
// `Envelope` for the router.
//
// Cleanup is tied to a `Registration` guard whose `Drop` calls
// `Hub::disconnect`, so removal from the registry and the "left" notice
// happen exactly once on every exit path, including a panic in this thread.

use std::io::BufReader;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use sipp_protocol::framing::read_frame;
use sipp_protocol::message::{COMMAND_PREFIX, ChatMessage};

use crate::connection::Connection;
use crate::error::Result;
use crate::handshake::{self, Handshake};
use crate::hub::Hub;
use crate::registry::{Client, ConnectionId};
use crate::router::Envelope;
use crate::text;

/// Lifecycle of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Registered,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Handshaking)
                | (Connecting, Closing)
                | (Handshaking, Registered)
                | (Handshaking, Closing)
                | (Registered, Closing)
                | (Closing, Closed)
        )
    }
}

/// A command line typed by a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// List every other registered client.
    List,
    /// Leave the relay.
    Quit,
    Unknown(String),
}

impl Command {
    /// Parse sanitized content. Returns `None` for ordinary chat text.
    pub fn parse(content: &str) -> Option<Self> {
        let rest = content.strip_prefix(COMMAND_PREFIX)?;
        let word = rest.split_whitespace().next().unwrap_or_default();
        Some(match word {
            "list" => Self::List,
            "quit" => Self::Quit,
            _ => Self::Unknown(content.to_string()),
        })
    }
}

/// What the read loop should do after handling one line.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Leave,
}

/// Removes the client from the hub when dropped.
struct Registration {
    hub: Arc<Hub>,
    id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.disconnect(self.id);
    }
}

struct Session {
    hub: Arc<Hub>,
    id: ConnectionId,
    peer: SocketAddr,
    state: ConnectionState,
}

impl Session {
    fn advance(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        tracing::debug!(conn = %self.id, from = ?self.state, to = ?next, "state change");
        self.state = next;
    }
}

/// Drive one accepted connection until it closes. Runs on its own thread.
pub fn run_session(hub: Arc<Hub>, stream: TcpStream, peer: SocketAddr) {
    let id = hub.next_connection_id();
    let mut session = Session {
        hub,
        id,
        peer,
        state: ConnectionState::Connecting,
    };
    if let Err(e) = drive(&mut session, stream) {
        tracing::warn!(conn = %id, %peer, "session ended with error: {e}");
    }
    if session.state != ConnectionState::Closing {
        session.advance(ConnectionState::Closing);
    }
    session.advance(ConnectionState::Closed);
}

fn drive(session: &mut Session, stream: TcpStream) -> Result<()> {
    let hub = Arc::clone(&session.hub);
    let id = session.id;
    let peer = session.peer;

    stream.set_read_timeout(hub.handshake_timeout())?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let connection = Arc::new(Connection::new(id, stream, hub.write_timeout())?);

    session.advance(ConnectionState::Handshaking);
    let first_line = match read_frame(&mut reader) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            tracing::info!(conn = %id, %peer, "closed before handshake");
            connection.close();
            session.advance(ConnectionState::Closing);
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(conn = %id, %peer, "handshake read failed: {e}");
            connection.close();
            session.advance(ConnectionState::Closing);
            return Ok(());
        }
    };

    let outcome = match String::from_utf8(first_line) {
        Ok(line) => handshake::validate(&line, hub.welcome()),
        Err(e) => {
            tracing::debug!(conn = %id, %peer, "handshake is not UTF-8: {e}");
            Handshake::invalid()
        }
    };
    connection.send(&outcome.response())?;
    let requested = match outcome {
        Handshake::Accepted { client, .. } => client,
        Handshake::Rejected { reason } => {
            tracing::info!(conn = %id, %peer, "handshake rejected: {reason}");
            connection.close();
            session.advance(ConnectionState::Closing);
            return Ok(());
        }
    };

    reader.get_ref().set_read_timeout(None)?;
    let name = text::display_name(&requested);
    // Guard first: if announcing the join fails after the registry insert,
    // the entry is still removed on the way out.
    let _registration = Registration {
        hub: Arc::clone(&hub),
        id,
    };
    let client = hub.register(name, Arc::clone(&connection))?;
    session.advance(ConnectionState::Registered);

    // A client that finished its handshake after shutdown's snapshot was
    // taken would otherwise never be closed.
    if hub.is_shutting_down() {
        session.advance(ConnectionState::Closing);
        return Ok(());
    }

    loop {
        let bytes = match read_frame(&mut reader) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(conn = %id, "peer closed connection");
                break;
            }
            Err(e) => {
                if !connection.is_closed() {
                    tracing::warn!(conn = %id, "read failed: {e}");
                }
                break;
            }
        };
        let Ok(line) = String::from_utf8(bytes) else {
            tracing::warn!(conn = %id, "dropping line that is not valid UTF-8");
            continue;
        };
        if handle_line(&hub, &client, &line)? == Flow::Leave {
            break;
        }
    }

    // `_registration` drops on return: removal, close and "left" notice.
    session.advance(ConnectionState::Closing);
    Ok(())
}

/// Interpret one line from a registered client.
fn handle_line(hub: &Hub, client: &Client, line: &str) -> Result<Flow> {
    let message: ChatMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(conn = %client.id(), "dropping malformed record: {e}");
            return Ok(Flow::Continue);
        }
    };

    let content = text::sanitize(&message.content);
    if content.is_empty() {
        return Ok(Flow::Continue);
    }

    if let Some(command) = Command::parse(&content) {
        return run_command(hub, client, command);
    }

    let receiver = text::sanitize(&message.receiver);
    let envelope = if receiver.is_empty() {
        Envelope::broadcast(client.id(), client.name.clone(), content)
    } else {
        Envelope::directed(client.id(), client.name.clone(), receiver, content)
    };
    hub.submit(envelope)?;
    Ok(Flow::Continue)
}

fn run_command(hub: &Hub, client: &Client, command: Command) -> Result<Flow> {
    tracing::debug!(conn = %client.id(), ?command, "command");
    match command {
        Command::List => {
            let replies: Vec<ChatMessage> = hub
                .client_names_except(client.id())
                .into_iter()
                .map(|name| ChatMessage::notice(client.name.clone(), name))
                .collect();
            client.connection.send_all(&replies)?;
            Ok(Flow::Continue)
        }
        Command::Quit => Ok(Flow::Leave),
        Command::Unknown(line) => {
            let reply = ChatMessage::notice(client.name.clone(), format!("unknown command: {line}"));
            client.connection.send(&reply)?;
            Ok(Flow::Continue)
        }
    }
}
