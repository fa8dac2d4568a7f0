// TCP client for connecting to a Sipp relay.
//
// Architecture:
// - `connect()` performs TCP connect + handshake on the calling thread, then
//   spawns a background reader thread.
// - The reader thread calls `read_line()` in a loop, deserializes
//   `ChatMessage`, and pushes into an `mpsc` channel exposed as `Inbox`.
// - The caller keeps a `ChatClient` holding a `BufWriter<TcpStream>` for
//   sending; writes flush synchronously (lines are small).
//
// `ChatClient` and `Inbox` are separate values so an interactive front end
// can block on stdin on one thread while printing incoming lines on
// another. Integration tests use the same pair with `recv_timeout`.

use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use sipp_protocol::framing::{read_line, write_line};
use sipp_protocol::message::{ChatMessage, HandshakeRequest, HandshakeResponse};

use crate::error::{RelayError, Result};

/// How long `connect` waits for the handshake response.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sending half of a relay connection.
pub struct ChatClient {
    writer: BufWriter<TcpStream>,
    _reader_thread: Option<JoinHandle<()>>,
}

/// Receiving half: every record the relay sends after the handshake.
pub struct Inbox {
    rx: Receiver<ChatMessage>,
}

impl ChatClient {
    /// Connect, send the handshake, and wait for the response. On success
    /// returns the client, its inbox, and the relay's welcome text.
    pub fn connect(addr: impl ToSocketAddrs, name: &str) -> Result<(Self, Inbox, String)> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;

        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);

        send_record(&mut writer, &HandshakeRequest::new(name))?;

        let line = read_line(&mut reader)?.ok_or(RelayError::ConnectionClosed)?;
        let response: HandshakeResponse = serde_json::from_str(&line)?;
        if !response.success {
            return Err(RelayError::HandshakeRejected {
                reason: response.message,
            });
        }

        // Clear the handshake timeout for the long-lived reader loop.
        reader.get_ref().set_read_timeout(None)?;

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::Builder::new()
            .name("sipp-client-reader".into())
            .spawn(move || reader_loop(reader, tx))?;

        Ok((
            Self {
                writer,
                _reader_thread: Some(reader_thread),
            },
            Inbox { rx },
            response.message,
        ))
    }

    /// Broadcast to everyone else.
    pub fn say(&mut self, content: &str) -> Result<()> {
        send_record(&mut self.writer, &ChatMessage::broadcast(content))
    }

    /// Send to one named client.
    pub fn whisper(&mut self, receiver: &str, content: &str) -> Result<()> {
        send_record(&mut self.writer, &ChatMessage::directed(receiver, content))
    }

    /// Send a command such as `/list`. The leading slash is added if missing.
    pub fn command(&mut self, command: &str) -> Result<()> {
        let line = if command.starts_with('/') {
            command.to_string()
        } else {
            format!("/{command}")
        };
        self.say(&line)
    }

    /// Ask the relay to drop the connection, then close our side.
    pub fn quit(mut self) -> Result<()> {
        self.command("/quit")?;
        self.writer.get_ref().shutdown(Shutdown::Write)?;
        Ok(())
    }
}

impl Inbox {
    /// Wait up to `timeout` for the next record. `None` on timeout or once
    /// the connection is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChatMessage> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Block until the next record; `None` once the connection is gone.
    pub fn recv(&self) -> Option<ChatMessage> {
        self.rx.recv().ok()
    }

    /// Drain all queued records (non-blocking).
    pub fn drain(&self) -> Vec<ChatMessage> {
        self.rx.try_iter().collect()
    }
}

/// Serialize a record to JSON and write it as one line.
fn send_record<T: serde::Serialize>(writer: &mut BufWriter<TcpStream>, record: &T) -> Result<()> {
    let json = serde_json::to_string(record)?;
    write_line(writer, &json)?;
    Ok(())
}

/// Reader thread: read lines in a loop, push records to the channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ChatMessage>) {
    while let Ok(Some(line)) = read_line(&mut reader) {
        match serde_json::from_str::<ChatMessage>(&line) {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break; // Inbox dropped.
                }
            }
            Err(e) => {
                tracing::warn!("ignoring malformed record from relay: {e}");
            }
        }
    }
}
