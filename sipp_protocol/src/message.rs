// Protocol records for client-relay communication.
//
// Three record types make up the full protocol vocabulary:
// - `HandshakeRequest`: the first line a client sends.
// - `HandshakeResponse`: the relay's single reply to that line.
// - `ChatMessage`: every line after the handshake, in both directions.
//
// All types derive `Serialize`/`Deserialize` and are sent as one JSON object
// per line (see `framing.rs`). Field names are part of the wire contract.
//
// A `ChatMessage` with an empty `receiver` is a broadcast. On outbound
// records an empty `sender` marks a notice generated by the relay itself
// (join/leave announcements, command replies, delivery failures); display
// names are never empty, so the two cannot be confused.

use serde::{Deserialize, Serialize};

/// Magic token every client must present in its handshake.
pub const HANDSHAKE_MAGIC: &str = "SippClientHello";

/// Message sent back on any rejected handshake.
pub const INVALID_HANDSHAKE: &str = "Invalid handshake";

/// Sender field used for relay-generated notices.
pub const RELAY_SENDER: &str = "";

/// Prefix marking a chat line as a local command rather than a message.
pub const COMMAND_PREFIX: char = '/';

/// First line sent by a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub magic: String,
    pub client: String,
}

impl HandshakeRequest {
    /// Build a well-formed greeting for the given client name.
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            magic: HANDSHAKE_MAGIC.into(),
            client: client.into(),
        }
    }
}

/// The relay's answer to a handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub success: bool,
    pub message: String,
}

/// A chat line after the handshake.
///
/// Missing fields default to empty strings, so a client may send just
/// `{"content":"hi"}` for a broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    pub sender: String,
    pub receiver: String,
    pub content: String,
}

impl ChatMessage {
    /// A broadcast from a client. The relay overwrites `sender` on receipt.
    pub fn broadcast(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// A message addressed to one named recipient.
    pub fn directed(receiver: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            receiver: receiver.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// A relay-generated notice. `receiver` is empty for announcements
    /// that go to everyone.
    pub fn notice(receiver: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: RELAY_SENDER.into(),
            receiver: receiver.into(),
            content: content.into(),
        }
    }

    /// True if this record was generated by the relay rather than a client.
    pub fn is_notice(&self) -> bool {
        self.sender == RELAY_SENDER
    }

    /// True if this record has no specific recipient.
    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_empty()
    }
}
