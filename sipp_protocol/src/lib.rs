// sipp_protocol: wire protocol for the Sipp chat relay.
//
// This crate defines the records, framing, and serialization used by the
// relay (`sipp_relay`) and chat clients to talk over TCP. It is shared
// between both sides and does no networking of its own.
//
// Module overview:
// - `message.rs`:  Handshake request/response and the chat record, plus the
//                  protocol constants (magic token, rejection text).
// - `framing.rs`:  Newline-delimited framing over any `BufRead`/`Write`
//                  stream: one JSON object per line.
//
// Design decisions:
// - **JSON lines.** Human-readable and trivially testable with `nc`. A line
//   is the unit of both framing and handshake.
// - **Structured routing variant.** Post-handshake traffic is always a
//   `{sender, receiver, content}` record, never free text, so the same
//   stream can carry broadcasts, directed messages and relay notices.
// - **No async runtime.** Uses `std::io` traits, compatible with blocking
//   TCP streams and buffered wrappers.

pub mod framing;
pub mod message;

pub use framing::{MAX_LINE_SIZE, read_frame, read_line, write_line};
pub use message::{
    COMMAND_PREFIX, ChatMessage, HANDSHAKE_MAGIC, HandshakeRequest, HandshakeResponse,
    INVALID_HANDSHAKE, RELAY_SENDER,
};
