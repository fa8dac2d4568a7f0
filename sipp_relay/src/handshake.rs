// Handshake validation.
//
// The first line on every connection must be a `HandshakeRequest` carrying
// the magic token and a non-empty client name. `validate` is pure: it turns
// that line into an outcome, and the session decides what to do with it.
// Whatever the outcome, its `response()` is written back before the relay
// reads anything else from the connection.

use sipp_protocol::message::{HANDSHAKE_MAGIC, HandshakeRequest, HandshakeResponse, INVALID_HANDSHAKE};

/// Result of checking a handshake line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Handshake {
    /// The client may proceed. `client` is the name as sent, before
    /// sanitizing; `message` is the welcome text to send back.
    Accepted { client: String, message: String },
    /// The connection must be closed after the response is flushed.
    Rejected { reason: String },
}

impl Handshake {
    /// The rejection sent for any first line that is not a valid greeting.
    pub fn invalid() -> Self {
        Self::Rejected {
            reason: INVALID_HANDSHAKE.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// The record to write back to the client.
    pub fn response(&self) -> HandshakeResponse {
        match self {
            Self::Accepted { message, .. } => HandshakeResponse {
                success: true,
                message: message.clone(),
            },
            Self::Rejected { reason } => HandshakeResponse {
                success: false,
                message: reason.clone(),
            },
        }
    }
}

/// Check the first line of a connection against the expected greeting.
pub fn validate(first_line: &str, welcome: &str) -> Handshake {
    let request: HandshakeRequest = match serde_json::from_str(first_line) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("unparseable handshake: {e}");
            return Handshake::invalid();
        }
    };

    if request.magic != HANDSHAKE_MAGIC || request.client.is_empty() {
        return Handshake::invalid();
    }

    Handshake::Accepted {
        client: request.client,
        message: welcome.into(),
    }
}
