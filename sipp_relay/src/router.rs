// Message router: one bounded queue, one dispatch thread.
//
// Every session thread submits `Envelope`s into a single `sync_channel`. A
// dedicated dispatch thread drains it strictly in arrival order and delivers
// each envelope through the registry:
//
// - no receiver: broadcast to every registered client except the origin;
// - a receiver name: deliver to the first client registered under that name,
//   or tell the origin the name is unknown.
//
// Because one thread drains one FIFO, two messages from the same sender reach
// every recipient in the order they were submitted, and cross-sender order is
// submission order.
//
// Backpressure: the queue is bounded. When it is full, `submit` blocks the
// calling session thread until the dispatcher catches up. Nothing is dropped.
//
// Delivery takes a registry snapshot (or a single lookup) and writes after
// the registry lock is released. A failed write (broken socket, or a client
// that stopped reading until the write timeout ran out) closes that client's
// connection: a timed-out write may have left half a line on the wire, and
// later writes would each stall the dispatcher again. Closing unblocks the
// client's session thread, which unregisters it and announces the leave.
// Other targets of the same envelope are unaffected.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use sipp_protocol::message::ChatMessage;

use crate::error::{RelayError, Result};
use crate::registry::{Client, ConnectionId, Registry};

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// A message in transit between a session and the dispatch thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Connection the message came from (or is about, for join/leave
    /// notices). Never receives its own broadcast.
    pub origin: ConnectionId,
    /// Display name stamped on the outbound record; empty for notices.
    pub sender: String,
    /// `None` for broadcast.
    pub receiver: Option<String>,
    pub content: String,
}

impl Envelope {
    pub fn broadcast(origin: ConnectionId, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            origin,
            sender: sender.into(),
            receiver: None,
            content: content.into(),
        }
    }

    pub fn directed(
        origin: ConnectionId,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            origin,
            sender: sender.into(),
            receiver: Some(receiver.into()),
            content: content.into(),
        }
    }

    /// Relay announcement to everyone except `about`.
    pub fn notice(about: ConnectionId, content: impl Into<String>) -> Self {
        Self::broadcast(about, sipp_protocol::message::RELAY_SENDER, content)
    }

    fn to_record(&self) -> ChatMessage {
        ChatMessage {
            sender: self.sender.clone(),
            receiver: self.receiver.clone().unwrap_or_default(),
            content: self.content.clone(),
        }
    }
}

enum Dispatch {
    Deliver(Envelope),
    Stop,
}

/// Producer side of the message queue. Cheap to share by reference; the
/// hub owns the only instance.
pub struct Router {
    tx: SyncSender<Dispatch>,
}

impl Router {
    /// Create the queue and start the dispatch thread.
    pub fn spawn(registry: Arc<Registry>, capacity: usize) -> Result<(Self, JoinHandle<()>)> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let handle = thread::Builder::new()
            .name("sipp-dispatch".into())
            .spawn(move || dispatch_loop(rx, registry))?;
        Ok((Self { tx }, handle))
    }

    /// Queue an envelope for delivery, blocking while the queue is full.
    pub fn submit(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(Dispatch::Deliver(envelope))
            .map_err(|_| RelayError::RouterClosed)
    }

    /// Ask the dispatch thread to exit once everything queued so far has
    /// been delivered.
    pub fn stop(&self) {
        if self.tx.send(Dispatch::Stop).is_err() {
            tracing::debug!("dispatch thread already gone");
        }
    }
}

fn dispatch_loop(rx: Receiver<Dispatch>, registry: Arc<Registry>) {
    tracing::debug!("dispatch loop started");
    for item in rx {
        match item {
            Dispatch::Deliver(envelope) => {
                route(&registry, &envelope);
            }
            Dispatch::Stop => break,
        }
    }
    tracing::debug!("dispatch loop stopped");
}

/// Deliver one envelope. Returns the number of successful writes.
pub fn route(registry: &Registry, envelope: &Envelope) -> usize {
    match &envelope.receiver {
        None => broadcast(registry, envelope),
        Some(name) => deliver_to(registry, envelope, name),
    }
}

fn broadcast(registry: &Registry, envelope: &Envelope) -> usize {
    let record = envelope.to_record();
    let mut delivered = 0;
    for client in registry.snapshot() {
        if client.id() == envelope.origin {
            continue;
        }
        if deliver(&client, &record) {
            delivered += 1;
        }
    }
    tracing::debug!(from = %envelope.origin, delivered, "broadcast");
    delivered
}

fn deliver_to(registry: &Registry, envelope: &Envelope, name: &str) -> usize {
    let Some(target) = registry.find_by_name(name) else {
        tracing::info!(from = %envelope.origin, to = name, "routing miss: no such user");
        notify_unknown_recipient(registry, envelope.origin, name);
        return 0;
    };

    usize::from(deliver(&target, &envelope.to_record()))
}

fn notify_unknown_recipient(registry: &Registry, origin: ConnectionId, name: &str) {
    let Some(sender) = registry.get(origin) else {
        return;
    };
    let notice = ChatMessage::notice(sender.name.clone(), format!("user not found: {name}"));
    deliver(&sender, &notice);
}

/// Write one record to one client, closing the client's connection if the
/// write fails. Returns whether the record was written.
fn deliver(client: &Client, record: &ChatMessage) -> bool {
    match client.connection.send(record) {
        Ok(()) => true,
        Err(RelayError::ConnectionClosed) => false,
        Err(e) => {
            tracing::warn!(to = %client.name, conn = %client.id(), "delivery failed, dropping client: {e}");
            client.connection.close();
            false
        }
    }
}
