// sipp_relay: multi-client chat relay.
//
// The relay accepts TCP connections, checks a one-line JSON handshake,
// registers each client under a display name, and routes chat records
// either to everyone else (broadcast) or to one named client (directed). It
// stores nothing: when the process exits, every client and message is gone.
//
// Module overview:
// - `server.rs`:     TCP listener, `RelayConfig`, `start_relay`, and the
//                    `RelayHandle` used for graceful shutdown.
// - `session.rs`:    One thread per connection: handshake, registration,
//                    the read loop, commands, and guaranteed cleanup.
// - `handshake.rs`:  Pure validation of the first line.
// - `hub.rs`:        The shared service object (registry + router +
//                    settings) handed to every session.
// - `registry.rs`:   Mutex-protected map of registered clients, with
//                    snapshot-then-write access for delivery.
// - `router.rs`:     Bounded message queue and the single dispatch thread.
// - `connection.rs`: Per-connection write handle with its own output lock.
// - `text.rs`:       Trimming, HTML escaping and default names.
// - `lock.rs`:       Lock-file single-instance guard for the binary.
// - `client.rs`:     Blocking chat client used by `sipp-client` and tests.
// - `error.rs`:      `RelayError`.
//
// Dependencies: `sipp_protocol` (records and framing), `parking_lot` for the
// registry and output locks, `tracing` for logs, `thiserror` for errors.

pub mod client;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod hub;
pub mod lock;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod text;

pub use error::{RelayError, Result};
pub use server::{RelayConfig, RelayHandle, start_relay};
