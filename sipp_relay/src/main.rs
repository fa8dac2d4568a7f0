// CLI entry point for the Sipp chat relay.
//
// Starts a standalone relay that chat clients connect to. See `server.rs`
// for the networking architecture and `session.rs` for the per-connection
// protocol.
//
// Usage:
//   sipp-server [OPTIONS]
//     -p, --port <PORT>        Listen port (default: 5199)
//     --lock-file <PATH>       Refuse to start if PATH exists; hold it while
//                              running
//
// A `motd` file in the working directory, if present, is read once at
// startup and sent verbatim to every client that completes the handshake.
//
// Exit status: 1 on any startup failure (lock held, bind failure, unreadable
// MOTD), 0 after a graceful shutdown on SIGINT/SIGTERM.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use sipp_relay::lock::LockFile;
use sipp_relay::server::{DEFAULT_PORT, RelayConfig, start_relay};
use tracing_subscriber::EnvFilter;

/// File in the working directory holding the message of the day.
const MOTD_FILE: &str = "motd";

/// Sipp chat relay server
#[derive(Parser, Debug)]
#[command(name = "sipp-server")]
#[command(about = "Multi-client chat relay with broadcast and directed messages")]
struct Args {
    /// Port to bind to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Lock file guarding against a second instance
    #[arg(long)]
    lock_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sipp_relay=info,sipp_server=info")),
        )
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> sipp_relay::Result<()> {
    // Held until `run` returns; dropping it removes the file.
    let _lock = args.lock_file.as_deref().map(LockFile::acquire).transpose()?;

    let motd = load_motd(Path::new(MOTD_FILE))?;
    let config = RelayConfig {
        port: args.port,
        motd,
        ..RelayConfig::default()
    };

    signals::install();
    let (handle, addr) = start_relay(config)?;
    tracing::info!("Sipp server listening on {addr}");

    let signal = signals::wait();
    tracing::info!("received {signal}, shutting down");
    handle.stop();
    Ok(())
}

/// Read the MOTD if the file exists. A file that exists but cannot be read
/// is a startup error.
fn load_motd(path: &Path) -> sipp_relay::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(motd) => {
            tracing::info!(path = %path.display(), "loaded MOTD");
            Ok(Some(motd))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Termination signal handling: the handler only records which signal
/// arrived; the main thread polls for it.
#[cfg(unix)]
mod signals {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::thread;
    use std::time::Duration;

    static RECEIVED: AtomicI32 = AtomicI32::new(0);

    extern "C" fn record(signal: libc::c_int) {
        RECEIVED.store(signal, Ordering::SeqCst);
    }

    pub fn install() {
        let handler = record as extern "C" fn(libc::c_int) as libc::sighandler_t;
        for signal in [libc::SIGINT, libc::SIGTERM] {
            // SAFETY: `record` performs a single atomic store, which is
            // async-signal-safe, and never unwinds.
            let previous = unsafe { libc::signal(signal, handler) };
            if previous == libc::SIG_ERR {
                tracing::warn!(signal, "could not install signal handler");
            }
        }
    }

    /// Block until SIGINT or SIGTERM has been received.
    pub fn wait() -> &'static str {
        loop {
            let signal = RECEIVED.load(Ordering::SeqCst);
            if signal == libc::SIGINT {
                return "SIGINT";
            }
            if signal == libc::SIGTERM {
                return "SIGTERM";
            }
            thread::sleep(Duration::from_millis(100));
        }
    }
}

/// Without POSIX signals the process is simply killed; there is nothing to
/// wait for except that.
#[cfg(not(unix))]
mod signals {
    pub fn install() {}

    pub fn wait() -> &'static str {
        loop {
            std::thread::park();
        }
    }
}
