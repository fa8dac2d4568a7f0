// Interactive terminal client for a Sipp relay.
//
// Usage:
//   sipp-client [--server HOST:PORT] [--name NAME]
//
// Reads lines from stdin. Plain text is broadcast; `@name text` is sent to
// one client; `/quit` leaves; any other `/command` (such as `/list`) is
// passed to the relay. Incoming records are printed by a separate thread so
// typing is never blocked by the network.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use sipp_protocol::message::ChatMessage;
use sipp_relay::client::ChatClient;
use tracing_subscriber::EnvFilter;

/// Sipp chat client
#[derive(Parser, Debug)]
#[command(name = "sipp-client")]
struct Args {
    /// Relay address
    #[arg(short, long, default_value = "127.0.0.1:5199")]
    server: String,

    /// Display name; prompted for when omitted
    #[arg(short, long)]
    name: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sipp-client: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> sipp_relay::Result<()> {
    let name = match args.name {
        Some(name) => name,
        None => prompt_name()?,
    };

    let (mut client, inbox, welcome) = ChatClient::connect(args.server.as_str(), &name)?;
    println!("{}", welcome.trim_end());

    thread::Builder::new()
        .name("sipp-client-printer".into())
        .spawn(move || {
            while let Some(msg) = inbox.recv() {
                println!("{}", format_message(&msg));
            }
            println!("Disconnected from server.");
            std::process::exit(0);
        })?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            return client.quit();
        }
        if let Some(rest) = line.strip_prefix('@') {
            match rest.split_once(' ') {
                Some((receiver, content)) if !receiver.is_empty() => {
                    client.whisper(receiver, content)?;
                }
                _ => eprintln!("usage: @name message"),
            }
        } else if line.starts_with('/') {
            client.command(line)?;
        } else {
            client.say(line)?;
        }
    }

    // stdin closed.
    client.quit()
}

fn prompt_name() -> io::Result<String> {
    print!("Enter your name: ");
    io::stdout().flush()?;
    let mut name = String::new();
    io::stdin().lock().read_line(&mut name)?;
    Ok(name.trim().to_string())
}

fn format_message(msg: &ChatMessage) -> String {
    if msg.is_notice() {
        format!("* {}", msg.content)
    } else if msg.is_broadcast() {
        format!("{}: {}", msg.sender, msg.content)
    } else {
        format!("[{} -> you] {}", msg.sender, msg.content)
    }
}
