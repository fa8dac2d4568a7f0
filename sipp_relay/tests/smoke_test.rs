// Integration smoke tests for the relay server.
//
// Each test starts a relay on localhost with an OS-assigned port and talks to
// it over real TCP: either through `ChatClient` or, where the test needs to
// send something a well-behaved client never would, through a raw socket
// using the protocol crate's framing and records.
//
// Join notices are delivered asynchronously by the dispatch thread, so tests
// wait for registration (`wait_for_clients`) and skip notices they do not
// care about rather than asserting on exact interleavings.

use std::io::{BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use sipp_protocol::framing::{read_line, write_line};
use sipp_protocol::message::{ChatMessage, HandshakeRequest, HandshakeResponse, INVALID_HANDSHAKE};
use sipp_relay::client::{ChatClient, Inbox};
use sipp_relay::server::{DEFAULT_WELCOME, RelayConfig, RelayHandle, start_relay};
use sipp_relay::RelayError;

const TIMEOUT: Duration = Duration::from_secs(5);

fn local_config() -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..RelayConfig::default()
    }
}

fn start() -> (RelayHandle, SocketAddr) {
    start_relay(local_config()).unwrap()
}

/// Poll until exactly `count` clients are registered.
fn wait_for_clients(handle: &RelayHandle, count: usize) {
    let deadline = Instant::now() + TIMEOUT;
    while handle.client_count() != count {
        assert!(
            Instant::now() < deadline,
            "expected {count} clients, have {}",
            handle.client_count()
        );
        thread::sleep(Duration::from_millis(10));
    }
}

/// Connect through `ChatClient` and wait until the relay has registered us.
fn join(handle: &RelayHandle, addr: SocketAddr, name: &str) -> (ChatClient, Inbox) {
    let expected = handle.client_count() + 1;
    let (client, inbox, _welcome) = ChatClient::connect(addr, name).unwrap();
    wait_for_clients(handle, expected);
    (client, inbox)
}

/// Next record that is not a relay notice.
fn next_chat(inbox: &Inbox) -> ChatMessage {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let msg = inbox
            .recv_timeout(remaining)
            .expect("timed out waiting for a chat message");
        if !msg.is_notice() {
            return msg;
        }
    }
}

/// Skip records until a notice with exactly this content arrives.
fn wait_for_notice(inbox: &Inbox, content: &str) {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let msg = inbox
            .recv_timeout(remaining)
            .unwrap_or_else(|| panic!("timed out waiting for notice {content:?}"));
        if msg.is_notice() && msg.content == content {
            return;
        }
    }
}

/// True if nothing but notices arrives within a short window.
fn no_chat_pending(inbox: &Inbox) -> bool {
    thread::sleep(Duration::from_millis(100));
    inbox.drain().iter().all(ChatMessage::is_notice)
}

/// A raw socket with nothing sent yet.
fn raw_connect(addr: SocketAddr) -> (BufReader<TcpStream>, BufWriter<TcpStream>) {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    let reader = BufReader::new(stream.try_clone().unwrap());
    (reader, BufWriter::new(stream))
}

/// A raw socket with the handshake line already sent.
fn raw_handshake(addr: SocketAddr, first_line: &str) -> (BufReader<TcpStream>, BufWriter<TcpStream>) {
    let (reader, mut writer) = raw_connect(addr);
    write_line(&mut writer, first_line).unwrap();
    (reader, writer)
}

/// Write bytes that need not be UTF-8, as one line.
fn send_bytes(writer: &mut BufWriter<TcpStream>, line: &[u8]) {
    writer.write_all(line).unwrap();
    writer.write_all(b"\n").unwrap();
    writer.flush().unwrap();
}

fn read_response(reader: &mut BufReader<TcpStream>) -> HandshakeResponse {
    let line = read_line(reader).unwrap().expect("relay closed before responding");
    serde_json::from_str(&line).unwrap()
}

fn send_raw(writer: &mut BufWriter<TcpStream>, msg: &ChatMessage) {
    write_line(writer, &serde_json::to_string(msg).unwrap()).unwrap();
}

#[test]
fn handshake_returns_default_welcome() {
    let (handle, addr) = start();
    let (_client, _inbox, welcome) = ChatClient::connect(addr, "alice").unwrap();
    assert_eq!(welcome, DEFAULT_WELCOME);
    wait_for_clients(&handle, 1);
    handle.stop();
}

#[test]
fn handshake_returns_motd_verbatim() {
    let config = RelayConfig {
        motd: Some("Today: <b>tea</b>\nBe kind.\n".into()),
        ..local_config()
    };
    let (handle, addr) = start_relay(config).unwrap();
    let (_client, _inbox, welcome) = ChatClient::connect(addr, "alice").unwrap();
    assert_eq!(welcome, "Today: <b>tea</b>\nBe kind.\n");
    handle.stop();
}

#[test]
fn invalid_handshakes_are_rejected_and_closed() {
    let (handle, addr) = start();

    let wrong_magic = r#"{"magic":"HelloThere","client":"alice"}"#.to_string();
    let empty_client = serde_json::to_string(&HandshakeRequest::new("")).unwrap();
    let garbage = "hello relay".to_string();

    for first_line in [wrong_magic, empty_client, garbage] {
        let (mut reader, _writer) = raw_handshake(addr, &first_line);
        let response = read_response(&mut reader);
        assert!(!response.success, "accepted {first_line}");
        assert_eq!(response.message, INVALID_HANDSHAKE);
        // The relay closes right after the rejection.
        assert_eq!(read_line(&mut reader).unwrap(), None);
    }

    assert_eq!(handle.client_count(), 0);
    handle.stop();
}

#[test]
fn non_utf8_handshake_is_rejected_not_dropped() {
    let (handle, addr) = start();
    let (mut reader, mut writer) = raw_connect(addr);
    send_bytes(&mut writer, b"{\"magic\":\"\xff\xfe\",\"client\":\"a\"}");

    let response = read_response(&mut reader);
    assert!(!response.success);
    assert_eq!(response.message, INVALID_HANDSHAKE);
    assert_eq!(read_line(&mut reader).unwrap(), None);
    assert_eq!(handle.client_count(), 0);
    handle.stop();
}

#[test]
fn client_api_reports_rejection() {
    let (handle, addr) = start();
    match ChatClient::connect(addr, "") {
        Err(RelayError::HandshakeRejected { reason }) => assert_eq!(reason, INVALID_HANDSHAKE),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("empty name was accepted"),
    }
    handle.stop();
}

#[test]
fn broadcast_reaches_everyone_but_the_sender() {
    let (handle, addr) = start();
    let (_alice, alice_inbox) = join(&handle, addr, "alice");
    let (mut bob, bob_inbox) = join(&handle, addr, "bob");
    let (_carol, carol_inbox) = join(&handle, addr, "carol");

    bob.say("hi all").unwrap();

    for inbox in [&alice_inbox, &carol_inbox] {
        let msg = next_chat(inbox);
        assert_eq!(msg.sender, "bob");
        assert_eq!(msg.receiver, "");
        assert_eq!(msg.content, "hi all");
    }
    assert!(no_chat_pending(&bob_inbox));
    handle.stop();
}

#[test]
fn directed_message_reaches_only_the_recipient() {
    let (handle, addr) = start();
    let (mut alice, alice_inbox) = join(&handle, addr, "alice");
    let (_bob, bob_inbox) = join(&handle, addr, "bob");
    let (_carol, carol_inbox) = join(&handle, addr, "carol");

    alice.whisper("bob", "psst").unwrap();

    let msg = next_chat(&bob_inbox);
    assert_eq!(msg.sender, "alice");
    assert_eq!(msg.receiver, "bob");
    assert_eq!(msg.content, "psst");
    assert!(no_chat_pending(&carol_inbox));
    assert!(no_chat_pending(&alice_inbox));
    handle.stop();
}

#[test]
fn unknown_recipient_is_reported_to_the_sender() {
    let (handle, addr) = start();
    let (mut alice, alice_inbox) = join(&handle, addr, "alice");
    let (_bob, bob_inbox) = join(&handle, addr, "bob");

    alice.whisper("nobody", "hello?").unwrap();

    wait_for_notice(&alice_inbox, "user not found: nobody");
    assert!(no_chat_pending(&bob_inbox));
    handle.stop();
}

#[test]
fn list_names_the_other_clients_in_join_order() {
    let (handle, addr) = start();
    let (mut alice, alice_inbox) = join(&handle, addr, "alice");
    let (_bob, _bob_inbox) = join(&handle, addr, "bob");
    let (_carol, _carol_inbox) = join(&handle, addr, "carol");

    // Both join notices are queued ahead of anything the list reply could
    // race with.
    wait_for_notice(&alice_inbox, "bob joined");
    wait_for_notice(&alice_inbox, "carol joined");

    alice.command("list").unwrap();

    let names: Vec<String> = (0..2)
        .map(|_| {
            let msg = alice_inbox.recv_timeout(TIMEOUT).expect("list reply");
            assert!(msg.is_notice());
            assert_eq!(msg.receiver, "alice");
            msg.content
        })
        .collect();
    assert_eq!(names, ["bob", "carol"]);
    handle.stop();
}

#[test]
fn unknown_command_gets_a_notice() {
    let (handle, addr) = start();
    let (mut alice, alice_inbox) = join(&handle, addr, "alice");
    let (_bob, bob_inbox) = join(&handle, addr, "bob");

    alice.command("/dance").unwrap();

    wait_for_notice(&alice_inbox, "unknown command: /dance");
    assert!(no_chat_pending(&bob_inbox));
    handle.stop();
}

#[test]
fn names_are_escaped_and_blank_names_become_guest() {
    let (handle, addr) = start();
    let (_alice, alice_inbox) = join(&handle, addr, "alice");

    let (_guest, _guest_inbox) = join(&handle, addr, "   ");
    wait_for_notice(&alice_inbox, "Guest joined");

    let (mut tagged, _tagged_inbox) = join(&handle, addr, "  <b>bold</b> ");
    wait_for_notice(&alice_inbox, "&lt;b&gt;bold&lt;/b&gt; joined");

    tagged.say("x < y & \"z\"").unwrap();
    let msg = next_chat(&alice_inbox);
    assert_eq!(msg.sender, "&lt;b&gt;bold&lt;/b&gt;");
    assert_eq!(msg.content, "x &lt; y &amp; &#34;z&#34;");
    handle.stop();
}

#[test]
fn messages_from_one_sender_arrive_in_order() {
    let (handle, addr) = start();
    let (_alice, alice_inbox) = join(&handle, addr, "alice");
    let (mut bob, _bob_inbox) = join(&handle, addr, "bob");

    for i in 0..200 {
        bob.say(&format!("message {i}")).unwrap();
    }
    for i in 0..200 {
        assert_eq!(next_chat(&alice_inbox).content, format!("message {i}"));
    }
    handle.stop();
}

#[test]
fn relay_stamps_sender_and_drops_malformed_lines() {
    let (handle, addr) = start();
    let (_alice, alice_inbox) = join(&handle, addr, "alice");

    let hello = serde_json::to_string(&HandshakeRequest::new("mallory")).unwrap();
    let (mut reader, mut writer) = raw_handshake(addr, &hello);
    assert!(read_response(&mut reader).success);
    wait_for_clients(&handle, 2);

    write_line(&mut writer, "{not json").unwrap();
    write_line(&mut writer, r#"{"content":"   "}"#).unwrap();
    send_raw(
        &mut writer,
        &ChatMessage {
            sender: "alice".into(),
            receiver: String::new(),
            content: "still here".into(),
        },
    );

    let msg = next_chat(&alice_inbox);
    assert_eq!(msg.sender, "mallory");
    assert_eq!(msg.content, "still here");
    assert_eq!(handle.client_count(), 2);
    handle.stop();
}

#[test]
fn non_utf8_line_is_dropped_without_disconnecting() {
    let (handle, addr) = start();
    let (_alice, alice_inbox) = join(&handle, addr, "alice");

    let hello = serde_json::to_string(&HandshakeRequest::new("bob")).unwrap();
    let (mut reader, mut writer) = raw_handshake(addr, &hello);
    assert!(read_response(&mut reader).success);
    wait_for_clients(&handle, 2);
    wait_for_notice(&alice_inbox, "bob joined");

    send_bytes(&mut writer, b"{\"content\":\"\xff\"}");
    send_raw(&mut writer, &ChatMessage::broadcast("still here"));

    let msg = next_chat(&alice_inbox);
    assert_eq!(msg.sender, "bob");
    assert_eq!(msg.content, "still here");
    assert_eq!(handle.client_count(), 2);
    assert!(alice_inbox.drain().iter().all(|m| m.content != "bob left"));
    handle.stop();
}

#[test]
fn client_that_stops_reading_is_dropped_while_others_keep_receiving() {
    let config = RelayConfig {
        write_timeout: Duration::from_millis(200),
        ..local_config()
    };
    let (handle, addr) = start_relay(config).unwrap();
    let (mut alice, _alice_inbox) = join(&handle, addr, "alice");
    let (_carol, carol_inbox) = join(&handle, addr, "carol");

    // Completes the handshake, then never reads again.
    let hello = serde_json::to_string(&HandshakeRequest::new("stall")).unwrap();
    let (mut stall_reader, _stall_writer) = raw_handshake(addr, &hello);
    assert!(read_response(&mut stall_reader).success);
    wait_for_clients(&handle, 3);

    let big = "x".repeat(60 * 1024);
    let mut stall_left = false;
    let mut sent = 0;
    while !stall_left {
        assert!(sent < 1000, "stalled client was never dropped");
        alice.say(&big).unwrap();
        sent += 1;
        loop {
            let msg = carol_inbox.recv_timeout(TIMEOUT).expect("carol stopped receiving");
            if msg.is_notice() {
                stall_left |= msg.content == "stall left";
                continue;
            }
            assert_eq!(msg.content.len(), big.len());
            break;
        }
    }
    wait_for_clients(&handle, 2);

    // No more per-message stalls once the client is gone.
    let started = Instant::now();
    for i in 0..20 {
        alice.say(&format!("after {i}")).unwrap();
        assert_eq!(next_chat(&carol_inbox).content, format!("after {i}"));
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    handle.stop();
}

#[test]
fn quit_announces_departure_after_pending_messages() {
    let (handle, addr) = start();
    let (_alice, alice_inbox) = join(&handle, addr, "alice");
    let (mut bob, _bob_inbox) = join(&handle, addr, "bob");
    wait_for_notice(&alice_inbox, "bob joined");

    bob.say("bye").unwrap();
    bob.quit().unwrap();

    assert_eq!(next_chat(&alice_inbox).content, "bye");
    let left = alice_inbox.recv_timeout(TIMEOUT).expect("left notice");
    assert!(left.is_notice());
    assert_eq!(left.content, "bob left");
    wait_for_clients(&handle, 1);
    handle.stop();
}

#[test]
fn abrupt_disconnect_is_cleaned_up() {
    let (handle, addr) = start();
    let (_alice, alice_inbox) = join(&handle, addr, "alice");

    let hello = serde_json::to_string(&HandshakeRequest::new("bob")).unwrap();
    let (mut reader, writer) = raw_handshake(addr, &hello);
    assert!(read_response(&mut reader).success);
    wait_for_clients(&handle, 2);

    drop(writer);
    drop(reader);

    wait_for_notice(&alice_inbox, "bob left");
    wait_for_clients(&handle, 1);
    handle.stop();
}

#[test]
fn stop_disconnects_every_client() {
    let (handle, addr) = start();
    let (_alice, alice_inbox) = join(&handle, addr, "alice");
    let (_bob, bob_inbox) = join(&handle, addr, "bob");

    handle.stop();

    // The client reader thread ends at EOF, which disconnects the inbox, so
    // draining returns well before the timeout.
    for inbox in [&alice_inbox, &bob_inbox] {
        let started = Instant::now();
        while inbox.recv_timeout(TIMEOUT).is_some() {}
        assert!(started.elapsed() < TIMEOUT, "client still connected after stop");
    }
}
