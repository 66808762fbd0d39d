//! End-to-end tests for zc-server over real loopback sockets.
//!
//! Each test starts a server on `127.0.0.1:0`, talks to it with a plain
//! `TcpStream` the way a browser would (HTTP upgrade, masked client frames)
//! and checks the exact bytes that come back.
//!
//! Covered:
//!
//! - handshake `101` with the correct accept key, and the echo of a text
//!   message back to its sender,
//! - relay between two connections on one stream, isolation across streams,
//! - `/health`, unknown paths, bad keys and oversized request heads,
//! - disconnecting a client that stops reading while its stream is busy,
//! - close initiated by the client, by the idle timeout and by shutdown.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use zc_core::protocol::frame::{encode_frame, encode_text_frame, Frame, Opcode};
use zc_core::protocol::handshake::compute_accept_key;
use zc_server::domain::ServerConfig;
use zc_server::infrastructure::serve;

const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ───────────────────────────────────────────────────────────────────

struct TestServer {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    task: JoinHandle<anyhow::Result<()>>,
}

async fn start_server(config: ServerConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let running = Arc::new(AtomicBool::new(true));
    let task = tokio::spawn(serve(listener, config, Arc::clone(&running)));
    TestServer {
        addr,
        running,
        task,
    }
}

fn upgrade_request(path: &str, key: &str) -> String {
    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

fn expected_101() -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        compute_accept_key(KEY)
    )
    .into_bytes()
}

/// Connects, upgrades onto `/ws/<stream>` and consumes the `101` response.
async fn open_ws(addr: SocketAddr, stream: &str) -> TcpStream {
    let mut sock = TcpStream::connect(addr).await.expect("connect");
    sock.write_all(upgrade_request(&format!("/ws/{stream}"), KEY).as_bytes())
        .await
        .unwrap();
    let expected = expected_101();
    let mut response = vec![0u8; expected.len()];
    timeout(WAIT, sock.read_exact(&mut response))
        .await
        .expect("101 in time")
        .expect("read 101");
    assert_eq!(
        String::from_utf8_lossy(&response),
        String::from_utf8_lossy(&expected)
    );
    sock
}

async fn send_text(sock: &mut TcpStream, text: &str) {
    let frame = encode_frame(&Frame::text(text).masked([0x37, 0xFA, 0x21, 0x3D]));
    sock.write_all(&frame).await.unwrap();
}

async fn read_exactly(sock: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(WAIT, sock.read_exact(&mut buf))
        .await
        .expect("bytes in time")
        .expect("read");
    buf
}

async fn read_to_eof(sock: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    timeout(WAIT, sock.read_to_end(&mut buf))
        .await
        .expect("EOF in time")
        .expect("read to end");
    buf
}

/// Sends a raw HTTP request on a fresh socket and returns the full response.
async fn http_exchange(addr: SocketAddr, request: &str) -> String {
    let mut sock = TcpStream::connect(addr).await.expect("connect");
    sock.write_all(request.as_bytes()).await.unwrap();
    String::from_utf8(read_to_eof(&mut sock).await).expect("utf-8 response")
}

async fn health(addr: SocketAddr) -> serde_json::Value {
    let response = http_exchange(addr, "GET /health HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let (_, body) = response.split_once("\r\n\r\n").expect("head/body split");
    serde_json::from_str(body).expect("health body is JSON")
}

/// Polls `/health` until the server has registered `n` connections.
async fn wait_for_connections(addr: SocketAddr, n: u64) {
    for _ in 0..100 {
        if health(addr).await["connections"] == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server never reached {n} connection(s)");
}

// ── Handshake and echo ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_text_message_is_echoed_to_sender() {
    // Arrange
    let server = start_server(ServerConfig::default()).await;
    let mut sock = open_ws(server.addr, "term-1").await;

    // Act
    send_text(&mut sock, "ping").await;

    // Assert: unmasked text frame 81 04 'p' 'i' 'n' 'g'
    let reply = read_exactly(&mut sock, 6).await;
    assert_eq!(reply, [0x81, 0x04, b'p', b'i', b'n', b'g']);
}

#[tokio::test]
async fn test_frame_pipelined_behind_request_head_is_processed() {
    let server = start_server(ServerConfig::default()).await;
    let mut sock = TcpStream::connect(server.addr).await.unwrap();

    let mut bytes = upgrade_request("/ws/pipe", KEY).into_bytes();
    bytes.extend(encode_frame(&Frame::text("early").masked([1, 2, 3, 4])));
    sock.write_all(&bytes).await.unwrap();

    let expected = expected_101();
    assert_eq!(read_exactly(&mut sock, expected.len()).await, expected);
    assert_eq!(
        read_exactly(&mut sock, 7).await,
        encode_text_frame("early")
    );
}

#[tokio::test]
async fn test_large_message_uses_extended_length() {
    let server = start_server(ServerConfig::default()).await;
    let mut sock = open_ws(server.addr, "big").await;
    let text = "z".repeat(70_000);

    send_text(&mut sock, &text).await;

    let expected = encode_text_frame(&text);
    assert_eq!(&expected[..2], &[0x81, 127]);
    assert_eq!(read_exactly(&mut sock, expected.len()).await, expected);
}

// ── Relay ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_message_relays_to_peer_on_same_stream_only() {
    // Arrange
    let server = start_server(ServerConfig::default()).await;
    let mut alice = open_ws(server.addr, "shared").await;
    let mut bob = open_ws(server.addr, "shared").await;
    let mut carol = open_ws(server.addr, "elsewhere").await;
    wait_for_connections(server.addr, 3).await;

    // Act
    send_text(&mut alice, "hello").await;

    // Assert
    let expected = encode_text_frame("hello");
    assert_eq!(read_exactly(&mut bob, expected.len()).await, expected);
    assert_eq!(read_exactly(&mut alice, expected.len()).await, expected);

    let mut byte = [0u8; 1];
    let nothing = timeout(Duration::from_millis(200), carol.read(&mut byte)).await;
    assert!(nothing.is_err(), "other stream must not receive the message");
}

// ── HTTP routes and refusals ──────────────────────────────────────────────────

#[tokio::test]
async fn test_health_reports_open_connections() {
    let server = start_server(ServerConfig::default()).await;
    let _a = open_ws(server.addr, "one").await;
    let _b = open_ws(server.addr, "two").await;
    wait_for_connections(server.addr, 2).await;

    let report = health(server.addr).await;

    assert_eq!(report["status"], "ok");
    assert_eq!(report["streams"], 2);
    assert_eq!(report["connections"], 2);
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let server = start_server(ServerConfig::default()).await;

    let response = http_exchange(server.addr, "GET /nope HTTP/1.1\r\nHost: x\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");
}

#[tokio::test]
async fn test_bad_key_is_400_and_socket_closes() {
    let server = start_server(ServerConfig::default()).await;

    let response = http_exchange(server.addr, &upgrade_request("/ws/x", "short")).await;

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
    assert_eq!(health(server.addr).await["connections"], 0);
}

#[tokio::test]
async fn test_missing_key_is_400() {
    let server = start_server(ServerConfig::default()).await;
    let request = "GET /ws/x HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\n\
                   Connection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\r\n";

    let response = http_exchange(server.addr, request).await;

    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");
}

#[tokio::test]
async fn test_oversized_request_head_is_431() {
    let server = start_server(ServerConfig {
        max_request_head: 512,
        ..ServerConfig::default()
    })
    .await;
    // Never terminated, so the server reads all of it before refusing.
    let request = format!("GET /ws/x HTTP/1.1\r\nX-Padding: {}", "p".repeat(650));

    let response = http_exchange(server.addr, &request).await;

    assert!(
        response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"),
        "{response}"
    );
}

#[tokio::test]
async fn test_complete_oversized_request_head_is_431() {
    let server = start_server(ServerConfig {
        max_request_head: 512,
        ..ServerConfig::default()
    })
    .await;
    // A well-formed upgrade, blank line included, that fits in one read.
    let request = upgrade_request("/ws/x", KEY).replace(
        "Host: localhost\r\n",
        &format!("Host: localhost\r\nX-Padding: {}\r\n", "p".repeat(400)),
    );
    assert!(request.len() > 512 && request.len() < 1024);

    let response = http_exchange(server.addr, &request).await;

    assert!(
        response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"),
        "{response}"
    );
}

// ── Backpressure ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_peer_that_stops_reading_is_disconnected() {
    // Arrange: two clients on one stream; `stalled` never reads a byte.
    let server = start_server(ServerConfig {
        max_send_queue_bytes: 256 * 1024,
        ..ServerConfig::default()
    })
    .await;
    let mut active = open_ws(server.addr, "flood").await;
    let _stalled = open_ws(server.addr, "flood").await;
    wait_for_connections(server.addr, 2).await;
    let text = "f".repeat(64 * 1024);
    let echo_len = encode_text_frame(&text).len();

    // Act: keep publishing, reading each echo, until the server gives up on
    // the stalled client.  Its socket buffers hold a few MiB at most.
    let mut disconnected = false;
    for sent in 1..=1000 {
        send_text(&mut active, &text).await;
        read_exactly(&mut active, echo_len).await;
        if sent % 16 == 0 && health(server.addr).await["connections"] == 1 {
            disconnected = true;
            break;
        }
    }

    // Assert
    assert!(disconnected, "stalled client was never disconnected");
    send_text(&mut active, "still here").await;
    assert_eq!(
        read_exactly(&mut active, 12).await,
        encode_text_frame("still here")
    );
}

// ── Close paths ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_client_close_gets_close_frame_then_eof() {
    // Arrange
    let server = start_server(ServerConfig::default()).await;
    let mut sock = open_ws(server.addr, "bye").await;

    // Act
    let close = encode_frame(&Frame {
        fin: true,
        opcode: Opcode::Close,
        mask_key: Some([9, 9, 9, 9]),
        payload: 1000u16.to_be_bytes().to_vec(),
    });
    sock.write_all(&close).await.unwrap();

    // Assert
    assert_eq!(read_to_eof(&mut sock).await, vec![0x88, 0x00]);
    wait_for_connections(server.addr, 0).await;
}

#[tokio::test]
async fn test_binary_frame_closes_connection() {
    let server = start_server(ServerConfig::default()).await;
    let mut sock = open_ws(server.addr, "bin").await;

    let binary = encode_frame(&Frame {
        fin: true,
        opcode: Opcode::Binary,
        mask_key: Some([1, 1, 1, 1]),
        payload: vec![0xDE, 0xAD],
    });
    sock.write_all(&binary).await.unwrap();

    assert_eq!(read_to_eof(&mut sock).await, vec![0x88, 0x00]);
}

#[tokio::test]
async fn test_payload_over_limit_closes_connection() {
    let server = start_server(ServerConfig {
        max_payload_len: 16,
        ..ServerConfig::default()
    })
    .await;
    let mut sock = open_ws(server.addr, "small").await;

    send_text(&mut sock, &"x".repeat(17)).await;

    assert_eq!(read_to_eof(&mut sock).await, vec![0x88, 0x00]);
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let server = start_server(ServerConfig {
        idle_timeout_secs: 1,
        ..ServerConfig::default()
    })
    .await;
    let mut sock = open_ws(server.addr, "idle").await;

    assert_eq!(read_to_eof(&mut sock).await, vec![0x88, 0x00]);
}

#[tokio::test]
async fn test_shutdown_closes_open_connections() {
    // Arrange
    let server = start_server(ServerConfig::default()).await;
    let mut sock = open_ws(server.addr, "stop").await;
    wait_for_connections(server.addr, 1).await;

    // Act
    server.running.store(false, Ordering::Relaxed);

    // Assert
    assert_eq!(read_to_eof(&mut sock).await, vec![0x88, 0x00]);
    let result = timeout(WAIT, server.task).await.expect("server stops in time");
    assert!(result.expect("server task joined").is_ok());
}
