//! WebSocket server: accept loop and per-connection sessions.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Reading each client's HTTP request head and routing it
//!    (`/ws/<stream-id>`, `/health`, or `404`).
//! 3. Completing the WebSocket handshake through [`zc_core::Connection`].
//! 4. Running one session loop per connection that multiplexes socket
//!    reads, outbound relay commands and the idle deadline.
//! 5. Closing every open connection when the `running` flag is cleared.
//!
//! Each connection gets two Tokio tasks: the session task, which owns the
//! [`Connection`] and the socket's read half, and a writer task (see
//! [`super::socket`]) that owns the write half.  Nothing else writes to the
//! socket, so frames never interleave.
//!
//! Both queues in front of a socket are bounded (see
//! [`crate::application::registry`] and [`super::socket`]).  A client that
//! stops reading is disconnected rather than buffered for.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use zc_core::protocol::handshake::{reject_response, RequestHead};
use zc_core::{CloseReason, Connection, ConnectionEvent, HandshakeError};

use super::socket::{http_response, read_request_head, spawn_writer, ChannelSink, HeadReadError};
use crate::application::{outbox, ConnectionId, Outbound, StreamRegistry, StreamRelay};
use crate::domain::{route, Route, ServerConfig, StreamId};

/// How often the accept loop re-checks the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// How long shutdown waits for sessions to flush their close frames.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// How long a finished session waits for its writer to drain the socket.
const WRITER_GRACE: Duration = Duration::from_secs(2);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.bind_addr` and serves until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g. the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(config: ServerConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;

    serve(listener, config, running).await
}

/// Runs the accept loop on an already bound listener.
///
/// Split out from [`run_server`] so callers that bind port `0` can learn
/// the real address before serving.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn serve(
    listener: TcpListener,
    config: ServerConfig,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local_addr = listener
        .local_addr()
        .context("listener has no local address")?;
    info!("WebSocket server listening on {local_addr}");

    let config = Arc::new(config);
    let relay = StreamRelay::new(StreamRegistry::shared());

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let cfg = Arc::clone(&config);
                let relay = relay.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, cfg, relay).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. out of file descriptors); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    shut_down_sessions(&relay).await;
    Ok(())
}

/// Asks every open connection to close, then waits briefly for them to go.
async fn shut_down_sessions(relay: &StreamRelay) {
    let asked = relay.close_all().await;
    if asked == 0 {
        return;
    }
    info!("closing {asked} open connection(s)");

    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while Instant::now() < deadline {
        if relay.health().await.connections == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    warn!("shutdown grace period elapsed with connections still open");
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    relay: StreamRelay,
) {
    match run_connection(stream, peer_addr, config, relay).await {
        Ok(()) => debug!("session {peer_addr} finished"),
        Err(e) => warn!("session {peer_addr} ended with error: {e:#}"),
    }
}

/// Runs one client from its first byte to socket shutdown.
///
/// # Errors
///
/// Returns an error if the socket fails before the request head is read, or
/// if the connection cannot be registered.
async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ServerConfig>,
    relay: StreamRelay,
) -> anyhow::Result<()> {
    let session_id = peer_addr.to_string();
    let (mut read_half, write_half) = stream.into_split();
    let (mut sink, writer) = spawn_writer(
        write_half,
        session_id.clone(),
        config.max_send_queue_bytes,
    );

    // ── Step 1: Request head ─────────────────────────────────────────────────
    let mut buf = Vec::with_capacity(1024);
    let head_len = match read_request_head(&mut read_half, &mut buf, config.max_request_head).await
    {
        Ok(Some(n)) => n,
        Ok(None) => {
            debug!("session {session_id}: closed before completing a request");
            return finish_writer(sink, writer, &session_id).await;
        }
        Err(HeadReadError::Handshake(err)) => {
            return refuse(sink, writer, &session_id, &err).await;
        }
        Err(err @ HeadReadError::Io(_)) => {
            return Err(err).with_context(|| format!("session {session_id}: reading request head"));
        }
    };

    let head = match RequestHead::parse(&buf[..head_len]) {
        Ok(head) => head,
        Err(err) => return refuse(sink, writer, &session_id, &err).await,
    };

    // ── Step 2: Routing ──────────────────────────────────────────────────────
    let stream_id = match route(&head.path) {
        Route::Stream(id) => id,
        Route::Health => {
            let body = serde_json::to_string(&relay.health().await)
                .context("failed to serialize health report")?;
            debug!("session {session_id}: health check");
            sink.write_all(&http_response(200, "OK", "application/json", &body))?;
            return finish_writer(sink, writer, &session_id).await;
        }
        Route::NotFound => {
            info!("session {session_id}: no route for {} {}", head.method, head.path);
            sink.write_all(&http_response(404, "Not Found", "text/plain", "not found\n"))?;
            return finish_writer(sink, writer, &session_id).await;
        }
    };

    // ── Step 3: Handshake ────────────────────────────────────────────────────
    let mut conn = Connection::new(sink, config.limits());
    if let Err(err) = head.validate_upgrade() {
        warn!("session {session_id}: upgrade refused: {err}");
        conn.reject(&err);
        return join_writer(writer, &session_id).await;
    }
    if let Err(err) = conn.accept(head.websocket_key()) {
        warn!("session {session_id}: handshake failed: {err}");
        return join_writer(writer, &session_id).await;
    }

    // ── Step 4: Session loop ─────────────────────────────────────────────────
    let conn_id = Uuid::new_v4();
    let (outbox_tx, mut inbox) = outbox();
    if let Err(err) = relay.join(&stream_id, conn_id, outbox_tx).await {
        conn.close();
        join_writer(writer, &session_id).await?;
        return Err(err).context("failed to register connection");
    }
    info!("session {session_id}: connection {conn_id} open on stream {stream_id}");

    let ctx = SessionContext {
        session_id: &session_id,
        stream_id: &stream_id,
        conn_id,
        relay: &relay,
    };

    // The client may pipeline its first frames right behind the request head.
    let early = buf.split_off(head_len);
    let events = conn.receive(&early);
    ctx.dispatch(events, &mut conn, &mut inbox).await;

    let idle = config.idle_timeout();
    let mut deadline = idle.map(|d| Instant::now() + d);
    let mut read_buf = vec![0u8; 4096];

    while conn.is_open() {
        tokio::select! {
            read = read_half.read(&mut read_buf) => match read {
                Ok(0) => {
                    if let Some(event) = conn.socket_closed("peer closed the socket") {
                        ctx.dispatch(vec![event], &mut conn, &mut inbox).await;
                    }
                }
                Ok(n) => {
                    deadline = idle.map(|d| Instant::now() + d);
                    let events = conn.receive(&read_buf[..n]);
                    ctx.dispatch(events, &mut conn, &mut inbox).await;
                }
                Err(e) => {
                    if let Some(event) = conn.socket_closed(&e.to_string()) {
                        ctx.dispatch(vec![event], &mut conn, &mut inbox).await;
                    }
                }
            },
            command = inbox.recv() => match command {
                Some(command) => ctx.apply(command, &mut conn),
                None => {
                    debug!("session {session_id}: outbound queue closed");
                    conn.close();
                }
            },
            () = idle_deadline(deadline) => {
                info!("session {session_id}: idle timeout; closing");
                conn.close();
            }
        }
    }

    relay.leave(&stream_id, conn_id).await;
    drop(conn);
    join_writer(writer, &session_id).await
}

/// The parts of a session that event dispatch needs.
struct SessionContext<'a> {
    session_id: &'a str,
    stream_id: &'a StreamId,
    conn_id: ConnectionId,
    relay: &'a StreamRelay,
}

impl SessionContext<'_> {
    /// Publishes received text and logs the close, if any.
    ///
    /// The relay echoes to the sender too, so after each publish the
    /// session's own queue is drained straight into the socket.  A burst of
    /// small frames in one read would otherwise fill that queue before the
    /// session loop gets back to it.
    async fn dispatch(
        &self,
        events: Vec<ConnectionEvent>,
        conn: &mut Connection<ChannelSink>,
        inbox: &mut Receiver<Outbound>,
    ) {
        for event in events {
            match event {
                ConnectionEvent::Text(text) => {
                    self.relay
                        .publish(self.stream_id, self.conn_id, &text)
                        .await;
                    while let Ok(command) = inbox.try_recv() {
                        self.apply(command, conn);
                    }
                }
                ConnectionEvent::Closed(reason) => log_close(self.session_id, &reason),
            }
        }
    }

    fn apply(&self, command: Outbound, conn: &mut Connection<ChannelSink>) {
        match command {
            Outbound::Text(text) => {
                if let Err(e) = conn.send(&text) {
                    debug!("session {}: send failed: {e}", self.session_id);
                }
            }
            Outbound::Close => conn.close(),
        }
    }
}

fn log_close(session_id: &str, reason: &CloseReason) {
    match reason {
        CloseReason::Local => debug!("session {session_id}: closed locally"),
        CloseReason::PeerClosed { code } => {
            info!("session {session_id}: peer closed (code {code:?})");
        }
        CloseReason::Socket(detail) => info!("session {session_id}: socket closed: {detail}"),
        CloseReason::Protocol(err) => warn!("session {session_id}: protocol error: {err}"),
        CloseReason::Unsupported { opcode, fin } => {
            warn!("session {session_id}: unsupported frame {opcode:?} (fin={fin})");
        }
    }
}

/// Resolves at `deadline`, or never when there is none.
async fn idle_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Answers a request that cannot be served with its HTTP error status.
async fn refuse(
    mut sink: ChannelSink,
    writer: JoinHandle<()>,
    session_id: &str,
    err: &HandshakeError,
) -> anyhow::Result<()> {
    warn!("session {session_id}: refusing request: {err}");
    sink.write_all(&reject_response(err))?;
    finish_writer(sink, writer, session_id).await
}

async fn finish_writer(
    sink: ChannelSink,
    writer: JoinHandle<()>,
    session_id: &str,
) -> anyhow::Result<()> {
    drop(sink);
    join_writer(writer, session_id).await
}

/// Waits for the writer to flush, giving up on a peer that is not reading.
async fn join_writer(mut writer: JoinHandle<()>, session_id: &str) -> anyhow::Result<()> {
    match timeout(WRITER_GRACE, &mut writer).await {
        Ok(joined) => joined.context("socket writer task panicked"),
        Err(_) => {
            warn!("session {session_id}: writer still blocked after {WRITER_GRACE:?}; aborting");
            writer.abort();
            Ok(())
        }
    }
}
