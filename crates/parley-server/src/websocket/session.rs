//! One client's lifecycle, from upgrade through teardown.
//!
//! `Connecting → Identifying → Active → Closed`. Only sessions that reach
//! `Active` are registered, and only they produce join/leave notices.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use parley_core::{
    ClientMessage, ConnectionId, Envelope, RelayError, Result, RoomAction, SessionContext,
    transform,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::heartbeat::{Heartbeat, HeartbeatVerdict};
use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;
use crate::metrics::{
    CHAT_IDENTIFY_FAILURES_TOTAL, CHAT_MESSAGES_TOTAL, CHAT_SESSIONS_IDENTIFIED_TOTAL,
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Close code sent when the first message is not a valid `identify`.
pub const IDENTIFY_FAILED: u16 = 4001;
/// Close reason paired with [`IDENTIFY_FAILED`].
pub const IDENTIFY_FAILED_REASON: &str = "Required identification packet not provided";

/// Close reasons are limited to 123 bytes by RFC 6455.
const MAX_CLOSE_REASON: usize = 123;

/// How long a closing session waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, nothing read yet.
    Connecting,
    /// Waiting for the `identify` message.
    Identifying,
    /// Registered and relaying messages.
    Active,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Whether `self → next` is a legal move.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Identifying | Self::Closed)
                | (Self::Identifying, Self::Active | Self::Closed)
                | (Self::Active, Self::Closed)
        )
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Identifying => "identifying",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

/// What an inbound frame amounts to.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// A text payload (text frames and UTF-8 binary frames).
    Text(String),
    /// A data frame that cannot carry a client message.
    Invalid(String),
    /// Liveness only: ping or pong.
    Activity,
    /// The peer sent a close frame.
    Closed,
}

fn classify(msg: Message) -> Inbound {
    match msg {
        Message::Text(text) => Inbound::Text(text.as_str().to_owned()),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Inbound::Text(text),
            Err(_) => {
                debug!(len = data.len(), "non-UTF8 binary frame");
                Inbound::Invalid("binary frame is not valid UTF-8".into())
            }
        },
        Message::Ping(_) | Message::Pong(_) => Inbound::Activity,
        Message::Close(_) => Inbound::Closed,
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_owned();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_owned()
}

fn close_frame(code: u16, reason: &str) -> CloseFrame {
    CloseFrame {
        code,
        reason: truncate_reason(reason).into(),
    }
}

fn text_message(frame: &Arc<String>) -> Message {
    Message::Text(String::clone(frame).into())
}

/// Drives one connection through its lifecycle.
pub struct SessionHandler {
    conn_id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
    state: SessionState,
}

impl SessionHandler {
    /// Create a handler in `Connecting`. `shutdown` ends the session when
    /// cancelled.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        config: Arc<ServerConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            conn_id: ConnectionId::new(),
            registry,
            config,
            shutdown,
            state: SessionState::Connecting,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(from = self.state.as_str(), to = next.as_str(), "invalid session transition");
            return;
        }
        debug!(from = self.state.as_str(), to = next.as_str(), "session transition");
        self.state = next;
    }

    /// Run the session on an upgraded socket until it closes.
    #[instrument(skip_all, fields(conn_id = %self.conn_id))]
    pub async fn run(mut self, socket: WebSocket) {
        let started = Instant::now();
        info!("client connected");
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

        let (mut ws_tx, mut ws_rx) = socket.split();
        self.transition(SessionState::Identifying);

        match self.identify(&mut ws_rx).await {
            Ok(username) => self.serve(SessionContext::new(username), ws_tx, ws_rx).await,
            Err(err) => self.reject(&mut ws_tx, &err).await,
        }

        info!(elapsed = ?started.elapsed(), state = self.state().as_str(), "client disconnected");
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    }

    /// Wait for the identification message and return the username.
    ///
    /// Ping/pong frames are skipped. A dropped
    /// transport or server shutdown is [`RelayError::Disconnected`]; anything
    /// else that is not a valid `identify` (including the deadline passing)
    /// is a [`RelayError::ProtocolViolation`].
    async fn identify<R>(&self, ws_rx: &mut R) -> Result<String>
    where
        R: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
    {
        let deadline = tokio::time::sleep(self.config.identify_timeout());
        tokio::pin!(deadline);

        loop {
            let next = tokio::select! {
                next = ws_rx.next() => next,
                () = &mut deadline => {
                    return Err(RelayError::ProtocolViolation("identification timed out".into()));
                }
                () = self.shutdown.cancelled() => return Err(RelayError::Disconnected),
            };

            match next {
                Some(Ok(msg)) => match classify(msg) {
                    Inbound::Text(text) => {
                        return ClientMessage::parse(&text)
                            .map_err(|e| RelayError::ProtocolViolation(e.to_string()))?
                            .into_username();
                    }
                    Inbound::Invalid(reason) => return Err(RelayError::ProtocolViolation(reason)),
                    Inbound::Activity => {}
                    Inbound::Closed => return Err(RelayError::Disconnected),
                },
                Some(Err(_)) | None => return Err(RelayError::Disconnected),
            }
        }
    }

    /// Close a session that never identified. No registry access.
    async fn reject<W>(&mut self, ws_tx: &mut W, err: &RelayError)
    where
        W: Sink<Message> + Unpin,
    {
        let frame = if self.shutdown.is_cancelled() {
            Some(close_frame(close_code::AWAY, "server shutting down"))
        } else if err.is_expected() {
            debug!("disconnected before identifying");
            None
        } else {
            info!(error = %err, "identification failed");
            counter!(CHAT_IDENTIFY_FAILURES_TOTAL).increment(1);
            Some(close_frame(IDENTIFY_FAILED, IDENTIFY_FAILED_REASON))
        };

        if let Some(frame) = frame {
            let _ = ws_tx.send(Message::Close(Some(frame))).await;
        }
        self.transition(SessionState::Closed);
    }

    /// Register, relay until the connection ends, then unregister and
    /// announce the departure.
    async fn serve<W, R>(&mut self, ctx: SessionContext, ws_tx: W, mut ws_rx: R)
    where
        W: Sink<Message> + Unpin + Send + 'static,
        R: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
    {
        let (queue_tx, queue_rx) = mpsc::channel(self.config.send_queue_capacity);
        let conn = Arc::new(ClientConnection::new(
            self.conn_id.clone(),
            queue_tx,
            self.shutdown.child_token(),
        ));

        let _ = self.registry.register(ctx.username.clone(), Arc::clone(&conn));
        self.transition(SessionState::Active);
        counter!(CHAT_SESSIONS_IDENTIFIED_TOTAL).increment(1);
        info!(username = %ctx.username, usercolor = ctx.usercolor, "client identified");

        let (close_tx, close_rx) = oneshot::channel();
        let writer = tokio::spawn(write_loop(
            ws_tx,
            queue_rx,
            Arc::clone(&conn),
            self.config.heartbeat(),
            close_rx,
        ));

        self.announce(&Envelope::room(ctx.username.as_str(), RoomAction::Join));
        let close = self.relay(&mut ws_rx, &conn, &ctx).await;

        self.transition(SessionState::Closed);
        let removed = self.registry.unregister_connection(&ctx.username, &conn.id);
        conn.close();
        // A newer session under the same name keeps the room membership.
        if removed || !self.registry.contains(&ctx.username) {
            self.announce(&Envelope::room(ctx.username.as_str(), RoomAction::Leave));
        }

        match close {
            Some(frame) => {
                let abort = writer.abort_handle();
                let _ = close_tx.send(frame);
                if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                    debug!("writer did not drain in time");
                    abort.abort();
                }
            }
            None => writer.abort(),
        }
    }

    /// Active loop. Returns the close frame to send, if any.
    async fn relay<R>(
        &self,
        ws_rx: &mut R,
        conn: &ClientConnection,
        ctx: &SessionContext,
    ) -> Option<CloseFrame>
    where
        R: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
    {
        loop {
            let next = tokio::select! {
                next = ws_rx.next() => next,
                () = conn.closed() => {
                    if self.shutdown.is_cancelled() {
                        return Some(close_frame(close_code::AWAY, "server shutting down"));
                    }
                    debug!(username = %ctx.username, "connection closed by server");
                    return Some(close_frame(close_code::POLICY, "connection closed by server"));
                }
            };

            let parsed = match next {
                Some(Ok(msg)) => {
                    conn.mark_alive();
                    match classify(msg) {
                        Inbound::Text(text) => ClientMessage::parse(&text),
                        Inbound::Invalid(reason) => Err(RelayError::Malformed(reason)),
                        Inbound::Activity => continue,
                        Inbound::Closed => return None,
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "transport error");
                    return None;
                }
                None => return None,
            };

            match parsed.and_then(|msg| transform(&msg, ctx)) {
                Ok(envelope) => {
                    counter!(CHAT_MESSAGES_TOTAL).increment(1);
                    self.announce(&envelope);
                }
                Err(err) if err.is_fatal_to_session() => {
                    warn!(
                        username = %ctx.username,
                        kind = err.error_kind(),
                        error = %err,
                        "closing session"
                    );
                    return Some(close_frame(close_code::UNSUPPORTED, &err.to_string()));
                }
                Err(err) => {
                    warn!(
                        username = %ctx.username,
                        kind = err.error_kind(),
                        error = %err,
                        "message not relayed"
                    );
                }
            }
        }
    }

    fn announce(&self, envelope: &Envelope) {
        match self.registry.broadcast(envelope) {
            Ok(_) => {}
            Err(err) if err.is_expected() => {
                debug!(error = %err, message_type = envelope.message_type(), "broadcast skipped");
            }
            Err(err) => {
                warn!(error = %err, message_type = envelope.message_type(), "broadcast failed");
            }
        }
    }
}

/// Forward queued frames to the socket and keep the heartbeat.
///
/// Ends on a write error, a heartbeat timeout, or a close request; in every
/// case the connection is marked closed on exit.
async fn write_loop<W>(
    mut ws_tx: W,
    mut queue: mpsc::Receiver<Arc<String>>,
    conn: Arc<ClientConnection>,
    heartbeat: Heartbeat,
    mut close_rx: oneshot::Receiver<CloseFrame>,
) where
    W: Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval(heartbeat.interval);
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            close = &mut close_rx => {
                if let Ok(frame) = close {
                    while let Ok(text) = queue.try_recv() {
                        if ws_tx.send(text_message(&text)).await.is_err() {
                            break;
                        }
                    }
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                }
                break;
            }
            frame = queue.recv() => {
                let Some(text) = frame else { break };
                if ws_tx.send(text_message(&text)).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if heartbeat.tick(&conn) == HeartbeatVerdict::TimedOut {
                    warn!(conn_id = %conn.id, timeout = ?heartbeat.timeout, "client unresponsive, disconnecting");
                    break;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    conn.close();
}
