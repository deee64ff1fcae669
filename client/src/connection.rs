//! # Connection Manager
//!
//! Keeps one logical WebSocket channel to the backend available for the
//! whole life of a session. Handles:
//! - Connection establishment and auto-reconnect with exponential backoff
//! - Buffering outbound frames while the socket is down
//! - Keepalive pings and dead-socket detection
//! - Delivering inbound binary frames as [`ConnectionEvent`]s
//!
//! ## Lifecycle
//! ```text
//! Connecting ──▶ Open ──▶ Closed(reason) ──(backoff)──▶ Connecting ...
//!                              │
//!                       close() ──▶ Closed(Shutdown), no more events
//! ```
//!
//! The outbound queue outlives individual sockets: a frame queued while
//! `Connecting` is written once the next socket opens. When an open socket
//! drops, frames still queued are discarded along with the requests already
//! written, so nothing sent before a drop is answered after it.

use std::future;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{ClientConfig, Heartbeat, ReconnectPolicy};
use crate::error::SendError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─── State & Events ─────────────────────────────────────────────

/// Why the socket is (or was last) closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CloseReason {
    /// The connection attempt itself failed.
    ConnectFailed(String),

    /// The socket errored or ended without a close frame.
    Dropped(String),

    /// The backend sent a close frame.
    ServerClosed,

    /// Nothing arrived within the heartbeat timeout.
    HeartbeatTimeout,

    /// The session was closed locally.
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            CloseReason::Dropped(e) => write!(f, "dropped: {e}"),
            CloseReason::ServerClosed => f.write_str("closed by server"),
            CloseReason::HeartbeatTimeout => f.write_str("heartbeat timed out"),
            CloseReason::Shutdown => f.write_str("shut down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed(CloseReason),
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// What the connection reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A socket was established.
    Opened,

    /// One inbound binary frame.
    Frame(Bytes),

    /// A previously open socket went away; a reconnect follows.
    Dropped(CloseReason),
}

// ─── Handle ─────────────────────────────────────────────────────

/// Cloneable handle for sending frames and observing the connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::Sender<Vec<u8>>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Queues one outbound frame.
    ///
    /// Frames queued while the socket is down are written after it opens.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), SendError> {
        if self.shutdown.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Resolves once the connection reaches a state matching `pred`.
    ///
    /// Returns `None` if the connection task is gone.
    pub async fn wait_for(
        &self,
        pred: impl FnMut(&ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        let mut state = self.state.clone();
        let reached = state.wait_for(pred).await.ok().map(|s| s.clone());
        reached
    }

    /// Tears the socket down and stops reconnecting.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Starts the connection loop on the current runtime.
///
/// `heartbeat_frame` is written on every heartbeat tick when
/// `config.heartbeat` is set.
pub fn spawn(
    config: &ClientConfig,
    heartbeat_frame: Vec<u8>,
) -> (
    ConnectionHandle,
    mpsc::UnboundedReceiver<ConnectionEvent>,
    JoinHandle<()>,
) {
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let shutdown = CancellationToken::new();

    let task = tokio::spawn(run_connection_loop(
        ConnectionLoop {
            server_url: config.server_url.clone(),
            reconnect: config.reconnect,
            heartbeat: config.heartbeat,
            heartbeat_frame,
            state: state_tx,
            events: events_tx,
            shutdown: shutdown.clone(),
        },
        outbound_rx,
    ));

    let handle = ConnectionHandle {
        outbound: outbound_tx,
        state: state_rx,
        shutdown,
    };
    (handle, events_rx, task)
}

// ─── Main Connection Loop ───────────────────────────────────────

struct ConnectionLoop {
    server_url: String,
    reconnect: ReconnectPolicy,
    heartbeat: Option<Heartbeat>,
    heartbeat_frame: Vec<u8>,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    shutdown: CancellationToken,
}

/// Connects, pumps frames until the socket goes away, backs off, repeats.
///
/// Exits only when the session is closed or every event receiver is gone.
async fn run_connection_loop(ctx: ConnectionLoop, mut outbound: mpsc::Receiver<Vec<u8>>) {
    let mut attempt: u32 = 0;

    loop {
        ctx.state.send_replace(ConnectionState::Connecting);
        info!("Connecting to server: {}", ctx.server_url);

        let connected = tokio::select! {
            res = connect_async(ctx.server_url.as_str()) => res,
            _ = ctx.shutdown.cancelled() => break,
        };

        let reason = match connected {
            Ok((ws_stream, _)) => {
                info!("Connected to server");
                attempt = 0;
                ctx.state.send_replace(ConnectionState::Open);
                if ctx.events.send(ConnectionEvent::Opened).is_err() {
                    break;
                }

                let reason = pump_socket(&ctx, ws_stream, &mut outbound).await;
                if reason == CloseReason::Shutdown {
                    break;
                }

                warn!("Disconnected from server: {}", reason);
                let discarded = discard_pending(&mut outbound);
                if discarded > 0 {
                    warn!("Discarded {} unsent frames", discarded);
                }
                if ctx.events.send(ConnectionEvent::Dropped(reason.clone())).is_err() {
                    break;
                }
                reason
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                CloseReason::ConnectFailed(e.to_string())
            }
        };
        ctx.state.send_replace(ConnectionState::Closed(reason));

        let wait = backoff_with_jitter(&ctx.reconnect, attempt);
        attempt = attempt.saturating_add(1);
        info!("Reconnecting in {:.1}s...", wait.as_secs_f32());

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = ctx.shutdown.cancelled() => break,
        }
    }

    ctx.state.send_replace(ConnectionState::Closed(CloseReason::Shutdown));
    debug!("Connection loop stopped");
}

/// Empties the outbound queue without waiting, returning how many frames
/// were dropped.
fn discard_pending(outbound: &mut mpsc::Receiver<Vec<u8>>) -> usize {
    let mut discarded = 0;
    while outbound.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}

fn backoff_with_jitter(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let jitter_ms = policy.jitter.as_millis() as u64;
    let jitter = if jitter_ms == 0 {
        0
    } else {
        rand::random::<u64>() % (jitter_ms + 1)
    };
    policy.delay_for(attempt) + Duration::from_millis(jitter)
}

// ─── Socket Pump ────────────────────────────────────────────────

/// Drives one open socket until it closes, returning why.
async fn pump_socket(
    ctx: &ConnectionLoop,
    ws_stream: WsStream,
    outbound: &mut mpsc::Receiver<Vec<u8>>,
) -> CloseReason {
    let (mut sink, mut stream) = ws_stream.split();

    let mut ping = ctx.heartbeat.map(|hb| {
        let mut interval = tokio::time::interval_at(Instant::now() + hb.interval, hb.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return CloseReason::Shutdown;
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // Every handle is gone; nobody can send again.
                    let _ = sink.send(Message::Close(None)).await;
                    return CloseReason::Shutdown;
                };
                trace!("[OUT] sending {} bytes", frame.len());
                if let Err(e) = sink.send(Message::Binary(frame.into())).await {
                    return CloseReason::Dropped(e.to_string());
                }
            }

            _ = next_tick(&mut ping) => {
                let Some(hb) = ctx.heartbeat else { continue };
                if last_seen.elapsed() >= hb.timeout {
                    return CloseReason::HeartbeatTimeout;
                }
                if let Err(e) = sink.send(Message::Binary(ctx.heartbeat_frame.clone().into())).await {
                    return CloseReason::Dropped(e.to_string());
                }
            }

            msg = stream.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    last_seen = Instant::now();
                    trace!("[IN] received {} bytes", data.len());
                    if ctx.events.send(ConnectionEvent::Frame(data)).is_err() {
                        return CloseReason::Shutdown;
                    }
                }
                Some(Ok(Message::Close(_))) => return CloseReason::ServerClosed,
                // Text frames and transport-level pings are not part of
                // the protocol, but they do prove the socket is alive.
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => return CloseReason::Dropped(e.to_string()),
                None => return CloseReason::Dropped("stream ended".to_string()),
            },
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}
