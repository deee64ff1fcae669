//! # WebSocket Handlers
//!
//! Contains the core WebSocket logic of the backend:
//! - Upgrading HTTP connections to WebSocket, subject to the connect limit
//! - Managing the lifecycle of each connection (outbound task, cleanup)
//! - Screening inbound envelopes and applying the per-client send limit
//! - Answering pings and diagnostics inline, queueing recognition jobs

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use identicore_protocol::{codec, envelope, MessageTag, Request, Response, StatusModel};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::api;
use crate::state::{AppState, ClientInfo};
use crate::worker::{Job, QueuedJob};

/// Close code sent when the connect limit is exceeded (try again later).
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
pub const TOO_MANY_CONNECTIONS: &str = "too many connections, try again later.";
pub const TOO_MANY_REQUESTS: &str = "Too many requests, try again later.";

// ─── WebSocket Upgrade Endpoint ─────────────────────────────────

/// `GET /core/ws`: upgrades the HTTP connection to a WebSocket connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, addr, state))
}

// ─── Connection Lifecycle ───────────────────────────────────────

async fn handle_connection(mut socket: WebSocket, addr: SocketAddr, state: AppState) {
    if state.connect_throttle.is_throttling(None) {
        warn!("Rejecting {}: connect limit reached", addr);
        let close = Message::Close(Some(CloseFrame {
            code: CLOSE_TRY_AGAIN_LATER,
            reason: Utf8Bytes::from_static(TOO_MANY_CONNECTIONS),
        }));
        if let Err(e) = socket.send(close).await {
            debug!("Close to {} failed: {}", addr, e);
        }
        return;
    }

    let conn_id = Uuid::new_v4();
    info!("Accepted {} ({})", addr, conn_id);

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let client = ClientInfo { addr, tx };
    state.connections.insert(conn_id, client.clone());

    // ── Outbound Task ──
    // Drains the client's queue; replies from the job worker land here too.
    let outbound_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            trace!("[OUT] {} bytes", frame.len());
            if ws_sink.send(Message::Binary(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // ── Inbound Loop ──
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Binary(data) => handle_frame(&state, &client, &data),
            Message::Close(_) => break,
            _ => {}
        }
    }

    // ── Cleanup on Disconnect ──
    info!("Disconnected {} ({})", addr, conn_id);
    outbound_task.abort();
    state.connections.remove(&conn_id);
    state.send_throttle.forget(&addr);
}

// ─── Frame Dispatcher ───────────────────────────────────────────

/// Handles one inbound binary frame.
///
/// Frames shorter than two bytes or whose payload is not a map are dropped
/// before throttling. Every other frame except a ping counts against the
/// client's send limit.
pub fn handle_frame(state: &AppState, client: &ClientInfo, frame: &[u8]) {
    trace!("[IN] {} bytes from {}", frame.len(), client.addr);
    if frame.len() < 2 {
        return;
    }
    let Ok((tag, payload)) = envelope::decode(frame) else {
        return;
    };
    if !codec::is_map(payload) {
        debug!("Dropping frame {:#04x}: payload is not a map", tag);
        return;
    }

    if tag != MessageTag::Ping.as_u8() && state.send_throttle.is_throttling(Some(client.addr)) {
        debug!("Throttling {}", client.addr);
        reply(client, Response::Throttled(StatusModel::error(TOO_MANY_REQUESTS)));
        return;
    }

    let Ok(tag) = MessageTag::try_from(tag) else {
        trace!("Ignoring unknown tag {:#04x}", tag);
        return;
    };
    let request = match Request::decode(tag, payload) {
        Ok(request) => request,
        Err(e) => {
            debug!("Ignoring {} from {}: {}", tag, client.addr, e);
            return;
        }
    };

    match request {
        Request::Ping => reply(client, Response::Pong),
        Request::Diagnostic => reply(client, Response::Diagnostic(api::snapshot(state))),
        Request::Identify(req) => {
            if req.image.is_empty() {
                return;
            }
            enqueue(state, client, Job::Identify { image: req.image });
        }
        Request::Verify(req) => {
            if req.first_image.is_empty() || req.second_image.is_empty() {
                return;
            }
            enqueue(
                state,
                client,
                Job::Verify {
                    first_image: req.first_image,
                    second_image: req.second_image,
                },
            );
        }
    }
}

fn enqueue(state: &AppState, client: &ClientInfo, job: Job) {
    let id = Uuid::new_v4();
    let kind = job.kind();
    if state.jobs.push(QueuedJob {
        id,
        job,
        reply: client.tx.clone(),
    }) {
        info!("Enqueued {:?} job {}", kind, id);
    } else {
        error!("Job worker is gone; dropping {:?} job {}", kind, id);
    }
}

fn reply(client: &ClientInfo, response: Response) {
    match response.to_frame() {
        Ok(frame) => {
            let _ = client.tx.send(frame);
        }
        Err(e) => error!("Failed to encode {}: {}", response.tag(), e),
    }
}
