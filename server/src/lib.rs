//! # Identicore Server
//!
//! Reference backend for the Identicore protocol. Clients connect to
//! `/core/ws` and exchange tagged MessagePack envelopes; recognition requests
//! go through a serial job queue backed by a pluggable [`Recognizer`].
//!
//! ```text
//! client ──[0xA0 | {image}]──▶ handlers ──▶ JobQueue ──▶ worker (blocking pool)
//!   ▲                                                        │
//!   └────────────[0xA1 | {ok, faces_count, faces}]───────────┘
//! ```

pub mod api;
pub mod config;
pub mod handlers;
pub mod recognizer;
pub mod state;
pub mod throttle;
pub mod worker;

use std::net::SocketAddr;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

pub use config::{ConfigError, RateLimit, ServerConfig};
pub use recognizer::{Comparison, DetectionMode, ImageSlot, NullRecognizer, RecognitionError, Recognizer};
pub use state::AppState;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/core/ws", get(handlers::ws_handler))
        .route("/api/diagnostic", get(api::diagnostic))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the backend on an already bound listener until the process ends.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
