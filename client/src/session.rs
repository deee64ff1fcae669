//! # Session
//!
//! The single logical connection to the backend. A [`Session`] owns the
//! connection manager, the multiplexer and the task that feeds one into the
//! other. Create it with [`Session::start`] and hand it to whatever submits
//! photos; results come out of the paired [`Outcomes`] stream.
//!
//! ```ignore
//! let (session, mut outcomes) = Session::start(ClientConfig::from_env()?)?;
//! session.identify(Some(photo))?;
//! while let Some(outcome) = outcomes.next().await {
//!     render(outcome);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use identicore_protocol::codec::EMPTY_MAP;
use identicore_protocol::envelope;
use identicore_protocol::{MessageTag, ProtocolError};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{ClientConfig, ConfigError};
use crate::connection::{self, ConnectionEvent, ConnectionHandle, ConnectionState};
use crate::error::SubmitError;
use crate::multiplexer::{Multiplexer, Outcome};

/// How often the dispatcher looks for a request past its timeout.
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Session status snapshot for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub server_url: String,
    pub connection: ConnectionState,

    /// A request is waiting for its response; submitting now does nothing.
    pub queued: bool,
}

/// Stream of published results.
#[derive(Debug)]
pub struct Outcomes {
    rx: mpsc::UnboundedReceiver<Outcome>,
}

impl Outcomes {
    /// Next published outcome. `None` once the session is gone.
    pub async fn next(&mut self) -> Option<Outcome> {
        self.rx.recv().await
    }

    /// An outcome that is already waiting, if any.
    pub fn try_next(&mut self) -> Option<Outcome> {
        self.rx.try_recv().ok()
    }
}

pub struct Session {
    server_url: String,
    connection: ConnectionHandle,
    mux: Arc<Multiplexer<ConnectionHandle>>,
    connection_task: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Session {
    /// Validates the config, starts connecting and returns immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: ClientConfig) -> Result<(Session, Outcomes), ConfigError> {
        config.validate()?;

        let heartbeat_frame = envelope::encode(MessageTag::Ping, EMPTY_MAP);
        let (connection, events, connection_task) = connection::spawn(&config, heartbeat_frame);
        let (mux, outcomes) = Multiplexer::new(connection.clone());
        let mux = Arc::new(mux);

        let dispatcher = tokio::spawn(dispatch_events(
            mux.clone(),
            events,
            config.request_timeout,
        ));

        info!("Session started for {}", config.server_url);
        let session = Session {
            server_url: config.server_url,
            connection,
            mux,
            connection_task,
            dispatcher,
        };
        Ok((session, Outcomes { rx: outcomes }))
    }

    /// Submits one photo for identification.
    ///
    /// `Busy` and `MissingImage` errors mean nothing was sent; the UI may
    /// ignore them.
    pub fn identify(&self, image: Option<Bytes>) -> Result<Uuid, SubmitError> {
        self.mux.submit_identify(image)
    }

    /// Submits two photos for verification.
    pub fn verify(
        &self,
        first_image: Option<Bytes>,
        second_image: Option<Bytes>,
    ) -> Result<Uuid, SubmitError> {
        self.mux.submit_verify(first_image, second_image)
    }

    /// Requests backend counters; the answer arrives as
    /// [`Outcome::Diagnostic`]. Refused with [`SubmitError::Busy`] while a
    /// request is in flight.
    pub fn diagnose(&self) -> Result<(), SubmitError> {
        self.mux.submit_diagnostic()
    }

    pub fn is_queued(&self) -> bool {
        self.mux.is_queued()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Resolves once the socket is open. Returns false if the session closed
    /// first.
    pub async fn wait_until_open(&self) -> bool {
        matches!(
            self.connection
                .wait_for(|s| s.is_open() || self.connection.is_closed())
                .await,
            Some(ConnectionState::Open)
        )
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            server_url: self.server_url.clone(),
            connection: self.connection.state(),
            queued: self.mux.is_queued(),
        }
    }

    /// Tears the socket down and waits for the background tasks to stop.
    ///
    /// No outcomes are published afterwards.
    pub async fn close(mut self) {
        self.connection.close();
        if let Err(e) = (&mut self.connection_task).await {
            warn!("Connection task ended abnormally: {}", e);
        }
        if let Err(e) = (&mut self.dispatcher).await {
            warn!("Dispatcher ended abnormally: {}", e);
        }
        info!("Session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.connection.close();
    }
}

// ─── Dispatcher ─────────────────────────────────────────────────

/// Feeds connection events into the multiplexer and expires requests that
/// waited too long. Ends when the connection loop does.
async fn dispatch_events(
    mux: Arc<Multiplexer<ConnectionHandle>>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    request_timeout: Option<Duration>,
) {
    let mut sweep = tokio::time::interval(TIMEOUT_SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectionEvent::Frame(frame)) => {
                    if let Err(err) = mux.handle_frame(&frame) {
                        log_dropped_frame(&err);
                    }
                }
                Some(ConnectionEvent::Opened) => debug!("Connection open"),
                Some(ConnectionEvent::Dropped(reason)) => mux.connection_dropped(&reason),
                None => break,
            },

            _ = sweep.tick(), if request_timeout.is_some() => {
                if let Some(timeout) = request_timeout {
                    mux.expire_stale(Instant::now(), timeout);
                }
            }
        }
    }
    debug!("Dispatcher stopped");
}

fn log_dropped_frame(err: &ProtocolError) {
    match err {
        ProtocolError::UnrecognizedTag(tag) => trace!("Dropping frame with unknown tag {:#04x}", tag),
        ProtocolError::UnexpectedTag(tag) => debug!("Dropping request-tagged frame {:#04x}", tag),
        other => warn!("Dropping inbound frame: {}", other),
    }
}
