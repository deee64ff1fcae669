//! # Identicore Client
//!
//! Client side of the face recognition service. A single [`Session`] keeps
//! one WebSocket connection to the backend alive, sends identification and
//! verification requests one at a time, and publishes what comes back as
//! [`Outcome`]s.
//!
//! ```text
//! UI ──submit──▶ Session ──▶ Multiplexer ──frame──▶ ConnectionHandle ──▶ socket
//!                                ▲                                        │
//!                                └───── handle_frame ◀── dispatcher ◀─────┘
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod multiplexer;
pub mod session;

pub use config::{ClientConfig, ConfigError, Heartbeat, ReconnectPolicy};
pub use connection::{CloseReason, ConnectionEvent, ConnectionHandle, ConnectionState};
pub use error::{Failure, SendError, SubmitError};
pub use multiplexer::{FrameSink, Multiplexer, Outcome, RequestKind};
pub use session::{Outcomes, Session, SessionStatus};

pub use identicore_protocol::{
    DiagnosticResponse, FaceRectangle, IdentificationResponse, StatusModel, VerificationResponse,
};
