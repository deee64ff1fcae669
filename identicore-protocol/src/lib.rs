//! # Identicore Protocol
//!
//! Wire types shared by the Identicore client and backend. One WebSocket
//! binary frame carries one envelope: a [`MessageTag`] byte followed by a
//! MessagePack payload whose shape the tag decides.
//!
//! ```text
//! client                                   backend
//!   │ ── [0xA0 | {image}] ─────────────────▶ │
//!   │ ◀──────── [0xA1 | {ok, detail, faces_count, faces}] ── │
//!   │ ── [0xB0 | {first_image, second_image}] ─▶ │
//!   │ ◀──────── [0xB1 | {ok, detail, is_match, similarity_confidence, faces}] ── │
//!   │ ── [0x10 | {}] ──────────────────────▶ │
//!   │ ◀──────── [0x11 | {}] ──────────────── │
//!   │ ◀──────── [0xFF | {ok: false, detail}] ── │  (throttled)
//! ```

pub mod codec;
pub mod envelope;
pub mod error;
pub mod message;
pub mod models;
pub mod tag;

pub use envelope::Envelope;
pub use error::{DecodeError, ProtocolError, ShapeError};
pub use message::{Request, Response, ResponseKind};
pub use models::{
    DiagnosticResponse, FaceRectangle, IdentificationResponse, IdentifyRequest, StatusModel,
    VerificationResponse, VerifyRequest,
};
pub use tag::MessageTag;
