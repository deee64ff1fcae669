//! Client error and failure types.

use identicore_protocol::ProtocolError;
use serde::Serialize;
use thiserror::Error;

/// Why a frame could not be queued for sending.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The session was closed; nothing will be sent anymore.
    #[error("connection is closed")]
    Closed,

    /// The outbound queue is at capacity.
    #[error("outbound queue is full")]
    Full,
}

/// Why a submit call sent nothing.
///
/// `Busy` and `MissingImage` are the precondition failures the UI treats as
/// a silent no-op.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Another request is still waiting for its response.
    #[error("a request is already in flight")]
    Busy,

    /// A required image is absent or empty.
    #[error("missing image: {0}")]
    MissingImage(&'static str),

    #[error("failed to encode request: {0}")]
    Encode(#[from] ProtocolError),

    #[error(transparent)]
    Send(#[from] SendError),
}

impl SubmitError {
    /// True for the failures that mean "nothing happened, try later".
    pub fn is_precondition(&self) -> bool {
        matches!(self, SubmitError::Busy | SubmitError::MissingImage(_))
    }
}

/// An in-flight request that ended without a usable response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// The response payload did not match its tag's record shape.
    #[error("backend response could not be decoded: {reason}")]
    Undecodable { reason: String },

    /// No response arrived within the request timeout.
    #[error("request timed out")]
    TimedOut,

    /// The connection dropped while the request was in flight.
    #[error("connection lost before the response arrived")]
    RequestLost,
}
