//! Errors raised while framing or (un)packing protocol messages.

use thiserror::Error;

/// Why a payload could not be unpacked as the record shape asked for.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not valid MessagePack, a missing required field, or a field with
    /// the wrong type.
    #[error("malformed payload: {0}")]
    Msgpack(#[from] rmp_serde::decode::Error),

    /// Structural detection found neither identification nor verification
    /// fields.
    #[error("payload matches no known response shape")]
    Unclassified,
}

/// Consistency rules a decoded response must satisfy beyond its field types.
///
/// Raised from inside deserialization, so it reaches callers as the message
/// of a [`DecodeError::Msgpack`].
#[derive(Debug, Error, PartialEq)]
pub enum ShapeError {
    #[error("missing field `{0}` in successful response")]
    MissingField(&'static str),

    #[error("faces_count is {count} but {actual} faces were sent")]
    FaceCountMismatch { count: u32, actual: usize },

    #[error("face {index} has top_left below or right of bottom_right")]
    UnnormalizedFace { index: usize },

    #[error("similarity_confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Zero-length frame: there is not even a tag byte.
    #[error("malformed envelope: empty frame")]
    MalformedEnvelope,

    /// The tag byte is not one the protocol defines.
    #[error("unrecognized message tag {0:#04x}")]
    UnrecognizedTag(u8),

    /// A defined tag, but for the other direction of the conversation.
    #[error("unexpected message tag {0:#04x} for this side of the connection")]
    UnexpectedTag(u8),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to pack payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ProtocolError::Decode(DecodeError::Msgpack(err))
    }
}
