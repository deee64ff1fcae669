//! # Envelope Codec
//!
//! An envelope is one WebSocket binary frame:
//!
//! ```text
//! byte 0       : MessageTag (u8)
//! bytes 1..N   : packed payload, schema implied by the tag
//! ```
//!
//! The codec only splits and joins; deciding whether a tag is known is the
//! caller's job, so [`decode`] hands back the raw tag byte.

use crate::error::ProtocolError;
use crate::tag::MessageTag;

/// Prefixes `payload` with the tag byte.
pub fn encode(tag: MessageTag, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(tag.as_u8());
    frame.extend_from_slice(payload);
    frame
}

/// Splits a frame into its raw tag byte and payload.
///
/// The payload may be empty. Fails only on a zero-length frame.
pub fn decode(frame: &[u8]) -> Result<(u8, &[u8]), ProtocolError> {
    match frame.split_first() {
        Some((tag, payload)) => Ok((*tag, payload)),
        None => Err(ProtocolError::MalformedEnvelope),
    }
}

/// Borrowed view over a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub tag: u8,
    pub payload: &'a [u8],
}

impl<'a> Envelope<'a> {
    pub fn parse(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        let (tag, payload) = decode(frame)?;
        Ok(Self { tag, payload })
    }

    /// The tag, if the protocol defines it.
    pub fn known_tag(&self) -> Option<MessageTag> {
        MessageTag::try_from(self.tag).ok()
    }
}
