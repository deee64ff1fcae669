//! # Message Tags
//!
//! Every envelope starts with a single tag byte that names the schema of the
//! payload behind it. The high nibble groups a request with its response and
//! the low nibble carries the direction (`0` request, `1` response). Ping and
//! pong are the irregular control pair; `Throttled` is a response that no
//! request asks for.

use std::fmt;

use crate::error::ProtocolError;

/// One-byte discriminator at the start of every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageTag {
    // ── Control ───────────────────────────────────────────────────
    /// Keepalive request.
    Ping = 0x10,

    /// Keepalive response.
    Pong = 0x11,

    // ── Identification ────────────────────────────────────────────
    /// Find every face on one image.
    IdentifyRequest = 0xA0,

    /// Faces found on the identification image.
    IdentifyResponse = 0xA1,

    // ── Verification ──────────────────────────────────────────────
    /// Compare the faces on two images.
    VerificationRequest = 0xB0,

    /// Whether the two faces belong to the same person.
    VerificationResponse = 0xB1,

    // ── Diagnostics ───────────────────────────────────────────────
    /// Ask the backend for its queue and connection counters.
    DiagnosticRequest = 0xF0,

    /// Backend counters.
    DiagnosticResponse = 0xF1,

    // ── Backpressure ──────────────────────────────────────────────
    /// The backend rejected a request because the client sends too fast.
    Throttled = 0xFF,
}

impl MessageTag {
    /// Every tag the protocol defines, in wire order.
    pub const ALL: [MessageTag; 9] = [
        MessageTag::Ping,
        MessageTag::Pong,
        MessageTag::IdentifyRequest,
        MessageTag::IdentifyResponse,
        MessageTag::VerificationRequest,
        MessageTag::VerificationResponse,
        MessageTag::DiagnosticRequest,
        MessageTag::DiagnosticResponse,
        MessageTag::Throttled,
    ];

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for tags a client sends.
    pub const fn is_request(self) -> bool {
        matches!(
            self,
            MessageTag::Ping
                | MessageTag::IdentifyRequest
                | MessageTag::VerificationRequest
                | MessageTag::DiagnosticRequest
        )
    }

    /// True for tags a backend sends.
    pub const fn is_response(self) -> bool {
        !self.is_request()
    }

    /// The response tag a backend answers this request with.
    ///
    /// Returns `None` for response tags.
    pub const fn response(self) -> Option<MessageTag> {
        match self {
            MessageTag::Ping => Some(MessageTag::Pong),
            MessageTag::IdentifyRequest => Some(MessageTag::IdentifyResponse),
            MessageTag::VerificationRequest => Some(MessageTag::VerificationResponse),
            MessageTag::DiagnosticRequest => Some(MessageTag::DiagnosticResponse),
            _ => None,
        }
    }
}

impl TryFrom<u8> for MessageTag {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x10 => Ok(MessageTag::Ping),
            0x11 => Ok(MessageTag::Pong),
            0xA0 => Ok(MessageTag::IdentifyRequest),
            0xA1 => Ok(MessageTag::IdentifyResponse),
            0xB0 => Ok(MessageTag::VerificationRequest),
            0xB1 => Ok(MessageTag::VerificationResponse),
            0xF0 => Ok(MessageTag::DiagnosticRequest),
            0xF1 => Ok(MessageTag::DiagnosticResponse),
            0xFF => Ok(MessageTag::Throttled),
            other => Err(ProtocolError::UnrecognizedTag(other)),
        }
    }
}

impl From<MessageTag> for u8 {
    fn from(tag: MessageTag) -> Self {
        tag.as_u8()
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:#04x})", self, self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_unique_and_convert_back() {
        for (i, tag) in MessageTag::ALL.iter().enumerate() {
            assert_eq!(MessageTag::try_from(tag.as_u8()).unwrap(), *tag);
            for other in &MessageTag::ALL[i + 1..] {
                assert_ne!(tag.as_u8(), other.as_u8());
            }
        }
    }

    #[test]
    fn request_response_pairs_share_high_nibble() {
        for tag in MessageTag::ALL.iter().filter(|t| t.is_request()) {
            let response = tag.response().unwrap();
            assert!(response.is_response());
            assert_eq!(tag.as_u8() & 0xF0, response.as_u8() & 0xF0);
            assert_eq!(tag.as_u8() & 0x0F, 0);
            assert_eq!(response.as_u8() & 0x0F, 1);
        }
        assert_eq!(MessageTag::Throttled.response(), None);
        assert!(MessageTag::Throttled.is_response());
    }

    #[test]
    fn unknown_byte_is_rejected() {
        assert!(matches!(
            MessageTag::try_from(0x00),
            Err(ProtocolError::UnrecognizedTag(0x00))
        ));
        assert!(MessageTag::try_from(0xA2).is_err());
    }
}
