//! # Typed Messages
//!
//! [`Request`] and [`Response`] tie each payload record to its envelope tag.
//! Dispatch is always by tag; [`ResponseKind::detect`] classifies a payload by
//! the fields it carries and is only a fallback for payloads whose tag was
//! lost or is not trusted.

use serde_json::Value;

use crate::codec::{EMPTY_MAP, pack, unpack};
use crate::envelope::{self, Envelope};
use crate::error::{DecodeError, ProtocolError};
use crate::models::{
    DiagnosticResponse, Empty, IdentificationResponse, IdentifyRequest, StatusModel,
    VerificationResponse, VerifyRequest,
};
use crate::tag::MessageTag;

// ─── Requests ───────────────────────────────────────────────────

/// Everything a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Identify(IdentifyRequest),
    Verify(VerifyRequest),
    Diagnostic,
}

impl Request {
    pub fn tag(&self) -> MessageTag {
        match self {
            Request::Ping => MessageTag::Ping,
            Request::Identify(_) => MessageTag::IdentifyRequest,
            Request::Verify(_) => MessageTag::VerificationRequest,
            Request::Diagnostic => MessageTag::DiagnosticRequest,
        }
    }

    /// Packs the payload and wraps it in a tagged envelope.
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = match self {
            Request::Ping | Request::Diagnostic => EMPTY_MAP.to_vec(),
            Request::Identify(req) => pack(req)?,
            Request::Verify(req) => pack(req)?,
        };
        Ok(envelope::encode(self.tag(), &payload))
    }

    /// Unpacks the payload of a request-direction tag.
    pub fn decode(tag: MessageTag, payload: &[u8]) -> Result<Self, ProtocolError> {
        match tag {
            MessageTag::Ping => {
                unpack::<Empty>(payload)?;
                Ok(Request::Ping)
            }
            MessageTag::IdentifyRequest => Ok(Request::Identify(unpack(payload)?)),
            MessageTag::VerificationRequest => Ok(Request::Verify(unpack(payload)?)),
            MessageTag::DiagnosticRequest => {
                unpack::<Empty>(payload)?;
                Ok(Request::Diagnostic)
            }
            other => Err(ProtocolError::UnexpectedTag(other.as_u8())),
        }
    }

    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        let envelope = Envelope::parse(frame)?;
        Self::decode(MessageTag::try_from(envelope.tag)?, envelope.payload)
    }
}

// ─── Responses ──────────────────────────────────────────────────

/// Everything a backend sends.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Pong,
    Identification(IdentificationResponse),
    Verification(VerificationResponse),
    Diagnostic(DiagnosticResponse),
    /// The backend refused the request; `detail` says why.
    Throttled(StatusModel),
}

impl Response {
    pub fn tag(&self) -> MessageTag {
        match self {
            Response::Pong => MessageTag::Pong,
            Response::Identification(_) => MessageTag::IdentifyResponse,
            Response::Verification(_) => MessageTag::VerificationResponse,
            Response::Diagnostic(_) => MessageTag::DiagnosticResponse,
            Response::Throttled(_) => MessageTag::Throttled,
        }
    }

    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = match self {
            Response::Pong => EMPTY_MAP.to_vec(),
            Response::Identification(resp) => pack(resp)?,
            Response::Verification(resp) => pack(resp)?,
            Response::Diagnostic(resp) => pack(resp)?,
            Response::Throttled(status) => pack(status)?,
        };
        Ok(envelope::encode(self.tag(), &payload))
    }

    /// Unpacks the payload of a response-direction tag.
    ///
    /// The pong payload is not inspected.
    pub fn decode(tag: MessageTag, payload: &[u8]) -> Result<Self, ProtocolError> {
        match tag {
            MessageTag::Pong => Ok(Response::Pong),
            MessageTag::IdentifyResponse => Ok(Response::Identification(unpack(payload)?)),
            MessageTag::VerificationResponse => Ok(Response::Verification(unpack(payload)?)),
            MessageTag::DiagnosticResponse => Ok(Response::Diagnostic(unpack(payload)?)),
            MessageTag::Throttled => Ok(Response::Throttled(unpack(payload)?)),
            other => Err(ProtocolError::UnexpectedTag(other.as_u8())),
        }
    }

    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        let envelope = Envelope::parse(frame)?;
        Self::decode(MessageTag::try_from(envelope.tag)?, envelope.payload)
    }

    /// Decodes an identification or verification payload without its tag.
    pub fn decode_untagged(payload: &[u8]) -> Result<Self, ProtocolError> {
        match ResponseKind::detect(payload)? {
            ResponseKind::Identification => Ok(Response::Identification(unpack(payload)?)),
            ResponseKind::Verification => Ok(Response::Verification(unpack(payload)?)),
            ResponseKind::Unknown => Err(DecodeError::Unclassified.into()),
        }
    }

    /// Backend-reported failure reason, if this response is a failure.
    pub fn error_detail(&self) -> Option<&str> {
        let (ok, detail) = match self {
            Response::Identification(resp) => (resp.ok, &resp.detail),
            Response::Verification(resp) => (resp.ok, &resp.detail),
            Response::Throttled(status) => (status.ok, &status.detail),
            Response::Pong | Response::Diagnostic(_) => return None,
        };
        if ok { None } else { detail.as_deref() }
    }
}

/// Shape of a response payload judged by the fields present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Identification,
    Verification,
    Unknown,
}

impl ResponseKind {
    /// A numeric `faces_count` means identification, a boolean `is_match`
    /// means verification. Failure payloads that carry only `{ok, detail}`
    /// are `Unknown`.
    pub fn detect(payload: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = unpack(payload)?;
        let Some(fields) = value.as_object() else {
            return Ok(ResponseKind::Unknown);
        };

        if fields.get("faces_count").is_some_and(Value::is_number) {
            Ok(ResponseKind::Identification)
        } else if fields.get("is_match").is_some_and(Value::is_boolean) {
            Ok(ResponseKind::Verification)
        } else {
            Ok(ResponseKind::Unknown)
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::models::FaceRectangle;

    #[test]
    fn identify_request_frame_layout() {
        let frame = Request::Identify(IdentifyRequest {
            image: Bytes::from_static(&[1, 2, 3]),
        })
        .to_frame()
        .unwrap();

        assert_eq!(frame[0], 0xA0);
        let req: IdentifyRequest = unpack(&frame[1..]).unwrap();
        assert_eq!(req.image.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn ping_and_pong_frames_match_backend() {
        assert_eq!(Request::Ping.to_frame().unwrap(), vec![0x10, 0x80]);
        assert_eq!(Response::Pong.to_frame().unwrap(), vec![0x11, 0x80]);
        assert_eq!(Request::from_frame(&[0x10, 0x80]).unwrap(), Request::Ping);
    }

    #[test]
    fn requests_survive_framing() {
        let requests = [
            Request::Ping,
            Request::Diagnostic,
            Request::Identify(IdentifyRequest {
                image: Bytes::from_static(b"jpeg"),
            }),
            Request::Verify(VerifyRequest {
                first_image: Bytes::from_static(b"one"),
                second_image: Bytes::from_static(b"two"),
            }),
        ];
        for request in requests {
            let frame = request.to_frame().unwrap();
            assert_eq!(Request::from_frame(&frame).unwrap(), request);
        }
    }

    #[test]
    fn responses_survive_framing() {
        let responses = [
            Response::Pong,
            Response::Identification(IdentificationResponse::found(vec![FaceRectangle::new(
                (0, 0),
                (10, 10),
            )])),
            Response::Verification(VerificationResponse::compared(false, 0.12, Vec::new())),
            Response::Diagnostic(DiagnosticResponse {
                alive: true,
                queue_len: 4,
                ws_clients: 2,
            }),
            Response::Throttled(StatusModel::error("Too many requests, try again later.")),
        ];
        for response in responses {
            let frame = response.to_frame().unwrap();
            assert_eq!(Response::from_frame(&frame).unwrap(), response);
        }
    }

    #[test]
    fn direction_is_enforced() {
        let frame = Request::Ping.to_frame().unwrap();
        assert!(matches!(
            Response::from_frame(&frame),
            Err(ProtocolError::UnexpectedTag(0x10))
        ));
        let frame = Response::Pong.to_frame().unwrap();
        assert!(matches!(
            Request::from_frame(&frame),
            Err(ProtocolError::UnexpectedTag(0x11))
        ));
        assert!(matches!(
            Response::from_frame(&[0x00, 0x80]),
            Err(ProtocolError::UnrecognizedTag(0x00))
        ));
    }

    #[test]
    fn structural_detection() {
        let identification = pack(&IdentificationResponse::found(Vec::new())).unwrap();
        assert_eq!(
            ResponseKind::detect(&identification).unwrap(),
            ResponseKind::Identification
        );

        let verification = pack(&VerificationResponse::compared(true, 0.9, Vec::new())).unwrap();
        assert_eq!(
            ResponseKind::detect(&verification).unwrap(),
            ResponseKind::Verification
        );

        let status = pack(&StatusModel::error("no face detected")).unwrap();
        assert_eq!(ResponseKind::detect(&status).unwrap(), ResponseKind::Unknown);

        let not_a_map = pack(&[1u8, 2, 3]).unwrap();
        assert_eq!(ResponseKind::detect(&not_a_map).unwrap(), ResponseKind::Unknown);
    }

    #[test]
    fn untagged_decode_uses_structure() {
        let payload = pack(&VerificationResponse::compared(true, 0.5, Vec::new())).unwrap();
        assert!(matches!(
            Response::decode_untagged(&payload).unwrap(),
            Response::Verification(v) if v.is_match
        ));

        let status = pack(&StatusModel::error("no face detected")).unwrap();
        assert!(matches!(
            Response::decode_untagged(&status),
            Err(ProtocolError::Decode(DecodeError::Unclassified))
        ));
    }

    #[test]
    fn error_detail_only_for_failures() {
        let failed = Response::Verification(VerificationResponse::failed("no face detected"));
        assert_eq!(failed.error_detail(), Some("no face detected"));
        let ok = Response::Identification(IdentificationResponse::found(Vec::new()));
        assert_eq!(ok.error_detail(), None);
        assert_eq!(Response::Pong.error_detail(), None);
    }
}
