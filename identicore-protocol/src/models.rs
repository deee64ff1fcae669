//! # Payload Records
//!
//! The records carried inside envelopes. Requests carry raw image bytes;
//! responses share the `{ ok, detail }` status shape.
//!
//! Failure responses from the backend only carry `{ ok: false, detail }`, so
//! the type-specific fields of a response are optional on the wire while
//! `ok` is false and fall back to their empty values. An `ok` response must
//! carry all of them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ShapeError;

// ─── Requests ───────────────────────────────────────────────────

/// Find every face on one photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyRequest {
    pub image: Bytes,
}

/// Decide whether two photos show the same person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub first_image: Bytes,
    pub second_image: Bytes,
}

/// Payload of ping, pong and diagnostic requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

// ─── Responses ──────────────────────────────────────────────────

/// Base shape of every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusModel {
    pub ok: bool,

    /// Human-readable failure reason. Set whenever `ok` is false.
    #[serde(default)]
    pub detail: Option<String>,
}

impl StatusModel {
    pub fn success() -> Self {
        Self {
            ok: true,
            detail: None,
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

/// A face bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRectangle {
    pub top_left: (i32, i32),
    pub bottom_right: (i32, i32),
}

impl FaceRectangle {
    pub fn new(top_left: (i32, i32), bottom_right: (i32, i32)) -> Self {
        Self {
            top_left,
            bottom_right,
        }
    }

    /// `top_left` is component-wise no greater than `bottom_right`.
    pub fn is_normalized(&self) -> bool {
        self.top_left.0 <= self.bottom_right.0 && self.top_left.1 <= self.bottom_right.1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IdentificationWire")]
pub struct IdentificationResponse {
    pub ok: bool,
    pub detail: Option<String>,
    pub faces_count: u32,
    pub faces: Vec<FaceRectangle>,
}

impl IdentificationResponse {
    pub fn found(faces: Vec<FaceRectangle>) -> Self {
        Self {
            ok: true,
            detail: None,
            faces_count: faces.len() as u32,
            faces,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
            faces_count: 0,
            faces: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusModel {
        StatusModel {
            ok: self.ok,
            detail: self.detail.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VerificationWire")]
pub struct VerificationResponse {
    pub ok: bool,
    pub detail: Option<String>,
    pub is_match: bool,

    /// In `[0, 1]`.
    pub similarity_confidence: f64,

    /// Faces from the first image followed by faces from the second.
    pub faces: Vec<FaceRectangle>,
}

impl VerificationResponse {
    pub fn compared(is_match: bool, similarity_confidence: f64, faces: Vec<FaceRectangle>) -> Self {
        Self {
            ok: true,
            detail: None,
            is_match,
            similarity_confidence,
            faces,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
            is_match: false,
            similarity_confidence: 0.0,
            faces: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusModel {
        StatusModel {
            ok: self.ok,
            detail: self.detail.clone(),
        }
    }
}

/// Backend liveness and load counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticResponse {
    pub alive: bool,
    pub queue_len: u64,
    pub ws_clients: u64,
}

// ─── Wire Shapes ────────────────────────────────────────────────

#[derive(Deserialize)]
struct IdentificationWire {
    ok: bool,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    faces_count: Option<u32>,
    #[serde(default)]
    faces: Option<Vec<FaceRectangle>>,
}

impl TryFrom<IdentificationWire> for IdentificationResponse {
    type Error = ShapeError;

    fn try_from(wire: IdentificationWire) -> Result<Self, Self::Error> {
        if !wire.ok {
            return Ok(Self {
                ok: false,
                detail: wire.detail,
                faces_count: wire.faces_count.unwrap_or_default(),
                faces: wire.faces.unwrap_or_default(),
            });
        }

        let faces_count = wire
            .faces_count
            .ok_or(ShapeError::MissingField("faces_count"))?;
        let faces = wire.faces.ok_or(ShapeError::MissingField("faces"))?;
        if faces.len() != faces_count as usize {
            return Err(ShapeError::FaceCountMismatch {
                count: faces_count,
                actual: faces.len(),
            });
        }
        check_normalized(&faces)?;

        Ok(Self {
            ok: true,
            detail: wire.detail,
            faces_count,
            faces,
        })
    }
}

#[derive(Deserialize)]
struct VerificationWire {
    ok: bool,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    is_match: Option<bool>,
    #[serde(default)]
    similarity_confidence: Option<f64>,
    #[serde(default)]
    faces: Option<Vec<FaceRectangle>>,
}

impl TryFrom<VerificationWire> for VerificationResponse {
    type Error = ShapeError;

    fn try_from(wire: VerificationWire) -> Result<Self, Self::Error> {
        if !wire.ok {
            return Ok(Self {
                ok: false,
                detail: wire.detail,
                is_match: wire.is_match.unwrap_or_default(),
                similarity_confidence: wire.similarity_confidence.unwrap_or_default(),
                faces: wire.faces.unwrap_or_default(),
            });
        }

        let is_match = wire.is_match.ok_or(ShapeError::MissingField("is_match"))?;
        let similarity_confidence = wire
            .similarity_confidence
            .ok_or(ShapeError::MissingField("similarity_confidence"))?;
        if !(0.0..=1.0).contains(&similarity_confidence) {
            return Err(ShapeError::ConfidenceOutOfRange(similarity_confidence));
        }
        let faces = wire.faces.ok_or(ShapeError::MissingField("faces"))?;
        check_normalized(&faces)?;

        Ok(Self {
            ok: true,
            detail: wire.detail,
            is_match,
            similarity_confidence,
            faces,
        })
    }
}

fn check_normalized(faces: &[FaceRectangle]) -> Result<(), ShapeError> {
    match faces.iter().position(|face| !face.is_normalized()) {
        Some(index) => Err(ShapeError::UnnormalizedFace { index }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{pack, unpack};
    use crate::error::DecodeError;

    #[derive(Serialize)]
    struct Partial<'a> {
        ok: bool,
        detail: Option<&'a str>,
    }

    fn sample_faces() -> Vec<FaceRectangle> {
        vec![
            FaceRectangle::new((230, 230), (380, 380)),
            FaceRectangle::new((510, 130), (660, 280)),
        ]
    }

    #[test]
    fn records_survive_pack_unpack() {
        let identify = IdentifyRequest {
            image: Bytes::from(vec![0xFF, 0xD8, 0xFF, 0xE0]),
        };
        assert_eq!(unpack::<IdentifyRequest>(&pack(&identify).unwrap()).unwrap(), identify);

        let verify = VerifyRequest {
            first_image: Bytes::from_static(b"first"),
            second_image: Bytes::new(),
        };
        assert_eq!(unpack::<VerifyRequest>(&pack(&verify).unwrap()).unwrap(), verify);

        let identification = IdentificationResponse::found(sample_faces());
        assert_eq!(
            unpack::<IdentificationResponse>(&pack(&identification).unwrap()).unwrap(),
            identification
        );

        let verification = VerificationResponse::compared(true, 0.875, sample_faces());
        assert_eq!(
            unpack::<VerificationResponse>(&pack(&verification).unwrap()).unwrap(),
            verification
        );

        let failed = VerificationResponse::failed("No faces were found on second image");
        assert_eq!(
            unpack::<VerificationResponse>(&pack(&failed).unwrap()).unwrap(),
            failed
        );
    }

    #[test]
    fn failure_response_tolerates_missing_fields() {
        let packed = pack(&Partial {
            ok: false,
            detail: Some("no face detected"),
        })
        .unwrap();

        let verification: VerificationResponse = unpack(&packed).unwrap();
        assert_eq!(verification, VerificationResponse::failed("no face detected"));

        let identification: IdentificationResponse = unpack(&packed).unwrap();
        assert_eq!(identification.faces_count, 0);
        assert!(identification.faces.is_empty());
        assert_eq!(identification.status(), StatusModel::error("no face detected"));
    }

    #[test]
    fn successful_response_requires_its_fields() {
        let packed = pack(&Partial {
            ok: true,
            detail: None,
        })
        .unwrap();

        let err = unpack::<IdentificationResponse>(&packed).unwrap_err();
        assert!(err.to_string().contains("faces_count"));
        let err = unpack::<VerificationResponse>(&packed).unwrap_err();
        assert!(err.to_string().contains("is_match"));
    }

    #[test]
    fn face_count_must_match_faces() {
        let mut bogus = IdentificationResponse::found(sample_faces());
        bogus.faces_count = 3;
        let err = unpack::<IdentificationResponse>(&pack(&bogus).unwrap()).unwrap_err();
        assert!(err.to_string().contains("faces_count is 3 but 2 faces"));
    }

    #[test]
    fn successful_response_rejects_inverted_face() {
        let mut faces = sample_faces();
        faces[1] = FaceRectangle::new((660, 280), (510, 130));

        let packed = pack(&IdentificationResponse::found(faces.clone())).unwrap();
        let err = unpack::<IdentificationResponse>(&packed).unwrap_err();
        assert!(matches!(err, DecodeError::Msgpack(_)));
        assert!(err.to_string().contains("face 1"));

        let packed = pack(&VerificationResponse::compared(true, 0.9, faces)).unwrap();
        let err = unpack::<VerificationResponse>(&packed).unwrap_err();
        assert!(err.to_string().contains("face 1"));
    }

    #[test]
    fn successful_response_rejects_confidence_out_of_range() {
        for confidence in [1.5, -0.1, f64::NAN] {
            let packed =
                pack(&VerificationResponse::compared(true, confidence, sample_faces())).unwrap();
            let err = unpack::<VerificationResponse>(&packed).unwrap_err();
            assert!(matches!(err, DecodeError::Msgpack(_)));
            assert!(err.to_string().contains("outside [0, 1]"));
        }

        let edge = VerificationResponse::compared(false, 0.0, Vec::new());
        assert_eq!(unpack::<VerificationResponse>(&pack(&edge).unwrap()).unwrap(), edge);
    }

    #[test]
    fn failure_response_skips_consistency_checks() {
        let mut failed = VerificationResponse::failed("no face detected");
        failed.similarity_confidence = 2.0;
        failed.faces = vec![FaceRectangle::new((10, 10), (0, 0))];
        assert!(unpack::<VerificationResponse>(&pack(&failed).unwrap()).is_ok());
    }

    #[test]
    fn rectangle_normalization() {
        assert!(FaceRectangle::new((0, 0), (10, 10)).is_normalized());
        assert!(FaceRectangle::new((5, 5), (5, 5)).is_normalized());
        assert!(!FaceRectangle::new((10, 0), (0, 10)).is_normalized());
    }
}
