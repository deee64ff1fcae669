//! # Recognizer
//!
//! The face detection and comparison engine behind the job worker. The
//! backend only needs two operations from it; anything implementing
//! [`Recognizer`] can be plugged into [`AppState`](crate::state::AppState).

use std::fmt;

use identicore_protocol::FaceRectangle;
use thiserror::Error;

/// What a detection pass is for. Verification detects with a stricter
/// confidence threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    Identification,
    Verification,
}

/// Which of the two verification images something refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSlot {
    First,
    Second,
}

impl fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSlot::First => f.write_str("first"),
            ImageSlot::Second => f.write_str("second"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub is_match: bool,

    /// In `[0, 1]`.
    pub similarity_confidence: f64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    /// Verification needs exactly one face per image.
    #[error("multiple faces detected: {0}")]
    MultipleFaces(usize),

    #[error("features extraction failed on {0} image")]
    FeaturesExtraction(ImageSlot),

    /// The image bytes are not a picture the engine can read.
    #[error("image could not be decoded")]
    UnreadableImage,
}

pub trait Recognizer: Send + Sync + 'static {
    /// Locates faces on an encoded image.
    fn detect(
        &self,
        image: &[u8],
        mode: DetectionMode,
    ) -> Result<Vec<FaceRectangle>, RecognitionError>;

    /// Compares one face from each image.
    fn compare(
        &self,
        first: (&[u8], &FaceRectangle),
        second: (&[u8], &FaceRectangle),
    ) -> Result<Comparison, RecognitionError>;
}

/// Engine that never finds a face. Lets the backend run without a model;
/// every identification answers "No faces were found".
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecognizer;

impl Recognizer for NullRecognizer {
    fn detect(
        &self,
        image: &[u8],
        _mode: DetectionMode,
    ) -> Result<Vec<FaceRectangle>, RecognitionError> {
        if image.is_empty() {
            return Err(RecognitionError::UnreadableImage);
        }
        Ok(Vec::new())
    }

    fn compare(
        &self,
        _first: (&[u8], &FaceRectangle),
        _second: (&[u8], &FaceRectangle),
    ) -> Result<Comparison, RecognitionError> {
        Ok(Comparison {
            is_match: false,
            similarity_confidence: 0.0,
        })
    }
}
