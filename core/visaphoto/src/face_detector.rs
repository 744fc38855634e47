use serde::{Deserialize, Serialize};

use crate::plan::FaceBox;

/// Bounding box of a detected face within an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceBounds {
    /// X coordinate of the top-left corner (pixels).
    pub x: f64,
    /// Y coordinate of the top-left corner (pixels).
    pub y: f64,
    /// Width of the bounding box (pixels).
    pub width: f64,
    /// Height of the bounding box (pixels).
    pub height: f64,
    /// Detection confidence score.
    pub confidence: f64,
}

impl FaceBounds {
    /// Geometry of this detection, without the score.
    pub fn to_face_box(&self) -> FaceBox {
        FaceBox {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

impl From<&FaceBounds> for FaceBox {
    fn from(bounds: &FaceBounds) -> Self {
        bounds.to_face_box()
    }
}

/// Pluggable face detection backend.
///
/// Implementations are created once, with any model loading done in their
/// constructor, and then shared across calls and threads. Implement this
/// trait to plug in ONNX, dlib, or any other engine and pass it to
/// [`crate::PhotoProcessor::face_detector`].
pub trait FaceDetector: Send + Sync {
    /// Detect faces in a row-major grayscale buffer of `width` × `height` bytes.
    fn detect(&self, gray: &[u8], width: u32, height: u32) -> Vec<FaceBounds>;
}

/// Pick the face to plan around: the highest-confidence detection whose box
/// is usable. Degenerate boxes count as no detection.
pub fn primary_face(faces: &[FaceBounds]) -> Option<&FaceBounds> {
    faces
        .iter()
        .filter(|face| !face.to_face_box().is_degenerate())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}
