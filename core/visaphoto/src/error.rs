use thiserror::Error;

use crate::plan::FaceBox;

/// Everything that can go wrong while planning or processing a photo.
#[derive(Debug, Error)]
pub enum VisaPhotoError {
    #[error("failed to decode image: {0}")]
    DecodeError(String),

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("image dimensions must be positive, got {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("face box must have finite coordinates and a positive height, got {face:?}")]
    DegenerateFace { face: FaceBox },

    #[error("failed to encode image: {0}")]
    EncodeError(String),

    #[error("quality must be between 0.0 and 1.0, got {0}")]
    InvalidQuality(f32),

    #[error("invalid planner configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to initialise face detector: {0}")]
    DetectorInit(String),
}
