//! Passport and visa photo processing: face-aware 35:45 crops at 350×450.
//!
//! The geometry lives in [`plan`] and is usable on its own. [`PhotoProcessor`]
//! runs it end to end over encoded image bytes.
//!
//! # Example
//!
//! ```no_run
//! use visaphoto::PhotoProcessor;
//!
//! let raw_bytes = std::fs::read("photo.jpg").unwrap();
//! let processor = PhotoProcessor::new();
//! let result = processor.process(&raw_bytes).unwrap();
//! assert_eq!((result.width, result.height), (350, 450));
//! ```
#![warn(missing_docs)]

mod error;
/// Face detection traits and data types.
pub mod face_detector;
/// Crop geometry: stage-1 normalization and face-centered planning.
pub mod plan;
mod process;
#[cfg(feature = "rustface")]
/// Built-in SeetaFace-based face detector backend.
pub mod rustface_backend;

use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Error type returned by visaphoto operations.
pub use error::VisaPhotoError;
/// Face detection trait and face bounding-box type.
pub use face_detector::{primary_face, FaceBounds, FaceDetector};
pub use plan::{
    CropPlan, CropPlanner, CropRectangle, FaceBox, FallbackReason, ImageDimensions,
    PlannerConfig, Resize, ResizeFit,
};
#[cfg(feature = "rustface")]
/// Built-in detector that loads a SeetaFace model file.
pub use rustface_backend::RustfaceDetector;

/// Output image format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless PNG.
    #[default]
    Png,

    /// JPEG encoding at the configured quality.
    Jpeg,
}

impl OutputFormat {
    /// MIME type used in data URLs.
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    /// Conventional file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

/// Result of processing a single photo.
#[derive(Debug, Clone)]
pub struct ProcessedPhoto {
    /// The encoded image bytes.
    pub data: Vec<u8>,

    /// The output format used.
    pub format: OutputFormat,

    /// Width of the output image in pixels (always 350).
    pub width: u32,

    /// Height of the output image in pixels (always 450).
    pub height: u32,

    /// Size of the original input in bytes.
    pub original_size: usize,

    /// Dimensions of the 35:45-normalized image the face was searched in.
    pub stage1: ImageDimensions,

    /// The final crop plan that produced the output.
    pub plan: CropPlan,

    /// Primary face in stage-1 coordinates, if one was detected.
    pub detected_face: Option<FaceBounds>,
}

impl ProcessedPhoto {
    /// Encode the image as a `data:` URL, e.g. `data:image/png;base64,...`.
    pub fn to_data_url(&self) -> String {
        let payload = base64::engine::general_purpose::STANDARD.encode(&self.data);
        format!("data:{};base64,{payload}", self.format.mime_type())
    }
}

/// Builder for processing visa photos.
///
/// Configure once, then call [`PhotoProcessor::process`] for each upload.
/// The processor is `Send + Sync`; the face detector it holds is initialised
/// by the caller before it is handed over and is shared by every call.
#[derive(Clone)]
pub struct PhotoProcessor {
    planner: CropPlanner,
    format: OutputFormat,
    quality: f32,
    /// When `None`, no detection runs and every photo takes the cover-fit path.
    detector: Option<Arc<dyn FaceDetector>>,
}

impl Default for PhotoProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PhotoProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoProcessor")
            .field("planner", &self.planner)
            .field("format", &self.format)
            .field("quality", &self.quality)
            .field("detector", &self.detector.is_some())
            .finish()
    }
}

impl PhotoProcessor {
    /// Create a processor with default planner constants, PNG output and no
    /// face detector.
    pub fn new() -> Self {
        Self {
            planner: CropPlanner::default(),
            format: OutputFormat::default(),
            quality: 0.9,
            detector: None,
        }
    }

    /// Replace the planner constants (head ratio, face multiplier, offset).
    pub fn planner_config(mut self, config: PlannerConfig) -> Result<Self, VisaPhotoError> {
        self.planner = CropPlanner::new(config)?;
        Ok(self)
    }

    /// Set the output format (default: `OutputFormat::Png`).
    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the JPEG quality from 0.0 (lowest) to 1.0 (highest).
    /// Default: 0.9. Ignored for PNG.
    pub fn quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    /// Provide the face detector.
    ///
    /// ```no_run
    /// use visaphoto::{FaceBounds, FaceDetector, PhotoProcessor};
    ///
    /// struct MyDetector;
    /// impl FaceDetector for MyDetector {
    ///     fn detect(&self, gray: &[u8], width: u32, height: u32) -> Vec<FaceBounds> {
    ///         // Your detection logic here
    ///         vec![]
    ///     }
    /// }
    ///
    /// let processor = PhotoProcessor::new().face_detector(MyDetector);
    /// ```
    pub fn face_detector(mut self, detector: impl FaceDetector + 'static) -> Self {
        self.detector = Some(Arc::new(detector));
        self
    }

    /// Share an already-constructed detector with this processor.
    pub fn shared_face_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// The planner this processor uses.
    pub fn planner(&self) -> &CropPlanner {
        &self.planner
    }

    /// Decode, plan and crop one photo to 350×450.
    pub fn process(&self, input: &[u8]) -> Result<ProcessedPhoto, VisaPhotoError> {
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(VisaPhotoError::InvalidQuality(self.quality));
        }

        process::process_pipeline(
            input,
            &self.planner,
            self.detector.as_deref(),
            &self.format,
            self.quality,
        )
    }

    /// Compute the plan for one photo without producing pixels.
    ///
    /// Runs decode, stage-1 resize and detection, and returns the stage-1
    /// dimensions together with the plan.
    pub fn plan(&self, input: &[u8]) -> Result<(Resize, CropPlan), VisaPhotoError> {
        process::plan_only(input, &self.planner, self.detector.as_deref())
    }
}
