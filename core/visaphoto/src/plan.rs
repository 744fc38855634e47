//! Crop geometry for 35:45 visa photos.
//!
//! Everything in this module is arithmetic over dimensions and face boxes.
//! The pixel work a [`CropPlan`] describes is carried out by the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::VisaPhotoError;

/// Output width in pixels.
pub const OUTPUT_WIDTH: u32 = 350;

/// Output height in pixels.
pub const OUTPUT_HEIGHT: u32 = 450;

/// Output aspect ratio: 35:45 (width / height).
pub const OUTPUT_RATIO: f64 = 35.0 / 45.0;

/// Default target head height as a fraction of the stage-1 image height.
pub const HEAD_HEIGHT_RATIO: f64 = 0.7;

/// Default multiplier from detected face-box height to full head height.
/// Detector boxes cover brow to chin, not scalp to chin.
pub const FACE_TO_HEAD_MULTIPLIER: f64 = 1.5;

/// Default fraction of the output height at which the face center sits.
/// 0.0 = top edge, 0.5 = vertical center.
pub const VERTICAL_FACE_OFFSET: f64 = 0.4;

// Integer terms of OUTPUT_RATIO, for exact aspect comparisons.
const RATIO_WIDTH: u64 = 35;
const RATIO_HEIGHT: u64 = 45;

/// Pixel extents of an image at some processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ImageDimensions {
    /// The fixed 350×450 output size.
    pub const OUTPUT: Self = Self {
        width: OUTPUT_WIDTH,
        height: OUTPUT_HEIGHT,
    };

    /// Create dimensions, rejecting a zero width or height.
    pub fn new(width: u32, height: u32) -> Result<Self, VisaPhotoError> {
        if width == 0 || height == 0 {
            return Err(VisaPhotoError::InvalidDimensions { width, height });
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Axis-aligned face region in stage-1 image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    /// Left edge; may be negative when the detector box leaves the frame.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Box width.
    pub width: f64,
    /// Box height, brow to chin.
    pub height: f64,
}

impl FaceBox {
    /// Center point of the box.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// A box is usable for planning when every coordinate is finite and the
    /// height is positive. Width is never divided by, so it is not checked.
    pub fn is_degenerate(&self) -> bool {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        !finite || self.height <= 0.0
    }
}

/// Rectangle cut from a containing image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRectangle {
    /// Offset of the left edge.
    pub left: u32,
    /// Offset of the top edge.
    pub top: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl CropRectangle {
    /// Whether the rectangle lies entirely inside `container`.
    pub fn fits_within(&self, container: ImageDimensions) -> bool {
        u64::from(self.left) + u64::from(self.width) <= u64::from(container.width)
            && u64::from(self.top) + u64::from(self.height) <= u64::from(container.height)
    }
}

/// How a resize reaches its target dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFit {
    /// Scale to fill the target and crop the excess, centered.
    Cover,
    /// Scale each axis independently to the exact target.
    Exact,
}

/// A single resize instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    /// Dimensions after the resize.
    pub target: ImageDimensions,
    /// How the source is fitted to `target`.
    pub fit: ResizeFit,
}

impl Resize {
    fn cover(target: ImageDimensions) -> Self {
        Self {
            target,
            fit: ResizeFit::Cover,
        }
    }
}

/// Why a plan fell back to a plain cover-fit resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The detector found no usable face.
    NoFace,
    /// The face-centered crop could not be placed inside the scaled image.
    OutOfBounds,
    /// The scaled image would exceed the addressable pixel range.
    ScaledTooLarge,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoFace => "no face detected",
            Self::OutOfBounds => "crop area out of bounds",
            Self::ScaledTooLarge => "scaled image too large",
        };
        f.write_str(text)
    }
}

/// Final geometry applied to the stage-1 image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CropPlan {
    /// Resize the stage-1 image exactly to `scale.target`, then extract.
    FaceCentered {
        /// Exact resize of the stage-1 image.
        scale: Resize,
        /// 350×450 window inside `scale.target`.
        extract: CropRectangle,
    },
    /// Cover-fit the stage-1 image straight to the output size.
    CoverFit {
        /// Cover resize to 350×450.
        resize: Resize,
        /// Why no face-centered crop was planned.
        reason: FallbackReason,
    },
}

impl CropPlan {
    fn cover_fit(reason: FallbackReason) -> Self {
        CropPlan::CoverFit {
            resize: Resize::cover(ImageDimensions::OUTPUT),
            reason,
        }
    }

    /// Dimensions of the image this plan produces. Always 350×450.
    pub fn output_dimensions(&self) -> ImageDimensions {
        match self {
            CropPlan::FaceCentered { extract, .. } => ImageDimensions {
                width: extract.width,
                height: extract.height,
            },
            CropPlan::CoverFit { resize, .. } => resize.target,
        }
    }

    /// Whether the crop is framed around a detected face.
    pub fn is_face_centered(&self) -> bool {
        matches!(self, CropPlan::FaceCentered { .. })
    }

    /// Why the plan fell back to cover-fit, or `None` for a face-centered plan.
    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            CropPlan::FaceCentered { .. } => None,
            CropPlan::CoverFit { reason, .. } => Some(*reason),
        }
    }
}

/// Tunable constants of the face-centered plan.
///
/// The output size and aspect ratio are fixed; these three are empirical
/// and may be recalibrated without touching the planner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Target head height as a fraction of the stage-1 image height.
    pub head_height_ratio: f64,
    /// Face-box height to head height multiplier.
    pub face_to_head_multiplier: f64,
    /// Fraction of the output height placed above the face center.
    pub vertical_face_offset: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            head_height_ratio: HEAD_HEIGHT_RATIO,
            face_to_head_multiplier: FACE_TO_HEAD_MULTIPLIER,
            vertical_face_offset: VERTICAL_FACE_OFFSET,
        }
    }
}

impl PlannerConfig {
    /// Check that both ratios are positive and finite and that the vertical
    /// offset lies within `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`VisaPhotoError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), VisaPhotoError> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(VisaPhotoError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )))
            }
        };
        positive("head_height_ratio", self.head_height_ratio)?;
        positive("face_to_head_multiplier", self.face_to_head_multiplier)?;

        if !(0.0..=1.0).contains(&self.vertical_face_offset) {
            return Err(VisaPhotoError::InvalidConfig(format!(
                "vertical_face_offset must be within [0, 1], got {}",
                self.vertical_face_offset
            )));
        }
        Ok(())
    }
}

/// Computes the two resize stages of a visa photo.
///
/// Stateless apart from its configuration: identical inputs always yield
/// identical plans, and one planner can be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct CropPlanner {
    config: PlannerConfig,
}

impl CropPlanner {
    /// Create a planner with a validated configuration.
    pub fn new(config: PlannerConfig) -> Result<Self, VisaPhotoError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configuration this planner was built with.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Stage-1 cover resize that normalizes the original toward 35:45.
    ///
    /// The dominant axis is kept (or raised to the output floor) and the
    /// other axis is derived from the target ratio, so the result is never
    /// smaller than 350×450.
    ///
    /// The derived axis is computed in integers and rounded to the nearest
    /// pixel. It never exceeds the original's matching axis (or the output
    /// floor), so any non-zero `u32` dimensions are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`VisaPhotoError::InvalidDimensions`] for a zero side, or if
    /// the derived side does not fit in `u32`.
    pub fn stage1_target(&self, original: ImageDimensions) -> Result<Resize, VisaPhotoError> {
        let original = ImageDimensions::new(original.width, original.height)?;

        let wider_than_target = u64::from(original.width) * RATIO_HEIGHT
            > u64::from(original.height) * RATIO_WIDTH;

        let (width, height) = if wider_than_target {
            let h = original.height.max(OUTPUT_HEIGHT);
            let w = rounded_ratio(u64::from(h), RATIO_WIDTH, RATIO_HEIGHT);
            (w, u64::from(h))
        } else {
            let w = original.width.max(OUTPUT_WIDTH);
            let h = rounded_ratio(u64::from(w), RATIO_HEIGHT, RATIO_WIDTH);
            (u64::from(w), h)
        };

        let invalid = |_| VisaPhotoError::InvalidDimensions {
            width: original.width,
            height: original.height,
        };
        Ok(Resize::cover(ImageDimensions {
            width: u32::try_from(width).map_err(invalid)?,
            height: u32::try_from(height).map_err(invalid)?,
        }))
    }

    /// Scale and crop so the estimated head fills the configured share of the
    /// image, with the face center placed at the configured vertical offset.
    ///
    /// Geometry that cannot produce an in-bounds 350×450 extract yields a
    /// cover-fit plan instead of an error. Only a degenerate face box is
    /// rejected.
    pub fn plan_with_face(
        &self,
        stage1: ImageDimensions,
        face: &FaceBox,
    ) -> Result<CropPlan, VisaPhotoError> {
        if face.is_degenerate() {
            return Err(VisaPhotoError::DegenerateFace { face: *face });
        }
        let config = &self.config;

        let head_height = face.height * config.face_to_head_multiplier;
        let scale = f64::from(stage1.height) * config.head_height_ratio / head_height;

        let scaled_width = (f64::from(stage1.width) * scale).round();
        let scaled_height = (f64::from(stage1.height) * scale).round();
        let max_side = f64::from(u32::MAX);
        if !(scaled_width <= max_side && scaled_height <= max_side) {
            return Ok(CropPlan::cover_fit(FallbackReason::ScaledTooLarge));
        }
        let scaled_width = scaled_width as i64;
        let scaled_height = scaled_height as i64;

        let output_width = i64::from(OUTPUT_WIDTH);
        let output_height = i64::from(OUTPUT_HEIGHT);

        let (center_x, center_y) = face.center();
        let left = ((center_x * scale - output_width as f64 / 2.0).round() as i64).max(0);
        let top = ((center_y * scale - output_height as f64 * config.vertical_face_offset).round()
            as i64)
            .max(0);

        let left = left.min(scaled_width - output_width);
        let top = top.min(scaled_height - output_height);

        let in_bounds = left >= 0
            && top >= 0
            && left + output_width <= scaled_width
            && top + output_height <= scaled_height;
        if !in_bounds {
            return Ok(CropPlan::cover_fit(FallbackReason::OutOfBounds));
        }

        Ok(CropPlan::FaceCentered {
            scale: Resize {
                target: ImageDimensions {
                    width: scaled_width as u32,
                    height: scaled_height as u32,
                },
                fit: ResizeFit::Exact,
            },
            extract: CropRectangle {
                left: left as u32,
                top: top as u32,
                width: OUTPUT_WIDTH,
                height: OUTPUT_HEIGHT,
            },
        })
    }

    /// Plan used when no face was found.
    pub fn plan_without_face(&self) -> CropPlan {
        CropPlan::cover_fit(FallbackReason::NoFace)
    }

    /// Plan the second stage: face-centered when a face is given, cover-fit
    /// otherwise.
    pub fn plan(
        &self,
        stage1: ImageDimensions,
        face: Option<&FaceBox>,
    ) -> Result<CropPlan, VisaPhotoError> {
        match face {
            Some(face) => self.plan_with_face(stage1, face),
            None => Ok(self.plan_without_face()),
        }
    }
}

/// `value * numerator / denominator`, rounded half up. Inputs stay below
/// 2^32 so the products cannot overflow.
fn rounded_ratio(value: u64, numerator: u64, denominator: u64) -> u64 {
    (2 * value * numerator + denominator) / (2 * denominator)
}
