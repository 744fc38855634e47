use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::VisaPhotoError;
use crate::face_detector::{FaceBounds, FaceDetector};

/// Face detector backed by the `rustface` crate (SeetaFace engine).
///
/// The model is parsed once, when the detector is constructed. Each call to
/// [`FaceDetector::detect`] builds a lightweight detector around a clone of
/// that model, so one `RustfaceDetector` can serve concurrent requests.
pub struct RustfaceDetector {
    model: rustface::Model,
}

impl RustfaceDetector {
    /// Load a SeetaFace model file (e.g. `seeta_fd_frontal_v1.0.bin`).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, VisaPhotoError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            VisaPhotoError::DetectorInit(format!("cannot open {}: {e}", path.display()))
        })?;
        let detector = Self::from_reader(BufReader::new(file))?;
        tracing::info!(model = %path.display(), "face detection model loaded");
        Ok(detector)
    }

    /// Load a SeetaFace model from any reader.
    pub fn from_reader(reader: impl Read) -> Result<Self, VisaPhotoError> {
        let model = rustface::read_model(reader)
            .map_err(|e| VisaPhotoError::DetectorInit(e.to_string()))?;
        Ok(Self { model })
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&self, gray: &[u8], width: u32, height: u32) -> Vec<FaceBounds> {
        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(20);
        detector.set_score_thresh(2.0);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let faces = detector.detect(&rustface::ImageData::new(gray, width, height));

        faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceBounds {
                    x: f64::from(bbox.x()),
                    y: f64::from(bbox.y()),
                    width: f64::from(bbox.width()),
                    height: f64::from(bbox.height()),
                    confidence: face.score(),
                }
            })
            .collect()
    }
}
