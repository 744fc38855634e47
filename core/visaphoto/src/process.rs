use std::f64::consts::PI;
use std::ops::Range;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageEncoder, ImageFormat, RgbImage, RgbaImage};

use crate::error::VisaPhotoError;
use crate::face_detector::{primary_face, FaceBounds, FaceDetector};
use crate::plan::{CropPlan, CropPlanner, CropRectangle, ImageDimensions, Resize, ResizeFit};
use crate::{OutputFormat, ProcessedPhoto};

/// Decode input bytes into a `DynamicImage`.
pub(crate) fn decode_image(input: &[u8]) -> Result<DynamicImage, VisaPhotoError> {
    image::load_from_memory(input).map_err(|e| VisaPhotoError::DecodeError(e.to_string()))
}

/// Detect the input image format from the raw bytes.
pub(crate) fn detect_format(input: &[u8]) -> Result<ImageFormat, VisaPhotoError> {
    let format =
        image::guess_format(input).map_err(|e| VisaPhotoError::DecodeError(e.to_string()))?;
    match format {
        ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP => Ok(format),
        _ => Err(VisaPhotoError::UnsupportedFormat),
    }
}

/// Lanczos3 kernel radius at unit scale.
const LANCZOS_SUPPORT: f64 = 3.0;

/// Execute a single resize instruction.
///
/// A cover resize crops the source to the target aspect first, so nothing
/// larger than the target is ever allocated.
pub(crate) fn apply_resize(image: &DynamicImage, resize: &Resize) -> DynamicImage {
    let ImageDimensions { width, height } = resize.target;
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    match resize.fit {
        ResizeFit::Cover => {
            let source = ImageDimensions {
                width: image.width(),
                height: image.height(),
            };
            let window = cover_window(source, resize.target);
            image
                .crop_imm(window.left, window.top, window.width, window.height)
                .resize_exact(width, height, FilterType::Lanczos3)
        }
        ResizeFit::Exact => image.resize_exact(width, height, FilterType::Lanczos3),
    }
}

/// Centered part of `source` with the aspect ratio of `target`.
fn cover_window(source: ImageDimensions, target: ImageDimensions) -> CropRectangle {
    let (src_w, src_h) = (u64::from(source.width), u64::from(source.height));
    let (dst_w, dst_h) = (u64::from(target.width), u64::from(target.height));

    let (width, height) = if src_w * dst_h > src_h * dst_w {
        let width = (2 * src_h * dst_w + dst_h) / (2 * dst_h);
        (width.clamp(1, src_w), src_h)
    } else {
        let height = (2 * src_w * dst_h + dst_w) / (2 * dst_w);
        (src_w, height.clamp(1, src_h))
    };

    // Both sides are clamped to the source, so they fit in u32
    CropRectangle {
        left: ((src_w - width) / 2) as u32,
        top: ((src_h - height) / 2) as u32,
        width: width as u32,
        height: height as u32,
    }
}

/// Run the detector on the stage-1 image and keep the primary face.
pub(crate) fn detect_primary_face(
    image: &DynamicImage,
    detector: &dyn FaceDetector,
) -> Option<FaceBounds> {
    let gray = image::imageops::grayscale(image);
    let faces = detector.detect(gray.as_raw(), gray.width(), gray.height());

    if faces.len() > 1 {
        tracing::debug!(count = faces.len(), "multiple faces detected, using the primary one");
    }
    primary_face(&faces).cloned()
}

/// Apply the final plan to the stage-1 image.
pub(crate) fn apply_plan(stage1: &DynamicImage, plan: &CropPlan) -> DynamicImage {
    match plan {
        CropPlan::FaceCentered { scale, extract } => {
            scale_and_extract(stage1, scale.target, *extract)
        }
        CropPlan::CoverFit { resize, .. } => apply_resize(stage1, resize),
    }
}

/// Lanczos3-resize `image` to `scaled` and cut out `extract`, computing only
/// the extract's pixels.
///
/// Sampling positions and kernel weights are those of the full resize, and
/// every tap reads real source pixels up to the image border, so the result
/// matches `resize_exact` followed by `crop_imm` without allocating the
/// scaled image.
fn scale_and_extract(
    image: &DynamicImage,
    scaled: ImageDimensions,
    extract: CropRectangle,
) -> DynamicImage {
    let (src_w, src_h) = image.dimensions();
    let columns = axis_taps(src_w, scaled.width, extract.left..extract.left + extract.width);
    let rows = axis_taps(src_h, scaled.height, extract.top..extract.top + extract.height);

    let (x0, x1) = tap_span(&columns);
    let (y0, y1) = tap_span(&rows);
    let region = image.crop_imm(x0, y0, x1 - x0, y1 - y0).to_rgba8();
    let region_width = (x1 - x0) as usize;

    // Vertical pass over the source columns the horizontal taps need
    let mut vertical = vec![[0.0f64; 4]; rows.len() * region_width];
    for (line, taps) in vertical.chunks_exact_mut(region_width).zip(&rows) {
        for (k, weight) in taps.weights.iter().enumerate() {
            let y = taps.start + k as u32 - y0;
            for (x, acc) in line.iter_mut().enumerate() {
                let pixel = region.get_pixel(x as u32, y).0;
                for (a, channel) in acc.iter_mut().zip(pixel) {
                    *a += f64::from(channel) * weight;
                }
            }
        }
    }

    let mut out = RgbaImage::new(extract.width, extract.height);
    for (y, line) in vertical.chunks_exact(region_width).enumerate() {
        for (x, taps) in columns.iter().enumerate() {
            let offset = (taps.start - x0) as usize;
            let mut acc = [0.0f64; 4];
            for (sample, weight) in line[offset..].iter().zip(&taps.weights) {
                for (a, channel) in acc.iter_mut().zip(sample) {
                    *a += channel * weight;
                }
            }
            let pixel = acc.map(|v| v.clamp(0.0, 255.0).round() as u8);
            out.put_pixel(x as u32, y as u32, image::Rgba(pixel));
        }
    }

    let out = DynamicImage::ImageRgba8(out);
    if image.color().has_alpha() {
        out
    } else {
        DynamicImage::ImageRgb8(out.to_rgb8())
    }
}

/// Normalized source weights for one output pixel along one axis.
struct Taps {
    start: u32,
    weights: Vec<f64>,
}

/// Taps for the output positions in `outputs` when resizing an axis of
/// `src_len` pixels to `dst_len`.
///
/// Downscaling widens the kernel by the scale ratio. Taps past the border are
/// dropped and the rest renormalized.
fn axis_taps(src_len: u32, dst_len: u32, outputs: Range<u32>) -> Vec<Taps> {
    let ratio = f64::from(src_len) / f64::from(dst_len);
    let stretch = ratio.max(1.0);
    let support = LANCZOS_SUPPORT * stretch;

    outputs
        .map(|out| {
            let center = (f64::from(out) + 0.5) * ratio;
            let start = ((center - support).floor().max(0.0) as u32).min(src_len - 1);
            let end = ((center + support).ceil().max(0.0) as u32).clamp(start + 1, src_len);

            let mut weights: Vec<f64> = (start..end)
                .map(|i| lanczos3((f64::from(i) - (center - 0.5)) / stretch))
                .collect();
            let sum: f64 = weights.iter().sum();
            if sum != 0.0 {
                weights.iter_mut().for_each(|w| *w /= sum);
            }
            Taps { start, weights }
        })
        .collect()
}

/// Source range `[first, last)` read by any of `taps`.
fn tap_span(taps: &[Taps]) -> (u32, u32) {
    let first = taps.iter().map(|t| t.start).min().unwrap_or(0);
    let last = taps
        .iter()
        .map(|t| t.start + t.weights.len() as u32)
        .max()
        .unwrap_or(first + 1);
    (first, last)
}

fn lanczos3(x: f64) -> f64 {
    if x == 0.0 {
        return 1.0;
    }
    if x.abs() >= LANCZOS_SUPPORT {
        return 0.0;
    }
    let px = PI * x;
    LANCZOS_SUPPORT * px.sin() * (px / LANCZOS_SUPPORT).sin() / (px * px)
}

/// Flatten alpha channel by compositing onto a white background.
pub(crate) fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba: RgbaImage = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as f32 / 255.0;
        let white = 255.0 * (1.0 - alpha);
        let blend = |c: u8| (c as f32 * alpha + white).round() as u8;
        rgb.put_pixel(x, y, image::Rgb([blend(r), blend(g), blend(b)]));
    }

    rgb
}

/// Encode an RGB image to the requested format.
///
/// `quality` (0.0–1.0) only affects JPEG; PNG is lossless.
pub(crate) fn encode_image(
    image: &RgbImage,
    format: &OutputFormat,
    quality: f32,
) -> Result<Vec<u8>, VisaPhotoError> {
    let mut buffer = Vec::new();
    let (width, height) = (image.width(), image.height());

    match format {
        OutputFormat::Png => {
            PngEncoder::new(&mut buffer)
                .write_image(image.as_raw(), width, height, image::ExtendedColorType::Rgb8)
                .map_err(|e| VisaPhotoError::EncodeError(e.to_string()))?;
        }
        OutputFormat::Jpeg => {
            let quality_percent = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
            JpegEncoder::new_with_quality(&mut buffer, quality_percent)
                .write_image(image.as_raw(), width, height, image::ExtendedColorType::Rgb8)
                .map_err(|e| VisaPhotoError::EncodeError(e.to_string()))?;
        }
    }

    Ok(buffer)
}

/// Everything decided before pixels are cropped.
struct Prepared {
    stage1: Resize,
    normalized: DynamicImage,
    detected_face: Option<FaceBounds>,
    plan: CropPlan,
}

/// Decode → stage-1 resize → detect → plan.
fn prepare(
    input: &[u8],
    planner: &CropPlanner,
    detector: Option<&dyn FaceDetector>,
) -> Result<Prepared, VisaPhotoError> {
    detect_format(input)?;
    let decoded = decode_image(input)?;
    let original = ImageDimensions::new(decoded.width(), decoded.height())?;
    tracing::debug!(%original, "decoded input");

    let stage1 = planner.stage1_target(original)?;
    let normalized = apply_resize(&decoded, &stage1);
    tracing::debug!(stage1 = %stage1.target, "normalized to 35:45");

    let detected_face = match detector {
        Some(detector) => detect_primary_face(&normalized, detector),
        None => None,
    };
    let face_box = detected_face.as_ref().map(FaceBounds::to_face_box);
    if let Some(face) = &face_box {
        tracing::debug!(
            x = face.x,
            y = face.y,
            width = face.width,
            height = face.height,
            "face detected"
        );
    }

    let plan = planner.plan(stage1.target, face_box.as_ref())?;
    match &plan {
        CropPlan::FaceCentered { scale, extract } => tracing::debug!(
            scaled = %scale.target,
            left = extract.left,
            top = extract.top,
            "face-centered crop"
        ),
        CropPlan::CoverFit { reason, .. } => {
            tracing::warn!(%reason, "falling back to cover-fit crop")
        }
    }

    Ok(Prepared {
        stage1,
        normalized,
        detected_face,
        plan,
    })
}

/// Stage-1 resize and final plan for an input, without cropping or encoding.
pub(crate) fn plan_only(
    input: &[u8],
    planner: &CropPlanner,
    detector: Option<&dyn FaceDetector>,
) -> Result<(Resize, CropPlan), VisaPhotoError> {
    let prepared = prepare(input, planner, detector)?;
    Ok((prepared.stage1, prepared.plan))
}

/// Full pipeline: decode → stage-1 resize → detect → plan → crop → flatten → encode.
#[tracing::instrument(level = "debug", skip_all, fields(input_bytes = input.len()))]
pub(crate) fn process_pipeline(
    input: &[u8],
    planner: &CropPlanner,
    detector: Option<&dyn FaceDetector>,
    format: &OutputFormat,
    quality: f32,
) -> Result<ProcessedPhoto, VisaPhotoError> {
    let Prepared {
        stage1,
        normalized,
        detected_face,
        plan,
    } = prepare(input, planner, detector)?;

    let cropped = apply_plan(&normalized, &plan);
    let rgb = flatten_alpha(&cropped);
    let data = encode_image(&rgb, format, quality)?;

    tracing::info!(
        width = rgb.width(),
        height = rgb.height(),
        output_bytes = data.len(),
        face_centered = plan.is_face_centered(),
        "photo processed"
    );

    Ok(ProcessedPhoto {
        data,
        format: *format,
        width: rgb.width(),
        height: rgb.height(),
        original_size: input.len(),
        stage1: stage1.target,
        plan,
        detected_face,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{FaceBox, FallbackReason, OUTPUT_HEIGHT, OUTPUT_WIDTH};

    fn make_test_rgb(width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            // Simple gradient pattern
            *pixel = image::Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                128,
            ]);
        }
        img
    }

    fn make_test_png(width: u32, height: u32) -> Vec<u8> {
        let img = make_test_rgb(width, height);
        let mut buffer = Vec::new();
        PngEncoder::new(&mut buffer)
            .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        buffer
    }

    struct FixedDetector(Vec<FaceBounds>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _gray: &[u8], _width: u32, _height: u32) -> Vec<FaceBounds> {
            self.0.clone()
        }
    }

    #[test]
    fn encode_png_produces_valid_output() {
        let img = make_test_rgb(35, 45);
        let data = encode_image(&img, &OutputFormat::Png, 0.9).unwrap();
        assert_eq!(&data[0..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn encode_jpeg_produces_valid_output() {
        let img = make_test_rgb(35, 45);
        let data = encode_image(&img, &OutputFormat::Jpeg, 0.8).unwrap();
        // JPEG magic bytes
        assert_eq!(data[0], 0xFF);
        assert_eq!(data[1], 0xD8);
    }

    #[test]
    fn detect_format_rejects_unsupported_containers() {
        // GIF header
        let result = detect_format(b"GIF89a\x01\x00\x01\x00\x00\x00\x00");
        assert!(matches!(result, Err(VisaPhotoError::UnsupportedFormat)));
        assert_eq!(detect_format(&make_test_png(2, 2)).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn flatten_alpha_composites_over_white() {
        // Fully transparent pixel should become white
        let mut rgba = RgbaImage::new(1, 1);
        rgba.put_pixel(0, 0, image::Rgba([255, 0, 0, 0]));
        let rgb = flatten_alpha(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0), &image::Rgb([255, 255, 255]));
    }

    #[test]
    fn flatten_alpha_preserves_opaque() {
        let mut rgba = RgbaImage::new(1, 1);
        rgba.put_pixel(0, 0, image::Rgba([100, 150, 200, 255]));
        let rgb = flatten_alpha(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0), &image::Rgb([100, 150, 200]));
    }

    #[test]
    fn cover_resize_fills_target() {
        let img = DynamicImage::ImageRgb8(make_test_rgb(1000, 1000));
        let stage1 = CropPlanner::default()
            .stage1_target(ImageDimensions::new(1000, 1000).unwrap())
            .unwrap();
        let resized = apply_resize(&img, &stage1);
        assert_eq!((resized.width(), resized.height()), (778, 1000));
    }

    #[test]
    fn cover_fit_plan_yields_output_size() {
        let img = DynamicImage::ImageRgb8(make_test_rgb(778, 1000));
        let plan = CropPlanner::default().plan_without_face();
        let out = apply_plan(&img, &plan);
        assert_eq!((out.width(), out.height()), (OUTPUT_WIDTH, OUTPUT_HEIGHT));
    }

    #[test]
    fn face_centered_plan_yields_output_size() {
        let img = DynamicImage::ImageRgb8(make_test_rgb(778, 1000));
        let planner = CropPlanner::default();
        let stage1 = ImageDimensions::new(778, 1000).unwrap();

        for face in [
            FaceBox { x: 300.0, y: 200.0, width: 150.0, height: 150.0 },
            FaceBox { x: 750.0, y: 900.0, width: 28.0, height: 100.0 },
            FaceBox { x: -5.0, y: -20.0, width: 10.0, height: 40.0 },
            FaceBox { x: 100.0, y: 50.0, width: 600.0, height: 650.0 },
        ] {
            let plan = planner.plan_with_face(stage1, &face).unwrap();
            assert!(plan.is_face_centered(), "{face:?}");
            let out = apply_plan(&img, &plan);
            assert_eq!((out.width(), out.height()), (OUTPUT_WIDTH, OUTPUT_HEIGHT), "{face:?}");
        }
    }

    /// Smooth two-frequency texture that stays clear of 0 and 255.
    fn make_textured_rgb(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let (fx, fy) = (x as f32, y as f32);
            let wave = |a: f32, b: f32| (128.0 + 60.0 * a.sin() + 35.0 * b.cos()) as u8;
            image::Rgb([
                wave(fx / 3.0, fy / 5.0),
                wave((fx + fy) / 4.0, fx / 7.0),
                wave(fy / 2.5, (fx - fy) / 6.0),
            ])
        })
    }

    fn max_channel_diff(a: &RgbImage, b: &RgbImage) -> u8 {
        a.pixels()
            .zip(b.pixels())
            .flat_map(|(p, q)| p.0.into_iter().zip(q.0).map(|(c, d)| c.abs_diff(d)))
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn windowed_extract_matches_full_resize() {
        let img = DynamicImage::ImageRgb8(make_textured_rgb(300, 400));

        // Upscale (about 3.1x) and downscale (about 0.72x), with extracts in
        // the interior and against every border
        let cases = [
            (ImageDimensions::new(933, 1244).unwrap(), [(400, 500), (0, 0), (583, 794), (0, 794)]),
            (ImageDimensions::new(430, 573).unwrap(), [(40, 60), (0, 0), (80, 123), (80, 0)]),
        ];

        for (scaled, origins) in cases {
            let full = img.resize_exact(scaled.width, scaled.height, FilterType::Lanczos3);
            for (left, top) in origins {
                let extract = CropRectangle { left, top, width: 350, height: 450 };
                let expected = full.crop_imm(left, top, 350, 450).to_rgb8();
                let windowed = scale_and_extract(&img, scaled, extract).to_rgb8();

                assert_eq!(windowed.dimensions(), (350, 450));
                let diff = max_channel_diff(&windowed, &expected);
                assert!(diff <= 2, "scaled {scaled} extract ({left}, {top}): max diff {diff}");
            }
        }
    }

    #[test]
    fn windowed_extract_keeps_alpha_channel() {
        let rgba = RgbaImage::from_pixel(100, 130, image::Rgba([10, 20, 30, 128]));
        let scaled = ImageDimensions::new(400, 520).unwrap();
        let extract = CropRectangle { left: 20, top: 30, width: 350, height: 450 };
        let out = scale_and_extract(&DynamicImage::ImageRgba8(rgba), scaled, extract);

        assert!(out.color().has_alpha());
        assert_eq!(out.to_rgba8().get_pixel(175, 225), &image::Rgba([10, 20, 30, 128]));
    }

    #[test]
    fn lanczos_kernel_shape() {
        assert_eq!(lanczos3(0.0), 1.0);
        assert!(lanczos3(1.0).abs() < 1e-12);
        assert!(lanczos3(-2.0).abs() < 1e-12);
        assert_eq!(lanczos3(3.0), 0.0);
        assert!(lanczos3(0.5) > 0.0);
        assert!(lanczos3(1.5) < 0.0);
    }

    #[test]
    fn cover_window_is_centered_on_the_longer_axis() {
        let target = ImageDimensions::OUTPUT;
        let window = |w, h| cover_window(ImageDimensions::new(w, h).unwrap(), target);

        assert_eq!(window(1000, 1000), CropRectangle { left: 111, top: 0, width: 778, height: 1000 });
        assert_eq!(window(700, 900), CropRectangle { left: 0, top: 0, width: 700, height: 900 });
        assert_eq!(window(1, 2000), CropRectangle { left: 0, top: 999, width: 1, height: 1 });
        assert_eq!(window(2000, 1), CropRectangle { left: 999, top: 0, width: 1, height: 1 });
    }

    #[test]
    fn cover_resize_of_a_thin_strip_stays_small() {
        // A cover resize must not build the full covering intermediate
        // (350x700000 here) before cropping
        for (width, height) in [(1, 2000), (1, 8000), (8000, 1)] {
            let img = DynamicImage::ImageRgb8(make_test_rgb(width, height));
            let stage1 = CropPlanner::default()
                .stage1_target(ImageDimensions::new(width, height).unwrap())
                .unwrap();
            assert_eq!(stage1.target, ImageDimensions::OUTPUT);

            let resized = apply_resize(&img, &stage1);
            assert_eq!((resized.width(), resized.height()), (350, 450));
        }
    }

    #[test]
    fn pipeline_without_detector_uses_cover_fit() {
        let png = make_test_png(640, 480);
        let result = process_pipeline(
            &png,
            &CropPlanner::default(),
            None,
            &OutputFormat::Png,
            0.9,
        )
        .unwrap();
        assert_eq!((result.width, result.height), (350, 450));
        assert_eq!(result.stage1, ImageDimensions::new(373, 480).unwrap());
        assert_eq!(result.plan.fallback_reason(), Some(FallbackReason::NoFace));
        assert!(result.detected_face.is_none());
        assert_eq!(result.original_size, png.len());
    }

    #[test]
    fn pipeline_with_detector_centers_face() {
        let png = make_test_png(1000, 1000);
        let detector = FixedDetector(vec![FaceBounds {
            x: 300.0,
            y: 200.0,
            width: 150.0,
            height: 150.0,
            confidence: 5.0,
        }]);
        let result = process_pipeline(
            &png,
            &CropPlanner::default(),
            Some(&detector),
            &OutputFormat::Jpeg,
            0.8,
        )
        .unwrap();
        assert_eq!((result.width, result.height), (350, 450));
        assert!(result.plan.is_face_centered());
        assert_eq!(result.detected_face.map(|f| f.confidence), Some(5.0));
    }

    #[test]
    fn pipeline_treats_degenerate_detection_as_absent() {
        let png = make_test_png(500, 700);
        let detector = FixedDetector(vec![FaceBounds {
            x: 10.0,
            y: 10.0,
            width: 40.0,
            height: 0.0,
            confidence: 9.0,
        }]);
        let result = process_pipeline(
            &png,
            &CropPlanner::default(),
            Some(&detector),
            &OutputFormat::Png,
            0.9,
        )
        .unwrap();
        assert_eq!(result.plan.fallback_reason(), Some(FallbackReason::NoFace));
    }

    #[test]
    fn invalid_input_returns_error() {
        let result = process_pipeline(
            b"not an image",
            &CropPlanner::default(),
            None,
            &OutputFormat::Png,
            0.9,
        );
        assert!(matches!(result, Err(VisaPhotoError::DecodeError(_))));
    }
}
