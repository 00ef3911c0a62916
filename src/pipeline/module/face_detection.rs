use std::sync::Arc;
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use log::debug;
use crate::error::liveness_error::LivenessError;
use crate::pipeline::inference::backend::InferenceBackend;
use crate::pipeline::module::bbox_gate::BoundingBox;
use crate::pipeline::utils::image::{to_bgr_tensor, Frame};

/// Values per detection row: `x1, y1, x2, y2, score`.
const DETECTION_STRIDE: usize = 5;

/// Locates the single face the engine reasons about.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// Highest-confidence face, or `None` when nothing clears the threshold.
    async fn detect(&self, frame: &Frame) -> Result<Option<BoundingBox>, LivenessError>;
}

/// RetinaFace served with post-processing (anchor decoding and NMS) baked into
/// the model. Output rows are in letterboxed input coordinates.
#[derive(Clone)]
pub struct RetinaFaceDetection {
    backend: Arc<dyn InferenceBackend>,
    model_name: String,
    image_size: (u32, u32),
    confidence_threshold: f32,
}

impl RetinaFaceDetection {
    pub fn new(backend: Arc<dyn InferenceBackend>, model_name: &str, input_size: u32, confidence_threshold: f32) -> Self {
        RetinaFaceDetection {
            backend,
            model_name: model_name.to_string(),
            image_size: (input_size, input_size),
            confidence_threshold,
        }
    }

    /// Resizes with preserved aspect ratio onto a black canvas anchored at the
    /// top-left corner. Returns the canvas and the applied scale.
    fn preprocess(&self, frame: &Frame) -> (RgbImage, f32) {
        let (width, height) = (frame.width() as f32, frame.height() as f32);
        let im_ratio = height / width;
        let model_ratio = self.image_size.1 as f32 / self.image_size.0 as f32;

        let (new_width, new_height) = if im_ratio > model_ratio {
            let new_height = self.image_size.1;
            ((new_height as f32 / im_ratio) as u32, new_height)
        } else {
            let new_width = self.image_size.0;
            (new_width, (new_width as f32 * im_ratio) as u32)
        };
        let (new_width, new_height) = (new_width.max(1), new_height.max(1));

        let det_scale = new_height as f32 / height;
        let resized = imageops::resize(frame.image(), new_width, new_height, FilterType::Triangle);
        let mut det_img = RgbImage::from_pixel(self.image_size.0, self.image_size.1, Rgb([0, 0, 0]));
        imageops::replace(&mut det_img, &resized, 0, 0);

        (det_img, det_scale)
    }
}

/// Picks the best row above `confidence_threshold` and maps it back to frame
/// pixels.
pub fn select_detection(
    model_name: &str,
    raw: &[f32],
    det_scale: f32,
    confidence_threshold: f32,
    frame_w: u32,
    frame_h: u32,
) -> Result<Option<BoundingBox>, LivenessError> {
    if raw.len() % DETECTION_STRIDE != 0 {
        return Err(LivenessError::inference(
            model_name,
            format!("detection output length {} is not a multiple of {DETECTION_STRIDE}", raw.len()),
        ));
    }
    if det_scale <= 0.0 {
        return Ok(None);
    }

    let best = raw
        .chunks_exact(DETECTION_STRIDE)
        .filter(|row| row[4].is_finite() && row[4] >= confidence_threshold)
        .max_by(|a, b| a[4].total_cmp(&b[4]));

    Ok(best.and_then(|row| {
        BoundingBox::from_corners(
            row[0] / det_scale,
            row[1] / det_scale,
            row[2] / det_scale,
            row[3] / det_scale,
            frame_w,
            frame_h,
        )
    }))
}

#[async_trait]
impl FaceDetector for RetinaFaceDetection {
    async fn detect(&self, frame: &Frame) -> Result<Option<BoundingBox>, LivenessError> {
        let (det_img, det_scale) = self.preprocess(frame);
        let raw = self.backend.infer(&self.model_name, to_bgr_tensor(&det_img)).await?;

        let bbox = select_detection(
            &self.model_name,
            &raw,
            det_scale,
            self.confidence_threshold,
            frame.width(),
            frame.height(),
        )?;
        debug!("face detection: {} candidates, selected {:?}", raw.len() / DETECTION_STRIDE, bbox);
        Ok(bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedBackend;

    #[test]
    fn test_select_highest_confidence() {
        let raw = [
            10.0, 10.0, 50.0, 50.0, 0.70,
            100.0, 100.0, 200.0, 220.0, 0.95,
            0.0, 0.0, 5.0, 5.0, 0.20,
        ];
        let bbox = select_detection("det", &raw, 1.0, 0.6, 640, 480).unwrap().unwrap();
        assert_eq!(bbox, BoundingBox { x: 100, y: 100, w: 101, h: 121 });
    }

    #[test]
    fn test_select_rescales_to_frame() {
        let raw = [50.0, 50.0, 100.0, 100.0, 0.9];
        let bbox = select_detection("det", &raw, 0.5, 0.6, 640, 480).unwrap().unwrap();
        assert_eq!(bbox, BoundingBox { x: 100, y: 100, w: 101, h: 101 });
    }

    #[test]
    fn test_select_below_threshold_is_none() {
        let raw = [10.0, 10.0, 50.0, 50.0, 0.3];
        assert_eq!(select_detection("det", &raw, 1.0, 0.6, 640, 480).unwrap(), None);
        assert_eq!(select_detection("det", &[], 1.0, 0.6, 640, 480).unwrap(), None);
    }

    #[test]
    fn test_select_rejects_ragged_output() {
        let err = select_detection("det", &[1.0, 2.0, 3.0], 1.0, 0.6, 640, 480).unwrap_err();
        assert!(matches!(err, LivenessError::ModelInferenceFailure { .. }));
    }

    #[test]
    fn test_preprocess_letterbox() {
        let detector = RetinaFaceDetection::new(Arc::new(ScriptedBackend::default()), "det", 640, 0.6);
        let frame = Frame::from_image(RgbImage::from_pixel(320, 240, Rgb([255, 255, 255])));
        let (det_img, det_scale) = detector.preprocess(&frame);
        assert_eq!(det_img.dimensions(), (640, 640));
        assert!((det_scale - 2.0).abs() < 1e-6);
        assert_eq!(det_img.get_pixel(639, 639), &Rgb([0, 0, 0]));
    }

    #[tokio::test]
    async fn test_detect_through_backend() {
        // 320x240 letterboxed into 640 gives a scale of 2
        let backend = ScriptedBackend::default().with("det", vec![200.0, 120.0, 400.0, 320.0, 0.99]);
        let detector = RetinaFaceDetection::new(Arc::new(backend), "det", 640, 0.6);
        let frame = Frame::from_image(RgbImage::from_pixel(320, 240, Rgb([90, 90, 90])));
        let bbox = detector.detect(&frame).await.unwrap().unwrap();
        assert_eq!(bbox, BoundingBox { x: 100, y: 60, w: 101, h: 101 });
    }
}
