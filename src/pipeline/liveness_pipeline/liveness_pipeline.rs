use std::sync::Arc;
use std::time::{Duration, Instant};
use log::{debug, info};
use serde::Serialize;
use crate::config::settings::{AntiSpoofing, Detection, Gesture};
use crate::error::liveness_error::LivenessError;
use crate::pipeline::inference::backend::InferenceBackend;
use crate::pipeline::model_config::config::{FaceAntiSpoofingClass, FaceAntiSpoofingConfig, GestureThresholds};
use crate::pipeline::module::bbox_gate::{BBoxGate, BoundingBox};
use crate::pipeline::module::face_antispoofing::{AntiSpoofingDecision, FaceAntiSpoofing, ModelScore};
use crate::pipeline::module::face_detection::{FaceDetector, RetinaFaceDetection};
use crate::pipeline::module::gesture_signal::{GestureSignalExtractor, GestureSignals, GestureState};
use crate::pipeline::module::landmark_detection::{LandmarkDetector, MediaPipeLandmarks};
use crate::pipeline::utils::geometry::LandmarkSet;
use crate::pipeline::utils::image::Frame;

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResult {
    pub label: FaceAntiSpoofingClass,
    pub confidence: f32,
    pub passed: bool,
    pub bbox: Option<BoundingBox>,
    pub per_model: Vec<ModelScore>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Everything the detectors and classifiers say about one frame, before any
/// session history is applied.
#[derive(Debug, Clone)]
pub struct FrameObservation {
    pub width: u32,
    pub height: u32,
    pub bbox: Option<BoundingBox>,
    pub rejection: Option<LivenessError>,
    pub liveness: Option<AntiSpoofingDecision>,
    pub face_landmarks: Option<LandmarkSet>,
    pub hand_landmarks: Option<LandmarkSet>,
}

impl FrameObservation {
    pub fn face_detected(&self) -> bool {
        self.rejection.is_none() && self.bbox.is_some()
    }

    pub fn liveness_passed(&self) -> bool {
        self.liveness.as_ref().map_or(false, |d| d.passed)
    }

    pub fn liveness_confidence(&self) -> f32 {
        self.liveness.as_ref().map_or(0.0, |d| d.confidence)
    }
}

pub struct LivenessPipeline {
    face_detector: Arc<dyn FaceDetector>,
    landmark_detector: Arc<dyn LandmarkDetector>,
    bbox_gate: BBoxGate,
    anti_spoofing: FaceAntiSpoofing,
    gesture_extractor: GestureSignalExtractor,
}

impl LivenessPipeline {
    pub fn new(
        face_detector: Arc<dyn FaceDetector>,
        landmark_detector: Arc<dyn LandmarkDetector>,
        bbox_gate: BBoxGate,
        anti_spoofing: FaceAntiSpoofing,
        gesture_extractor: GestureSignalExtractor,
    ) -> Self {
        LivenessPipeline {
            face_detector,
            landmark_detector,
            bbox_gate,
            anti_spoofing,
            gesture_extractor,
        }
    }

    /// Wires every stage onto one inference backend.
    pub fn from_backend(
        backend: Arc<dyn InferenceBackend>,
        antispoofing: &AntiSpoofing,
        detection: &Detection,
        gesture: &Gesture,
        inference_timeout: Duration,
    ) -> Result<Self, LivenessError> {
        let anti_spoofing_cfg = FaceAntiSpoofingConfig::from_settings(antispoofing, inference_timeout)?;

        let face_detector = RetinaFaceDetection::new(
            Arc::clone(&backend),
            &detection.face_model,
            detection.face_input_size,
            detection.face_confidence,
        );
        let landmark_detector = MediaPipeLandmarks::new(
            Arc::clone(&backend),
            &detection.face_mesh_model,
            &detection.hand_model,
            detection.hand_presence,
        );
        let anti_spoofing = FaceAntiSpoofing::new(backend, &anti_spoofing_cfg)?;
        info!(
            "liveness pipeline ready: {} anti-spoofing models, min_confidence={}, min_bbox_area={}",
            anti_spoofing.models().len(),
            anti_spoofing_cfg.min_confidence,
            anti_spoofing_cfg.min_bbox_area
        );

        Ok(LivenessPipeline::new(
            Arc::new(face_detector),
            Arc::new(landmark_detector),
            BBoxGate::new(anti_spoofing_cfg.min_bbox_area),
            anti_spoofing,
            GestureSignalExtractor::new(GestureThresholds::from(gesture)),
        ))
    }

    /// Detect, gate and score. Frame-level rejections come back as a failed
    /// result; only service failures are errors.
    pub async fn analyze(&self, frame: &Frame) -> Result<AnalyzeResult, LivenessError> {
        let start = Instant::now();
        let detected = self.face_detector.detect(frame).await?;

        let bbox = match self.bbox_gate.call(detected) {
            Ok(bbox) => bbox,
            Err(e) if e.is_frame_rejection() => {
                debug!("analyze rejected frame: {e}");
                return Ok(AnalyzeResult {
                    label: FaceAntiSpoofingClass::Spoof,
                    confidence: 0.0,
                    passed: false,
                    bbox: detected,
                    per_model: vec![],
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    reason: Some(e.to_string()),
                });
            }
            Err(e) => return Err(e),
        };

        let decision = self.anti_spoofing.call(frame, &bbox).await?;
        Ok(AnalyzeResult {
            label: decision.label,
            confidence: decision.confidence,
            passed: decision.passed,
            bbox: Some(bbox),
            per_model: decision.per_model,
            elapsed_ms: start.elapsed().as_millis() as u64,
            reason: None,
        })
    }

    /// Runs every detector the gesture extractor needs. The hand model runs
    /// alongside the face stages since it does not depend on the face box.
    pub async fn observe(&self, frame: &Frame) -> Result<FrameObservation, LivenessError> {
        let (mut observation, hand_landmarks) = tokio::try_join!(
            self.observe_face(frame),
            self.landmark_detector.hand_landmarks(frame)
        )?;
        observation.hand_landmarks = hand_landmarks;
        Ok(observation)
    }

    async fn observe_face(&self, frame: &Frame) -> Result<FrameObservation, LivenessError> {
        let mut observation = FrameObservation {
            width: frame.width(),
            height: frame.height(),
            bbox: self.face_detector.detect(frame).await?,
            rejection: None,
            liveness: None,
            face_landmarks: None,
            hand_landmarks: None,
        };

        let bbox = match self.bbox_gate.call(observation.bbox) {
            Ok(bbox) => bbox,
            Err(e) => {
                observation.rejection = Some(e);
                return Ok(observation);
            }
        };

        let (decision, face_landmarks) = tokio::try_join!(
            self.anti_spoofing.call(frame, &bbox),
            self.landmark_detector.face_landmarks(frame, &bbox)
        )?;
        observation.liveness = Some(decision);
        observation.face_landmarks = face_landmarks;
        Ok(observation)
    }

    /// Applies an observation to a session's gesture history.
    pub fn extract_signals(&self, state: &mut GestureState, observation: &FrameObservation) -> GestureSignals {
        let face = if observation.face_detected() { observation.face_landmarks.as_ref() } else { None };
        self.gesture_extractor.extract(
            state,
            face,
            observation.hand_landmarks.as_ref(),
            observation.width,
            observation.height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use crate::pipeline::model_config::config::{FaceAntiSpoofingConfig, ModelDescriptor};
    use crate::pipeline::testing::{face_with, FailingBackend, FakeFaceDetector, FakeLandmarks, FixedBackend};

    const FACE: BoundingBox = BoundingBox { x: 100, y: 60, w: 100, h: 100 };

    fn pipeline(bbox: Option<BoundingBox>, backend: Arc<dyn InferenceBackend>, landmarks: FakeLandmarks) -> LivenessPipeline {
        let cfg = FaceAntiSpoofingConfig {
            models: vec![
                ModelDescriptor::parse("a", "2.7_80x80_MiniFASNetV2.pth").unwrap(),
                ModelDescriptor::parse("b", "4_0_0_80x80_MiniFASNetV1SE.pth").unwrap(),
            ],
            min_confidence: 0.98,
            min_bbox_area: 6400,
            inference_timeout: Duration::from_millis(500),
        };
        LivenessPipeline::new(
            Arc::new(FakeFaceDetector(bbox)),
            Arc::new(landmarks),
            BBoxGate::new(cfg.min_bbox_area),
            FaceAntiSpoofing::new(backend, &cfg).unwrap(),
            GestureSignalExtractor::default(),
        )
    }

    fn frame() -> Frame {
        Frame::from_image(RgbImage::from_pixel(320, 240, Rgb([80, 80, 80])))
    }

    #[tokio::test]
    async fn test_analyze_no_face() {
        let pipeline = pipeline(None, Arc::new(FixedBackend::real(0.99)), FakeLandmarks::default());
        let result = pipeline.analyze(&frame()).await.unwrap();
        assert!(!result.passed);
        assert!(result.bbox.is_none());
        assert_eq!(result.label, FaceAntiSpoofingClass::Spoof);
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["bbox"].is_null());
    }

    #[tokio::test]
    async fn test_analyze_small_face_ignores_confidence() {
        let small = BoundingBox { x: 0, y: 0, w: 50, h: 50 };
        let pipeline = pipeline(Some(small), Arc::new(FixedBackend::real(1.0)), FakeLandmarks::default());
        let result = pipeline.analyze(&frame()).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.bbox, Some(small));
        assert!(result.reason.unwrap().contains("too small"));
    }

    #[tokio::test]
    async fn test_analyze_live_face() {
        let pipeline = pipeline(Some(FACE), Arc::new(FixedBackend::real(0.99)), FakeLandmarks::default());
        let result = pipeline.analyze(&frame()).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.label, FaceAntiSpoofingClass::Real);
        assert_eq!(result.per_model.len(), 2);
    }

    #[tokio::test]
    async fn test_analyze_propagates_model_failure() {
        let pipeline = pipeline(Some(FACE), Arc::new(FailingBackend::for_model("b")), FakeLandmarks::default());
        assert!(pipeline.analyze(&frame()).await.is_err());
    }

    #[tokio::test]
    async fn test_observe_and_extract() {
        let pipeline = pipeline(Some(FACE), Arc::new(FixedBackend::real(0.99)), FakeLandmarks::face(face_with(0.05, 4.0)));
        let observation = pipeline.observe(&frame()).await.unwrap();
        assert!(observation.face_detected());
        assert!(observation.liveness_passed());

        let mut state = GestureState::default();
        let signals = pipeline.extract_signals(&mut state, &observation);
        assert!(signals.blink_detected);
        assert!(signals.smile_detected);
    }

    #[tokio::test]
    async fn test_observe_without_face_skips_face_gestures() {
        let pipeline = pipeline(None, Arc::new(FixedBackend::real(0.99)), FakeLandmarks::face(face_with(0.05, 4.0)));
        let observation = pipeline.observe(&frame()).await.unwrap();
        assert!(!observation.face_detected());
        assert!(observation.liveness.is_none());
        assert_eq!(observation.rejection, Some(LivenessError::NoFaceDetected));

        let mut state = GestureState::default();
        let signals = pipeline.extract_signals(&mut state, &observation);
        assert!(!signals.blink_detected);
    }
}
