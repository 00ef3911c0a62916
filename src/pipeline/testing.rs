//! Fakes and fixtures shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::time::Duration;
use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::Array4;
use parking_lot::Mutex;
use crate::error::liveness_error::LivenessError;
use crate::pipeline::inference::backend::InferenceBackend;
use crate::pipeline::model_config::config::{face_mesh, hand};
use crate::pipeline::module::bbox_gate::BoundingBox;
use crate::pipeline::module::face_detection::FaceDetector;
use crate::pipeline::module::landmark_detection::LandmarkDetector;
use crate::pipeline::utils::geometry::{LandmarkSet, Point3};
use crate::pipeline::utils::image::Frame;

pub fn encoded_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([120, 110, 100]));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
    buf
}

fn real_distribution(p: f32) -> Vec<f32> {
    vec![(1.0 - p) / 2.0, p, (1.0 - p) / 2.0]
}

/// Returns the same three-class distribution for every model.
pub struct FixedBackend(pub Vec<f32>);

impl FixedBackend {
    pub fn real(p: f32) -> Self {
        FixedBackend(real_distribution(p))
    }
}

#[async_trait]
impl InferenceBackend for FixedBackend {
    async fn infer(&self, _model_name: &str, _input: Array4<f32>) -> Result<Vec<f32>, LivenessError> {
        Ok(self.0.clone())
    }
}

/// Fails one named model and answers confidently "real" for the others.
pub struct FailingBackend {
    model: String,
}

impl FailingBackend {
    pub fn for_model(model: &str) -> Self {
        FailingBackend { model: model.to_string() }
    }
}

#[async_trait]
impl InferenceBackend for FailingBackend {
    async fn infer(&self, model_name: &str, _input: Array4<f32>) -> Result<Vec<f32>, LivenessError> {
        if model_name == self.model {
            return Err(LivenessError::inference(model_name, "connection reset"));
        }
        Ok(real_distribution(0.999))
    }
}

pub struct SlowBackend(pub Duration);

#[async_trait]
impl InferenceBackend for SlowBackend {
    async fn infer(&self, _model_name: &str, _input: Array4<f32>) -> Result<Vec<f32>, LivenessError> {
        tokio::time::sleep(self.0).await;
        Ok(real_distribution(0.999))
    }
}

/// Per-model canned outputs; unknown models fail.
#[derive(Default)]
pub struct ScriptedBackend {
    outputs: HashMap<String, Vec<f32>>,
}

impl ScriptedBackend {
    pub fn with(mut self, model: &str, output: Vec<f32>) -> Self {
        self.outputs.insert(model.to_string(), output);
        self
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn infer(&self, model_name: &str, _input: Array4<f32>) -> Result<Vec<f32>, LivenessError> {
        self.outputs
            .get(model_name)
            .cloned()
            .ok_or_else(|| LivenessError::inference(model_name, "model not loaded"))
    }
}

pub struct FakeFaceDetector(pub Option<BoundingBox>);

#[async_trait]
impl FaceDetector for FakeFaceDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Option<BoundingBox>, LivenessError> {
        Ok(self.0)
    }
}

/// Fixed face landmarks; hand landmarks are replayed one per call.
#[derive(Default)]
pub struct FakeLandmarks {
    pub face: Option<LandmarkSet>,
    pub hands: Mutex<VecDeque<LandmarkSet>>,
}

impl FakeLandmarks {
    pub fn face(face: LandmarkSet) -> Self {
        FakeLandmarks { face: Some(face), hands: Mutex::new(VecDeque::new()) }
    }

    pub fn with_hands(mut self, hands: Vec<LandmarkSet>) -> Self {
        self.hands = Mutex::new(hands.into());
        self
    }
}

#[async_trait]
impl LandmarkDetector for FakeLandmarks {
    async fn face_landmarks(&self, _frame: &Frame, _bbox: &BoundingBox) -> Result<Option<LandmarkSet>, LivenessError> {
        Ok(self.face.clone())
    }

    async fn hand_landmarks(&self, _frame: &Frame) -> Result<Option<LandmarkSet>, LivenessError> {
        Ok(self.hands.lock().pop_front())
    }
}

/// Synthetic face mesh. Outer eye corners sit at (180, 200) and (240, 200),
/// the nose tip at (210, 230). `ear` sets both eye aspect ratios and
/// `smile_ratio` the mouth width over lip gap.
pub fn face_with(ear: f32, smile_ratio: f32) -> LandmarkSet {
    let mut points = vec![Point3::default(); face_mesh::NUM_POINTS];
    let v = ear * 10.0;

    for (eye, x0) in [(face_mesh::LEFT_EYE, 180.0), (face_mesh::RIGHT_EYE, 220.0)] {
        points[eye[0]] = Point3::new(x0, 200.0, 0.0);
        points[eye[1]] = Point3::new(x0 + 5.0, 200.0 - v, 0.0);
        points[eye[2]] = Point3::new(x0 + 15.0, 200.0 - v, 0.0);
        points[eye[3]] = Point3::new(x0 + 20.0, 200.0, 0.0);
        points[eye[4]] = Point3::new(x0 + 15.0, 200.0 + v, 0.0);
        points[eye[5]] = Point3::new(x0 + 5.0, 200.0 + v, 0.0);
    }

    let gap = 40.0 / smile_ratio;
    points[face_mesh::MOUTH_LEFT] = Point3::new(190.0, 260.0, 0.0);
    points[face_mesh::MOUTH_RIGHT] = Point3::new(230.0, 260.0, 0.0);
    points[face_mesh::UPPER_LIP] = Point3::new(210.0, 260.0 - gap / 2.0, 0.0);
    points[face_mesh::LOWER_LIP] = Point3::new(210.0, 260.0 + gap / 2.0, 0.0);
    points[face_mesh::NOSE_TIP] = Point3::new(210.0, 230.0, 0.0);

    LandmarkSet::new(points)
}

pub fn with_nose(face: LandmarkSet, x: f32, y: f32) -> LandmarkSet {
    let mut points: Vec<Point3> = (0..face.len()).filter_map(|i| face.get(i).copied()).collect();
    points[face_mesh::NOSE_TIP] = Point3::new(x, y, 0.0);
    LandmarkSet::new(points)
}

/// Hand with the wrist at (`x`, `wrist_y`) and the middle fingertip straight
/// above or below it at `tip_y`.
pub fn hand_at(x: f32, wrist_y: f32, tip_y: f32) -> LandmarkSet {
    let mut points = vec![Point3::new(x, wrist_y, 0.0); hand::NUM_POINTS];
    points[hand::MIDDLE_FINGER_TIP] = Point3::new(x, tip_y, 0.0);
    LandmarkSet::new(points)
}
