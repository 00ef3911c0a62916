use std::sync::Arc;
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use crate::error::liveness_error::LivenessError;
use crate::pipeline::inference::backend::InferenceBackend;
use crate::pipeline::model_config::config::{face_mesh, hand};
use crate::pipeline::module::bbox_gate::BoundingBox;
use crate::pipeline::utils::geometry::{LandmarkSet, Point3};
use crate::pipeline::utils::image::{scaled_crop_box, to_unit_rgb_tensor, CropBox, Frame};

const FACE_MESH_INPUT: u32 = 192;
const FACE_MESH_CROP_SCALE: f32 = 1.5;
const HAND_INPUT: u32 = 224;

/// Face-mesh and hand landmarks in frame pixel coordinates.
#[async_trait]
pub trait LandmarkDetector: Send + Sync {
    async fn face_landmarks(&self, frame: &Frame, bbox: &BoundingBox) -> Result<Option<LandmarkSet>, LivenessError>;

    async fn hand_landmarks(&self, frame: &Frame) -> Result<Option<LandmarkSet>, LivenessError>;
}

/// Reads `count` xyz triples from the head of `raw`, mapping each point with
/// `to_frame`.
fn decode_points(raw: &[f32], count: usize, to_frame: impl Fn(f32, f32, f32) -> Point3) -> Option<LandmarkSet> {
    let values = raw.get(..count * 3)?;
    if values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(LandmarkSet::new(
        values.chunks_exact(3).map(|p| to_frame(p[0], p[1], p[2])).collect(),
    ))
}

/// Maps face-mesh output (patch pixels) back through the crop window.
pub fn decode_face_mesh(raw: &[f32], window: &CropBox) -> Option<LandmarkSet> {
    let scale_x = (window.right - window.left + 1) as f32 / FACE_MESH_INPUT as f32;
    let scale_y = (window.bottom - window.top + 1) as f32 / FACE_MESH_INPUT as f32;
    decode_points(raw, face_mesh::NUM_POINTS, |x, y, z| {
        Point3::new(window.left as f32 + x * scale_x, window.top as f32 + y * scale_y, z * scale_x)
    })
}

/// Hand output is 21 xyz triples in input pixels followed by a presence score.
pub fn decode_hand(raw: &[f32], frame_w: u32, frame_h: u32, min_presence: f32) -> Option<LandmarkSet> {
    let presence = *raw.get(hand::NUM_POINTS * 3)?;
    if !(presence >= min_presence) {
        return None;
    }
    let scale_x = frame_w as f32 / HAND_INPUT as f32;
    let scale_y = frame_h as f32 / HAND_INPUT as f32;
    decode_points(raw, hand::NUM_POINTS, |x, y, z| Point3::new(x * scale_x, y * scale_y, z * scale_x))
}

#[derive(Clone)]
pub struct MediaPipeLandmarks {
    backend: Arc<dyn InferenceBackend>,
    face_mesh_model: String,
    hand_model: String,
    hand_presence: f32,
}

impl MediaPipeLandmarks {
    pub fn new(backend: Arc<dyn InferenceBackend>, face_mesh_model: &str, hand_model: &str, hand_presence: f32) -> Self {
        MediaPipeLandmarks {
            backend,
            face_mesh_model: face_mesh_model.to_string(),
            hand_model: hand_model.to_string(),
            hand_presence,
        }
    }
}

#[async_trait]
impl LandmarkDetector for MediaPipeLandmarks {
    async fn face_landmarks(&self, frame: &Frame, bbox: &BoundingBox) -> Result<Option<LandmarkSet>, LivenessError> {
        let window = scaled_crop_box(frame.width(), frame.height(), bbox, FACE_MESH_CROP_SCALE);
        let width = window.right.saturating_sub(window.left) + 1;
        let height = window.bottom.saturating_sub(window.top) + 1;
        let patch = imageops::crop_imm(frame.image(), window.left, window.top, width, height).to_image();
        let patch = imageops::resize(&patch, FACE_MESH_INPUT, FACE_MESH_INPUT, FilterType::Triangle);

        let raw = self
            .backend
            .infer(&self.face_mesh_model, to_unit_rgb_tensor(&patch))
            .await
            .map_err(|e| LivenessError::LandmarkFailure(e.to_string()))?;
        Ok(decode_face_mesh(&raw, &window))
    }

    async fn hand_landmarks(&self, frame: &Frame) -> Result<Option<LandmarkSet>, LivenessError> {
        let input = imageops::resize(frame.image(), HAND_INPUT, HAND_INPUT, FilterType::Triangle);
        let raw = self
            .backend
            .infer(&self.hand_model, to_unit_rgb_tensor(&input))
            .await
            .map_err(|e| LivenessError::LandmarkFailure(e.to_string()))?;
        Ok(decode_hand(&raw, frame.width(), frame.height(), self.hand_presence))
    }
}
