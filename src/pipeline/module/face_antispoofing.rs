use std::sync::Arc;
use std::time::{Duration, Instant};
use futures::future::try_join_all;
use log::{debug, warn};
use serde::Serialize;
use tokio::time::timeout;
use crate::error::liveness_error::LivenessError;
use crate::pipeline::inference::backend::InferenceBackend;
use crate::pipeline::model_config::config::{match_face_anti_spoofing, FaceAntiSpoofingClass, FaceAntiSpoofingConfig, ModelDescriptor, NUM_CLASSES, REAL_INDEX};
use crate::pipeline::module::bbox_gate::BoundingBox;
use crate::pipeline::utils::image::{crop_face_patch, to_bgr_tensor, Frame};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelScore {
    pub model: String,
    pub scores: [f32; NUM_CLASSES],
}

/// Element-wise sum of the per-model class distributions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnsemblePrediction {
    pub accumulated: [f32; NUM_CLASSES],
    pub per_model: Vec<ModelScore>,
}

impl EnsemblePrediction {
    pub fn add(&mut self, model: &str, scores: [f32; NUM_CLASSES]) {
        for (total, score) in self.accumulated.iter_mut().zip(scores) {
            *total += score;
        }
        self.per_model.push(ModelScore {
            model: model.to_string(),
            scores,
        });
    }

    pub fn model_count(&self) -> usize {
        self.per_model.len()
    }

    pub fn argmax(&self) -> usize {
        self.accumulated
            .iter()
            .enumerate()
            .fold(0, |best, (idx, v)| if *v > self.accumulated[best] { idx } else { best })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AntiSpoofingDecision {
    pub label: FaceAntiSpoofingClass,
    pub raw_label: FaceAntiSpoofingClass,
    pub confidence: f32,
    pub passed: bool,
    pub per_model: Vec<ModelScore>,
    pub elapsed_ms: u64,
}

impl AntiSpoofingDecision {
    /// Applies the confidence floor. Anything that is not a confident "real"
    /// is reported as spoof.
    pub fn from_prediction(prediction: EnsemblePrediction, min_confidence: f32) -> Self {
        let model_count = prediction.model_count();
        if model_count == 0 {
            return AntiSpoofingDecision {
                label: FaceAntiSpoofingClass::Spoof,
                raw_label: FaceAntiSpoofingClass::Spoof,
                confidence: 0.0,
                passed: false,
                per_model: prediction.per_model,
                elapsed_ms: 0,
            };
        }

        let label_idx = prediction.argmax();
        let raw_label = match_face_anti_spoofing(label_idx);
        let confidence = prediction.accumulated[label_idx] / model_count as f32;
        let passed = label_idx == REAL_INDEX && confidence >= min_confidence;
        let label = if passed { FaceAntiSpoofingClass::Real } else { FaceAntiSpoofingClass::Spoof };

        AntiSpoofingDecision {
            label,
            raw_label,
            confidence,
            passed,
            per_model: prediction.per_model,
            elapsed_ms: 0,
        }
    }
}

/// Turns a raw model output into a probability distribution. Outputs that
/// already form a distribution are kept; anything else is treated as logits.
pub fn to_distribution(model: &str, raw: &[f32]) -> Result<[f32; NUM_CLASSES], LivenessError> {
    if raw.len() != NUM_CLASSES {
        return Err(LivenessError::inference(model, format!("expected {NUM_CLASSES} class scores, got {}", raw.len())));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(LivenessError::inference(model, "non-finite class score"));
    }

    let mut out = [0.0f32; NUM_CLASSES];
    let sum: f32 = raw.iter().sum();
    if raw.iter().all(|v| *v >= 0.0) && (sum - 1.0).abs() < 1e-3 {
        out.copy_from_slice(raw);
        return Ok(out);
    }

    let max = raw.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_sum: f32 = raw.iter().map(|v| (v - max).exp()).sum();
    for (slot, v) in out.iter_mut().zip(raw) {
        *slot = (v - max).exp() / exp_sum;
    }
    Ok(out)
}

#[derive(Clone)]
pub struct FaceAntiSpoofing {
    backend: Arc<dyn InferenceBackend>,
    models: Vec<ModelDescriptor>,
    min_confidence: f32,
    inference_timeout: Duration,
}

impl FaceAntiSpoofing {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: &FaceAntiSpoofingConfig) -> Result<Self, LivenessError> {
        if config.models.is_empty() {
            return Err(LivenessError::ConfigurationError("anti-spoofing ensemble has no models".to_string()));
        }
        Ok(FaceAntiSpoofing {
            backend,
            models: config.models.clone(),
            min_confidence: config.min_confidence,
            inference_timeout: config.inference_timeout,
        })
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Runs every ensemble member on the face. A single failing member fails
    /// the whole call, so the averaged confidence is always over all models.
    pub async fn call(&self, frame: &Frame, bbox: &BoundingBox) -> Result<AntiSpoofingDecision, LivenessError> {
        let start = Instant::now();

        let scores = try_join_all(self.models.iter().map(|model| self.infer_one(model, frame, bbox))).await?;

        let mut prediction = EnsemblePrediction::default();
        for (model, score) in self.models.iter().zip(scores) {
            prediction.add(&model.model_name, score);
        }

        let mut decision = AntiSpoofingDecision::from_prediction(prediction, self.min_confidence);
        decision.elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(
            "ensemble raw_label={:?} confidence={:.4} passed={} elapsed_ms={}",
            decision.raw_label, decision.confidence, decision.passed, decision.elapsed_ms
        );
        Ok(decision)
    }

    async fn infer_one(&self, model: &ModelDescriptor, frame: &Frame, bbox: &BoundingBox) -> Result<[f32; NUM_CLASSES], LivenessError> {
        let patch = crop_face_patch(frame, bbox, model.crop_scale, model.input_width, model.input_height);
        let tensor = to_bgr_tensor(&patch);

        let raw = match timeout(self.inference_timeout, self.backend.infer(&model.model_name, tensor)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("model {} timed out after {:?}", model.model_name, self.inference_timeout);
                return Err(LivenessError::inference(
                    &model.model_name,
                    format!("timed out after {}ms", self.inference_timeout.as_millis()),
                ));
            }
        };

        to_distribution(&model.model_name, &raw)
    }
}
