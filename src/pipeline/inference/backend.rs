use async_trait::async_trait;
use ndarray::Array4;
use crate::error::liveness_error::LivenessError;

/// Executes a named model on an NCHW float tensor and returns the flattened
/// first output.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn infer(&self, model_name: &str, input: Array4<f32>) -> Result<Vec<f32>, LivenessError>;
}
