use std::collections::HashMap;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, info};
use ndarray::Array4;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use crate::error::liveness_error::LivenessError;
use crate::pipeline::inference::backend::InferenceBackend;

#[derive(Debug, Clone, Deserialize)]
pub struct TensorMetadata {
    pub name: String,
    pub datatype: String,
    pub shape: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub inputs: Vec<TensorMetadata>,
    pub outputs: Vec<TensorMetadata>,
}

#[derive(Debug, Serialize)]
struct InferInputTensor<'a> {
    name: &'a str,
    shape: Vec<usize>,
    datatype: &'static str,
    data: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ModelInferRequest<'a> {
    inputs: Vec<InferInputTensor<'a>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferOutputTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ModelInferResponse {
    outputs: Vec<InferOutputTensor>,
}

/// Client for the KServe v2 REST protocol spoken by Triton.
#[derive(Debug, Clone)]
pub struct TritonHttpClient {
    client: Client,
    base_url: String,
    input_names: HashMap<String, String>,
}

impl TritonHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LivenessError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LivenessError::ConfigurationError(format!("failed to build inference client: {e}")))?;

        Ok(TritonHttpClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            input_names: HashMap::new(),
        })
    }

    pub async fn model_metadata(&self, model_name: &str) -> Result<ModelMetadata, LivenessError> {
        let url = format!("{}/v2/models/{}", self.base_url, model_name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LivenessError::ConfigurationError(format!("model `{model_name}` metadata request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(LivenessError::ConfigurationError(format!(
                "model `{model_name}` is not available on the inference server ({})",
                response.status()
            )));
        }
        response
            .json::<ModelMetadata>()
            .await
            .map_err(|e| LivenessError::ConfigurationError(format!("model `{model_name}` metadata is malformed: {e}")))
    }

    /// Resolves and caches the input tensor name of every listed model.
    /// Fails when any of them is missing from the server.
    pub async fn register_models(&mut self, model_names: &[&str]) -> Result<(), LivenessError> {
        for model_name in model_names {
            let metadata = self.model_metadata(model_name).await?;
            let input = metadata.inputs.first().ok_or_else(|| {
                LivenessError::ConfigurationError(format!("model `{model_name}` declares no inputs"))
            })?;
            debug!("model {} input {} {:?} {}", metadata.name, input.name, input.shape, input.datatype);
            self.input_names.insert(model_name.to_string(), input.name.clone());
        }
        info!("registered {} models on {}", model_names.len(), self.base_url);
        Ok(())
    }

    pub async fn infer_outputs(&self, model_name: &str, input: Array4<f32>) -> Result<Vec<InferOutputTensor>, LivenessError> {
        let input_name = self
            .input_names
            .get(model_name)
            .map(String::as_str)
            .unwrap_or("input");

        let shape = input.shape().to_vec();
        let data: Vec<f32> = input.iter().cloned().collect();
        let request = ModelInferRequest {
            inputs: vec![InferInputTensor {
                name: input_name,
                shape,
                datatype: "FP32",
                data,
            }],
        };

        let url = format!("{}/v2/models/{}/infer", self.base_url, model_name);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LivenessError::inference(model_name, e))?;
        if !response.status().is_success() {
            return Err(LivenessError::inference(model_name, format!("server returned {}", response.status())));
        }

        let body = response
            .json::<ModelInferResponse>()
            .await
            .map_err(|e| LivenessError::inference(model_name, format!("malformed response: {e}")))?;
        if body.outputs.is_empty() {
            return Err(LivenessError::inference(model_name, "response carries no outputs"));
        }
        Ok(body.outputs)
    }
}

#[async_trait]
impl InferenceBackend for TritonHttpClient {
    async fn infer(&self, model_name: &str, input: Array4<f32>) -> Result<Vec<f32>, LivenessError> {
        let mut outputs = self.infer_outputs(model_name, input).await?;
        Ok(outputs.swap_remove(0).data)
    }
}
