use bytes::Bytes;
use serde::{Deserialize, Serialize};
use crate::pipeline::model_config::config::GestureKind;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChallengeRequest {
    pub identity: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyTokenRequest {
    pub token: String,
    pub identity: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub active_sessions: usize,
}

#[derive(Clone)]
pub struct AnalyzeInput {
    pub im_bytes: Bytes,
}

#[derive(Clone)]
pub struct ValidateInput {
    pub im_bytes: Bytes,
    pub gesture: GestureKind,
    pub challenge_id: String,
    pub session_id: String,
    pub identity: Option<String>,
}
