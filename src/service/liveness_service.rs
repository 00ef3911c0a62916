use std::sync::Arc;
use log::error;
use crate::error::liveness_error::LivenessError;
use crate::models::liveness_model::{AnalyzeInput, ValidateInput};
use crate::pipeline::liveness_pipeline::liveness_pipeline::AnalyzeResult;
use crate::pipeline::session::challenge::{ChallengeOrchestrator, IssuedChallenge, StreamFrameResult, ValidationRequest, VerificationVerdict};
use crate::pipeline::token::proof_token::TokenVerification;
use crate::pipeline::utils::image::Frame;

#[derive(Clone)]
pub struct LivenessService {
    orchestrator: Arc<ChallengeOrchestrator>,
}

impl LivenessService {
    pub fn new(orchestrator: &Arc<ChallengeOrchestrator>) -> Self {
        LivenessService {
            orchestrator: Arc::clone(orchestrator),
        }
    }

    pub fn issue_challenge(&self, identity: Option<&str>, session_id: Option<&str>) -> IssuedChallenge {
        self.orchestrator.issue_challenge(identity, session_id)
    }

    pub async fn analyze(&self, input: AnalyzeInput) -> Result<AnalyzeResult, LivenessError> {
        let frame = Frame::decode(&input.im_bytes)?;
        match self.orchestrator.pipeline().analyze(&frame).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("failed to analyze frame: {e}");
                Err(e)
            }
        }
    }

    pub async fn validate(&self, input: ValidateInput) -> Result<VerificationVerdict, LivenessError> {
        let request = ValidationRequest {
            frame_bytes: &input.im_bytes,
            gesture: input.gesture,
            challenge_id: &input.challenge_id,
            session_id: &input.session_id,
            identity: input.identity.as_deref(),
        };
        match self.orchestrator.validate(request).await {
            Ok(verdict) => Ok(verdict),
            Err(e) => {
                error!("failed to validate session {}: {e}", input.session_id);
                Err(e)
            }
        }
    }

    pub fn verify_token(&self, token: &str, identity: &str) -> TokenVerification {
        self.orchestrator.tokens().verify(token, identity)
    }

    pub async fn process_stream_frame(&self, session_id: &str, frame_bytes: &[u8]) -> Result<StreamFrameResult, LivenessError> {
        self.orchestrator.process_stream_frame(session_id, frame_bytes).await
    }

    pub fn active_sessions(&self) -> usize {
        self.orchestrator.sessions().len()
    }
}
