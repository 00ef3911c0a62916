use std::sync::Arc;
use crate::pipeline::session::challenge::ChallengeOrchestrator;
use crate::service::liveness_service::LivenessService;

#[derive(Clone)]
pub struct LivenessState {
    pub liveness_service: LivenessService,
}

impl LivenessState {
    pub fn new(orchestrator: &Arc<ChallengeOrchestrator>) -> Self {
        Self {
            liveness_service: LivenessService::new(orchestrator),
        }
    }
}
