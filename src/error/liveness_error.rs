use thiserror::Error;

/// Failure kinds of the liveness decision engine.
///
/// Per-frame kinds (`NoFaceDetected`, `FaceTooSmall`, `ChallengeMismatch`) are
/// folded into a failed verdict by the orchestrator. `InvalidImageData` is a
/// client error. Everything else is an internal failure and must be treated
/// as "not live" by callers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LivenessError {
    #[error("no face detected")]
    NoFaceDetected,

    #[error("face too small for reliable decision (area={area}, min={min})")]
    FaceTooSmall { area: u32, min: u32 },

    #[error("model inference failed for {model}: {reason}")]
    ModelInferenceFailure { model: String, reason: String },

    #[error("landmark detection failed: {0}")]
    LandmarkFailure(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("unsupported or corrupted image data: {0}")]
    InvalidImageData(String),

    #[error("verification token has expired")]
    TokenExpired,

    #[error("invalid verification token: {0}")]
    TokenInvalid(String),

    #[error("challenge mismatch: {0}")]
    ChallengeMismatch(String),
}

impl LivenessError {
    pub fn inference(model: impl Into<String>, reason: impl ToString) -> Self {
        LivenessError::ModelInferenceFailure {
            model: model.into(),
            reason: reason.to_string(),
        }
    }

    /// True for outcomes caused by the submitted frame rather than by the service.
    pub fn is_frame_rejection(&self) -> bool {
        matches!(
            self,
            LivenessError::NoFaceDetected
                | LivenessError::FaceTooSmall { .. }
                | LivenessError::ChallengeMismatch(_)
        )
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, LivenessError::InvalidImageData(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_too_small_message() {
        let err = LivenessError::FaceTooSmall { area: 2500, min: 6400 };
        assert_eq!(
            err.to_string(),
            "face too small for reliable decision (area=2500, min=6400)"
        );
        assert!(err.is_frame_rejection());
    }

    #[test]
    fn test_inference_failure_is_not_rejection() {
        let err = LivenessError::inference("minifas_4", "timed out");
        assert!(!err.is_frame_rejection());
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("minifas_4"));
    }
}
