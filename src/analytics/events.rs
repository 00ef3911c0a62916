use chrono::{SecondsFormat, Utc};
use log::info;
use serde::Serialize;
use serde_json::{json, Value};

const IDENTITY_PREFIX_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    VerificationStarted,
    ChallengeGenerated,
    SessionTimeout,
    QualityGateFailed,
    LivenessFailed,
    GestureCaptured,
    ValidationSuccess,
    ValidationFailed,
    AttemptsExhausted,
    ReplayAttackDetected,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsEvent {
    pub event: EventType,
    pub session_id: String,
    pub timestamp: String,
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Keeps only a short prefix so events never carry a full identity.
pub fn mask_identity(identity: &str) -> String {
    match identity.char_indices().nth(IDENTITY_PREFIX_LEN) {
        Some((idx, _)) => format!("{}...", &identity[..idx]),
        None => format!("{identity}..."),
    }
}

/// Writes verification-flow events as structured log lines.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsTracker;

impl AnalyticsTracker {
    pub fn new() -> Self {
        AnalyticsTracker
    }

    pub fn build_event(&self, event: EventType, session_id: &str, identity: Option<&str>, metadata: Option<Value>) -> AnalyticsEvent {
        AnalyticsEvent {
            event,
            session_id: session_id.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            identity: identity.map(mask_identity),
            metadata,
        }
    }

    pub fn track_event(&self, event: EventType, session_id: &str, identity: Option<&str>, metadata: Option<Value>) {
        let event = self.build_event(event, session_id, identity, metadata);
        match serde_json::to_string(&event) {
            Ok(line) => info!("analytics event: {line}"),
            Err(e) => info!("analytics event {:?} for {} (unserializable: {e})", event.event, event.session_id),
        }
    }

    pub fn track_quality_failure(&self, session_id: &str, check: &str, score: f64, threshold: f64, identity: Option<&str>) {
        self.track_event(
            EventType::QualityGateFailed,
            session_id,
            identity,
            Some(json!({
                "check": check,
                "score": score,
                "threshold": threshold,
                "delta": threshold - score,
            })),
        );
    }

    pub fn track_validation_result(
        &self,
        session_id: &str,
        success: bool,
        challenge_type: &str,
        liveness_confidence: f32,
        identity: Option<&str>,
        failure_reason: Option<&str>,
    ) {
        let event = if success { EventType::ValidationSuccess } else { EventType::ValidationFailed };
        self.track_event(
            event,
            session_id,
            identity,
            Some(json!({
                "challenge_type": challenge_type,
                "liveness_confidence": liveness_confidence,
                "failure_reason": if success { None } else { failure_reason },
            })),
        );
    }
}
