use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use uuid::Uuid;
use crate::analytics::events::{AnalyticsTracker, EventType};
use crate::error::liveness_error::LivenessError;
use crate::pipeline::liveness_pipeline::liveness_pipeline::{FrameObservation, LivenessPipeline};
use crate::pipeline::model_config::config::GestureKind;
use crate::pipeline::module::bbox_gate::BoundingBox;
use crate::pipeline::module::gesture_signal::GestureSignals;
use crate::pipeline::session::session_store::{ActiveChallenge, Challenge, ChallengeStatus, SessionState, SessionStore};
use crate::pipeline::token::proof_token::{proof_hash, ProofTokenIssuer};
use crate::pipeline::utils::image::Frame;

pub const REASON_NO_FACE: &str = "face not detected";
pub const REASON_LIVENESS: &str = "liveness check failed";
pub const REASON_GESTURE: &str = "gesture not detected";
pub const REASON_MISMATCH: &str = "challenge mismatch";

#[derive(Debug, Clone, Serialize)]
pub struct IssuedChallenge {
    pub challenge_id: String,
    pub gesture: GestureKind,
    pub instruction: &'static str,
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct ValidationRequest<'a> {
    pub frame_bytes: &'a [u8],
    pub gesture: GestureKind,
    pub challenge_id: &'a str,
    pub session_id: &'a str,
    pub identity: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ValidationResults {
    pub liveness: bool,
    pub face_detected: bool,
    pub blink_detected: bool,
    pub smile_detected: bool,
    pub head_turn_left: bool,
    pub head_turn_right: bool,
    pub wave_detected: bool,
    pub nod_detected: bool,
}

impl ValidationResults {
    fn new(observation: &FrameObservation, signals: &GestureSignals) -> Self {
        ValidationResults {
            liveness: observation.liveness_passed(),
            face_detected: observation.face_detected(),
            blink_detected: signals.blink_detected,
            smile_detected: signals.smile_detected,
            head_turn_left: signals.head_turn_left,
            head_turn_right: signals.head_turn_right,
            wave_detected: signals.wave_detected,
            nod_detected: signals.nod_detected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationVerdict {
    pub success: bool,
    pub message: String,
    pub results: ValidationResults,
    pub failure_reasons: Vec<&'static str>,
    pub liveness_confidence: f32,
    pub gesture_satisfied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Per-frame output of the video stream.
#[derive(Debug, Clone, Serialize)]
pub struct StreamFrameResult {
    pub session_id: String,
    pub results: ValidationResults,
    pub liveness_confidence: f32,
    pub bbox: Option<BoundingBox>,
    pub blink_count: u32,
}

/// Builds the ordered failure reasons.
pub fn failure_reasons(face_detected: bool, liveness: bool, gesture_signal: bool, challenge_matches: bool) -> Vec<&'static str> {
    [
        (face_detected, REASON_NO_FACE),
        (liveness, REASON_LIVENESS),
        (gesture_signal, REASON_GESTURE),
        (challenge_matches, REASON_MISMATCH),
    ]
    .into_iter()
    .filter(|(ok, _)| !ok)
    .map(|(_, reason)| reason)
    .collect()
}

/// What applying a frame to a session decided, computed under the session lock.
struct FrameOutcome {
    signals: GestureSignals,
    mismatch: Option<LivenessError>,
    identity: Option<String>,
}

/// A frame counts toward the active challenge only when id, gesture and the
/// bound identity all agree and the challenge is still pending.
fn match_challenge(active: &ActiveChallenge, request: &ValidationRequest<'_>) -> Result<(), LivenessError> {
    if active.challenge.id != request.challenge_id {
        return Err(LivenessError::ChallengeMismatch(format!("unknown challenge {}", request.challenge_id)));
    }
    if active.challenge.gesture != request.gesture {
        return Err(LivenessError::ChallengeMismatch(format!(
            "challenge expects {}, got {}",
            active.challenge.gesture, request.gesture
        )));
    }
    if let (Some(bound), Some(claimed)) = (active.identity.as_deref(), request.identity) {
        if bound.trim().to_lowercase() != claimed.trim().to_lowercase() {
            return Err(LivenessError::ChallengeMismatch("identity differs from the challenge".to_string()));
        }
    }
    if active.status != ChallengeStatus::Pending {
        return Err(LivenessError::ChallengeMismatch(format!("challenge already {:?}", active.status)));
    }
    Ok(())
}

/// Issues challenges and turns submitted frames into verdicts.
pub struct ChallengeOrchestrator {
    pipeline: Arc<LivenessPipeline>,
    sessions: Arc<SessionStore>,
    tokens: Arc<ProofTokenIssuer>,
    analytics: AnalyticsTracker,
    max_attempts: u32,
}

impl ChallengeOrchestrator {
    pub fn new(
        pipeline: Arc<LivenessPipeline>,
        sessions: Arc<SessionStore>,
        tokens: Arc<ProofTokenIssuer>,
        analytics: AnalyticsTracker,
        max_attempts: u32,
    ) -> Self {
        ChallengeOrchestrator {
            pipeline,
            sessions,
            tokens,
            analytics,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn pipeline(&self) -> &Arc<LivenessPipeline> {
        &self.pipeline
    }

    pub fn tokens(&self) -> &Arc<ProofTokenIssuer> {
        &self.tokens
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Picks a random gesture and binds it to the session, replacing any
    /// pending challenge and clearing gesture history.
    pub fn issue_challenge(&self, identity: Option<&str>, session_id: Option<&str>) -> IssuedChallenge {
        let session_id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(session_id) => session_id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        let gesture = *GestureKind::CATALOG.choose(&mut rand::thread_rng()).unwrap_or(&GestureKind::Blink);
        let challenge = Challenge {
            id: Uuid::new_v4().to_string(),
            gesture,
            instruction: gesture.instruction(),
        };

        let session = self.sessions.get_or_create(&session_id);
        {
            let mut state = session.lock();
            state.gestures.reset();
            state.challenge = Some(ActiveChallenge::new(challenge.clone(), identity.map(str::to_string)));
            state.touch();
        }

        self.analytics.track_event(EventType::VerificationStarted, &session_id, identity, None);
        self.analytics.track_event(
            EventType::ChallengeGenerated,
            &session_id,
            identity,
            Some(json!({ "challenge_id": challenge.id, "gesture": gesture })),
        );
        info!("issued challenge {} ({}) for session {}", challenge.id, gesture, session_id);

        IssuedChallenge {
            challenge_id: challenge.id,
            gesture,
            instruction: challenge.instruction,
            session_id,
        }
    }

    pub async fn validate(&self, request: ValidationRequest<'_>) -> Result<VerificationVerdict, LivenessError> {
        let frame = Frame::decode(request.frame_bytes)?;
        let observation = self.pipeline.observe(&frame).await?;

        let outcome = self.apply_frame(&request, &observation);

        let face_detected = observation.face_detected();
        let liveness = observation.liveness_passed();
        let gesture_signal = outcome.signals.satisfies(request.gesture);
        if let Some(mismatch) = &outcome.mismatch {
            debug!("session {}: {mismatch}", request.session_id);
        }
        let reasons = failure_reasons(face_detected, liveness, gesture_signal, outcome.mismatch.is_none());
        let success = reasons.is_empty();
        let identity = outcome.identity.or_else(|| request.identity.map(str::to_string));
        let liveness_confidence = observation.liveness_confidence();

        self.track_frame(&request, &observation, identity.as_deref(), gesture_signal);
        self.analytics.track_validation_result(
            request.session_id,
            success,
            request.gesture.as_str(),
            liveness_confidence,
            identity.as_deref(),
            reasons.first().copied(),
        );

        let mut verdict = VerificationVerdict {
            success,
            message: if success {
                "Verification successful".to_string()
            } else {
                format!("Verification failed: {}", reasons.join(", "))
            },
            results: ValidationResults::new(&observation, &outcome.signals),
            failure_reasons: reasons,
            liveness_confidence,
            gesture_satisfied: gesture_signal,
            verification_token: None,
            proof_hash: None,
            expires_at: None,
        };

        if let (true, Some(identity)) = (success, identity.as_deref()) {
            let hash = proof_hash(request.frame_bytes, request.challenge_id, identity);
            let issued = self.tokens.issue(identity, request.gesture.as_str(), &hash, request.session_id)?;
            verdict.verification_token = Some(issued.token);
            verdict.proof_hash = Some(hash);
            verdict.expires_at = Some(issued.expires_at.to_rfc3339());
        }

        debug!("session {} verdict success={} reasons={:?}", request.session_id, verdict.success, verdict.failure_reasons);
        Ok(verdict)
    }

    /// Updates gesture history and the challenge state machine for one frame.
    fn apply_frame(&self, request: &ValidationRequest<'_>, observation: &FrameObservation) -> FrameOutcome {
        let session = self.sessions.get_or_create(request.session_id);
        let mut state = session.lock();
        state.touch();

        let signals = self.pipeline.extract_signals(&mut state.gestures, observation);
        let gesture_signal = signals.satisfies(request.gesture);
        let face_ok = observation.face_detected() && observation.liveness_passed();

        let SessionState { challenge, session_id, .. } = &mut *state;
        let Some(active) = challenge.as_mut() else {
            let mismatch = LivenessError::ChallengeMismatch(format!("session {session_id} has no challenge"));
            return FrameOutcome { signals, mismatch: Some(mismatch), identity: None };
        };
        let identity = active.identity.clone();

        if let Err(mismatch) = match_challenge(active, request) {
            let replayed = active.status != ChallengeStatus::Pending
                && active.challenge.id == request.challenge_id
                && active.challenge.gesture == request.gesture;
            if replayed {
                warn!("challenge {} replayed on session {session_id} after {:?}", active.challenge.id, active.status);
                self.analytics.track_event(
                    EventType::ReplayAttackDetected,
                    session_id,
                    identity.as_deref(),
                    Some(json!({ "challenge_id": active.challenge.id, "status": active.status })),
                );
            }
            return FrameOutcome { signals, mismatch: Some(mismatch), identity };
        }

        if face_ok && gesture_signal {
            active.status = ChallengeStatus::Succeeded;
        } else {
            active.attempts += 1;
            if active.attempts >= self.max_attempts {
                active.status = ChallengeStatus::Failed;
                self.analytics.track_event(
                    EventType::AttemptsExhausted,
                    session_id,
                    identity.as_deref(),
                    Some(json!({ "challenge_id": active.challenge.id, "attempts": active.attempts })),
                );
            }
        }

        FrameOutcome { signals, mismatch: None, identity }
    }

    fn track_frame(&self, request: &ValidationRequest<'_>, observation: &FrameObservation, identity: Option<&str>, gesture_signal: bool) {
        if let Some(LivenessError::FaceTooSmall { area, min }) = &observation.rejection {
            self.analytics
                .track_quality_failure(request.session_id, "face_size", *area as f64, *min as f64, identity);
        }
        if observation.face_detected() && !observation.liveness_passed() {
            self.analytics.track_event(
                EventType::LivenessFailed,
                request.session_id,
                identity,
                Some(json!({ "confidence": observation.liveness_confidence() })),
            );
        }
        if gesture_signal {
            self.analytics.track_event(
                EventType::GestureCaptured,
                request.session_id,
                identity,
                Some(json!({ "gesture": request.gesture })),
            );
        }
    }

    /// One frame of the video stream: liveness plus every gesture signal,
    /// accumulated in the session's history. No challenge is consumed.
    pub async fn process_stream_frame(&self, session_id: &str, frame_bytes: &[u8]) -> Result<StreamFrameResult, LivenessError> {
        let frame = Frame::decode(frame_bytes)?;
        let observation = self.pipeline.observe(&frame).await?;

        let session = self.sessions.get_or_create(session_id);
        let (signals, blink_count) = {
            let mut state = session.lock();
            state.touch();
            let signals = self.pipeline.extract_signals(&mut state.gestures, &observation);
            (signals, state.gestures.blink_count)
        };

        Ok(StreamFrameResult {
            session_id: session_id.to_string(),
            results: ValidationResults::new(&observation, &signals),
            liveness_confidence: observation.liveness_confidence(),
            bbox: observation.bbox,
            blink_count,
        })
    }

    pub fn sweep_expired(&self) -> usize {
        let evicted = self.sessions.evict_expired();
        for session_id in &evicted {
            self.analytics.track_event(EventType::SessionTimeout, session_id, None, None);
        }
        if !evicted.is_empty() {
            info!("evicted {} idle sessions", evicted.len());
        }
        evicted.len()
    }

    /// Periodically evicts idle sessions until the runtime shuts down.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                orchestrator.sweep_expired();
            }
        })
    }
}
