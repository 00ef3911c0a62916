use axum::debug_handler;
use axum::extract::{Multipart, State};
use axum::Json;
use http::{HeaderMap, StatusCode};
use log::{error, info};
use opentelemetry::global;
use opentelemetry::trace::{Span, TraceContextExt, Tracer};
use crate::error::errors::{Error, ResponseCode};
use crate::handler::multipart_form::MultipartForm;
use crate::logger::logger::LogContext;
use crate::middleware::request_id_mw::request_id;
use crate::models::liveness_model::{AnalyzeInput, ChallengeRequest, ValidateInput, VerifyTokenRequest};
use crate::pipeline::liveness_pipeline::liveness_pipeline::AnalyzeResult;
use crate::pipeline::model_config::config::GestureKind;
use crate::pipeline::session::challenge::{IssuedChallenge, VerificationVerdict};
use crate::pipeline::token::proof_token::TokenVerification;
use crate::response::common_response::{envelope, BaseResponse, GeneralResponseResult};
use crate::state::liveness_state::LivenessState;
use crate::tracer::tracer::TRACER_NAME;

#[debug_handler(state = LivenessState)]
pub async fn issue_challenge(
    headers: HeaderMap,
    State(state): State<LivenessState>,
    payload: Option<Json<ChallengeRequest>>,
) -> GeneralResponseResult<BaseResponse<IssuedChallenge>> {
    let request_id = request_id(&headers);
    let Json(body) = payload.unwrap_or_default();
    let _log_context = LogContext::enter(&request_id, body.session_id.as_deref());

    let issued = state
        .liveness_service
        .issue_challenge(body.identity.as_deref(), body.session_id.as_deref());

    Ok(envelope(StatusCode::OK, ResponseCode::CodeOK, "OK", Some(issued), &request_id))
}

#[debug_handler(state = LivenessState)]
pub async fn analyze(
    headers: HeaderMap,
    State(state): State<LivenessState>,
    mut payload: Multipart,
) -> GeneralResponseResult<BaseResponse<AnalyzeResult>> {
    let tracer = global::tracer(TRACER_NAME);
    let parent_ctx = opentelemetry::Context::new();
    let span = tracer.span_builder("liveness-analyze").start_with_context(&tracer, &parent_ctx);
    let request_id = request_id(&headers);
    let _log_context = LogContext::enter(&request_id, None);

    let child_ctx = parent_ctx.with_span(span);
    let mut child = tracer.start_with_context("marshal-request", &child_ctx);
    info!("received analyze request");
    let im_bytes = match MultipartForm::read(&mut payload).await.and_then(|form| form.image()) {
        Ok(im_bytes) => im_bytes,
        Err(message) => {
            child.end();
            return Ok(envelope(StatusCode::BAD_REQUEST, ResponseCode::ErrorCodeInput, message, None, &request_id))
        }
    };
    child.end();

    let mut child = tracer.start_with_context("analyze-frame", &child_ctx);
    let result = match state.liveness_service.analyze(AnalyzeInput { im_bytes }).await {
        Ok(result) => result,
        Err(e) => {
            child.end();
            let (status_code, code) = Error::codes_for(&e);
            return Ok(envelope(status_code, code, e.to_string(), None, &request_id))
        }
    };
    info!("completed analyze: passed={} confidence={:.4}", result.passed, result.confidence);
    child.end();

    Ok(envelope(StatusCode::OK, ResponseCode::CodeOK, "OK", Some(result), &request_id))
}

#[debug_handler(state = LivenessState)]
pub async fn validate(
    headers: HeaderMap,
    State(state): State<LivenessState>,
    mut payload: Multipart,
) -> GeneralResponseResult<BaseResponse<VerificationVerdict>> {
    let tracer = global::tracer(TRACER_NAME);
    let parent_ctx = opentelemetry::Context::new();
    let span = tracer.span_builder("liveness-validate").start_with_context(&tracer, &parent_ctx);
    let request_id = request_id(&headers);
    let _log_context = LogContext::enter(&request_id, None);

    let child_ctx = parent_ctx.with_span(span);
    let mut child = tracer.start_with_context("marshal-request", &child_ctx);
    let input = match read_validate_input(&mut payload).await {
        Ok(input) => input,
        Err(message) => {
            child.end();
            return Ok(envelope(StatusCode::BAD_REQUEST, ResponseCode::ErrorCodeInput, message, None, &request_id))
        }
    };
    let _log_context = LogContext::enter(&request_id, Some(&input.session_id));
    info!("received validate request for gesture {}", input.gesture);
    child.end();

    let mut child = tracer.start_with_context("validate-frame", &child_ctx);
    let verdict = match state.liveness_service.validate(input).await {
        Ok(verdict) => verdict,
        Err(e) => {
            error!("validation aborted: {e}");
            child.end();
            let (status_code, code) = Error::codes_for(&e);
            return Ok(envelope(status_code, code, e.to_string(), None, &request_id))
        }
    };
    child.end();

    let code = if verdict.success { ResponseCode::CodeOK } else { ResponseCode::ErrorCodeValidation };
    let message = verdict.message.clone();
    Ok(envelope(StatusCode::OK, code, message, Some(verdict), &request_id))
}

async fn read_validate_input(payload: &mut Multipart) -> Result<ValidateInput, String> {
    let form = MultipartForm::read(payload).await?;
    let gesture = form.required("gesture")?.parse::<GestureKind>()?;

    Ok(ValidateInput {
        im_bytes: form.image()?,
        gesture,
        challenge_id: form.required("challenge_id")?,
        session_id: form.required("session_id")?,
        identity: form.optional("identity"),
    })
}

#[debug_handler(state = LivenessState)]
pub async fn verify_token(
    headers: HeaderMap,
    State(state): State<LivenessState>,
    Json(body): Json<VerifyTokenRequest>,
) -> GeneralResponseResult<BaseResponse<TokenVerification>> {
    let request_id = request_id(&headers);
    let verification = state.liveness_service.verify_token(&body.token, &body.identity);
    if !verification.valid {
        info!("token rejected: {}", verification.reason.as_deref().unwrap_or("unknown"));
    }

    Ok(envelope(StatusCode::OK, ResponseCode::CodeOK, "OK", Some(verification), &request_id))
}
