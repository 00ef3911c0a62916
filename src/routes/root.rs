use std::sync::Arc;
use std::time::Duration;

use axum::{Json, middleware, Router};
use axum::extract::State;
use axum::http::header;
use axum::routing::get;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::propagate_header::PropagateHeaderLayer;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use crate::error::errors::ResponseCode;
use crate::handler::stream_handler::video_stream;
use crate::middleware::api_key_mw::{validate_api_key_mw, ApiKey};
use crate::middleware::request_id_mw::{generate_request_id_mw, request_id, REQUEST_ID_HEADER};
use crate::models::liveness_model::HealthStatus;
use crate::pipeline::session::challenge::ChallengeOrchestrator;
use crate::response::common_response::{envelope, BaseResponse, GeneralResponseResult};
use crate::routes::v1::liveness::new_liveness_route;
use crate::state::liveness_state::LivenessState;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;

#[derive(Clone, Serialize, Deserialize)]
struct FallbackResponse {
    message: String,
}

#[derive(Clone)]
pub struct RouterState {
    orchestrator: Arc<ChallengeOrchestrator>,
    api_key: ApiKey,
    request_timeout: Duration,
    allowed_origins: Vec<String>,
}

impl RouterState {
    pub fn new(orchestrator: Arc<ChallengeOrchestrator>) -> Self {
        RouterState {
            orchestrator,
            api_key: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            allowed_origins: Vec::new(),
        }
    }

    pub fn api_key(mut self, api_key: Option<&str>) -> Self {
        self.api_key = api_key.map(str::trim).filter(|k| !k.is_empty()).map(Arc::from);
        self
    }

    pub fn request_timeout(mut self, request_timeout: Option<u64>) -> Self {
        if let Some(secs) = request_timeout {
            self.request_timeout = Duration::from_secs(secs);
        }
        self
    }

    pub fn allowed_origins(mut self, allowed_origins: Option<&[String]>) -> Self {
        self.allowed_origins = allowed_origins.map(<[String]>::to_vec).unwrap_or_default();
        self
    }
}

pub fn root_routes(router_state: RouterState) -> Router {
    let liveness_state = LivenessState::new(&router_state.orchestrator);

    let v1_router = Router::new()
        .nest("/v1", new_liveness_route())
        .with_state(liveness_state.clone())
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn_with_state(router_state.api_key.clone(), validate_api_key_mw));

    let health_router = Router::new()
        .route("/health", get(healthcheck))
        .with_state(liveness_state.clone());

    let stream_router = Router::new()
        .route("/ws/video", get(video_stream))
        .with_state(liveness_state);

    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(health_router)
                .merge(v1_router),
        )
        .merge(stream_router)
        .layer(PropagateHeaderLayer::new(header::HeaderName::from_static(REQUEST_ID_HEADER)))
        .layer(cors_layer(&router_state.allowed_origins))
        .layer(middleware::from_fn(generate_request_id_mw))
        .layer(TimeoutLayer::new(router_state.request_timeout))
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::HeaderName::from_static("x-api-key")]))
        .fallback(fallback)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::HEAD, Method::OPTIONS];
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        return CorsLayer::permissive().allow_methods(methods);
    }
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(Any)
}

async fn fallback(uri: Uri) -> (StatusCode, Json<FallbackResponse>) {
    (StatusCode::NOT_FOUND, Json(FallbackResponse {
        message: format!("No route for {uri}"),
    }))
}

async fn healthcheck(headers: HeaderMap, State(state): State<LivenessState>) -> GeneralResponseResult<BaseResponse<HealthStatus>> {
    let health = HealthStatus {
        status: "ok",
        active_sessions: state.liveness_service.active_sessions(),
    };
    Ok(envelope(StatusCode::OK, ResponseCode::CodeOK, "OK", Some(health), &request_id(&headers)))
}
