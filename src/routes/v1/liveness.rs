use axum::extract::DefaultBodyLimit;
use axum::Router;
use axum::routing::post;
use tower_http::limit::RequestBodyLimitLayer;
use crate::handler::liveness_handler::{analyze, issue_challenge, validate, verify_token};
use crate::state::liveness_state::LivenessState;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn new_liveness_route() -> Router<LivenessState> {
    let upload_router = Router::new()
        .route("/analyze", post(analyze))
        .route("/validate", post(validate))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(
            MAX_UPLOAD_BYTES, /* 10mb */
        ));

    Router::new()
        .route("/challenge", post(issue_challenge))
        .route("/verify-token", post(verify_token))
        .merge(upload_router)
}
