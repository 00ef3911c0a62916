use axum::extract::Request;
use axum::middleware::Next;
use axum::response::IntoResponse;
use http::{header, HeaderMap};
use uuid::Uuid;
use crate::error::errors::Error;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Stamps every request with a fresh id unless the caller supplied one.
pub async fn generate_request_id_mw(mut req: Request, next: Next) -> Result<impl IntoResponse, Error> {
    if !req.headers().contains_key(REQUEST_ID_HEADER) {
        let request_id = Uuid::new_v4().to_string();
        if let Ok(value) = header::HeaderValue::from_str(&request_id) {
            req.headers_mut().insert(header::HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
    }

    Ok(next.run(req).await)
}

pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default()
}
