use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use serde_json::json;
use crate::error::liveness_error::LivenessError;


#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[repr(u16)]
pub enum ResponseCode {
    CodeOK = 0,
    ErrorCodeAuth = 1,
    ErrorCodeInput = 2,
    ErrorCodeServer = 3,
    ErrorCodeValidation = 6,
}

impl ResponseCode {
    pub fn response_code(v: ResponseCode) -> u16 {
        v as u16
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {

    #[error("{0}")]
    Authenticate(#[from] AuthenticateError),
}

impl Error {
    fn get_codes(&self) -> (StatusCode, u16) {
        match *self {
            Error::Authenticate(AuthenticateError::MissingCredentials) => (StatusCode::UNAUTHORIZED, ResponseCode::response_code(ResponseCode::ErrorCodeAuth)),
            Error::Authenticate(AuthenticateError::WrongCredentials) => (StatusCode::FORBIDDEN, ResponseCode::response_code(ResponseCode::ErrorCodeAuth)),
            Error::Authenticate(AuthenticateError::InvalidToken) => (StatusCode::UNAUTHORIZED, ResponseCode::response_code(ResponseCode::ErrorCodeAuth)),
        }
    }

    /// Status and envelope code a domain failure surfaces with.
    pub fn codes_for(err: &LivenessError) -> (StatusCode, ResponseCode) {
        if err.is_client_error() {
            (StatusCode::BAD_REQUEST, ResponseCode::ErrorCodeInput)
        } else if err.is_frame_rejection() {
            (StatusCode::OK, ResponseCode::ErrorCodeValidation)
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, ResponseCode::ErrorCodeServer)
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status_code, code) = self.get_codes();
        let message = self.to_string();
        let body = Json(json!({ "code": code, "message": message }));

        (status_code, body).into_response()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AuthenticateError {
    #[error("Wrong authentication credentials")]
    WrongCredentials,
    #[error("Invalid authentication credentials")]
    InvalidToken,
    #[error("Missing authentication credentials")]
    MissingCredentials,
}
