use thiserror::Error;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use reqmeter_core::MeterError;
use serde_json::json;

use crate::middleware::ChainFailure;

pub type Result<T> = std::result::Result<T, WebError>;

#[derive(Debug, Error)]
pub enum WebError {
    #[error(transparent)]
    Meter(#[from] MeterError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WebError {
    pub fn client_code(&self) -> &'static str {
        match self {
            WebError::Meter(e) => e.code().as_str(),
            WebError::NotFound(_) => "NOT_FOUND",
            WebError::Io(_) => "IO",
            WebError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            WebError::NotFound(_) => StatusCode::NOT_FOUND,
            WebError::Meter(_) | WebError::Io(_) | WebError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// Server errors carry a `ChainFailure` marker so the tracking middleware
// records them as `nok`.
impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        let body = Json(json!({
            "error": self.client_code(),
            "message": message,
        }));
        let mut response = (status, body).into_response();
        if status.is_server_error() {
            response.extensions_mut().insert(ChainFailure(message));
        }
        response
    }
}
