use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parlor_engine::ChatError;
use parlor_shared::error::ErrorCode;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl ServerError {
    fn code(&self) -> Option<ErrorCode> {
        match self {
            ServerError::Chat(e) => Some(e.code()),
            ServerError::BadRequest(_) => Some(ErrorCode::Validation),
            ServerError::Unauthorized(_) => None,
        }
    }
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::UpstreamDegraded => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status = match code {
            Some(code) => status_for(code),
            None => StatusCode::UNAUTHORIZED,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = serde_json::json!({
            "error": message,
            "code": code.map(|c| c.as_str()),
        });

        (status, axum::Json(body)).into_response()
    }
}
