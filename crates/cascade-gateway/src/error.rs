use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cascade_core::CascadeError;
use thiserror::Error;
use tracing::error;

/// Caller-visible failure of a gateway request.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body could not be parsed.
    #[error("invalid request body: {0}")]
    BadRequest(String),

    /// A routing or dispatch failure.
    #[error(transparent)]
    Cascade(#[from] CascadeError),
}

impl ApiError {
    /// HTTP status and OpenAI-style error type for this failure.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) | Self::Cascade(CascadeError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_request_error")
            }
            Self::Cascade(CascadeError::Exhausted(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "all_candidates_failed")
            }
            Self::Cascade(CascadeError::Config(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error")
            }
        }
    }

    /// The `{"error": {...}}` body sent to the caller.
    pub fn body(&self) -> serde_json::Value {
        let (_, kind) = self.classify();
        let mut detail = serde_json::json!({
            "type": kind,
            "message": self.to_string(),
        });
        if let Self::Cascade(CascadeError::Exhausted(failures)) = self {
            detail["attempts"] = serde_json::json!(failures);
        }
        serde_json::json!({ "error": detail })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        if status.is_server_error() {
            error!(status = status.as_u16(), kind, error = %self, "Request failed");
        }
        (status, Json(self.body())).into_response()
    }
}
