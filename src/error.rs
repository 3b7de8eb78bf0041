use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Error surface of the HTTP API. Internal errors carry their anyhow chain
/// into the JSON body so operators can see which upstream broke.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let bad = ApiError::BadRequest("start and end are required".to_string()).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let internal = ApiError::from(anyhow::anyhow!("prometheus down")).into_response();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_internal_error_keeps_context_chain() {
        let root = anyhow::anyhow!("connection refused");
        let err = ApiError::from(root.context("Prometheus request failed"));
        let text = err.to_string();
        assert!(text.contains("Prometheus request failed"));
        assert!(text.contains("connection refused"));
    }
}
