//! Server error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use roomservice_core::OrderError;
use serde_json::json;
use thiserror::Error;

/// Failures starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving the listener failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The Prometheus recorder could not be installed.
    #[error("metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Error returned by the HTTP order routes.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The order collaborator rejected the request.
    #[error(transparent)]
    Order(#[from] OrderError),
    /// The request body could not be understood.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Order(OrderError::Validation(_)) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Order(OrderError::NotFound(_)) => StatusCode::NOT_FOUND,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Order(e) => e.code(),
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
