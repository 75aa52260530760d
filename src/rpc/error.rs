//! HTTP mapping of [`TimingError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::ErrorBody;
use crate::error::TimingError;

/// Errors from starting or running the HTTP server.
#[derive(Debug, Error)]
pub enum RpcServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// Status code for each error class.
pub fn status_of(err: &TimingError) -> StatusCode {
    match err {
        TimingError::Validation { .. } => StatusCode::BAD_REQUEST,
        TimingError::NotFound { .. } => StatusCode::NOT_FOUND,
        TimingError::Conflict { .. } | TimingError::StaleCommand { .. } => StatusCode::CONFLICT,
        TimingError::Process { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        TimingError::ConnectionLost { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for TimingError {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        if status.is_server_error() {
            warn!(label = self.as_label(), err = %self, "request failed");
        } else {
            debug!(label = self.as_label(), err = %self, "request rejected");
        }
        let body = ErrorBody {
            error: self.as_label().to_string(),
            message: self.as_message(),
        };
        (status, Json(body)).into_response()
    }
}
