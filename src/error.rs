//! Relay error taxonomy and its HTTP mapping.
//!
//! Every variant becomes a JSON body (`{"error": ..., "code": ...}`) with
//! the matching status code. The CORS envelope is applied by middleware, so
//! error responses carry the same headers as successful ones.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Missing, relative or otherwise unusable target URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Too many redirects (limit {limit}) while fetching {url}")]
    TooManyRedirects { limit: usize, url: String },

    /// Connection refused, DNS failure, reset, body read failure
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Upstream request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ProxyError::TooManyRedirects { .. } | ProxyError::Upstream(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the JSON body
    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::InvalidUrl(_) => "invalid_url",
            ProxyError::TooManyRedirects { .. } => "too_many_redirects",
            ProxyError::Upstream(_) => "upstream_error",
            ProxyError::Timeout(_) => "upstream_timeout",
            ProxyError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Relay request failed");
        } else {
            tracing::warn!(status = %status, error = %self, "Rejected relay request");
        }

        let body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });

        (status, Json(body)).into_response()
    }
}
