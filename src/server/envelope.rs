//! Response envelope applied to every reply.
//!
//! A wildcard CORS policy is stamped on all responses, including errors,
//! panics and 404s, so browser players can always read the body. `OPTIONS`
//! on any path is answered here with a bare 204.

use crate::error::ProxyError;
use crate::hls::PLAYLIST_CONTENT_TYPE;
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::any::Any;
use tracing::error;

pub const CORS_HEADERS: [(HeaderName, &str); 4] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, HEAD, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
    (header::ACCESS_CONTROL_EXPOSE_HEADERS, "*"),
];

pub const NO_CACHE_HEADERS: [(HeaderName, &str); 3] = [
    (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
    (header::PRAGMA, "no-cache"),
    (header::EXPIRES, "0"),
];

pub fn apply_cors(headers: &mut HeaderMap) {
    for (name, value) in CORS_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
}

pub fn apply_no_cache(headers: &mut HeaderMap) {
    for (name, value) in NO_CACHE_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
}

/// Axum middleware: answer preflights and add CORS headers to everything else.
///
/// Not `tower_http::cors::CorsLayer`: that answers preflights with 200 and
/// adds `Vary` instead of this fixed header set. Every `OPTIONS` here must
/// be a bare 204 and every response must carry exactly `CORS_HEADERS`.
pub async fn cors_envelope(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors(response.headers_mut());
        return response;
    }

    let mut response = next.run(req).await;
    apply_cors(response.headers_mut());
    response
}

/// A rewritten (or raw) playlist: playlist content type, never cached.
pub fn playlist_response(status: StatusCode, body: String) -> Response {
    let mut response = (status, Body::from(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(PLAYLIST_CONTENT_TYPE),
    );
    apply_no_cache(headers);
    response
}

/// `CatchPanicLayer` handler: a panicking handler becomes a JSON 500.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    error!("Request handler panicked: {}", detail);
    ProxyError::Internal("request handler panicked".to_string()).into_response()
}
