//! Error handling and client-facing error responses for the proxy
//!
//! Internally every failure keeps its cause for logging. Clients only ever see
//! two outcomes: a routing failure (`400 Not Found`) or a downstream failure
//! (`502 Bad Gateway`).

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use hyper::{Response, StatusCode};
use std::time::Duration;

/// Anything that went wrong between selecting a backend and relaying its response
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid backend URL '{url}': {reason}")]
    InvalidBackendUrl { url: String, reason: String },

    #[error("failed to build upstream request: {0}")]
    RequestBuild(#[source] hyper::http::Error),

    #[error("failed to reach backend: {0}")]
    Connect(#[source] hyper_util::client::legacy::Error),

    #[error("failed to read backend response body: {0}")]
    ReadBody(#[source] hyper::Error),

    #[error("backend did not respond within {}s", .0.as_secs())]
    Timeout(Duration),
}

impl UpstreamError {
    /// Short label for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::InvalidBackendUrl { .. } => "invalid_backend_url",
            UpstreamError::RequestBuild(_) => "request_build",
            UpstreamError::Connect(_) => "connect",
            UpstreamError::ReadBody(_) => "read_body",
            UpstreamError::Timeout(_) => "timeout",
        }
    }
}

/// Failure of a single proxied request
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no route for path '{path}'")]
    RouteNotFound { path: String },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ProxyError {
    /// HTTP status shown to the client
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Response body text shown to the client
    pub fn client_message(&self) -> &'static str {
        match self {
            ProxyError::RouteNotFound { .. } => "Not Found",
            ProxyError::Upstream(_) => "Bad Gateway",
        }
    }

    pub fn to_response(&self) -> Response<BoxBody<Bytes, hyper::Error>> {
        error_response(self.status_code(), self.client_message())
    }
}

/// Plain-text error response
pub fn error_response(
    status: StatusCode,
    message: &str,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = format!("{}\n", message);

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
        .header(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"))
        .body(Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
