//! Generic HTTP forwarder
//!
//! Forwards method, headers and body of an incoming request to a target URL
//! and relays the upstream response. Bodies are buffered in both directions.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use devhub_core::{Error, Result};
use std::time::Duration;
use url::Url;

/// Default timeout for proxied requests (30 seconds)
const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest request or response body relayed (16 MiB)
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Headers that only apply to a single connection
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Forwards requests to a target origin
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Forwarder with certificate verification enabled
    pub fn new() -> Result<Self> {
        Self::build(false)
    }

    /// Forwarder that accepts self-signed certificates
    ///
    /// Only for device-internal targets such as the local database.
    pub fn accepting_invalid_certs() -> Result<Self> {
        Self::build(true)
    }

    fn build(accept_invalid_certs: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_PROXY_TIMEOUT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| Error::proxy("client", format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Forward `request` to `target`
    ///
    /// Never fails: transport errors become `502 Bad Gateway` (or `504` on
    /// timeout) and are logged with the target origin.
    pub async fn forward(&self, request: Request, target: Url) -> Response {
        let origin = target.origin().ascii_serialization();
        let (parts, body) = request.into_parts();

        let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(upstream = %origin, "Rejected request body: {}", e);
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
        };

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        tracing::debug!(method = %parts.method, upstream = %origin, "Proxying request");

        let upstream = self
            .client
            .request(parts.method, target)
            .headers(headers)
            .body(body)
            .send()
            .await;

        let upstream = match upstream {
            Ok(resp) => resp,
            Err(e) => return upstream_failure(&origin, e),
        };

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        let body = match upstream.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return upstream_failure(&origin, e),
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

fn upstream_failure(origin: &str, err: reqwest::Error) -> Response {
    let timed_out = err.is_timeout();
    // The URL may carry request data; log the origin instead
    tracing::warn!(upstream = %origin, "Proxy request failed: {}", err.without_url());
    if timed_out {
        (StatusCode::GATEWAY_TIMEOUT, "Gateway timeout").into_response()
    } else {
        (StatusCode::BAD_GATEWAY, "Bad gateway").into_response()
    }
}
