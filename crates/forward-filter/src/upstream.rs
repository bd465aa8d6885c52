//! Forwarding of passed requests to the upstream service.
//!
//! This is the sidecar's downstream handler. Method, path, query, headers
//! and body go through unchanged apart from hop-by-hop headers; the response
//! body is streamed back verbatim.

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use http::header::HOST;
use http::{HeaderMap, StatusCode};
use tracing::Instrument;

use crate::config::UpstreamConfig;
use crate::headers::strip_hop_by_hop;

/// Client for the upstream service.
#[derive(Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base_url: String,
    max_body_bytes: usize,
}

impl Upstream {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            max_body_bytes: config.max_body_bytes,
        })
    }

    /// Upstream URL for an inbound path and query.
    pub fn url_for(&self, request: &Request) -> String {
        let path_and_query = request
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str());
        format!("{}{path_and_query}", self.base_url)
    }

    /// Forward `request` upstream and stream the response back.
    pub async fn forward(&self, request: Request) -> Response {
        let method = request.method().clone();
        let url = self.url_for(&request);
        let span = forward_tracing::upstream_forward_span!(method, url);
        let start = Instant::now();

        async {
            let (parts, body) = request.into_parts();
            let body = match axum::body::to_bytes(body, self.max_body_bytes).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read request body");
                    return (StatusCode::BAD_REQUEST, "failed to read request body").into_response();
                }
            };

            let mut headers = parts.headers;
            strip_hop_by_hop(&mut headers);
            headers.remove(HOST);

            let result = self
                .client
                .request(method, &url)
                .headers(headers)
                .body(body)
                .send()
                .await;

            build_response(result, start)
        }
        .instrument(span)
        .await
    }
}

fn build_response(result: Result<reqwest::Response, reqwest::Error>, start: Instant) -> Response {
    let latency = start.elapsed().as_millis() as u64;
    tracing::Span::current().record("latency_ms", latency);

    let upstream = match result {
        Ok(upstream) => upstream,
        Err(e) if e.is_timeout() => {
            tracing::Span::current().record("status", 504_u16);
            tracing::error!(error = %e, "Upstream timeout");
            return (StatusCode::GATEWAY_TIMEOUT, "upstream timeout").into_response();
        }
        Err(e) => {
            tracing::Span::current().record("status", 502_u16);
            tracing::error!(error = %e, "Upstream connection error");
            return (StatusCode::BAD_GATEWAY, "upstream connection error").into_response();
        }
    };

    let status = upstream.status();
    tracing::Span::current().record("status", status.as_u16());
    tracing::debug!(status = status.as_u16(), latency_ms = latency, "Upstream forward complete");

    let mut headers: HeaderMap = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
