//! Classification of the authority's answer into a single terminal action.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, HeaderName, StatusCode};

use crate::config::{FailurePolicy, FilterSettings};

/// What the filter does with an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The authority approved without a body: the downstream handler runs.
    Pass,
    /// The authority's status, allowlisted headers and body go to the caller.
    Respond,
    /// The request is failed without running the downstream handler.
    Abort(AbortMode),
    /// The authority failed and policy says to carry on without it.
    IgnoreAndPass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortMode {
    /// No usable authority response: reply `502 Bad Gateway`.
    BadGateway,
    /// The authority reported a failure status: relay its response.
    Relay,
}

impl Outcome {
    /// Outcome when the shadow request produced no response at all.
    pub fn transport_failure(policy: FailurePolicy) -> Self {
        match policy {
            FailurePolicy::Ignore => Outcome::IgnoreAndPass,
            FailurePolicy::Abort => Outcome::Abort(AbortMode::BadGateway),
        }
    }

    /// Outcome for an authority response with the given status and length.
    ///
    /// An unknown length counts as a body.
    pub fn classify(settings: &FilterSettings, status: StatusCode, content_length: Option<u64>) -> Self {
        if status.is_success() {
            return match content_length {
                Some(0) => Outcome::Pass,
                _ => Outcome::Respond,
            };
        }

        if settings.is_failure_status(status) {
            return match settings.failure_policy {
                FailurePolicy::Ignore => Outcome::IgnoreAndPass,
                FailurePolicy::Abort => Outcome::Abort(AbortMode::Relay),
            };
        }

        Outcome::Respond
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Respond => "respond",
            Outcome::Abort(AbortMode::BadGateway) => "abort",
            Outcome::Abort(AbortMode::Relay) => "abort_relay",
            Outcome::IgnoreAndPass => "ignore_and_pass",
        }
    }
}

/// Copy each allowlisted header present in `src` onto `dst`, replacing
/// whatever `dst` held under that name.
pub fn copy_allowlisted(src: &HeaderMap, dst: &mut HeaderMap, allowlist: &[HeaderName]) {
    for name in allowlist {
        let mut values = src.get_all(name).iter().filter(|v| !v.is_empty()).peekable();
        if values.peek().is_none() {
            continue;
        }
        dst.remove(name);
        for value in values {
            dst.append(name.clone(), value.clone());
        }
    }
}

/// The caller-facing response for a relayed authority answer.
///
/// The body is streamed only when the authority sent one.
pub fn relay(reply: reqwest::Response, allowlist: &[HeaderName]) -> Response {
    let status = reply.status();
    let mut headers = HeaderMap::new();
    copy_allowlisted(reply.headers(), &mut headers, allowlist);

    let body = match reply.content_length() {
        Some(0) => Body::empty(),
        _ => Body::from_stream(reply.bytes_stream()),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

pub fn bad_gateway() -> Response {
    StatusCode::BAD_GATEWAY.into_response()
}
