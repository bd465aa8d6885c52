//! Shadow request construction.
//!
//! The shadow request targets the authority, carries a selection of the
//! inbound headers plus synthesized `X-Forwarded-*` headers, and optionally
//! a copy of the inbound body. Header handling is best-effort; only a body
//! that cannot be buffered for mirroring fails the build.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::uri::Scheme;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Uri};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use reqwest::Url;

use crate::config::FilterSettings;
use crate::error::{DispatchError, MirrorError};
use crate::headers::{
    strip_hop_by_hop, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_METHOD, X_FORWARDED_PROTO,
    X_FORWARDED_URI,
};

/// Request extension marking an inbound connection that arrived over TLS.
///
/// Insert it from whatever terminates TLS in front of the filter so that
/// `X-Forwarded-Proto` is inferred as `https`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsConnection;

/// Outbound request to the authority, staged before dispatch.
#[derive(Debug, Default)]
pub struct ShadowRequest {
    pub method: Method,
    pub url: Option<Url>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ShadowRequest {
    /// Back to the baseline: no headers, no body, no URL, `GET`.
    pub fn reset(&mut self) {
        self.headers.clear();
        self.body = None;
        self.url = None;
        self.method = Method::GET;
    }

    /// The request handed to the HTTP client.
    pub fn to_request(&self) -> Result<reqwest::Request, DispatchError> {
        let url = self.url.clone().ok_or(DispatchError::Unpopulated)?;
        let mut request = reqwest::Request::new(self.method.clone(), url);
        *request.headers_mut() = self.headers.clone();
        if let Some(body) = &self.body {
            *request.body_mut() = Some(body.clone().into());
        }
        Ok(request)
    }
}

/// Fill `shadow` from the inbound request.
///
/// Returns the inbound request, whose body is replaced by an equivalent
/// buffered one when mirroring is enabled. With mirroring, a body larger than
/// `max_body_bytes` or one that fails mid-read is an error: it has been
/// consumed and cannot be handed downstream intact.
pub async fn populate(
    shadow: &mut ShadowRequest,
    settings: &FilterSettings,
    request: Request<Body>,
) -> Result<Request<Body>, MirrorError> {
    let url = target_url(settings, request.uri());

    copy_request_headers(&mut shadow.headers, request.headers(), &settings.request_headers);
    strip_hop_by_hop(&mut shadow.headers);
    // The client frames the shadow body itself.
    shadow.headers.remove(CONTENT_LENGTH);

    if let Some(host) = url.host_str().and_then(|h| HeaderValue::from_str(h).ok()) {
        shadow.headers.insert(HOST, host);
    }
    set_forwarded_headers(&mut shadow.headers, &request);

    for (name, value) in &settings.forward_headers {
        shadow.headers.insert(name.clone(), value.clone());
    }

    shadow.url = Some(url);

    if settings.mirror_body {
        mirror_body(shadow, request, settings.max_body_bytes).await
    } else {
        Ok(request)
    }
}

/// The authority URL, taking the inbound path and query when the configured
/// address has no path of its own.
pub fn target_url(settings: &FilterSettings, uri: &Uri) -> Url {
    let mut url = settings.authority.clone();
    if settings.inherit_path {
        url.set_path(uri.path());
        if let Some(query) = uri.query() {
            url.set_query(Some(query));
        }
    }
    url
}

fn copy_request_headers(dst: &mut HeaderMap, src: &HeaderMap, allowlist: &[HeaderName]) {
    if allowlist.is_empty() {
        for (name, value) in src {
            dst.append(name.clone(), value.clone());
        }
        return;
    }

    for name in allowlist {
        if let Some(value) = src.get(name).filter(|v| !v.is_empty()) {
            dst.insert(name.clone(), value.clone());
        }
    }
}

fn set_forwarded_headers(dst: &mut HeaderMap, request: &Request<Body>) {
    let inbound = request.headers();

    if let Some(ConnectInfo(peer)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        let mut chain = inbound
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        if !chain.is_empty() {
            chain.push_str(", ");
        }
        chain.push_str(&peer.ip().to_string());
        if let Ok(value) = HeaderValue::from_str(&chain) {
            dst.insert(X_FORWARDED_FOR, value);
        }
    }

    if let Ok(method) = HeaderValue::from_str(request.method().as_str()) {
        dst.insert(X_FORWARDED_METHOD, method);
    }

    let host = inbound.get(HOST).cloned().or_else(|| {
        request
            .uri()
            .authority()
            .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
    });
    if let Some(host) = host {
        dst.insert(X_FORWARDED_HOST, host);
    }

    if let Ok(uri) = HeaderValue::from_str(raw_request_uri(request.uri())) {
        dst.insert(X_FORWARDED_URI, uri);
    }

    let proto = match inbound.get(X_FORWARDED_PROTO).filter(|v| !v.is_empty()) {
        Some(upstream) => upstream.clone(),
        None if is_tls(request) => HeaderValue::from_static("https"),
        None => HeaderValue::from_static("http"),
    };
    dst.insert(X_FORWARDED_PROTO, proto);
}

async fn mirror_body(
    shadow: &mut ShadowRequest,
    request: Request<Body>,
    limit: usize,
) -> Result<Request<Body>, MirrorError> {
    let (parts, body) = request.into_parts();

    // Refuse a declared oversize body before reading any of it.
    if declared_length(&parts.headers).is_some_and(|len| len > limit as u64) {
        return Err(MirrorError::TooLarge { limit });
    }

    let bytes = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                MirrorError::TooLarge { limit }
            } else {
                MirrorError::Read(e)
            }
        })?
        .to_bytes();

    shadow.method = Method::POST;
    if let Some(content_type) = parts.headers.get(CONTENT_TYPE) {
        shadow.headers.insert(CONTENT_TYPE, content_type.clone());
    }
    shadow.body = Some(bytes.clone());

    Ok(Request::from_parts(parts, Body::from(bytes)))
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn raw_request_uri(uri: &Uri) -> &str {
    uri.path_and_query().map_or("/", |pq| pq.as_str())
}

fn is_tls<B>(request: &Request<B>) -> bool {
    request.extensions().get::<TlsConnection>().is_some()
        || request.uri().scheme() == Some(&Scheme::HTTPS)
}
