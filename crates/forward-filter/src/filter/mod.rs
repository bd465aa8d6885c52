//! The forward filter: consult the authority, then pass, respond or abort.
//!
//! Per inbound request:
//! 1. Strip hop-by-hop headers from the inbound request
//! 2. Stage a pooled shadow request for the authority, rejecting a body
//!    that cannot be mirrored
//! 3. Dispatch it (no redirects, bounded by `requestTimeout`)
//! 4. Classify the answer into one [`Outcome`] and carry it out
//!
//! Exactly one of "run the downstream handler" and "write a response" happens.

pub mod decision;
pub mod pool;
pub mod shadow;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;

use crate::config::{FilterConfig, FilterSettings};
use crate::error::{ConfigError, DispatchError};
use crate::headers::strip_hop_by_hop;
use decision::{bad_gateway, copy_allowlisted, relay, AbortMode, Outcome};
use pool::RequestPool;
use shadow::ShadowRequest;

/// Idle shadow request structures kept for reuse.
const POOL_CAPACITY: usize = 256;

/// Forward-auth filter. Immutable once built; share it behind an `Arc`.
pub struct ForwardFilter {
    settings: FilterSettings,
    client: reqwest::Client,
    pool: RequestPool,
}

impl ForwardFilter {
    /// Validate `config` and build the authority client.
    pub fn new(config: FilterConfig) -> Result<Self, ConfigError> {
        Self::from_settings(FilterSettings::try_from(config)?)
    }

    pub fn from_settings(settings: FilterSettings) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(settings.request_timeout)
            .danger_accept_invalid_certs(settings.insecure_skip_verify)
            .build()
            .map_err(ConfigError::Client)?;

        tracing::debug!(
            authority = %settings.authority,
            inherit_path = settings.inherit_path,
            timeout_ms = settings.request_timeout.as_millis() as u64,
            failure_policy = ?settings.failure_policy,
            mirror_body = settings.mirror_body,
            "Forward filter configured"
        );

        Ok(Self {
            settings,
            client,
            pool: RequestPool::new(POOL_CAPACITY),
        })
    }

    pub fn pool(&self) -> &RequestPool {
        &self.pool
    }

    /// Run one inbound request through the filter.
    ///
    /// `next` is the downstream handler; it is called at most once, and only
    /// when the outcome is [`Outcome::Pass`] or [`Outcome::IgnoreAndPass`].
    pub async fn handle<N, Fut>(&self, mut request: Request, next: N) -> Response
    where
        N: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let request_id = uuid::Uuid::new_v4();
        let span = forward_tracing::filter_request_span!(request_id, request.method(), request.uri());

        async move {
            strip_hop_by_hop(request.headers_mut());

            let mut shadow = self.pool.acquire();
            let mut request = match shadow::populate(&mut shadow, &self.settings, request).await {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "Rejecting request whose body cannot be mirrored");
                    tracing::Span::current().record("outcome", "reject");
                    return e.status().into_response();
                }
            };

            let reply = match self.dispatch(&shadow).await {
                Ok(reply) => Some(reply),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        timeout = e.is_timeout(),
                        connect = e.is_connect(),
                        policy = ?self.settings.failure_policy,
                        "Authority request failed"
                    );
                    None
                }
            };
            drop(shadow);

            let outcome = match &reply {
                None => Outcome::transport_failure(self.settings.failure_policy),
                Some(reply) => {
                    Outcome::classify(&self.settings, reply.status(), reply.content_length())
                }
            };
            tracing::Span::current().record("outcome", outcome.as_str());

            if let (Some(reply), Outcome::IgnoreAndPass | Outcome::Abort(AbortMode::Relay)) =
                (&reply, outcome)
            {
                tracing::warn!(status = reply.status().as_u16(), "Authority reported a failure status");
            }

            let response = match (outcome, reply) {
                (Outcome::Pass, Some(reply)) => {
                    copy_allowlisted(
                        reply.headers(),
                        request.headers_mut(),
                        &self.settings.response_headers,
                    );
                    drop(reply);
                    next(request).await
                }
                (Outcome::Pass | Outcome::IgnoreAndPass, reply) => {
                    drop(reply);
                    next(request).await
                }
                (Outcome::Respond | Outcome::Abort(AbortMode::Relay), Some(reply)) => {
                    relay(reply, &self.settings.response_headers)
                }
                (Outcome::Respond | Outcome::Abort(_), _) => bad_gateway(),
            };

            tracing::debug!(status = response.status().as_u16(), "Forward filter done");
            response
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, shadow: &ShadowRequest) -> Result<reqwest::Response, DispatchError> {
        let request = shadow.to_request()?;
        let span = forward_tracing::authority_dispatch_span!(request.url());
        let start = Instant::now();

        async {
            let result = self.client.execute(request).await;

            let latency = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("latency_ms", latency);
            if let Ok(reply) = &result {
                tracing::Span::current().record("status", reply.status().as_u16());
            }

            result.map_err(DispatchError::from)
        }
        .instrument(span)
        .await
    }
}

/// Axum middleware running every request through the shared filter.
///
/// ```ignore
/// let app = Router::new()
///     .fallback(handler)
///     .layer(axum::middleware::from_fn_with_state(filter, forward_filter));
/// ```
pub async fn forward_filter(
    State(filter): State<Arc<ForwardFilter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    filter.handle(request, move |request| next.run(request)).await
}
