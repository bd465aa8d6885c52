//! Span builder macros for forward-filter instrumentation.

/// Span covering one inbound request through the filter.
///
/// `outcome` is recorded once the decision is made
/// (`pass`, `respond`, `abort`, `ignore_and_pass`).
#[macro_export]
macro_rules! filter_request_span {
    ($request_id:expr, $method:expr, $uri:expr) => {
        tracing::info_span!(
            "forward_filter",
            request_id = %$request_id,
            method = %$method,
            uri = %$uri,
            outcome = tracing::field::Empty,
        )
    };
}

/// Span covering the shadow request round trip to the authority.
#[macro_export]
macro_rules! authority_dispatch_span {
    ($target:expr) => {
        tracing::info_span!(
            "authority_dispatch",
            target = %$target,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}

/// Span for the sidecar's forward to its upstream.
#[macro_export]
macro_rules! upstream_forward_span {
    ($method:expr, $url:expr) => {
        tracing::info_span!(
            "upstream_forward",
            method = %$method,
            url = %$url,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}
