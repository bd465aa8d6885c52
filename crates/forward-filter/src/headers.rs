//! Hop-by-hop header handling (RFC 7230, section 6.1) and the
//! `X-Forwarded-*` names the filter synthesizes.

use http::header::{CONNECTION, TE, TRANSFER_ENCODING, UPGRADE};
use http::{HeaderMap, HeaderName};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_METHOD: HeaderName = HeaderName::from_static("x-forwarded-method");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_URI: HeaderName = HeaderName::from_static("x-forwarded-uri");

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
const TRAILERS: HeaderName = HeaderName::from_static("trailers");

/// Headers that only describe a single connection and are never forwarded.
pub const HOP_BY_HOP_HEADERS: [HeaderName; 6] =
    [CONNECTION, KEEP_ALIVE, TE, TRAILERS, TRANSFER_ENCODING, UPGRADE];

/// Remove every hop-by-hop header from `headers`.
///
/// That is the fixed [`HOP_BY_HOP_HEADERS`] set plus every header nominated
/// by a token of the `Connection` header. Idempotent.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in connection_nominated(headers) {
        headers.remove(name);
    }
    for name in &HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

fn connection_nominated(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| HeaderName::from_bytes(token.as_bytes()).ok())
        .collect()
}
