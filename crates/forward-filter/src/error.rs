//! Error types for filter construction and shadow dispatch.

use http::StatusCode;
use thiserror::Error;

/// Rejected configuration. Raised while building the filter, never per request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("authority address {address:?} is not a valid URL: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("authority address {address:?} must be an absolute http(s) URL with a host")]
    UnsupportedAddress { address: String },

    #[error("illegal failurePolicy {0:?}, expected \"ignore\" or \"abort\"")]
    InvalidFailurePolicy(String),

    #[error("invalid header name {0:?}")]
    InvalidHeaderName(String),

    #[error("invalid value for header {name:?}")]
    InvalidHeaderValue { name: String },

    #[error("invalid failure status code {0}")]
    InvalidStatusCode(u16),

    #[error("failed to build authority client: {0}")]
    Client(#[source] reqwest::Error),
}

/// A shadow request that never produced an authority response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("shadow request was dispatched before a target URL was set")]
    Unpopulated,

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl DispatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DispatchError::Transport(e) if e.is_timeout())
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, DispatchError::Transport(e) if e.is_connect())
    }
}

/// An inbound body that could not be buffered for mirroring. The request
/// is answered by the filter; neither the authority nor the downstream
/// handler sees it.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("request body exceeds the {limit} byte mirroring limit")]
    TooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    Read(#[source] axum::BoxError),
}

impl MirrorError {
    pub fn status(&self) -> StatusCode {
        match self {
            MirrorError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            MirrorError::Read(_) => StatusCode::BAD_REQUEST,
        }
    }
}
