//! Forward-auth filter for axum services.
//!
//! Every inbound request is mirrored as a shadow request to a remote
//! authority. Depending on its answer the request continues to the
//! downstream handler, the authority's response is returned instead, or the
//! configured failure policy applies.

pub mod config;
pub mod error;
pub mod filter;
pub mod headers;
pub mod server;
pub mod upstream;

pub use config::{FailurePolicy, FilterConfig, FilterSettings};
pub use error::{ConfigError, DispatchError, MirrorError};
pub use filter::decision::{AbortMode, Outcome};
pub use filter::shadow::TlsConnection;
pub use filter::{forward_filter, ForwardFilter};
