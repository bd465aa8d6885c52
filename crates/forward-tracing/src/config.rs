//! The `[tracing]` table of the filter's configuration file.

use serde::Deserialize;

/// Where filter logs and spans go.
///
/// Logs always go to stderr. Request, authority-dispatch and upstream spans
/// are additionally exported when `otlp_endpoint` is set.
#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Collector receiving filter spans, e.g. "http://collector:4317".
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default)]
    pub protocol: OtlpProtocol,

    /// `EnvFilter` directive. "forward_filter=debug" shows every outcome and
    /// authority latency.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Transport to the collector.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

fn default_service_name() -> String {
    "forward-filter".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
            protocol: OtlpProtocol::default(),
            log_level: default_log_level(),
        }
    }
}
