//! Configuration types, loading, and validation.
//!
//! [`FilterConfig`] is the raw, deserialized form of the filter options.
//! [`FilterSettings`] is the validated form the filter runs on: built once by
//! `TryFrom`, immutable afterwards and shared by every request.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use forward_tracing::TracingConfig;
use http::{HeaderName, HeaderValue, StatusCode};
use reqwest::Url;
use serde::Deserialize;

use crate::error::ConfigError;

/// Shadow request timeout when `requestTimeout` is unset or zero.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Authority statuses treated as failures when `failureStatusCode` is empty.
pub const DEFAULT_FAILURE_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Top-level configuration of the sidecar binary.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub filter: FilterConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

/// The service requests are handed to once the filter lets them pass.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,

    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Raw filter options, named as operators write them.
///
/// Keys are camelCase; snake_case aliases exist so that every option can
/// also be set through `FORWARD_FILTER_FILTER__*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    /// Authority URL. An address without a path inherits the inbound path.
    #[serde(default)]
    pub address: String,

    #[serde(default, alias = "insecure_skip_verify")]
    pub insecure_skip_verify: bool,

    /// Sent as `X-Forwarded-<key>: <value>` on every shadow request.
    #[serde(default, alias = "forward_headers")]
    pub forward_headers: BTreeMap<String, String>,

    /// Inbound headers copied to the shadow request. Empty copies all.
    #[serde(default, alias = "request_headers")]
    pub request_headers: Vec<String>,

    #[serde(default, alias = "request_with_body")]
    pub request_with_body: bool,

    /// Milliseconds.
    #[serde(default, alias = "request_timeout")]
    pub request_timeout: u64,

    /// Authority response headers carried onto the reply or the passed request.
    #[serde(default, alias = "response_headers")]
    pub response_headers: Vec<String>,

    /// `ignore` (default) or `abort`.
    #[serde(default, alias = "failure_policy")]
    pub failure_policy: Option<String>,

    #[serde(default, alias = "failure_status_code")]
    pub failure_status_code: Vec<u16>,

    /// Largest inbound body buffered for mirroring.
    #[serde(default = "default_max_body_bytes", alias = "max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            insecure_skip_verify: false,
            forward_headers: BTreeMap::new(),
            request_headers: Vec::new(),
            request_with_body: false,
            request_timeout: 0,
            response_headers: Vec::new(),
            failure_policy: None,
            failure_status_code: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl FilterConfig {
    /// Options with every field defaulted except the authority address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

/// What to do when the authority cannot be reached or reports a failure status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Proceed to the downstream handler as if the filter were absent.
    #[default]
    Ignore,
    /// Fail closed.
    Abort,
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "ignore" => Ok(FailurePolicy::Ignore),
            "abort" => Ok(FailurePolicy::Abort),
            other => Err(ConfigError::InvalidFailurePolicy(other.to_string())),
        }
    }
}

/// Validated filter configuration.
#[derive(Debug, Clone)]
pub struct FilterSettings {
    pub authority: Url,
    /// The configured address had no path; each shadow request takes the
    /// inbound request-URI instead.
    pub inherit_path: bool,
    pub insecure_skip_verify: bool,
    pub forward_headers: Vec<(HeaderName, HeaderValue)>,
    pub request_headers: Vec<HeaderName>,
    pub mirror_body: bool,
    pub request_timeout: Duration,
    pub response_headers: Vec<HeaderName>,
    pub failure_policy: FailurePolicy,
    pub failure_status_codes: Vec<StatusCode>,
    pub max_body_bytes: usize,
}

impl FilterSettings {
    pub fn is_failure_status(&self, status: StatusCode) -> bool {
        self.failure_status_codes.contains(&status)
    }
}

impl TryFrom<FilterConfig> for FilterSettings {
    type Error = ConfigError;

    fn try_from(config: FilterConfig) -> Result<Self, Self::Error> {
        let authority = Url::parse(&config.address).map_err(|e| ConfigError::InvalidAddress {
            address: config.address.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(authority.scheme(), "http" | "https") || authority.host_str().is_none() {
            return Err(ConfigError::UnsupportedAddress {
                address: config.address,
            });
        }

        let failure_policy = config
            .failure_policy
            .as_deref()
            .unwrap_or_default()
            .parse::<FailurePolicy>()?;

        let forward_headers = config
            .forward_headers
            .iter()
            .map(|(suffix, value)| {
                let name = format!("X-Forwarded-{suffix}");
                let value = HeaderValue::from_str(value)
                    .map_err(|_| ConfigError::InvalidHeaderValue { name: name.clone() })?;
                Ok((parse_header_name(&name)?, value))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let codes = if config.failure_status_code.is_empty() {
            DEFAULT_FAILURE_STATUS_CODES.to_vec()
        } else {
            config.failure_status_code
        };
        let failure_status_codes = codes
            .into_iter()
            .map(|code| StatusCode::from_u16(code).map_err(|_| ConfigError::InvalidStatusCode(code)))
            .collect::<Result<Vec<_>, _>>()?;

        let request_timeout = match config.request_timeout {
            0 => DEFAULT_REQUEST_TIMEOUT,
            ms => Duration::from_millis(ms),
        };

        Ok(Self {
            inherit_path: !has_explicit_path(&config.address),
            authority,
            insecure_skip_verify: config.insecure_skip_verify,
            forward_headers,
            request_headers: parse_header_names(&config.request_headers)?,
            mirror_body: config.request_with_body,
            request_timeout,
            response_headers: parse_header_names(&config.response_headers)?,
            failure_policy,
            failure_status_codes,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

fn parse_header_name(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|_| ConfigError::InvalidHeaderName(name.to_string()))
}

fn parse_header_names(names: &[String]) -> Result<Vec<HeaderName>, ConfigError> {
    names.iter().map(|name| parse_header_name(name)).collect()
}

/// `Url` normalizes a missing path to `/`, so look at the address as written.
fn has_explicit_path(address: &str) -> bool {
    let rest = address.split_once("://").map_or(address, |(_, rest)| rest);
    rest.split(['?', '#'])
        .next()
        .is_some_and(|authority_and_path| authority_and_path.contains('/'))
}

fn default_listen_address() -> String {
    "0.0.0.0:3080".to_string()
}

fn default_upstream_timeout() -> u64 {
    300
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl ProxyConfig {
    /// Load configuration from a TOML file and the environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (FORWARD_FILTER_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("FORWARD_FILTER_").split("__"));
        Self::from_figment(figment)
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(config: FilterConfig) -> FilterSettings {
        FilterSettings::try_from(config).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let s = settings(FilterConfig::new("http://auth.local:9000"));

        assert_eq!(s.request_timeout, Duration::from_millis(100));
        assert_eq!(s.failure_policy, FailurePolicy::Ignore);
        assert_eq!(
            s.failure_status_codes,
            vec![
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ]
        );
        assert!(s.inherit_path);
        assert!(!s.mirror_body);
    }

    #[test]
    fn test_explicit_path_detection() {
        assert!(settings(FilterConfig::new("http://auth.local")).inherit_path);
        assert!(settings(FilterConfig::new("http://auth.local?x=1")).inherit_path);
        assert!(!settings(FilterConfig::new("http://auth.local/")).inherit_path);
        assert!(!settings(FilterConfig::new("https://auth.local/verify")).inherit_path);
    }

    #[test]
    fn test_invalid_address_rejected() {
        let err = FilterSettings::try_from(FilterConfig::new("not a url")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));

        let err = FilterSettings::try_from(FilterConfig::new("ftp://auth.local/")).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedAddress { .. }));
    }

    #[test]
    fn test_failure_policy_parsing() {
        let mut config = FilterConfig::new("http://auth.local");
        config.failure_policy = Some("abort".to_string());
        assert_eq!(settings(config.clone()).failure_policy, FailurePolicy::Abort);

        config.failure_policy = Some(String::new());
        assert_eq!(settings(config.clone()).failure_policy, FailurePolicy::Ignore);

        config.failure_policy = Some("retry".to_string());
        let err = FilterSettings::try_from(config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFailurePolicy(p) if p == "retry"));
    }

    #[test]
    fn test_header_lists_parsed_case_insensitively() {
        let mut config = FilterConfig::new("http://auth.local");
        config.request_headers = vec!["Authorization".to_string(), "x-user".to_string()];
        config.response_headers = vec!["X-Auth-User".to_string()];
        config
            .forward_headers
            .insert("Region".to_string(), "eu-west".to_string());
        let s = settings(config);

        assert_eq!(s.request_headers[0], http::header::AUTHORIZATION);
        assert_eq!(s.request_headers[1].as_str(), "x-user");
        assert_eq!(s.response_headers[0].as_str(), "x-auth-user");
        assert_eq!(s.forward_headers[0].0.as_str(), "x-forwarded-region");
        assert_eq!(s.forward_headers[0].1, "eu-west");
    }

    #[test]
    fn test_invalid_header_name_rejected() {
        let mut config = FilterConfig::new("http://auth.local");
        config.response_headers = vec!["bad header".to_string()];
        let err = FilterSettings::try_from(config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeaderName(_)));
    }

    #[test]
    fn test_invalid_status_code_rejected() {
        let mut config = FilterConfig::new("http://auth.local");
        config.failure_status_code = vec![503, 42];
        let err = FilterSettings::try_from(config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidStatusCode(42)));
    }

    #[test]
    fn test_load_from_toml() {
        let toml = r#"
            [upstream]
            url = "http://app.local:8080"

            [filter]
            address = "http://auth.local:9000/check"
            requestWithBody = true
            requestTimeout = 250
            failurePolicy = "abort"
            failureStatusCode = [503]
            requestHeaders = ["Authorization"]

            [filter.forwardHeaders]
            Tenant = "acme"
        "#;
        let config = ProxyConfig::from_figment(Figment::new().merge(Toml::string(toml))).unwrap();

        assert_eq!(config.server.listen_address, "0.0.0.0:3080");
        assert_eq!(config.upstream.timeout_secs, 300);
        assert_eq!(config.filter.request_timeout, 250);
        assert_eq!(config.filter.failure_status_code, vec![503]);
        assert_eq!(config.filter.forward_headers["Tenant"], "acme");

        let s = settings(config.filter);
        assert!(s.mirror_body);
        assert!(!s.inherit_path);
        assert_eq!(s.failure_policy, FailurePolicy::Abort);
        assert_eq!(s.request_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_snake_case_aliases() {
        let toml = r#"
            [upstream]
            url = "http://app.local:8080"

            [filter]
            address = "http://auth.local"
            request_timeout = 40
            failure_policy = "abort"
        "#;
        let config = ProxyConfig::from_figment(Figment::new().merge(Toml::string(toml))).unwrap();

        assert_eq!(config.filter.request_timeout, 40);
        assert_eq!(config.filter.failure_policy.as_deref(), Some("abort"));
    }
}
