use crate::client::retry::{RateLimitBudget, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use url::Url;

/// HTTP verbs used against the backlog API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single outgoing request, already resolved to an absolute URL
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Raw response as seen by the transport. Header names are lowercased.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// `Retry-After` hint in seconds. HTTP-date values are not supported and yield `None`.
    ///
    /// Values too large for a [`Duration`] saturate to [`Duration::MAX`].
    pub fn retry_after(&self) -> Option<Duration> {
        let raw = self.headers.get("retry-after")?.trim();
        let seconds: f64 = raw.parse().ok()?;
        if seconds.is_finite() && seconds >= 0.0 {
            Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
        } else {
            None
        }
    }
}

/// Failures below the HTTP layer. All of them are treated as transient.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Network timeout: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Transport error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error(
        "{method} {url} failed after {attempts} attempts (last status: {})",
        status_label(.last_status)
    )]
    TransientRequestFailed {
        method: HttpMethod,
        url: String,
        last_status: Option<u16>,
        attempts: u32,
    },
    #[error("Request rejected with status {status}: {body}")]
    RequestRejected { status: u16, body: String },
    #[error("Malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

fn status_label(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl ClientError {
    /// HTTP status associated with the failure, if one was observed
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::TransientRequestFailed { last_status, .. } => *last_status,
            ClientError::RequestRejected { status, .. } => Some(*status),
            ClientError::MalformedResponse { .. } | ClientError::InvalidRequest(_) => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::TransientRequestFailed { .. })
    }
}

/// How the token is presented in the `Authorization` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: <token>`
    #[default]
    Raw,
    /// `Authorization: Bearer <token>`
    Bearer,
}

impl AuthScheme {
    pub fn header_value(&self, token: &str) -> String {
        match self {
            AuthScheme::Raw => token.to_string(),
            AuthScheme::Bearer => format!("Bearer {}", token),
        }
    }
}

/// Retry and timeout behaviour of [`crate::client::RateLimitedClient`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backoff strategy for 5xx and network failures
    #[serde(default)]
    pub policy: RetryPolicy,
    /// Upper bound on counted attempts per request, the first attempt included
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Whether 429 responses consume `max_retries`
    #[serde(default)]
    pub rate_limit_budget: RateLimitBudget,
    /// Total time one logical request may spend retrying
    #[serde(default = "default_max_wall_clock", with = "duration_secs")]
    pub max_wall_clock: Duration,
    /// Wait applied on 429 when the server sends no `Retry-After`
    #[serde(default = "default_retry_after", with = "duration_secs")]
    pub default_retry_after: Duration,
    /// Per-attempt timeout enforced by the transport
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,
}

fn default_max_retries() -> u32 {
    4
}

fn default_max_wall_clock() -> Duration {
    Duration::from_secs(300)
}

fn default_retry_after() -> Duration {
    Duration::from_secs(2)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            max_retries: default_max_retries(),
            rate_limit_budget: RateLimitBudget::default(),
            max_wall_clock: default_max_wall_clock(),
            default_retry_after: default_retry_after(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Serialize a [`Duration`] as fractional seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(format!(
                "duration must be a non-negative number of seconds within range, got {}",
                secs
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_parsing() {
        let response = HttpResponse::new(429, "").with_header("Retry-After", "3");
        assert_eq!(response.retry_after(), Some(Duration::from_secs(3)));

        let response = HttpResponse::new(429, "").with_header("retry-after", "0.5");
        assert_eq!(response.retry_after(), Some(Duration::from_millis(500)));

        let response =
            HttpResponse::new(429, "").with_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(response.retry_after(), None);

        assert_eq!(HttpResponse::new(429, "").retry_after(), None);

        let response = HttpResponse::new(429, "").with_header("Retry-After", "1e30");
        assert_eq!(response.retry_after(), Some(Duration::MAX));

        let response = HttpResponse::new(429, "").with_header("Retry-After", "-1");
        assert_eq!(response.retry_after(), None);
    }

    #[test]
    fn test_status_classes() {
        assert!(HttpResponse::new(204, "").is_success());
        assert!(HttpResponse::new(429, "").is_rate_limited());
        assert!(HttpResponse::new(503, "").is_server_error());
        assert!(!HttpResponse::new(404, "").is_server_error());
    }

    #[test]
    fn test_error_display() {
        let error = ClientError::TransientRequestFailed {
            method: HttpMethod::Put,
            url: "https://example.test/task/1".to_string(),
            last_status: Some(503),
            attempts: 4,
        };
        assert_eq!(
            error.to_string(),
            "PUT https://example.test/task/1 failed after 4 attempts (last status: 503)"
        );
        assert_eq!(error.status(), Some(503));
        assert!(error.is_transient());
    }

    #[test]
    fn test_auth_header() {
        assert_eq!(AuthScheme::Raw.header_value("pk_1"), "pk_1");
        assert_eq!(AuthScheme::Bearer.header_value("abc"), "Bearer abc");
    }

    #[test]
    fn test_client_config_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            max_retries = 2
            max_wall_clock = 12.5
            policy = { type = "fixed_backoff", delay_ms = 1500 }
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.max_wall_clock, Duration::from_millis(12_500));
        assert_eq!(config.policy, RetryPolicy::FixedBackoff { delay_ms: 1500 });
        assert_eq!(config.default_retry_after, Duration::from_secs(2));
    }

    #[test]
    fn test_client_config_rejects_unrepresentable_durations() {
        let error = toml::from_str::<ClientConfig>("max_wall_clock = 1e30").unwrap_err();
        assert!(error.to_string().contains("within range"), "{}", error);

        assert!(toml::from_str::<ClientConfig>("default_retry_after = -0.5").is_err());

        let config: ClientConfig = toml::from_str("request_timeout = 0.3").unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(300));
    }
}
