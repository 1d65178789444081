use crate::insight_core::error::InsightError;
use crate::insight_core::transport::TransportConfig;
use std::time::Duration;
use url::Url;

/// How long a completed result stays valid in the cache.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
/// Longest silence tolerated between two stream events before the session fails.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug)]
pub struct InsightStreamConfig {
    /// Streaming endpoint; receives the POST with the insight request.
    pub endpoint: Url,
    /// Extra request headers (auth, tracing ids).
    pub headers: Vec<(String, String)>,
    /// Sent as `use_case` when the request does not name one.
    pub use_case: Option<String>,
    /// `None` disables the session-level idle timeout.
    pub idle_timeout: Option<Duration>,
    pub cache_ttl: Duration,
    pub transport: TransportConfig,
}

impl InsightStreamConfig {
    pub fn new(endpoint: &str) -> Result<Self, InsightError> {
        let endpoint = Url::parse(endpoint.trim()).map_err(|err| InsightError::InvalidArgument {
            message: format!("invalid insight stream endpoint '{endpoint}': {err}"),
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(InsightError::InvalidArgument {
                message: format!("unsupported endpoint scheme '{}'", endpoint.scheme()),
            });
        }
        Ok(Self {
            endpoint,
            headers: Vec::new(),
            use_case: None,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            cache_ttl: DEFAULT_CACHE_TTL,
            transport: TransportConfig::default(),
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds `Authorization: Bearer <token>`; a token already carrying the prefix is kept as is.
    pub fn with_bearer_token(self, token: &str) -> Self {
        let value = if token.to_ascii_lowercase().starts_with("bearer ") {
            token.to_string()
        } else {
            format!("Bearer {token}")
        };
        self.with_header("Authorization", value)
    }

    pub fn with_use_case(mut self, use_case: impl Into<String>) -> Self {
        self.use_case = Some(use_case.into());
        self
    }

    pub fn with_idle_timeout(mut self, idle: Option<Duration>) -> Self {
        self.idle_timeout = idle;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Headers for the streaming POST: SSE accept header first, then the configured ones.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Accept".to_string(), "text/event-stream".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        headers.extend(
            self.headers
                .iter()
                .filter(|(name, _)| !name.eq_ignore_ascii_case("accept"))
                .cloned(),
        );
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_endpoints() {
        assert!(InsightStreamConfig::new("not a url").is_err());
        assert!(InsightStreamConfig::new("ftp://example.com/stream").is_err());
        let cfg = InsightStreamConfig::new(" https://api.example.com/insights/stream ").unwrap();
        assert_eq!(cfg.endpoint.path(), "/insights/stream");
        assert_eq!(cfg.cache_ttl, DEFAULT_CACHE_TTL);
    }

    #[test]
    fn request_headers_always_accept_event_stream() {
        let cfg = InsightStreamConfig::new("http://localhost:8000/stream")
            .unwrap()
            .with_header("accept", "application/json")
            .with_bearer_token("abc");
        let headers = cfg.request_headers();
        assert_eq!(headers[0], ("Accept".into(), "text/event-stream".into()));
        assert_eq!(
            headers.iter().filter(|(k, _)| k.eq_ignore_ascii_case("accept")).count(),
            1
        );
        assert!(headers.contains(&("Authorization".into(), "Bearer abc".into())));
    }
}
