use crate::core::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

/// Byte stream of a successful streaming response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Overall request timeout (optional; if None, rely on connect + idle)
    pub request_timeout: Option<Duration>,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Per-chunk idle read timeout
    pub idle_read_timeout: Duration,
    /// Whether to strip object fields with null values from JSON bodies before sending
    pub strip_null_fields: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            connect_timeout: Duration::from_secs(10),
            // insight pipelines can sit in one phase for a while between events
            idle_read_timeout: Duration::from_secs(120),
            strip_null_fields: true,
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Response for a successful streaming HTTP request.
    type StreamResponse: Send;

    /// Extract the byte stream and response headers from the transport-specific response.
    fn into_stream(resp: Self::StreamResponse) -> (ByteStream, Vec<(String, String)>);

    /// POST a JSON body and return the streaming response once the status is known to be 2xx.
    ///
    /// Non-2xx responses must be reported as `TransportError::HttpStatus`.
    async fn post_json_stream(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
        cfg: &TransportConfig,
    ) -> Result<Self::StreamResponse, TransportError>;
}
