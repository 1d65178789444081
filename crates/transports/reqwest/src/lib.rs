use crate::insight_core::error::{build_http_status_transport_error, TransportError};
use crate::insight_core::json::without_null_fields;
use crate::insight_core::transport::{ByteStream, HttpTransport, TransportConfig};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::error::Error as StdError;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    fn configure_builder(
        mut builder: reqwest::ClientBuilder,
        cfg: &TransportConfig,
    ) -> reqwest::ClientBuilder {
        builder = builder
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Duration::from_secs(90));
        if let Some(req_timeout) = cfg.request_timeout {
            builder = builder.timeout(req_timeout);
        }
        builder.connect_timeout(cfg.connect_timeout)
    }

    fn try_new_with_builder(
        cfg: &TransportConfig,
        builder: reqwest::ClientBuilder,
    ) -> Result<Self, TransportError> {
        let client = Self::configure_builder(builder, cfg)
            .build()
            .map_err(|err| {
                TransportError::Other(format!(
                    "reqwest client build failed: {}",
                    format_reqwest_error_chain(&err)
                ))
            })?;
        Ok(Self { client })
    }

    pub fn try_new(cfg: &TransportConfig) -> Result<Self, TransportError> {
        Self::try_new_with_builder(cfg, Client::builder())
    }

    /// Wrap an existing client, e.g. one shared with the REST layer.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    type StreamResponse = (ByteStream, Vec<(String, String)>);

    fn into_stream(resp: Self::StreamResponse) -> (ByteStream, Vec<(String, String)>) {
        resp
    }

    async fn post_json_stream(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
        cfg: &TransportConfig,
    ) -> Result<Self::StreamResponse, TransportError> {
        let cleaned_body: Value = if cfg.strip_null_fields {
            without_null_fields(body)
        } else {
            body.clone()
        };

        let mut req = self.client.post(url).json(&cleaned_body);
        for (k, v) in headers {
            // .json() already sets Content-Type
            if !k.eq_ignore_ascii_case("content-type") {
                req = req.header(k, v);
            }
        }

        let started = Instant::now();
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                let detail = format_reqwest_error_chain(&e);
                debug!(target: "insight_stream::transport::reqwest", %detail, "reqwest send failed");
                return Err(if e.is_connect() {
                    TransportError::Network(format!("connect: {detail}"))
                } else if e.is_timeout() {
                    TransportError::ConnectTimeout(cfg.connect_timeout)
                } else {
                    TransportError::Network(detail)
                });
            }
        };

        let status = resp.status();
        let res_headers = header_pairs(resp.headers());
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            let err = build_http_status_transport_error(status.as_u16(), body_text);
            debug!(
                target: "insight_stream::transport::reqwest",
                status = status.as_u16(),
                error = %err,
                latency_ms = started.elapsed().as_millis() as u64,
                "stream request rejected"
            );
            return Err(err);
        }

        debug!(
            target: "insight_stream::transport::reqwest",
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "stream opened"
        );

        // idle timeout is enforced per chunk
        let idle = cfg.idle_read_timeout;
        let mut inner = resp.bytes_stream();
        let s = async_stream::try_stream! {
            loop {
                let next = tokio::time::timeout(idle, inner.next()).await;
                match next {
                    Err(_) => Err(TransportError::IdleReadTimeout(idle))?,
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        if e.is_timeout() { Err(TransportError::IdleReadTimeout(idle))?; }
                        else { Err(TransportError::BodyRead(e.to_string()))?; }
                    }
                    Ok(Some(Ok(bytes))) => { yield bytes; }
                }
            }
        };
        Ok((Box::pin(s), res_headers))
    }
}

fn header_pairs(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
        .collect()
}

fn format_reqwest_error_chain(err: &reqwest::Error) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(src) = current {
        out.push_str(": ");
        out.push_str(&src.to_string());
        current = src.source();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_new_returns_transport_error_when_client_build_fails() {
        let cfg = TransportConfig::default();
        let err = match ReqwestTransport::try_new_with_builder(
            &cfg,
            Client::builder().user_agent("bad\nagent"),
        ) {
            Ok(_) => panic!("invalid user-agent should fail reqwest client build"),
            Err(err) => err,
        };
        match err {
            TransportError::Other(message) => {
                assert!(
                    message.contains("reqwest client build failed"),
                    "unexpected message: {message}"
                );
            }
            other => panic!("unexpected transport error variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let cfg = TransportConfig {
            connect_timeout: Duration::from_millis(500),
            ..TransportConfig::default()
        };
        let transport = ReqwestTransport::try_new(&cfg).expect("client");
        // port 9 (discard) on loopback is essentially never listening
        let err = match transport
            .post_json_stream(
                "http://127.0.0.1:9/insights/stream",
                &[],
                &serde_json::json!({"query": "q"}),
                &cfg,
            )
            .await
        {
            Ok(_) => panic!("expected connection failure"),
            Err(err) => err,
        };
        assert!(
            matches!(
                err,
                TransportError::Network(_) | TransportError::ConnectTimeout(_)
            ),
            "unexpected error: {err:?}"
        );
    }
}
