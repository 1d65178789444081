use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("no events received for {0:?}")]
    Timeout(Duration),
    #[error("upstream error (status {status}): {message}")]
    Upstream {
        status: u16,
        message: String,
        #[source]
        source: Option<Box<TransportError>>,
    },
    #[error("transport error: {0}")]
    Transport(TransportError),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl From<TransportError> for InsightError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::HttpStatus { status, .. } => {
                let message = err.sanitized_message();
                InsightError::Upstream {
                    status,
                    message,
                    source: Some(Box::new(err)),
                }
            }
            other => InsightError::Transport(other),
        }
    }
}

impl InsightError {
    /// Message suitable for showing to the user of a long-lived subscriber.
    pub fn format_details(&self) -> String {
        match self {
            InsightError::Upstream {
                status,
                message,
                source,
            } => {
                let fallback = http_status_fallback_message(*status);
                let mut msg = if message.starts_with(&fallback) {
                    message.clone()
                } else {
                    format!("{fallback}: {message}")
                };
                if let Some(src) = source {
                    if let TransportError::HttpStatus { sanitized, .. } = src.as_ref() {
                        if !message.contains(sanitized.as_str()) && !sanitized.is_empty() {
                            msg.push_str(&format!(" [body: {}]", sanitized));
                        }
                    }
                }
                msg
            }
            InsightError::Timeout(idle) => format!("no events received for {idle:?}"),
            InsightError::Transport(te) => format!("transport error: {}", te.sanitized_message()),
            InsightError::Serde(se) => format!("serde error: {}", se),
            InsightError::Store(err) => format!("store error: {}", err),
            InsightError::InvalidArgument { message } => format!("invalid argument: {}", message),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http status {status}: {sanitized}")]
    HttpStatus {
        status: u16,
        /// upstream body (should be treated as sensitive; only log sanitized)
        body: String,
        /// Sanitized message for display
        sanitized: String,
    },
    #[error("network: {0}")]
    Network(String),
    #[error("connect timeout after {0:?}")]
    ConnectTimeout(Duration),
    #[error("idle read timeout after {0:?}")]
    IdleReadTimeout(Duration),
    #[error("body read error: {0}")]
    BodyRead(String),
    #[error("other: {0}")]
    Other(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn sanitized_message(&self) -> String {
        match self {
            TransportError::HttpStatus { status, .. } => http_status_fallback_message(*status),
            _ => self.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no data directory available for this platform")]
    NoDataDir,
}

pub fn http_status_fallback_message(status: u16) -> String {
    format!("http status {status}")
}

pub fn build_http_status_transport_error(status: u16, body: String) -> TransportError {
    let sanitized = display_body_for_error(&body);
    TransportError::HttpStatus {
        status,
        body,
        sanitized,
    }
}

/// Short, log-safe rendering of an error body: minified JSON, or a byte count.
pub fn display_body_for_error(body: &str) -> String {
    let trimmed = body.trim();
    let looks_like_json = trimmed.starts_with('{') || trimmed.starts_with('[');
    if looks_like_json {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(v) => v.to_string(),
            Err(_) => format!("{} bytes", body.len()),
        }
    } else {
        format!("{} bytes", body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        build_http_status_transport_error, display_body_for_error, http_status_fallback_message,
        InsightError, TransportError,
    };
    use std::time::Duration;

    #[test]
    fn http_status_converts_to_upstream_with_fallback_message() {
        let err: InsightError = build_http_status_transport_error(503, "down".into()).into();
        match err {
            InsightError::Upstream {
                status,
                message,
                source,
            } => {
                assert_eq!(status, 503);
                assert_eq!(message, "http status 503");
                match source.as_deref() {
                    Some(TransportError::HttpStatus { sanitized, .. }) => {
                        assert_eq!(sanitized, "4 bytes")
                    }
                    other => panic!("unexpected source: {other:?}"),
                }
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn other_transport_errors_stay_transport() {
        let err: InsightError = TransportError::BodyRead("reset".into()).into();
        assert!(matches!(err, InsightError::Transport(TransportError::BodyRead(_))));
        assert_eq!(err.format_details(), "transport error: body read error: reset");
    }

    #[test]
    fn upstream_details_append_json_body_only() {
        let err: InsightError =
            build_http_status_transport_error(400, "{\"detail\": \"bad query\"}".into()).into();
        assert_eq!(
            err.format_details(),
            "http status 400 [body: {\"detail\":\"bad query\"}]"
        );
    }

    #[test]
    fn upstream_details_keep_a_custom_message() {
        let err = InsightError::Upstream {
            status: 502,
            message: "gateway unavailable".into(),
            source: None,
        };
        assert_eq!(err.format_details(), "http status 502: gateway unavailable");
    }

    #[test]
    fn display_body_hides_plain_text() {
        assert_eq!(display_body_for_error("secret token"), "12 bytes");
        assert_eq!(display_body_for_error("[1, 2]"), "[1,2]");
        assert_eq!(http_status_fallback_message(404), "http status 404");
    }

    #[test]
    fn timeout_renders_sub_second_durations() {
        assert_eq!(
            InsightError::Timeout(Duration::from_secs(120)).format_details(),
            "no events received for 120s"
        );
        assert_eq!(
            InsightError::Timeout(Duration::from_millis(50)).format_details(),
            "no events received for 50ms"
        );
    }
}
