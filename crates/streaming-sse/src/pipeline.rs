//! SSE byte stream → canonical event stream
//!
//! Frames whose `data:` is not valid JSON, or that the normalizer does not
//! recognize, are logged and skipped; they never end the stream.

use crate::insight_core::error::TransportError;
use crate::insight_sse::{FrameNormalizer, SseDecoder, SseFrame};
use crate::insight_types::StreamEvent;
use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

/// Decode one frame's JSON payload and normalize it.
pub fn parse_frame<N: FrameNormalizer + ?Sized>(
    frame: &SseFrame,
    normalizer: &mut N,
) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(&frame.data);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let payload: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            warn!(
                target: "insight_stream::sse",
                event = frame.event.as_deref().unwrap_or("<unnamed>"),
                error = %err,
                bytes = text.len(),
                "skipping sse frame with malformed json"
            );
            return None;
        }
    };
    let event = normalizer.normalize(frame.event.as_deref(), &payload);
    if event.is_none() {
        debug!(
            target: "insight_stream::sse",
            event = frame.event.as_deref().unwrap_or("<unnamed>"),
            "dropping unrecognized sse frame"
        );
    }
    event
}

/// Convert a raw SSE byte stream into canonical events.
///
/// The stream ends when the byte stream ends (after flushing a final
/// unterminated line) or after yielding the first transport error.
///
/// # Example
/// ```ignore
/// let (bytes, _headers) = T::into_stream(transport.post_json_stream(..).await?);
/// let events = frames_to_events(bytes, EventNormalizer::default());
/// ```
pub fn frames_to_events<S, N, E>(
    bytes: S,
    mut normalizer: N,
) -> impl Stream<Item = Result<StreamEvent, TransportError>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    N: FrameNormalizer + Send + 'static,
    E: Into<TransportError> + Send + 'static,
{
    async_stream::try_stream! {
        let mut decoder = SseDecoder::new();
        futures_util::pin_mut!(bytes);

        while let Some(chunk_result) = bytes.next().await {
            let chunk = chunk_result.map_err(|e| -> TransportError { e.into() })?;
            let frames: Vec<SseFrame> = decoder.push(&chunk).collect();
            for frame in frames {
                if let Some(event) = parse_frame(&frame, &mut normalizer) {
                    yield event;
                }
            }
        }

        let frames: Vec<SseFrame> = decoder.finish().collect();
        for frame in frames {
            if let Some(event) = parse_frame(&frame, &mut normalizer) {
                yield event;
            }
        }
    }
}
