//! One subscription to the insight stream.
//!
//! The caller pulls updates with [`StreamSession::next`]. Each call waits on
//! the transport (the only suspension point), then applies at most one
//! canonical event to the progress machine and the pipeline tracker before
//! returning a combined snapshot.

use crate::insight_core::error::InsightError;
use crate::insight_core::transport::{HttpTransport, TransportConfig};
use crate::insight_sse::frames_to_events;
use crate::insight_types::{InsightRequest, InsightsResult, StreamEvent};
use crate::insights::config::InsightStreamConfig;
use crate::insights::normalize::EventNormalizer;
use crate::insights::pipeline_tracker::{PipelineSnapshot, PipelineStateTracker};
use crate::insights::progress::{Applied, Outcome, ProgressSnapshot, ProgressStateMachine};
use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Canonical events as produced by the SSE pipeline.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, InsightError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Streaming,
    Complete,
    Failed,
    /// Stopped by the caller. Never reported as an error.
    Cancelled,
    /// Finished without a result: the server closed the stream before a
    /// terminal event, or reported `complete` with nothing attached.
    Ended,
}

impl SessionStatus {
    pub fn is_finished(self) -> bool {
        self != SessionStatus::Streaming
    }
}

/// Everything a UI needs to render the current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub status: SessionStatus,
    pub progress: ProgressSnapshot,
    pub pipelines: PipelineSnapshot,
    pub result: Option<InsightsResult>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    /// The canonical event that produced this update.
    pub event: StreamEvent,
    pub snapshot: StreamSnapshot,
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub snapshot: StreamSnapshot,
    pub history: Vec<StreamEvent>,
}

/// Cloneable cancel switch for a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    token: CancellationToken,
}

impl SessionHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

enum Wake {
    Cancelled,
    Idle,
    Item(Option<Result<StreamEvent, InsightError>>),
}

pub struct StreamSession {
    thread_id: Option<String>,
    token: CancellationToken,
    /// `None` once finished; dropping the stream closes the transport.
    events: Option<EventStream>,
    progress: ProgressStateMachine,
    pipelines: PipelineStateTracker,
    status: SessionStatus,
    error: Option<String>,
    idle_timeout: Option<Duration>,
}

impl StreamSession {
    /// Start streaming `request` through `transport`.
    ///
    /// The connection is opened lazily on the first call to [`next`](Self::next);
    /// a failure to connect is reported as a failed update, not as an `Err`.
    pub fn open<T>(transport: Arc<T>, config: &InsightStreamConfig, mut request: InsightRequest) -> Self
    where
        T: HttpTransport + 'static,
    {
        if request.use_case.is_none() {
            request.use_case = config.use_case.clone();
        }
        let thread_id = request.thread_id.clone();
        let url = config.endpoint.to_string();
        let headers = config.request_headers();
        let transport_cfg = config.transport.clone();

        let events: EventStream = Box::pin(connect(transport, url, headers, transport_cfg, request));
        Self::from_events(thread_id, events, config.idle_timeout)
    }

    /// Session over an already-normalized event stream.
    pub fn from_events(
        thread_id: Option<String>,
        events: EventStream,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            thread_id,
            token: CancellationToken::new(),
            events: Some(events),
            progress: ProgressStateMachine::new(),
            pipelines: PipelineStateTracker::new(),
            status: SessionStatus::Streaming,
            error: None,
            idle_timeout,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            token: self.token.clone(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn progress(&self) -> &ProgressStateMachine {
        &self.progress
    }

    pub fn pipelines(&self) -> &PipelineStateTracker {
        &self.pipelines
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            status: self.status,
            progress: self.progress.snapshot(),
            pipelines: self.pipelines.snapshot(),
            result: self.progress.result().cloned(),
            error: self.error.clone(),
        }
    }

    /// Wait for the next applied event. Returns `None` once the session has
    /// finished, including after cancellation.
    pub async fn next(&mut self) -> Option<SessionUpdate> {
        let events = self.events.as_mut()?;
        let wake = tokio::select! {
            biased;
            _ = self.token.cancelled() => Wake::Cancelled,
            item = events.next() => Wake::Item(item),
            _ = idle_deadline(self.idle_timeout) => Wake::Idle,
        };

        // a chunk that raced with cancel is discarded
        if self.token.is_cancelled() {
            self.finish(SessionStatus::Cancelled);
            info!(target: "insight_stream::session", "insight stream cancelled");
            return None;
        }

        match wake {
            Wake::Cancelled => None,
            Wake::Idle => {
                let idle = self.idle_timeout.unwrap_or_default();
                warn!(
                    target: "insight_stream::session",
                    ?idle,
                    "no stream events within idle timeout"
                );
                Some(self.fail_with(InsightError::Timeout(idle)))
            }
            Wake::Item(None) => {
                warn!(
                    target: "insight_stream::session",
                    events = self.progress.history().len(),
                    "stream ended without a terminal event"
                );
                self.finish(SessionStatus::Ended);
                None
            }
            Wake::Item(Some(Err(err))) => {
                warn!(target: "insight_stream::session", error = %err, "insight stream failed");
                Some(self.fail_with(err))
            }
            Wake::Item(Some(Ok(event))) => Some(self.apply(event)),
        }
    }

    /// Drain the session and return its final state.
    pub async fn run_to_end(mut self) -> SessionOutcome {
        while self.next().await.is_some() {}
        SessionOutcome {
            snapshot: self.snapshot(),
            history: self.progress.into_history(),
        }
    }

    fn apply(&mut self, event: StreamEvent) -> SessionUpdate {
        let applied = self.progress.apply(&event);
        self.pipelines.apply(&event);
        if applied == Applied::Terminal {
            match self.progress.outcome() {
                Some(Outcome::Failed { message }) => {
                    self.error = Some(message.clone());
                    self.finish(SessionStatus::Failed);
                }
                Some(Outcome::Finished) => {
                    warn!(
                        target: "insight_stream::session",
                        positions = self.pipelines.len(),
                        "insight stream reported complete without a result"
                    );
                    self.finish(SessionStatus::Ended);
                }
                _ => {
                    info!(
                        target: "insight_stream::session",
                        positions = self.pipelines.len(),
                        settled = self.pipelines.completed_count(),
                        "insight stream complete"
                    );
                    self.finish(SessionStatus::Complete);
                }
            }
        }
        SessionUpdate {
            event,
            snapshot: self.snapshot(),
        }
    }

    /// Surface a transport-level failure as a protocol error event so the
    /// state machine, tracker and snapshot all agree.
    fn fail_with(&mut self, err: InsightError) -> SessionUpdate {
        let message = err.format_details();
        let mut update = self.apply(StreamEvent::StreamError {
            message: message.clone(),
        });
        // the machine may already have been terminal
        if !self.status.is_finished() {
            self.error = Some(message);
            self.finish(SessionStatus::Failed);
            update.snapshot = self.snapshot();
        }
        update
    }

    fn finish(&mut self, status: SessionStatus) {
        self.events = None;
        if !self.status.is_finished() {
            self.status = status;
        }
    }
}

fn connect<T>(
    transport: Arc<T>,
    url: String,
    headers: Vec<(String, String)>,
    cfg: TransportConfig,
    request: InsightRequest,
) -> impl Stream<Item = Result<StreamEvent, InsightError>> + Send
where
    T: HttpTransport + 'static,
{
    async_stream::try_stream! {
        let body = serde_json::to_value(&request)?;
        debug!(target: "insight_stream::session", %url, "opening insight stream");
        let resp = transport.post_json_stream(&url, &headers, &body, &cfg).await?;
        let (bytes, _headers) = T::into_stream(resp);
        let events = frames_to_events(bytes, EventNormalizer::default());
        futures_util::pin_mut!(events);
        while let Some(event) = events.next().await {
            yield event?;
        }
    }
}

async fn idle_deadline(idle: Option<Duration>) {
    match idle {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}
