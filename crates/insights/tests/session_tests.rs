use crate::insight_core::error::{build_http_status_transport_error, TransportError};
use crate::insight_core::store::MemoryStore;
use crate::insight_core::transport::{ByteStream, HttpTransport, TransportConfig};
use crate::insight_types::{InsightRequest, Phase, PipelineStatus, StreamEvent};
use crate::insights::client::{InsightLoad, InsightsClient};
use crate::insights::config::InsightStreamConfig;
use crate::insights::session::{SessionStatus, SessionUpdate, StreamSession};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{future, stream, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
enum Tail {
    /// Body ends after the chunks.
    End,
    /// Connection stays open without sending anything else.
    Hang,
    /// Connection drops with a network error.
    Drop(String),
}

#[derive(Clone)]
struct FixtureTransport {
    chunks: Arc<Vec<Bytes>>,
    tail: Tail,
    fail_status: Option<u16>,
    requests: Arc<Mutex<Vec<(Vec<(String, String)>, Value)>>>,
}

impl FixtureTransport {
    fn new(body: &str, tail: Tail) -> Self {
        // small chunks so frames straddle read boundaries
        let chunks = body
            .as_bytes()
            .chunks(7)
            .map(Bytes::copy_from_slice)
            .collect();
        Self {
            chunks: Arc::new(chunks),
            tail,
            fail_status: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing(status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Self::new("", Tail::End)
        }
    }
}

#[async_trait]
impl HttpTransport for FixtureTransport {
    type StreamResponse = ByteStream;

    fn into_stream(resp: Self::StreamResponse) -> (ByteStream, Vec<(String, String)>) {
        (resp, Vec::new())
    }

    async fn post_json_stream(
        &self,
        _url: &str,
        headers: &[(String, String)],
        body: &Value,
        _cfg: &TransportConfig,
    ) -> Result<Self::StreamResponse, TransportError> {
        self.requests
            .lock()
            .unwrap()
            .push((headers.to_vec(), body.clone()));
        if let Some(status) = self.fail_status {
            return Err(build_http_status_transport_error(
                status,
                "{\"detail\":\"pipeline unavailable\"}".to_string(),
            ));
        }
        let head = stream::iter(
            self.chunks
                .iter()
                .cloned()
                .map(Ok::<Bytes, TransportError>)
                .collect::<Vec<_>>(),
        );
        let stream: ByteStream = match &self.tail {
            Tail::End => Box::pin(head),
            Tail::Hang => Box::pin(head.chain(stream::pending())),
            Tail::Drop(message) => Box::pin(head.chain(stream::once(future::ready(Err(
                TransportError::Network(message.clone()),
            ))))),
        };
        Ok(stream)
    }
}

fn sse(event: &str, data: Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

fn seed(tickers: &[&str]) -> String {
    sse(
        "agent_event",
        json!({
            "phase": "data_fetching",
            "status": "running",
            "message": "Loading positions",
            "progress_percent": 10,
            "timestamp": 100.0,
            "details": {"positions_count": tickers.len(), "tickers": tickers}
        }),
    )
}

fn completed(ticker: &str, status: &str, ts: f64) -> String {
    let insight = match status {
        "rejected" | "skipped" => Value::Null,
        _ => json!({"ticker": ticker, "insightType": "valuation", "summary": format!("{ticker} looks fine")}),
    };
    let mut payload = json!({"ticker": ticker, "status": status, "insight": insight, "timestamp": ts});
    if status == "rejected" {
        payload["verdict"] = json!({"verdict": "REJECT", "confidenceScore": 0.77, "feedback": "weak sourcing"});
    }
    sse("insight_complete", payload)
}

fn final_answer(tickers: &[&str]) -> String {
    let insights: Vec<Value> = tickers
        .iter()
        .map(|t| json!({"type": "position", "title": format!("{t} outlook"), "tickers": [t], "summary": "ok"}))
        .collect();
    sse(
        "agent_event",
        json!({
            "phase": "validation",
            "status": "done",
            "message": "Insights ready",
            "progress_percent": 100,
            "timestamp": 130.0,
            "has_final_answer": true,
            "final_answer": {"version": "1.0", "generated_at_utc": "2024-05-01T12:00:00Z", "insights": insights}
        }),
    )
}

fn config() -> InsightStreamConfig {
    InsightStreamConfig::new("http://localhost:8000/api/insights/stream")
        .unwrap()
        .with_use_case("portfolio_insights")
}

fn open(transport: FixtureTransport, config: &InsightStreamConfig) -> StreamSession {
    StreamSession::open(
        Arc::new(transport),
        config,
        InsightRequest::new("How is my portfolio doing?").with_thread_id("thread-1"),
    )
}

async fn drain(session: &mut StreamSession) -> Vec<SessionUpdate> {
    let mut updates = Vec::new();
    while let Some(update) = session.next().await {
        updates.push(update);
    }
    updates
}

#[tokio::test]
async fn full_cache_hit_completes_with_all_insights() {
    let body = [
        seed(&["AAPL", "MSFT", "GOOGL"]),
        completed("AAPL", "cached", 110.0),
        completed("MSFT", "cached", 111.0),
        completed("GOOGL", "cached", 112.0),
        final_answer(&["AAPL", "MSFT", "GOOGL"]),
        // after terminal: never applied
        completed("AAPL", "rejected", 140.0),
    ]
    .concat();
    let mut session = open(FixtureTransport::new(&body, Tail::End), &config());
    let updates = drain(&mut session).await;

    assert_eq!(updates.len(), 5);
    let last = &updates.last().unwrap().snapshot;
    assert_eq!(last.status, SessionStatus::Complete);
    assert_eq!(last.pipelines.len(), 3);
    assert_eq!(last.pipelines.count_by_status(PipelineStatus::Cached), 3);
    assert_eq!(last.result.as_ref().map(|r| r.insights.len()), Some(3));
    assert_eq!(last.progress.phase, Phase::Complete);
    assert!(last.error.is_none());

    assert_eq!(session.status(), SessionStatus::Complete);
    assert!(session.next().await.is_none());
}

#[tokio::test]
async fn mixed_outcomes_keep_rejected_out_of_result() {
    let body = [
        seed(&["AAPL", "GOOGL", "MSFT"]),
        completed("AAPL", "cached", 110.0),
        completed("GOOGL", "accepted", 111.0),
        completed("MSFT", "rejected", 112.0),
        final_answer(&["AAPL", "GOOGL"]),
    ]
    .concat();
    let outcome = open(FixtureTransport::new(&body, Tail::End), &config())
        .run_to_end()
        .await;

    let snapshot = &outcome.snapshot;
    assert_eq!(snapshot.status, SessionStatus::Complete);
    let msft = snapshot.pipelines.get("MSFT").expect("MSFT tracked");
    assert_eq!(msft.status, PipelineStatus::Rejected);
    assert!(msft.insight.is_none());
    assert!(msft.verdict.is_some());
    assert_eq!(
        snapshot.pipelines.get("GOOGL").map(|e| e.status),
        Some(PipelineStatus::Accepted)
    );

    let result = snapshot.result.as_ref().expect("result");
    assert_eq!(result.insights.len(), 2);
    assert!(result
        .insights
        .iter()
        .all(|i| !i.tickers.contains(&"MSFT".to_string())));
    assert_eq!(outcome.history.len(), 5);
}

#[tokio::test]
async fn malformed_frame_between_valid_frames_is_skipped() {
    let body = [
        seed(&["AAPL"]),
        "event: agent_event\ndata: {\"phase\": \"insight_pipeline\", oops\n\n".to_string(),
        sse(
            "agent_event",
            json!({"phase": "composition", "status": "running", "progress_percent": 80}),
        ),
    ]
    .concat();
    let mut session = open(FixtureTransport::new(&body, Tail::End), &config());
    let updates = drain(&mut session).await;

    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].snapshot.progress.phase, Phase::DataFetching);
    assert_eq!(updates[1].snapshot.progress.phase, Phase::Composition);
    // EOF without a terminal event is not an error
    assert_eq!(session.status(), SessionStatus::Ended);
    assert!(session.snapshot().error.is_none());
}

#[tokio::test]
async fn request_carries_query_thread_and_use_case() {
    let transport = FixtureTransport::new(&final_answer(&["AAPL"]), Tail::End);
    let requests = transport.requests.clone();
    let outcome = open(transport, &config()).run_to_end().await;
    assert_eq!(outcome.snapshot.status, SessionStatus::Complete);

    let requests = requests.lock().unwrap();
    let (headers, body) = &requests[0];
    assert_eq!(
        body,
        &json!({
            "query": "How is my portfolio doing?",
            "thread_id": "thread-1",
            "use_case": "portfolio_insights"
        })
    );
    assert!(headers.contains(&("Accept".to_string(), "text/event-stream".to_string())));
}

#[tokio::test]
async fn non_success_status_fails_the_session() {
    let mut session = open(FixtureTransport::failing(503), &config());
    let update = session.next().await.expect("failure update");

    assert!(matches!(update.event, StreamEvent::StreamError { .. }));
    assert_eq!(update.snapshot.status, SessionStatus::Failed);
    let error = update.snapshot.error.expect("error message");
    assert!(error.contains("503"), "unexpected error: {error}");
    assert!(session.next().await.is_none());
}

#[tokio::test]
async fn connection_drop_fails_the_session() {
    let transport = FixtureTransport::new(&seed(&["AAPL"]), Tail::Drop("connection reset".into()));
    let mut session = open(transport, &config());
    let updates = drain(&mut session).await;

    assert_eq!(updates.len(), 2);
    let last = &updates[1].snapshot;
    assert_eq!(last.status, SessionStatus::Failed);
    assert!(last.error.as_deref().unwrap_or_default().contains("connection reset"));
    assert_eq!(last.progress.phase, Phase::Error);
    // entries seen before the failure survive
    assert_eq!(last.pipelines.len(), 1);
}

#[tokio::test]
async fn server_error_event_fails_with_its_message() {
    let body = [
        seed(&["AAPL"]),
        sse("error", json!({"message": "LLM quota exhausted"})),
        seed(&["MSFT"]),
    ]
    .concat();
    let outcome = open(FixtureTransport::new(&body, Tail::End), &config())
        .run_to_end()
        .await;

    assert_eq!(outcome.snapshot.status, SessionStatus::Failed);
    assert_eq!(outcome.snapshot.error.as_deref(), Some("LLM quota exhausted"));
    assert!(outcome.snapshot.pipelines.get("MSFT").is_none());
}

#[tokio::test]
async fn cancel_is_silent_and_keeps_reached_state() {
    let transport = FixtureTransport::new(&seed(&["AAPL", "MSFT"]), Tail::Hang);
    let mut session = open(transport, &config().with_idle_timeout(None));
    let first = session.next().await.expect("seed update");
    assert_eq!(first.snapshot.progress.phase, Phase::DataFetching);

    let handle = session.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });
    assert!(session.next().await.is_none());

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.progress.phase, Phase::DataFetching);
    assert!(!snapshot.progress.is_terminal());
    assert_eq!(snapshot.pipelines.len(), 2);
    assert!(session.next().await.is_none());
}

#[tokio::test]
async fn cancel_before_first_read_discards_everything() {
    let mut session = open(FixtureTransport::new(&seed(&["AAPL"]), Tail::End), &config());
    session.cancel();
    assert!(session.next().await.is_none());
    assert_eq!(session.status(), SessionStatus::Cancelled);
    assert!(session.pipelines().is_empty());
    assert!(session.progress().history().is_empty());
}

#[tokio::test]
async fn silent_server_hits_idle_timeout() {
    let transport = FixtureTransport::new(&seed(&["AAPL"]), Tail::Hang);
    let mut session = open(
        transport,
        &config().with_idle_timeout(Some(Duration::from_millis(50))),
    );
    assert!(session.next().await.is_some());

    let update = session.next().await.expect("timeout update");
    assert_eq!(update.snapshot.status, SessionStatus::Failed);
    assert!(update
        .snapshot
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("no events received for 50ms"));
    assert!(session.next().await.is_none());
}

#[tokio::test]
async fn complete_phase_without_result_ends_quietly() {
    let body = [
        seed(&["AAPL"]),
        completed("AAPL", "accepted", 110.0),
        sse(
            "agent_event",
            json!({"phase": "complete", "status": "done", "message": "All done", "progress_percent": 100}),
        ),
    ]
    .concat();
    // the server keeps the connection open; the session must not wait for it
    let transport = FixtureTransport::new(&body, Tail::Hang);
    let mut session = open(
        transport,
        &config().with_idle_timeout(Some(Duration::from_millis(50))),
    );
    let updates = drain(&mut session).await;

    assert_eq!(updates.len(), 3);
    let last = &updates[2].snapshot;
    assert_eq!(last.status, SessionStatus::Ended);
    assert!(last.error.is_none());
    assert!(last.result.is_none());
    assert_eq!(last.progress.phase, Phase::Complete);
    assert!(last.progress.is_terminal());
    assert_eq!(session.status(), SessionStatus::Ended);
    assert!(session.next().await.is_none());
}

#[tokio::test]
async fn null_fields_in_final_answer_still_complete() {
    let body = [
        seed(&["AAPL", "KO"]),
        sse(
            "agent_event",
            json!({
                "phase": "validation",
                "progress_percent": 100,
                "has_final_answer": true,
                "final_answer": {
                    "version": "1.0",
                    "generated_at_utc": null,
                    "insights": [
                        {"type": "position", "title": "AAPL outlook", "tickers": ["AAPL"], "summary": "ok"},
                        {"type": "position", "title": "KO outlook", "tickers": ["KO"], "summary": null, "sources": null}
                    ]
                }
            }),
        ),
    ]
    .concat();
    let outcome = open(FixtureTransport::new(&body, Tail::End), &config())
        .run_to_end()
        .await;

    assert_eq!(outcome.snapshot.status, SessionStatus::Complete);
    let result = outcome.snapshot.result.expect("result");
    assert_eq!(result.insights.len(), 2);
    assert_eq!(result.generated_at_utc, "");
}

#[tokio::test]
async fn second_stream_cancels_the_first() {
    let transport = FixtureTransport::new(&seed(&["AAPL"]), Tail::Hang);
    let mut client =
        InsightsClient::new(transport, config().with_idle_timeout(None), Arc::new(MemoryStore::new())).unwrap();

    let mut first = client.start_stream("first", None);
    let mut second = client.start_stream("second", None);

    assert!(first.next().await.is_none());
    assert_eq!(first.status(), SessionStatus::Cancelled);

    let update = second.next().await.expect("second stream update");
    assert_eq!(update.snapshot.status, SessionStatus::Streaming);
    assert_eq!(second.thread_id(), Some(client.thread_id()));

    client.cancel_stream();
    assert!(second.next().await.is_none());
    assert_eq!(second.status(), SessionStatus::Cancelled);
}

#[tokio::test]
async fn load_serves_cache_until_cleared() {
    let transport = FixtureTransport::new(&final_answer(&["AAPL", "KO"]), Tail::End);
    let requests = transport.requests.clone();
    let store = Arc::new(MemoryStore::new());
    let mut client = InsightsClient::new(transport, config(), store).unwrap();
    let thread_id = client.thread_id().to_string();

    let session = match client.load("portfolio") {
        InsightLoad::Streaming(session) => session,
        InsightLoad::Cached(_) => panic!("nothing cached yet"),
    };
    let outcome = session.run_to_end().await;
    let result = outcome.snapshot.result.expect("result");
    client.remember(&thread_id, &result).unwrap();

    match client.load("portfolio") {
        InsightLoad::Cached(cached) => assert_eq!(cached, result),
        InsightLoad::Streaming(_) => panic!("expected a cache hit"),
    }
    assert_eq!(requests.lock().unwrap().len(), 1);

    let rotated = client.clear_cached_result().unwrap();
    assert_ne!(rotated, thread_id);
    assert!(client.cache().get(&thread_id).is_none());
    match client.load("portfolio") {
        InsightLoad::Streaming(session) => {
            assert_eq!(session.thread_id(), Some(rotated.as_str()));
        }
        InsightLoad::Cached(_) => panic!("cache should have been cleared"),
    }
}
