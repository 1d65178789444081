use anyhow::{Context, Result};
use insight_stream_rs::core::FileStore;
use insight_stream_rs::insights::{InsightLoad, InsightStreamConfig, InsightsClient, SessionStatus};
use insight_stream_rs::transports::reqwest::ReqwestTransport;
use std::sync::Arc;

// Run with:
//   INSIGHTS_URL=http://localhost:8000/api/insights/stream cargo run -p stream-insights
// Optional:
//   INSIGHTS_QUERY="Summarize my portfolio"   (default)
//   INSIGHTS_TOKEN=...                        bearer token
//   INSIGHTS_REFRESH=1                        drop the cached result and rotate the thread id
//   RUST_LOG=insight_stream=debug

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("insight_stream=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let url = std::env::var("INSIGHTS_URL").unwrap_or_default();
    if url.is_empty() {
        eprintln!("INSIGHTS_URL is not set. Point it at the insight streaming endpoint.");
        std::process::exit(1);
    }
    let query = std::env::var("INSIGHTS_QUERY").unwrap_or_else(|_| "Summarize my portfolio".to_string());

    let mut config = InsightStreamConfig::new(&url)?.with_use_case("portfolio_insights");
    if let Ok(token) = std::env::var("INSIGHTS_TOKEN") {
        config = config.with_bearer_token(&token);
    }

    let transport = ReqwestTransport::try_new(&config.transport)?;
    let store = Arc::new(FileStore::open_default().context("opening local store")?);
    eprintln!("store: {}", store.path().display());
    let mut client = InsightsClient::new(transport, config, store)?;

    if std::env::var("INSIGHTS_REFRESH").is_ok_and(|v| v == "1") {
        let thread_id = client.clear_cached_result()?;
        eprintln!("cache cleared, new thread {thread_id}");
    }

    let thread_id = client.thread_id().to_string();
    let mut session = match client.load(query) {
        InsightLoad::Cached(result) => {
            eprintln!("cached result for thread {thread_id}");
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(());
        }
        InsightLoad::Streaming(session) => session,
    };

    while let Some(update) = session.next().await {
        let progress = &update.snapshot.progress;
        let pipelines = &update.snapshot.pipelines;
        eprintln!(
            "[{:>5.1}%] {:<20} {} ({}/{} positions settled)",
            progress.percent,
            progress.phase.as_str(),
            progress.message,
            pipelines.completed_count(),
            pipelines.len()
        );
    }

    let snapshot = session.snapshot();
    match snapshot.status {
        SessionStatus::Complete => {
            if let Some(result) = &snapshot.result {
                client.remember(&thread_id, result)?;
                println!("{}", serde_json::to_string_pretty(result)?);
            }
        }
        SessionStatus::Failed => {
            eprintln!("failed: {}", snapshot.error.as_deref().unwrap_or("unknown error"));
            std::process::exit(2);
        }
        status => eprintln!("stream finished without a result ({status:?})"),
    }
    Ok(())
}
