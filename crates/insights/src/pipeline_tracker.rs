use crate::insight_types::{Insight, Phase, PipelineStatus, StreamEvent, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Observed state of one position's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEntry {
    pub ticker: String,
    pub status: PipelineStatus,
    pub insight: Option<Insight>,
    pub verdict: Option<Verdict>,
    /// Timestamp (seconds) of the event that last touched this entry.
    pub last_updated_at: f64,
}

impl PipelineEntry {
    fn pending(ticker: &str, at: f64) -> Self {
        Self {
            ticker: ticker.to_string(),
            status: PipelineStatus::Pending,
            insight: None,
            verdict: None,
            last_updated_at: at,
        }
    }
}

/// Immutable copy of the tracker, ordered by ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub entries: BTreeMap<String, PipelineEntry>,
}

impl PipelineSnapshot {
    pub fn get(&self, ticker: &str) -> Option<&PipelineEntry> {
        self.entries.get(ticker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.entries.values().filter(|e| e.status.is_settled()).count()
    }

    pub fn count_by_status(&self, status: PipelineStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }
}

/// Per-ticker sub-state for one session. Entries are created lazily and are
/// never removed; later events overwrite earlier ones in arrival order.
#[derive(Debug, Default)]
pub struct PipelineStateTracker {
    entries: BTreeMap<String, PipelineEntry>,
}

impl PipelineStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Progress(progress) => match progress.phase {
                Phase::DataFetching => {
                    if let Some(tickers) = &progress.details.tickers {
                        for ticker in tickers.iter().filter(|t| !t.is_empty()) {
                            self.entries.entry(ticker.clone()).or_insert_with(|| {
                                PipelineEntry::pending(ticker, progress.timestamp_seconds)
                            });
                        }
                    }
                }
                Phase::InsightPipeline => {
                    let (Some(ticker), Some(raw_status)) =
                        (&progress.details.ticker, &progress.details.status)
                    else {
                        return;
                    };
                    let Some(status) = PipelineStatus::parse(raw_status) else {
                        debug!(
                            target: "insight_stream::pipeline",
                            ticker = %ticker,
                            status = %raw_status,
                            "ignoring unknown pipeline status"
                        );
                        return;
                    };
                    let entry = self
                        .entries
                        .entry(ticker.clone())
                        .or_insert_with(|| PipelineEntry::pending(ticker, progress.timestamp_seconds));
                    entry.status = status;
                    entry.last_updated_at = progress.timestamp_seconds;
                }
                _ => {}
            },
            StreamEvent::InsightComplete(done) => {
                let entry = self
                    .entries
                    .entry(done.ticker.clone())
                    .or_insert_with(|| PipelineEntry::pending(&done.ticker, done.timestamp_seconds));
                entry.status = done.status;
                entry.insight = done.insight.clone();
                entry.verdict = done.verdict.clone();
                entry.last_updated_at = done.timestamp_seconds;
            }
            _ => {}
        }
    }

    pub fn get(&self, ticker: &str) -> Option<&PipelineEntry> {
        self.entries.get(ticker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.entries.values().filter(|e| e.status.is_settled()).count()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            entries: self.entries.clone(),
        }
    }
}
