//! Data model for the portfolio insight stream.
//!
//! These types describe both the canonical, version-agnostic events the rest
//! of the crate operates on and the payload pieces (insights, verdicts, phase
//! details) carried inside them.

pub mod json;

use json::{lenient_f64, lenient_string, lenient_strings, lenient_u32, null_as_default, string_list};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Named stage of the overall insight-generation run, as reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Phase {
    #[default]
    Initializing,
    DataFetching,
    InsightPipeline,
    StreamingCollector,
    Composition,
    Validation,
    Complete,
    Error,
    /// A phase name this client does not know yet; kept verbatim for display.
    Other(String),
}

impl Phase {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "initializing" => Phase::Initializing,
            "data_fetching" => Phase::DataFetching,
            "insight_pipeline" => Phase::InsightPipeline,
            "streaming_collector" => Phase::StreamingCollector,
            "composition" => Phase::Composition,
            "validation" => Phase::Validation,
            "complete" => Phase::Complete,
            "error" => Phase::Error,
            other => Phase::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Phase::Initializing => "initializing",
            Phase::DataFetching => "data_fetching",
            Phase::InsightPipeline => "insight_pipeline",
            Phase::StreamingCollector => "streaming_collector",
            Phase::Composition => "composition",
            Phase::Validation => "validation",
            Phase::Complete => "complete",
            Phase::Error => "error",
            Phase::Other(name) => name,
        }
    }

    /// Position in the happy-path order. `error` and unknown phases have none.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            Phase::Initializing => Some(0),
            Phase::DataFetching => Some(1),
            Phase::InsightPipeline => Some(2),
            Phase::StreamingCollector => Some(3),
            Phase::Composition => Some(4),
            Phase::Validation => Some(5),
            Phase::Complete => Some(6),
            Phase::Error | Phase::Other(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }
}

impl From<String> for Phase {
    fn from(value: String) -> Self {
        Phase::parse(&value)
    }
}

impl From<Phase> for String {
    fn from(value: Phase) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-position pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Processing,
    Cached,
    Accepted,
    Rejected,
    Skipped,
}

impl PipelineStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(PipelineStatus::Pending),
            "processing" => Some(PipelineStatus::Processing),
            "cached" => Some(PipelineStatus::Cached),
            "accepted" => Some(PipelineStatus::Accepted),
            "rejected" => Some(PipelineStatus::Rejected),
            "skipped" => Some(PipelineStatus::Skipped),
            _ => None,
        }
    }

    /// True once the pipeline for a position has produced its outcome.
    pub fn is_settled(self) -> bool {
        !matches!(self, PipelineStatus::Pending | PipelineStatus::Processing)
    }
}

/// Validator decision on a streamed insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictKind {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict: VerdictKind,
    #[serde(default, alias = "confidenceScore", deserialize_with = "lenient_f64")]
    pub confidence_score: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub feedback: String,
}

/// Superset of the streaming (per-ticker) and composed (final) insight shapes.
///
/// `key_numbers` and `sources` are kept as raw JSON because producers disagree
/// on their inner layout. Every field tolerates `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub details: String,
    #[serde(default, alias = "keyNumbers", deserialize_with = "null_as_default")]
    pub key_numbers: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sources: Vec<Value>,

    // streaming shape
    #[serde(
        default,
        alias = "taskId",
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub task_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(
        default,
        alias = "insightType",
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub insight_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    // composed shape
    #[serde(
        default,
        rename = "type",
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "string_list", skip_serializing_if = "Vec::is_empty")]
    pub tickers: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Final composed output of one insight-generation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightsResult {
    #[serde(default, deserialize_with = "lenient_string_or_empty")]
    pub version: String,
    #[serde(default, alias = "generatedAtUtc", deserialize_with = "lenient_string_or_empty")]
    pub generated_at_utc: String,
    /// Items that fail to decode are skipped with a warning; the rest are kept.
    #[serde(default, deserialize_with = "insights_skipping_invalid")]
    pub insights: Vec<Insight>,
}

fn lenient_string_or_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn insights_skipping_invalid<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Insight>, D::Error> {
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => return Ok(Vec::new()),
        other => {
            warn!(target: "insight_stream::types", kind = json_kind(&other), "insights is not a list");
            return Ok(Vec::new());
        }
    };
    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<Insight>(item) {
            Ok(insight) => Some(insight),
            Err(err) => {
                warn!(target: "insight_stream::types", index, error = %err, "skipping undecodable insight");
                None
            }
        })
        .collect())
}

/// Phase-specific detail bag. Only the fields relevant to a phase are present.
/// A malformed field reads as absent without affecting its neighbours.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseDetails {
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub phase_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub positions_count: Option<u32>,
    #[serde(default, deserialize_with = "lenient_strings", skip_serializing_if = "Option::is_none")]
    pub tickers: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub pipelines_total: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub pipelines_completed: Option<u32>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub cache_hits: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub insights_count: Option<u32>,
    #[serde(default, deserialize_with = "lenient_strings", skip_serializing_if = "Option::is_none")]
    pub insight_types: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_u32", skip_serializing_if = "Option::is_none")]
    pub final_count: Option<u32>,
}

impl PhaseDetails {
    pub fn is_empty(&self) -> bool {
        self == &PhaseDetails::default()
    }

    /// Field-wise last-writer-wins: every field present in `newer` replaces ours.
    pub fn merge(&mut self, newer: &PhaseDetails) {
        fn take<T: Clone>(slot: &mut Option<T>, newer: &Option<T>) {
            if let Some(v) = newer {
                *slot = Some(v.clone());
            }
        }
        take(&mut self.phase_name, &newer.phase_name);
        take(&mut self.positions_count, &newer.positions_count);
        take(&mut self.tickers, &newer.tickers);
        take(&mut self.pipelines_total, &newer.pipelines_total);
        take(&mut self.pipelines_completed, &newer.pipelines_completed);
        take(&mut self.ticker, &newer.ticker);
        take(&mut self.status, &newer.status);
        take(&mut self.cache_hits, &newer.cache_hits);
        take(&mut self.insights_count, &newer.insights_count);
        take(&mut self.insight_types, &newer.insight_types);
        take(&mut self.final_count, &newer.final_count);
    }
}

/// Current-schema progress report (`agent_event` with a phase).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub phase: Phase,
    pub status: String,
    pub message: String,
    /// Clamped to `0.0..=100.0` on construction.
    pub percent: f64,
    pub node: Option<String>,
    pub step_current: Option<u32>,
    pub step_total: Option<u32>,
    pub timestamp_seconds: f64,
    pub details: PhaseDetails,
    pub final_answer: Option<InsightsResult>,
    pub has_final_answer: bool,
}

/// Per-ticker completion notice (`insight_complete`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightCompletion {
    pub ticker: String,
    pub status: PipelineStatus,
    pub insight: Option<Insight>,
    pub verdict: Option<Verdict>,
    pub timestamp_seconds: f64,
}

/// Older log-only progress shapes (`summary` under `agent_event`, or an
/// unnamed frame with an `action`). Shown in feeds, never moves phase state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyProgress {
    pub node: Option<String>,
    pub action: Option<String>,
    pub summary: Option<String>,
    pub raw: Value,
}

/// Canonical, version-agnostic stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress(ProgressUpdate),
    InsightComplete(InsightCompletion),
    StreamError { message: String },
    LegacyFinal(InsightsResult),
    LegacyProgress(LegacyProgress),
}

impl StreamEvent {
    /// Event timestamp in seconds, when the shape carries one.
    pub fn timestamp_seconds(&self) -> Option<f64> {
        match self {
            StreamEvent::Progress(p) => Some(p.timestamp_seconds),
            StreamEvent::InsightComplete(c) => Some(c.timestamp_seconds),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            StreamEvent::Progress(_) => "progress",
            StreamEvent::InsightComplete(_) => "insight_complete",
            StreamEvent::StreamError { .. } => "stream_error",
            StreamEvent::LegacyFinal(_) => "legacy_final",
            StreamEvent::LegacyProgress(_) => "legacy_progress",
        }
    }
}

/// Body of the streaming POST request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_case: Option<String>,
}

impl InsightRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            thread_id: None,
            use_case: None,
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_use_case(mut self, use_case: impl Into<String>) -> Self {
        self.use_case = Some(use_case.into());
        self
    }
}

#[cfg(test)]
#[path = "../tests/model_tests.rs"]
mod model_tests;
