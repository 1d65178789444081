//! Maps the wire payload shapes the insight stream has used over time onto
//! one canonical [`StreamEvent`].
//!
//! Shapes are recognized by an ordered table of pure predicates. The first
//! predicate that matches decides the shape; its constructor may still reject
//! a malformed body, which drops the frame.

use crate::insight_sse::FrameNormalizer;
use crate::insight_types::json::{
    bool_field, f64_field, has_field, is_number_field, str_field, string_field, u32_field,
};
use crate::insight_types::{
    Insight, InsightCompletion, InsightsResult, LegacyProgress, Phase, PhaseDetails,
    PipelineStatus, ProgressUpdate, StreamEvent, Verdict,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

pub const AGENT_EVENT: &str = "agent_event";
pub const INSIGHT_COMPLETE: &str = "insight_complete";
pub const ERROR_EVENT: &str = "error";

/// One recognized payload shape.
pub struct ShapeRule {
    pub name: &'static str,
    pub matches: fn(Option<&str>, &Value) -> bool,
    pub build: fn(&Value) -> Option<StreamEvent>,
}

/// Recognition order matters: earlier rules shadow later ones.
pub static SHAPE_RULES: &[ShapeRule] = &[
    ShapeRule {
        name: "agent_progress",
        matches: is_agent_progress,
        build: build_progress,
    },
    ShapeRule {
        name: "validator_final",
        matches: is_validator_final,
        build: build_validator_final,
    },
    ShapeRule {
        name: "agent_summary",
        matches: is_agent_summary,
        build: build_legacy_progress,
    },
    ShapeRule {
        name: "insight_complete",
        matches: is_insight_complete,
        build: build_insight_complete,
    },
    ShapeRule {
        name: "error",
        matches: is_error_event,
        build: build_stream_error,
    },
    ShapeRule {
        name: "unnamed_action",
        matches: is_unnamed_action,
        build: build_legacy_progress,
    },
    ShapeRule {
        name: "unnamed_final",
        matches: is_unnamed_final,
        build: build_bare_final,
    },
];

/// Table-driven normalizer over [`SHAPE_RULES`].
pub struct EventNormalizer {
    rules: &'static [ShapeRule],
}

impl EventNormalizer {
    pub fn new() -> Self {
        Self { rules: SHAPE_RULES }
    }

    /// Name of the rule that claims this frame, if any.
    pub fn classify(&self, event: Option<&str>, payload: &Value) -> Option<&'static str> {
        self.rules
            .iter()
            .find(|rule| (rule.matches)(event, payload))
            .map(|rule| rule.name)
    }

    pub fn normalize_payload(&self, event: Option<&str>, payload: &Value) -> Option<StreamEvent> {
        let rule = self.rules.iter().find(|rule| (rule.matches)(event, payload))?;
        let built = (rule.build)(payload);
        if built.is_none() {
            warn!(
                target: "insight_stream::normalize",
                rule = rule.name,
                event = event.unwrap_or("<unnamed>"),
                "payload matched shape but could not be decoded"
            );
        } else {
            debug!(target: "insight_stream::normalize", rule = rule.name, "normalized frame");
        }
        built
    }
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameNormalizer for EventNormalizer {
    fn normalize(&mut self, event: Option<&str>, payload: &Value) -> Option<StreamEvent> {
        self.normalize_payload(event, payload)
    }
}

/// `data:` without `event:`. Some servers label it with the SSE default name.
fn is_unnamed(event: Option<&str>) -> bool {
    matches!(event, None | Some("message"))
}

fn is_agent_progress(event: Option<&str>, payload: &Value) -> bool {
    event == Some(AGENT_EVENT)
        && str_field(payload, "phase").is_some()
        && is_number_field(payload, "progress_percent")
}

fn is_validator_final(event: Option<&str>, payload: &Value) -> bool {
    (event == Some(AGENT_EVENT) || is_unnamed(event))
        && str_field(payload, "node") == Some("validator")
        && str_field(payload, "status") == Some("result")
        && payload
            .get("meta")
            .and_then(|meta| meta.get("final_answer"))
            .is_some_and(Value::is_string)
}

fn is_agent_summary(event: Option<&str>, payload: &Value) -> bool {
    event == Some(AGENT_EVENT) && has_field(payload, "summary") && !has_field(payload, "phase")
}

fn is_insight_complete(event: Option<&str>, _payload: &Value) -> bool {
    event == Some(INSIGHT_COMPLETE)
}

fn is_error_event(event: Option<&str>, _payload: &Value) -> bool {
    event == Some(ERROR_EVENT)
}

fn is_unnamed_action(event: Option<&str>, payload: &Value) -> bool {
    is_unnamed(event) && has_field(payload, "action")
}

fn is_unnamed_final(event: Option<&str>, payload: &Value) -> bool {
    is_unnamed(event) && has_field(payload, "version") && has_field(payload, "insights")
}

fn build_progress(payload: &Value) -> Option<StreamEvent> {
    let phase = Phase::parse(str_field(payload, "phase")?);
    let percent = f64_field(payload, "progress_percent")?;
    let percent = if percent.is_finite() {
        percent.clamp(0.0, 100.0)
    } else {
        0.0
    };

    let details = match payload.get("details") {
        Some(raw) if raw.is_object() => {
            serde_json::from_value::<PhaseDetails>(raw.clone()).unwrap_or_else(|err| {
                debug!(
                    target: "insight_stream::normalize",
                    error = %err,
                    "ignoring undecodable phase details"
                );
                PhaseDetails::default()
            })
        }
        _ => PhaseDetails::default(),
    };

    let final_answer = match payload.get("final_answer") {
        Some(Value::String(encoded)) => decode_result_str(encoded),
        Some(raw) if raw.is_object() => decode_result(raw),
        _ => None,
    };

    Some(StreamEvent::Progress(ProgressUpdate {
        phase,
        status: string_field(payload, "status").unwrap_or_default(),
        message: string_field(payload, "message").unwrap_or_default(),
        percent,
        node: string_field(payload, "node"),
        step_current: u32_field(payload, "step_current"),
        step_total: u32_field(payload, "step_total"),
        timestamp_seconds: f64_field(payload, "timestamp").unwrap_or(0.0),
        details,
        has_final_answer: bool_field(payload, "has_final_answer").unwrap_or(false),
        final_answer,
    }))
}

fn build_validator_final(payload: &Value) -> Option<StreamEvent> {
    let encoded = payload.get("meta")?.get("final_answer")?.as_str()?;
    decode_result_str(encoded).map(StreamEvent::LegacyFinal)
}

fn build_bare_final(payload: &Value) -> Option<StreamEvent> {
    decode_result(payload).map(StreamEvent::LegacyFinal)
}

fn build_legacy_progress(payload: &Value) -> Option<StreamEvent> {
    Some(StreamEvent::LegacyProgress(LegacyProgress {
        node: string_field(payload, "node"),
        action: string_field(payload, "action"),
        summary: string_field(payload, "summary"),
        raw: payload.clone(),
    }))
}

fn build_insight_complete(payload: &Value) -> Option<StreamEvent> {
    let ticker = string_field(payload, "ticker")?;
    let status = PipelineStatus::parse(str_field(payload, "status")?)?;
    let insight = decode_part::<Insight>(payload, "insight", &ticker);
    let verdict = decode_part::<Verdict>(payload, "verdict", &ticker);
    Some(StreamEvent::InsightComplete(InsightCompletion {
        ticker,
        status,
        insight,
        verdict,
        timestamp_seconds: f64_field(payload, "timestamp").unwrap_or(0.0),
    }))
}

fn decode_part<T: DeserializeOwned>(payload: &Value, key: &str, ticker: &str) -> Option<T> {
    let raw = payload.get(key).filter(|raw| raw.is_object())?;
    serde_json::from_value::<T>(raw.clone())
        .map_err(|err| {
            warn!(
                target: "insight_stream::normalize",
                %ticker,
                part = key,
                error = %err,
                "dropping undecodable insight_complete part"
            );
        })
        .ok()
}

fn build_stream_error(payload: &Value) -> Option<StreamEvent> {
    let message = string_field(payload, "message")
        .or_else(|| string_field(payload, "error"))
        .or_else(|| payload.as_str().map(str::to_string))
        .unwrap_or_else(|| "stream error".to_string());
    Some(StreamEvent::StreamError { message })
}

fn decode_result(raw: &Value) -> Option<InsightsResult> {
    serde_json::from_value::<InsightsResult>(raw.clone())
        .map_err(|err| {
            warn!(target: "insight_stream::normalize", error = %err, "invalid insights result");
        })
        .ok()
}

fn decode_result_str(encoded: &str) -> Option<InsightsResult> {
    serde_json::from_str::<InsightsResult>(encoded)
        .map_err(|err| {
            warn!(
                target: "insight_stream::normalize",
                error = %err,
                "invalid json-encoded insights result"
            );
        })
        .ok()
}
