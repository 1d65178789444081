use crate::insight_types::{InsightsResult, Phase, PhaseDetails, ProgressUpdate, StreamEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Complete(InsightsResult),
    /// The server reported the `complete` phase without sending a result.
    Finished,
    Failed { message: String },
}

/// Effect of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    /// This event moved the machine into `complete` or `error`.
    Terminal,
    /// The machine was already terminal; nothing changed.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub current: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub status: String,
    pub message: String,
    pub percent: f64,
    pub node: Option<String>,
    pub step: Option<Step>,
    pub details_by_phase: BTreeMap<Phase, PhaseDetails>,
    pub outcome: Option<Outcome>,
    pub events_seen: usize,
}

impl ProgressSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn result(&self) -> Option<&InsightsResult> {
        match &self.outcome {
            Some(Outcome::Complete(result)) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Some(Outcome::Failed { message }) => Some(message),
            _ => None,
        }
    }
}

/// Overall phase/step/percent state of one run.
///
/// The server is trusted: a progress event sets the phase directly, even if it
/// names an earlier phase than the current one.
#[derive(Debug, Default)]
pub struct ProgressStateMachine {
    phase: Phase,
    status: String,
    message: String,
    percent: f64,
    node: Option<String>,
    step: Option<Step>,
    details_by_phase: BTreeMap<Phase, PhaseDetails>,
    history: Vec<StreamEvent>,
    outcome: Option<Outcome>,
    last_timestamp: Option<f64>,
}

impl ProgressStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &StreamEvent) -> Applied {
        if self.outcome.is_some() {
            let late_final = match event {
                StreamEvent::LegacyFinal(_) => true,
                StreamEvent::Progress(p) => p.has_final_answer,
                _ => false,
            };
            if late_final {
                warn!(
                    target: "insight_stream::progress",
                    "second final result ignored; the first one stands"
                );
                return Applied::Ignored;
            }
            debug!(
                target: "insight_stream::progress",
                kind = event.kind_name(),
                "event after terminal state ignored"
            );
            return Applied::Ignored;
        }
        self.note_timestamp(event);
        // grows with the session; nothing trims it
        self.history.push(event.clone());

        match event {
            StreamEvent::Progress(progress) => self.apply_progress(progress),
            StreamEvent::LegacyFinal(result) => self.complete(result.clone()),
            StreamEvent::StreamError { message } => self.fail(message.clone()),
            StreamEvent::InsightComplete(_) | StreamEvent::LegacyProgress(_) => Applied::Updated,
        }
    }

    fn apply_progress(&mut self, progress: &ProgressUpdate) -> Applied {
        if let (Some(now), Some(then)) = (progress.phase.ordinal(), self.phase.ordinal()) {
            if now < then {
                debug!(
                    target: "insight_stream::progress",
                    from = %self.phase,
                    to = %progress.phase,
                    "phase moved backwards"
                );
            }
        }
        self.phase = progress.phase.clone();
        self.status = progress.status.clone();
        self.message = progress.message.clone();
        self.percent = progress.percent;
        self.node = progress.node.clone();
        if let (Some(current), Some(total)) = (progress.step_current, progress.step_total) {
            self.step = Some(Step { current, total });
        }
        if !progress.details.is_empty() {
            self.details_by_phase
                .entry(progress.phase.clone())
                .or_default()
                .merge(&progress.details);
        }

        if progress.phase == Phase::Error {
            let message = if progress.message.is_empty() {
                "insight generation failed".to_string()
            } else {
                progress.message.clone()
            };
            return self.fail(message);
        }
        let reports_complete = progress.phase.is_terminal();
        match &progress.final_answer {
            Some(result) if progress.has_final_answer || reports_complete => {
                return self.complete(result.clone());
            }
            None if progress.has_final_answer => warn!(
                target: "insight_stream::progress",
                "has_final_answer set without a decodable final_answer"
            ),
            _ => {}
        }
        if reports_complete {
            debug!(target: "insight_stream::progress", "complete phase reported without a result");
            self.outcome = Some(Outcome::Finished);
            return Applied::Terminal;
        }
        Applied::Updated
    }

    fn complete(&mut self, result: InsightsResult) -> Applied {
        self.phase = Phase::Complete;
        self.percent = 100.0;
        self.outcome = Some(Outcome::Complete(result));
        Applied::Terminal
    }

    fn fail(&mut self, message: String) -> Applied {
        self.phase = Phase::Error;
        self.message = message.clone();
        self.outcome = Some(Outcome::Failed { message });
        Applied::Terminal
    }

    fn note_timestamp(&mut self, event: &StreamEvent) {
        let Some(ts) = event.timestamp_seconds().filter(|ts| *ts > 0.0) else {
            return;
        };
        if let Some(last) = self.last_timestamp {
            if ts < last {
                debug!(
                    target: "insight_stream::progress",
                    timestamp = ts,
                    previous = last,
                    "event timestamp went backwards; applying anyway"
                );
            }
        }
        self.last_timestamp = Some(self.last_timestamp.map_or(ts, |last| last.max(ts)));
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn result(&self) -> Option<&InsightsResult> {
        match &self.outcome {
            Some(Outcome::Complete(result)) => Some(result),
            _ => None,
        }
    }

    pub fn details(&self, phase: &Phase) -> Option<&PhaseDetails> {
        self.details_by_phase.get(phase)
    }

    /// Every applied event, in arrival order.
    pub fn history(&self) -> &[StreamEvent] {
        &self.history
    }

    pub fn into_history(self) -> Vec<StreamEvent> {
        self.history
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: self.phase.clone(),
            status: self.status.clone(),
            message: self.message.clone(),
            percent: self.percent,
            node: self.node.clone(),
            step: self.step,
            details_by_phase: self.details_by_phase.clone(),
            outcome: self.outcome.clone(),
            events_seen: self.history.len(),
        }
    }
}
