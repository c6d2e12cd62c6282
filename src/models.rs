//! Data models for brand visibility runs.
//!
//! This module contains the records persisted per run (context, questions,
//! probe answers) and the views derived from them on every read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Fresh run id of the form `run_<millis>_<8 hex chars>`.
pub fn new_run_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("run_{}_{}", now_millis(), &suffix[..8])
}

/// Descriptive context synthesized for a brand. Written once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Brand or product name the run is about.
    pub brand: String,
    /// Generated description used to derive the questions.
    pub context: String,
    /// Creation time (ms since epoch).
    pub timestamp: i64,
}

/// A natural-language question asked of every model in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub question: String,
}

/// A model in the probe roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Provider model id, e.g. `openai/gpt-4o-mini`.
    pub id: String,
    /// Display name used in reports.
    pub name: String,
}

impl ModelSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Outcome of one probe: one question asked of one model, repetition `run`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityAnswer {
    pub question_id: String,
    pub model: String,
    /// Repetition index, starting at 1.
    pub run: u32,
    pub answer: String,
    pub mentioned: bool,
    /// 1-based rank among mentioned entities. `None` when not mentioned or
    /// when the brand is the only entity discussed.
    pub position: Option<u32>,
    pub timestamp: i64,
    #[serde(default)]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VisibilityAnswer {
    /// Creates a successful answer record.
    pub fn succeeded(
        question_id: impl Into<String>,
        model: impl Into<String>,
        run: u32,
        answer: impl Into<String>,
        mentioned: bool,
        position: Option<u32>,
    ) -> Self {
        Self {
            question_id: question_id.into(),
            model: model.into(),
            run,
            answer: answer.into(),
            mentioned,
            position: if mentioned { position } else { None },
            timestamp: now_millis(),
            failed: false,
            error: None,
        }
    }

    /// Creates a failed answer record.
    pub fn failed(
        question_id: impl Into<String>,
        model: impl Into<String>,
        run: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            question_id: question_id.into(),
            model: model.into(),
            run,
            answer: String::new(),
            mentioned: false,
            position: None,
            timestamp: now_millis(),
            failed: true,
            error: Some(error.into()),
        }
    }
}

/// Workflow stage of a run, ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Pending,
    Context,
    Questions,
    Checking,
    Complete,
    /// Reserved for caller-side aborts such as a polling timeout.
    Failed,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStage::Pending => "pending",
            RunStage::Context => "context",
            RunStage::Questions => "questions",
            RunStage::Checking => "checking",
            RunStage::Complete => "complete",
            RunStage::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

impl RunStage {
    /// Short human description of what the run is doing.
    pub fn describe(&self) -> &'static str {
        match self {
            RunStage::Pending => "waiting for the run to start",
            RunStage::Context => "brand context created, generating questions",
            RunStage::Questions => "questions ready, probing models",
            RunStage::Checking => "collecting probe answers",
            RunStage::Complete => "all probes answered",
            RunStage::Failed => "run aborted",
        }
    }
}

/// Point-in-time view of a run, derived from the store on every read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub run_id: String,
    pub brand: String,
    pub context: Option<RunContext>,
    pub questions: Option<Vec<Question>>,
    pub answers: Vec<VisibilityAnswer>,
    pub total_answers: usize,
    pub completed_answers: usize,
    pub status: RunStage,
}

impl RunStatus {
    /// Whether every expected probe answer has been recorded.
    pub fn is_complete(&self) -> bool {
        self.status == RunStage::Complete || self.completed_answers == self.total_answers
    }
}

/// Per (question, model) statistics over all repetitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    pub question_id: String,
    pub question: String,
    pub model_id: String,
    /// Display name of the model.
    pub model: String,
    pub visible: bool,
    /// Rounded mean position over mentioning runs.
    pub position: Option<u32>,
    /// `"<visibleCount>/<totalRuns>"`.
    pub runs: String,
    pub visible_count: usize,
    pub total_runs: usize,
    /// Texts of the successful answers.
    pub answers: Vec<String>,
    pub failed_count: usize,
}

/// Run-wide totals over all recorded answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilitySummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub mentioned: usize,
    /// `mentioned / succeeded`, `None` when nothing succeeded.
    pub visibility_rate: Option<f64>,
}

/// Report metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub run_id: String,
    pub brand: String,
    pub generated_at: DateTime<Utc>,
    pub stage: RunStage,
    pub completed_answers: usize,
    pub total_answers: usize,
    pub duration_seconds: f64,
    /// Polling gave up before every answer arrived.
    pub timed_out: bool,
}

/// Final report for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: ReportMetadata,
    pub context: Option<String>,
    pub questions: Vec<Question>,
    pub results: Vec<AggregatedResult>,
    pub summary: VisibilitySummary,
}
