//! Run reports.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report};

use crate::analysis::{aggregate, summarize};
use crate::models::{ModelSpec, ReportMetadata, RunReport, RunStatus};
use chrono::Utc;

/// Assemble the report for a run snapshot.
pub fn build_report(
    status: &RunStatus,
    models: &[ModelSpec],
    duration_seconds: f64,
    timed_out: bool,
) -> RunReport {
    RunReport {
        metadata: ReportMetadata {
            run_id: status.run_id.clone(),
            brand: status.brand.clone(),
            generated_at: Utc::now(),
            stage: status.status,
            completed_answers: status.completed_answers,
            total_answers: status.total_answers,
            duration_seconds,
            timed_out,
        },
        context: status.context.as_ref().map(|c| c.context.clone()),
        questions: status.questions.clone().unwrap_or_default(),
        results: aggregate(status, models),
        summary: summarize(&status.answers),
    }
}
