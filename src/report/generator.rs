//! Markdown report generation.
//!
//! This module renders a finished (or timed-out) run as a Markdown or JSON
//! report.

use crate::analysis::best_placements;
use crate::models::{AggregatedResult, ReportMetadata, RunReport, VisibilitySummary};
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &RunReport) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "# Brand Visibility Report: {}\n\n",
        report.metadata.brand
    ));

    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(&report.summary, &report.results));

    if let Some(ref context) = report.context {
        output.push_str("## Brand Context\n\n");
        output.push_str(context);
        output.push_str("\n\n");
    }

    if !report.questions.is_empty() {
        output.push_str("## Questions\n\n");
        for question in &report.questions {
            output.push_str(&format!("- **{}:** {}\n", question.id, question.question));
        }
        output.push('\n');
    }

    output.push_str(&generate_results_section(&report.results));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Run ID:** `{}`\n", metadata.run_id));
    section.push_str(&format!("- **Brand:** {}\n", metadata.brand));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Stage:** {}\n", metadata.stage));
    section.push_str(&format!(
        "- **Answers:** {}/{}\n",
        metadata.completed_answers, metadata.total_answers
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    if metadata.timed_out {
        section.push_str("- **Note:** polling timed out, results are partial\n");
    }
    section.push('\n');

    section
}

/// Generate the summary section.
fn generate_summary_section(summary: &VisibilitySummary, results: &[AggregatedResult]) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Probes | Succeeded | Failed | Mentioned | Visibility |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    let rate = summary
        .visibility_rate
        .map(|r| format!("{:.0}%", r * 100.0))
        .unwrap_or_else(|| "n/a".to_string());
    section.push_str(&format!(
        "| {} | {} | {} | {} | **{}** |\n\n",
        summary.total, summary.succeeded, summary.failed, summary.mentioned, rate
    ));

    let best = best_placements(results);
    if !best.is_empty() {
        section.push_str("### Best Placements\n\n");
        for result in best.iter().take(5) {
            let position = result
                .position
                .map(|p| format!("#{}", p))
                .unwrap_or_else(|| "unranked".to_string());
            section.push_str(&format!(
                "- {} on {}: {} ({})\n",
                result.model, result.question_id, position, result.runs
            ));
        }
        section.push('\n');
    }

    section
}

/// Generate the per (question, model) results table.
fn generate_results_section(results: &[AggregatedResult]) -> String {
    let mut section = String::new();

    section.push_str("## Results\n\n");

    if results.is_empty() {
        section.push_str("No results yet.\n\n");
        return section;
    }

    section.push_str("| Model | Question | Visible | Position | Runs | Failed |\n");
    section.push_str("|:---|:---|:---:|:---:|:---:|:---:|\n");
    for result in results {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            result.model,
            result.question_id,
            if result.visible { "yes" } else { "no" },
            result
                .position
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            result.runs,
            result.failed_count
        ));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    "---\n\n*Report generated by visiprobe*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
