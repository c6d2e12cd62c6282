//! Answer aggregation and statistics.
//!
//! This module groups raw probe answers by (question, model) and computes
//! visibility, average mention position and failure counts.

use crate::models::{AggregatedResult, ModelSpec, RunStatus, VisibilityAnswer, VisibilitySummary};

/// One row per (question, model) pair, questions in stored order and models
/// in roster order. Pairs with no answers yet still get a `"0/0"` row.
pub fn aggregate(status: &RunStatus, models: &[ModelSpec]) -> Vec<AggregatedResult> {
    let questions = match status.questions {
        Some(ref questions) => questions,
        None => return Vec::new(),
    };

    let mut results = Vec::with_capacity(questions.len() * models.len());

    for question in questions {
        for model in models {
            let pair: Vec<&VisibilityAnswer> = status
                .answers
                .iter()
                .filter(|a| a.question_id == question.id && a.model == model.id)
                .collect();

            let succeeded: Vec<&VisibilityAnswer> =
                pair.iter().copied().filter(|a| !a.failed).collect();
            let failed_count = pair.len() - succeeded.len();
            let visible_count = succeeded.iter().filter(|a| a.mentioned).count();

            results.push(AggregatedResult {
                question_id: question.id.clone(),
                question: question.question.clone(),
                model_id: model.id.clone(),
                model: model.name.clone(),
                visible: visible_count > 0,
                position: average_position(&succeeded),
                runs: format!("{}/{}", visible_count, pair.len()),
                visible_count,
                total_runs: pair.len(),
                answers: succeeded.iter().map(|a| a.answer.clone()).collect(),
                failed_count,
            });
        }
    }

    results
}

/// Rounded mean position over mentioning answers that carry a position.
fn average_position(succeeded: &[&VisibilityAnswer]) -> Option<u32> {
    let positions: Vec<u32> = succeeded
        .iter()
        .filter(|a| a.mentioned)
        .filter_map(|a| a.position)
        .collect();

    if positions.is_empty() {
        return None;
    }

    let sum: u64 = positions.iter().map(|&p| u64::from(p)).sum();
    let mean = sum as f64 / positions.len() as f64;
    Some(mean.round() as u32)
}

/// Run-wide totals.
pub fn summarize(answers: &[VisibilityAnswer]) -> VisibilitySummary {
    let succeeded = answers.iter().filter(|a| !a.failed).count();
    let mentioned = answers.iter().filter(|a| !a.failed && a.mentioned).count();

    VisibilitySummary {
        total: answers.len(),
        succeeded,
        failed: answers.len() - succeeded,
        mentioned,
        visibility_rate: if succeeded > 0 {
            Some(mentioned as f64 / succeeded as f64)
        } else {
            None
        },
    }
}

/// Results where the brand showed up at least once, best position first.
pub fn best_placements(results: &[AggregatedResult]) -> Vec<&AggregatedResult> {
    let mut visible: Vec<&AggregatedResult> = results.iter().filter(|r| r.visible).collect();
    visible.sort_by_key(|r| (r.position.unwrap_or(u32::MAX), std::cmp::Reverse(r.visible_count)));
    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunStage;
    use crate::testing::{mentioned, not_mentioned, questions};

    fn roster() -> Vec<ModelSpec> {
        vec![
            ModelSpec::new("openai/gpt-4o", "GPT-4o"),
            ModelSpec::new("anthropic/claude", "Claude"),
        ]
    }

    fn status(question_count: usize, answers: Vec<VisibilityAnswer>) -> RunStatus {
        RunStatus {
            run_id: "r1".to_string(),
            brand: "Acme".to_string(),
            context: None,
            questions: Some(questions(question_count)),
            completed_answers: answers.len(),
            answers,
            total_answers: question_count * 2 * 3,
            status: RunStage::Checking,
        }
    }

    #[test]
    fn test_mean_position_and_label() {
        let status = status(
            1,
            vec![
                mentioned("Q1", "openai/gpt-4o", 1, Some(2)),
                mentioned("Q1", "openai/gpt-4o", 2, Some(4)),
                not_mentioned("Q1", "openai/gpt-4o", 3),
            ],
        );

        let results = aggregate(&status, &roster());
        let row = &results[0];
        assert!(row.visible);
        assert_eq!(row.position, Some(3));
        assert_eq!(row.runs, "2/3");
        assert_eq!(row.failed_count, 0);
        assert_eq!(row.answers.len(), 3);
        assert_eq!(row.model, "GPT-4o");
    }

    #[test]
    fn test_empty_answers_still_produce_rows() {
        let status = status(1, Vec::new());
        let results = aggregate(&status, &roster());

        assert_eq!(results.len(), 2);
        for row in &results {
            assert_eq!(row.question_id, "Q1");
            assert_eq!(row.runs, "0/0");
            assert!(!row.visible);
            assert_eq!(row.position, None);
            assert_eq!(row.total_runs, 0);
        }
    }

    #[test]
    fn test_all_failed_pair() {
        let status = status(
            1,
            (1..=3)
                .map(|run| VisibilityAnswer::failed("Q1", "anthropic/claude", run, "boom"))
                .collect(),
        );

        let results = aggregate(&status, &roster());
        let row = results.iter().find(|r| r.model_id == "anthropic/claude").unwrap();
        assert!(!row.visible);
        assert_eq!(row.position, None);
        assert_eq!(row.runs, "0/3");
        assert_eq!(row.failed_count, 3);
        assert!(row.answers.is_empty());
    }

    #[test]
    fn test_mentions_without_position() {
        let status = status(
            1,
            vec![
                mentioned("Q1", "openai/gpt-4o", 1, None),
                mentioned("Q1", "openai/gpt-4o", 2, Some(1)),
                mentioned("Q1", "openai/gpt-4o", 3, Some(2)),
            ],
        );

        let row = &aggregate(&status, &roster())[0];
        assert_eq!(row.runs, "3/3");
        // (1 + 2) / 2 = 1.5 rounds up
        assert_eq!(row.position, Some(2));
    }

    #[test]
    fn test_rows_follow_question_then_roster_order() {
        let status = status(2, Vec::new());
        let results = aggregate(&status, &roster());
        let order: Vec<_> = results
            .iter()
            .map(|r| (r.question_id.as_str(), r.model_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Q1", "openai/gpt-4o"),
                ("Q1", "anthropic/claude"),
                ("Q2", "openai/gpt-4o"),
                ("Q2", "anthropic/claude"),
            ]
        );
    }

    #[test]
    fn test_no_questions_no_rows() {
        let mut status = status(1, Vec::new());
        status.questions = None;
        assert!(aggregate(&status, &roster()).is_empty());
    }

    #[test]
    fn test_summarize() {
        let answers = vec![
            mentioned("Q1", "m", 1, Some(1)),
            not_mentioned("Q1", "m", 2),
            VisibilityAnswer::failed("Q1", "m", 3, "x"),
        ];
        let summary = summarize(&answers);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.mentioned, 1);
        assert_eq!(summary.visibility_rate, Some(0.5));

        assert_eq!(summarize(&[]).visibility_rate, None);
    }

    #[test]
    fn test_best_placements() {
        let status = status(
            2,
            vec![
                mentioned("Q1", "openai/gpt-4o", 1, Some(3)),
                mentioned("Q2", "anthropic/claude", 1, Some(1)),
                not_mentioned("Q2", "openai/gpt-4o", 1),
            ],
        );
        let results = aggregate(&status, &roster());
        let best = best_placements(&results);
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].question_id, "Q2");
        assert_eq!(best[0].position, Some(1));
    }
}
