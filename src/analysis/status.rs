//! Run status derivation.
//!
//! A [`RunStatus`] is never stored. Each read rebuilds it from whatever
//! records are currently in the store, and the stage comes from a fixed,
//! ordered rule table.

use crate::models::{RunStage, RunStatus};
use crate::store::{RunStore, StoreError};
use tracing::debug;

/// The facts the stage rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageFacts {
    pub has_context: bool,
    pub has_questions: bool,
    pub answers: usize,
    pub total_answers: usize,
}

fn context_without_questions(f: &StageFacts) -> bool {
    f.has_context && !f.has_questions
}

fn questions_without_answers(f: &StageFacts) -> bool {
    f.has_questions && f.answers == 0
}

fn answers_in_progress(f: &StageFacts) -> bool {
    f.answers > 0 && f.answers < f.total_answers
}

fn answers_complete(f: &StageFacts) -> bool {
    f.answers > 0 && f.answers >= f.total_answers
}

/// Stage rules in precedence order; the first match wins, otherwise `Pending`.
pub const STAGE_RULES: &[(RunStage, fn(&StageFacts) -> bool)] = &[
    (RunStage::Context, context_without_questions),
    (RunStage::Questions, questions_without_answers),
    (RunStage::Checking, answers_in_progress),
    (RunStage::Complete, answers_complete),
];

/// Derive the workflow stage. Never yields `Failed`.
pub fn derive_stage(facts: &StageFacts) -> RunStage {
    STAGE_RULES
        .iter()
        .find(|(_, rule)| rule(facts))
        .map(|(stage, _)| *stage)
        .unwrap_or(RunStage::Pending)
}

/// Reads run snapshots from the store.
#[derive(Clone)]
pub struct StatusReader {
    store: RunStore,
    total_answers: usize,
}

impl StatusReader {
    /// `total_answers` is the expected probe count (questions × models × repetitions).
    pub fn new(store: RunStore, total_answers: usize) -> Self {
        Self {
            store,
            total_answers,
        }
    }

    pub fn total_answers(&self) -> usize {
        self.total_answers
    }

    /// Build a fresh snapshot of the run.
    pub async fn read_status(&self, run_id: &str) -> Result<RunStatus, StoreError> {
        let context = self.store.context(run_id).await?;
        let questions = self.store.questions(run_id).await?;
        let answers = self.store.answers(run_id).await?;

        let facts = StageFacts {
            has_context: context.is_some(),
            has_questions: questions.is_some(),
            answers: answers.len(),
            total_answers: self.total_answers,
        };
        let status = derive_stage(&facts);
        debug!(
            "Run {}: {} ({}/{})",
            run_id,
            status,
            answers.len(),
            self.total_answers
        );

        Ok(RunStatus {
            run_id: run_id.to_string(),
            brand: context
                .as_ref()
                .map(|c| c.brand.clone())
                .unwrap_or_default(),
            context,
            questions,
            completed_answers: answers.len(),
            answers,
            total_answers: self.total_answers,
            status,
        })
    }
}
