//! Run orchestration: context synthesis, question generation and the full
//! context → questions → probes flow.

pub mod context;
pub mod questions;

use crate::analysis::summarize;
use crate::llm::{CompletionClient, LlmError};
use crate::models::{now_millis, ModelSpec, Question, RunContext, VisibilitySummary};
use crate::probe::{Dispatcher, ProbeExecutor, ProbePlan};
use crate::store::{RunStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Errors from the workflow steps.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("No context found for run {0}")]
    ContextNotFound(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Failed to parse generated questions: {0}")]
    Parse(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How the probe batch is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    /// Fire every probe and return at once; progress is read from the store.
    #[default]
    Detached,
    /// Wait until every probe has produced a record.
    AwaitAll,
}

/// Tunables of a run.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub context_model: String,
    pub question_model: String,
    pub detection_model: String,
    pub question_count: usize,
    pub max_question_attempts: u32,
    pub repetitions: u32,
    pub models: Vec<ModelSpec>,
}

impl WorkflowSettings {
    /// Expected answer records per run.
    pub fn total_answers(&self) -> usize {
        self.question_count * self.models.len() * self.repetitions as usize
    }
}

/// What `run_full` did.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub run_id: String,
    pub questions: Vec<Question>,
    pub dispatched: usize,
    /// Only present when the batch was awaited.
    pub summary: Option<VisibilitySummary>,
}

/// Server-side orchestration of a run.
pub struct Workflow {
    store: RunStore,
    client: Arc<dyn CompletionClient>,
    executor: Arc<ProbeExecutor>,
    settings: WorkflowSettings,
}

impl Workflow {
    pub fn new(store: RunStore, client: Arc<dyn CompletionClient>, settings: WorkflowSettings) -> Self {
        let executor = Arc::new(ProbeExecutor::new(
            Arc::clone(&client),
            store.clone(),
            settings.detection_model.clone(),
        ));
        Self {
            store,
            client,
            executor,
            settings,
        }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn executor(&self) -> &ProbeExecutor {
        &self.executor
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Generate and store the brand context.
    pub async fn create_context(&self, run_id: &str, brand: &str) -> Result<RunContext, WorkflowError> {
        info!("Creating context for \"{}\" (run {})", brand, run_id);

        let text = self
            .client
            .complete(&self.settings.context_model, &context::context_prompt(brand))
            .await?;

        let context = RunContext {
            brand: brand.to_string(),
            context: text.trim().to_string(),
            timestamp: now_millis(),
        };
        self.store.put_context(run_id, &context).await?;
        Ok(context)
    }

    /// Generate and store the question set for a run with a stored context.
    ///
    /// Question sets that name the brand are regenerated up to
    /// `max_question_attempts` times. The last set is kept either way.
    pub async fn generate_questions(&self, run_id: &str) -> Result<Vec<Question>, WorkflowError> {
        let context = self
            .store
            .context(run_id)
            .await?
            .ok_or_else(|| WorkflowError::ContextNotFound(run_id.to_string()))?;

        let count = self.settings.question_count;
        let max_attempts = self.settings.max_question_attempts.max(1);
        let mut leaking: Vec<String> = Vec::new();
        let mut attempt = 0;

        let questions = loop {
            attempt += 1;
            let prompt = if leaking.is_empty() {
                questions::questions_prompt(&context.brand, &context.context, count)
            } else {
                questions::regenerate_prompt(&context.brand, &context.context, count, &leaking)
            };

            let raw = self
                .client
                .complete(&self.settings.question_model, &prompt)
                .await?;
            let candidate = questions::parse_questions(&raw, count).map_err(WorkflowError::Parse)?;

            leaking = questions::leaking_questions(&candidate, &context.brand);
            if leaking.is_empty() {
                break candidate;
            }
            if attempt >= max_attempts {
                warn!(
                    "Questions {} still mention \"{}\" after {} attempts; keeping them",
                    leaking.join(", "),
                    context.brand,
                    attempt
                );
                break candidate;
            }
            warn!(
                "Attempt {}: questions {} mention the brand, regenerating",
                attempt,
                leaking.join(", ")
            );
        };

        self.store.put_questions(run_id, &questions).await?;
        info!("Stored {} questions for run {}", questions.len(), run_id);
        Ok(questions)
    }

    /// Probe plan for a run's questions over the configured roster.
    pub fn plan(&self, run_id: &str, brand: &str, questions: Vec<Question>) -> ProbePlan {
        ProbePlan {
            run_id: run_id.to_string(),
            brand: brand.to_string(),
            questions,
            models: self.settings.models.clone(),
            repetitions: self.settings.repetitions,
        }
    }

    /// Context, questions, then the probe batch in the given mode.
    pub async fn run_full(
        &self,
        run_id: &str,
        brand: &str,
        mode: DispatchMode,
    ) -> Result<FlowOutcome, WorkflowError> {
        self.create_context(run_id, brand).await?;
        let questions = self.generate_questions(run_id).await?;

        let plan = self.plan(run_id, brand, questions.clone());
        if plan.is_empty() {
            warn!("Run {} has nothing to probe", run_id);
        }

        let dispatcher = Dispatcher::new(Arc::clone(&self.executor));
        let (dispatched, summary) = match mode {
            DispatchMode::Detached => (dispatcher.dispatch_detached(&plan), None),
            DispatchMode::AwaitAll => {
                let records = dispatcher.dispatch_all(&plan).await;
                let summary = summarize(&records);
                info!(
                    "Run {} finished: {} probes, {} succeeded, {} failed, {} mentioned",
                    run_id, summary.total, summary.succeeded, summary.failed, summary.mentioned
                );
                (records.len(), Some(summary))
            }
        };

        Ok(FlowOutcome {
            run_id: run_id.to_string(),
            questions,
            dispatched,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StatusReader;
    use crate::models::RunStage;
    use crate::testing::{FnClient, ScriptedClient};

    fn settings() -> WorkflowSettings {
        WorkflowSettings {
            context_model: "ctx-model".to_string(),
            question_model: "q-model".to_string(),
            detection_model: "detector".to_string(),
            question_count: 3,
            max_question_attempts: 3,
            repetitions: 3,
            models: vec![
                ModelSpec::new("a/one", "One"),
                ModelSpec::new("b/two", "Two"),
                ModelSpec::new("c/three", "Three"),
            ],
        }
    }

    const CLEAN_QUESTIONS: &str = r#"[
        {"id": "Q1", "question": "Best anvil makers?"},
        {"id": "Q2", "question": "Where to buy rocket skates?"},
        {"id": "Q3", "question": "Cheapest portable holes?"}
    ]"#;

    const LEAKY_QUESTIONS: &str = r#"[
        {"id": "Q1", "question": "Is Acme the best anvil maker?"},
        {"id": "Q2", "question": "Where to buy rocket skates?"},
        {"id": "Q3", "question": "Cheapest portable holes?"}
    ]"#;

    async fn seeded(client: Arc<dyn CompletionClient>) -> Workflow {
        let store = RunStore::in_memory();
        store
            .put_context(
                "r1",
                &RunContext {
                    brand: "Acme".to_string(),
                    context: "Acme makes anvils.".to_string(),
                    timestamp: 1,
                },
            )
            .await
            .unwrap();
        Workflow::new(store, client, settings())
    }

    #[tokio::test]
    async fn test_create_context_stores_record() {
        let client = Arc::new(ScriptedClient::new(vec![Ok("  Acme makes anvils.\n".to_string())]));
        let workflow = Workflow::new(RunStore::in_memory(), client.clone(), settings());

        let context = workflow.create_context("r1", "Acme").await.unwrap();
        assert_eq!(context.context, "Acme makes anvils.");
        assert!(client.prompts()[0].contains("\"Acme\""));

        let stored = workflow.store().context("r1").await.unwrap().unwrap();
        assert_eq!(stored, context);
    }

    #[tokio::test]
    async fn test_questions_require_context() {
        let client = Arc::new(ScriptedClient::new(Vec::new()));
        let workflow = Workflow::new(RunStore::in_memory(), client, settings());
        let err = workflow.generate_questions("missing").await.unwrap_err();
        assert!(matches!(err, WorkflowError::ContextNotFound(_)));
    }

    #[tokio::test]
    async fn test_brand_leak_triggers_regeneration() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(LEAKY_QUESTIONS.to_string()),
            Ok(CLEAN_QUESTIONS.to_string()),
        ]));
        let workflow = seeded(client.clone()).await;

        let questions = workflow.generate_questions("r1").await.unwrap();
        assert_eq!(questions[0].question, "Best anvil makers?");

        let prompts = client.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Q1"));
        assert!(prompts[1].contains("WITHOUT the brand name"));

        let stored = workflow.store().questions("r1").await.unwrap().unwrap();
        assert_eq!(stored, questions);
    }

    #[tokio::test]
    async fn test_leaky_questions_kept_after_last_attempt() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok(LEAKY_QUESTIONS.to_string()),
            Ok(LEAKY_QUESTIONS.to_string()),
            Ok(LEAKY_QUESTIONS.to_string()),
        ]));
        let workflow = seeded(client.clone()).await;

        let questions = workflow.generate_questions("r1").await.unwrap();
        assert!(questions[0].question.contains("Acme"));
        assert_eq!(client.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_unparseable_questions_are_an_error() {
        let client = Arc::new(ScriptedClient::new(vec![Ok("I can't help with that".to_string())]));
        let workflow = seeded(client).await;

        let err = workflow.generate_questions("r1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Parse(_)));
        assert!(workflow.store().questions("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_full_await_all_completes_run() {
        let client = FnClient(|model: &str, prompt: &str| match model {
            "ctx-model" => Ok("Acme makes anvils.".to_string()),
            "q-model" => Ok(CLEAN_QUESTIONS.to_string()),
            "detector" => Ok(r#"{"isVisible": true, "position": 1}"#.to_string()),
            "b/two" if prompt.contains("rocket") => Err(LlmError::EmptyResponse),
            _ => Ok("Acme is great.".to_string()),
        });
        let workflow = Workflow::new(RunStore::in_memory(), Arc::new(client), settings());

        let outcome = workflow
            .run_full("r1", "Acme", DispatchMode::AwaitAll)
            .await
            .unwrap();
        assert_eq!(outcome.dispatched, 27);
        let summary = outcome.summary.unwrap();
        assert_eq!(summary.total, 27);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.mentioned, 24);

        let status = StatusReader::new(workflow.store().clone(), 27)
            .read_status("r1")
            .await
            .unwrap();
        assert_eq!(status.status, RunStage::Complete);
        assert_eq!(status.completed_answers, 27);
        assert_eq!(status.brand, "Acme");
    }

    #[tokio::test]
    async fn test_run_full_stops_at_context_failure() {
        let client = Arc::new(ScriptedClient::new(vec![Err(LlmError::Timeout(120))]));
        let workflow = Workflow::new(RunStore::in_memory(), client, settings());

        let err = workflow
            .run_full("r1", "Acme", DispatchMode::Detached)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Llm(LlmError::Timeout(120))));
        assert!(workflow.store().context("r1").await.unwrap().is_none());
    }
}
