//! Single-probe execution.
//!
//! A probe asks one model one question, runs brand detection on the answer
//! and persists the resulting [`VisibilityAnswer`]. Collaborator failures are
//! recorded as failed answers instead of being returned as errors, so one
//! bad model call never takes down the rest of a batch.

use super::detection::{detect, detection_prompt, DetectionSource};
use crate::llm::{CompletionClient, LlmError};
use crate::models::VisibilityAnswer;
use crate::store::{RunStore, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One (question, model, repetition) unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeRequest {
    pub run_id: String,
    pub question_id: String,
    pub question: String,
    pub model: String,
    /// Repetition index, starting at 1.
    pub run: u32,
    pub brand: String,
}

/// Anything that can carry out a probe and always yields a record.
#[async_trait]
pub trait ProbeRunner: Send + Sync + 'static {
    async fn run_probe(&self, request: ProbeRequest) -> VisibilityAnswer;
}

/// Runs probes against the completion collaborators and the run store.
pub struct ProbeExecutor {
    client: Arc<dyn CompletionClient>,
    store: RunStore,
    detection_model: String,
}

impl ProbeExecutor {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        store: RunStore,
        detection_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            detection_model: detection_model.into(),
        }
    }

    /// Ask the question and classify the answer. Errors only come from the
    /// collaborators.
    async fn ask_and_detect(&self, request: &ProbeRequest) -> Result<VisibilityAnswer, LlmError> {
        let answer = self.client.complete(&request.model, &request.question).await?;
        debug!(
            "Got answer from {} for {} run {}: {}",
            request.model,
            request.question_id,
            request.run,
            answer.chars().take(100).collect::<String>()
        );

        let raw = self
            .client
            .complete(&self.detection_model, &detection_prompt(&request.brand, &answer))
            .await?;
        let detection = detect(&raw, &request.brand, &answer);
        if detection.source == DetectionSource::Fallback {
            warn!(
                "Reduced-confidence detection for {} / {} run {}",
                request.question_id, request.model, request.run
            );
        }

        Ok(VisibilityAnswer::succeeded(
            &request.question_id,
            &request.model,
            request.run,
            answer,
            detection.mentioned,
            detection.position,
        ))
    }

    /// Run the probe and persist its record. Collaborator failures become a
    /// failed record; only a store write failure is returned as an error.
    pub async fn try_probe(&self, request: &ProbeRequest) -> Result<VisibilityAnswer, StoreError> {
        let record = match self.ask_and_detect(request).await {
            Ok(record) => record,
            Err(e) => {
                info!(
                    "Check failed for {}, {} run {}: {}",
                    request.model, request.question_id, request.run, e
                );
                VisibilityAnswer::failed(&request.question_id, &request.model, request.run, e.to_string())
            }
        };

        self.store.put_answer(&request.run_id, &record).await?;
        Ok(record)
    }

    /// Run the probe. Never fails: if even the store write fails, the
    /// returned record is marked failed with the store error.
    pub async fn probe(&self, request: &ProbeRequest) -> VisibilityAnswer {
        match self.try_probe(request).await {
            Ok(record) => record,
            Err(e) => {
                error!(
                    "Failed to store answer for {} / {} run {}: {}",
                    request.question_id, request.model, request.run, e
                );
                VisibilityAnswer::failed(
                    &request.question_id,
                    &request.model,
                    request.run,
                    format!("Failed to store answer: {}", e),
                )
            }
        }
    }
}

#[async_trait]
impl ProbeRunner for ProbeExecutor {
    async fn run_probe(&self, request: ProbeRequest) -> VisibilityAnswer {
        self.probe(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KvStore;
    use crate::testing::FnClient;

    fn request(model: &str) -> ProbeRequest {
        ProbeRequest {
            run_id: "r1".to_string(),
            question_id: "Q1".to_string(),
            question: "Best anvil vendors?".to_string(),
            model: model.to_string(),
            run: 2,
            brand: "Acme".to_string(),
        }
    }

    fn executor<F>(f: F) -> (ProbeExecutor, RunStore)
    where
        F: Fn(&str, &str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        let store = RunStore::in_memory();
        let executor = ProbeExecutor::new(Arc::new(FnClient(f)), store.clone(), "detector");
        (executor, store)
    }

    #[tokio::test]
    async fn test_successful_probe_is_persisted() {
        let (executor, store) = executor(|model, _| {
            if model == "detector" {
                Ok(r#"{"isVisible": true, "position": 2}"#.to_string())
            } else {
                Ok("Foo, then Acme, then Bar".to_string())
            }
        });

        let record = executor.probe(&request("openai/gpt-4o")).await;
        assert!(!record.failed);
        assert!(record.mentioned);
        assert_eq!(record.position, Some(2));
        assert_eq!(record.run, 2);

        let stored = store.answers("r1").await.unwrap();
        assert_eq!(stored, vec![record]);
    }

    #[tokio::test]
    async fn test_answer_failure_becomes_failed_record() {
        let (executor, store) = executor(|model, _| {
            if model == "detector" {
                Ok(r#"{"isVisible": true, "position": 1}"#.to_string())
            } else {
                Err(LlmError::Api {
                    status: 429,
                    body: "rate limited".to_string(),
                })
            }
        });

        let record = executor.probe(&request("m")).await;
        assert!(record.failed);
        assert!(!record.mentioned);
        assert_eq!(record.position, None);
        assert!(record.answer.is_empty());
        assert!(record.error.unwrap().contains("rate limited"));
        assert_eq!(store.answers("r1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_detection_failure_becomes_failed_record() {
        let (executor, _store) = executor(|model, _| {
            if model == "detector" {
                Err(LlmError::Timeout(5))
            } else {
                Ok("Acme".to_string())
            }
        });

        let record = executor.probe(&request("m")).await;
        assert!(record.failed);
        assert!(record.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_unparseable_detection_uses_fallback() {
        let (executor, _store) = executor(|model, _| {
            if model == "detector" {
                Ok("Yes, it is mentioned.".to_string())
            } else {
                Ok("We recommend acme.".to_string())
            }
        });

        let record = executor.probe(&request("m")).await;
        assert!(!record.failed);
        assert!(record.mentioned);
        assert_eq!(record.position, None);
    }

    struct BrokenKv;

    #[async_trait]
    impl KvStore for BrokenKv {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Backend("down".to_string()))
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("down".to_string()))
        }
        async fn keys(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Backend("down".to_string()))
        }
        async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
            Err(StoreError::Backend("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_absorbed_by_probe() {
        let client = FnClient(|_: &str, _: &str| Ok(r#"{"isVisible": false}"#.to_string()));
        let executor = ProbeExecutor::new(
            Arc::new(client),
            RunStore::new(Arc::new(BrokenKv)),
            "detector",
        );

        assert!(executor.try_probe(&request("m")).await.is_err());

        let record = executor.probe(&request("m")).await;
        assert!(record.failed);
        assert!(record.error.unwrap().contains("Failed to store answer"));
    }
}
