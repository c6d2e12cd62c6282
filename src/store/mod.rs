//! Run-scoped key-value storage.
//!
//! All state of a run lives in an external key-value store under keys derived
//! from the run id:
//!
//! - `<runId>:context`: the [`RunContext`]
//! - `<runId>:questions`: the question set
//! - `<runId>:<questionId>:answer<run>:<model>`: one [`VisibilityAnswer`] per probe,
//!   with `/` in the model id replaced by `_`
//!
//! The answer key is the idempotency boundary: re-running a probe overwrites
//! its record in place.

mod error;
pub mod memory;
pub mod pattern;
pub mod upstash;

pub use error::StoreError;
pub use memory::MemoryKv;
pub use upstash::UpstashKv;

use crate::models::{Question, RunContext, VisibilityAnswer};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// Minimal key-value store contract. No transactions.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// List keys matching a Redis-style glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Fetch several keys at once. Missing keys yield `None` in place.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;
}

/// Key for a run's context record.
pub fn context_key(run_id: &str) -> String {
    format!("{}:context", run_id)
}

/// Key for a run's question set.
pub fn questions_key(run_id: &str) -> String {
    format!("{}:questions", run_id)
}

/// Model id as it appears in answer keys.
pub fn sanitize_model_id(model: &str) -> String {
    model.replace('/', "_")
}

/// Key for one probe answer.
pub fn answer_key(run_id: &str, question_id: &str, run: u32, model: &str) -> String {
    format!(
        "{}:{}:answer{}:{}",
        run_id,
        question_id,
        run,
        sanitize_model_id(model)
    )
}

/// Glob pattern that lists every answer key of a run (and possibly a few
/// look-alikes, see [`is_answer_key`]).
pub fn answer_pattern(run_id: &str) -> String {
    format!("{}:*:answer*", pattern::escape(run_id))
}

/// Whether `key` has the exact shape of an answer key belonging to `run_id`.
pub fn is_answer_key(run_id: &str, key: &str) -> bool {
    let rest = match key
        .strip_prefix(run_id)
        .and_then(|rest| rest.strip_prefix(':'))
    {
        Some(rest) => rest,
        None => return false,
    };

    let mut parts = rest.splitn(3, ':');
    let (question_id, repetition, model) = match (parts.next(), parts.next(), parts.next()) {
        (Some(q), Some(r), Some(m)) => (q, r, m),
        _ => return false,
    };

    let digits = match repetition.strip_prefix("answer") {
        Some(digits) => digits,
        None => return false,
    };

    !question_id.is_empty()
        && !model.is_empty()
        && !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
}

/// Typed access to a run's records on top of a [`KvStore`].
#[derive(Clone)]
pub struct RunStore {
    kv: Arc<dyn KvStore>,
}

impl RunStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Store backed by a fresh in-memory map.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()))
    }

    pub async fn put_context(&self, run_id: &str, context: &RunContext) -> Result<(), StoreError> {
        let value = serde_json::to_string(context)?;
        self.kv.set(&context_key(run_id), &value).await
    }

    /// Read the context record. A malformed record reads as absent.
    pub async fn context(&self, run_id: &str) -> Result<Option<RunContext>, StoreError> {
        let raw = self.kv.get(&context_key(run_id)).await?;
        Ok(raw.and_then(|raw| decode_lenient(&context_key(run_id), &raw)))
    }

    pub async fn put_questions(
        &self,
        run_id: &str,
        questions: &[Question],
    ) -> Result<(), StoreError> {
        let value = serde_json::to_string(questions)?;
        self.kv.set(&questions_key(run_id), &value).await
    }

    /// Read the question set. Anything that is not a well-formed question
    /// array reads as absent.
    pub async fn questions(&self, run_id: &str) -> Result<Option<Vec<Question>>, StoreError> {
        let raw = self.kv.get(&questions_key(run_id)).await?;
        Ok(raw.and_then(|raw| decode_lenient(&questions_key(run_id), &raw)))
    }

    /// Persist a probe answer under its idempotent key.
    pub async fn put_answer(
        &self,
        run_id: &str,
        answer: &VisibilityAnswer,
    ) -> Result<(), StoreError> {
        let key = answer_key(run_id, &answer.question_id, answer.run, &answer.model);
        let value = serde_json::to_string(answer)?;
        self.kv.set(&key, &value).await?;
        debug!("Stored answer {}", key);
        Ok(())
    }

    /// All answer records currently present for a run, in key order.
    ///
    /// Keys that disappear between listing and fetching, and values that do
    /// not decode, are skipped.
    pub async fn answers(&self, run_id: &str) -> Result<Vec<VisibilityAnswer>, StoreError> {
        let mut keys: Vec<String> = self
            .kv
            .keys(&answer_pattern(run_id))
            .await?
            .into_iter()
            .filter(|key| is_answer_key(run_id, key))
            .collect();

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        keys.sort();
        keys.dedup();

        let values = self.kv.mget(&keys).await?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.and_then(|raw| decode_lenient(key, &raw)))
            .collect())
    }
}

fn decode_lenient<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring malformed record at {}: {}", key, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(question_id: &str, model: &str, run: u32, text: &str) -> VisibilityAnswer {
        VisibilityAnswer::succeeded(question_id, model, run, text, true, Some(1))
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(context_key("r1"), "r1:context");
        assert_eq!(questions_key("r1"), "r1:questions");
        assert_eq!(
            answer_key("r1", "Q2", 3, "openai/gpt-4o-mini"),
            "r1:Q2:answer3:openai_gpt-4o-mini"
        );
    }

    #[test]
    fn test_is_answer_key() {
        assert!(is_answer_key("r1", "r1:Q1:answer1:openai_gpt-4o"));
        assert!(!is_answer_key("r1", "r1:context"));
        assert!(!is_answer_key("r1", "r1:questions"));
        assert!(!is_answer_key("r1", "r10:Q1:answer1:m"));
        assert!(!is_answer_key("r1", "r1:x:Q1:answer1:m"));
        assert!(!is_answer_key("r1", "r1:Q1:answerX:m"));
        assert!(!is_answer_key("r1", "r1:Q1:answer1:"));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = RunStore::in_memory();
        store.put_answer("r1", &answer("Q1", "a/b", 1, "first")).await.unwrap();
        store.put_answer("r1", &answer("Q1", "a/b", 1, "second")).await.unwrap();

        let answers = store.answers("r1").await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].answer, "second");
    }

    #[tokio::test]
    async fn test_answers_are_scoped_to_run() {
        let store = RunStore::in_memory();
        store.put_answer("r1", &answer("Q1", "m", 1, "mine")).await.unwrap();
        store.put_answer("r1:x", &answer("Q1", "m", 1, "nested")).await.unwrap();
        store.put_answer("r10", &answer("Q1", "m", 1, "other")).await.unwrap();

        let answers = store.answers("r1").await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].answer, "mine");
    }

    #[tokio::test]
    async fn test_glob_characters_in_run_id() {
        let store = RunStore::in_memory();
        store.put_answer("run*", &answer("Q1", "m", 1, "star")).await.unwrap();
        store.put_answer("runX", &answer("Q1", "m", 1, "plain")).await.unwrap();

        let answers = store.answers("run*").await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].answer, "star");
    }

    #[tokio::test]
    async fn test_malformed_questions_read_as_absent() {
        let kv = Arc::new(MemoryKv::new());
        kv.set("r1:questions", r#"{"not":"a list"}"#).await.unwrap();
        kv.set("r1:Q1:answer1:m", "garbage").await.unwrap();
        let store = RunStore::new(kv);

        assert_eq!(store.questions("r1").await.unwrap(), None);
        assert!(store.answers("r1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_context_round_trip() {
        let store = RunStore::in_memory();
        assert_eq!(store.context("r1").await.unwrap(), None);

        let context = RunContext {
            brand: "Acme".to_string(),
            context: "Acme makes anvils".to_string(),
            timestamp: 1,
        };
        store.put_context("r1", &context).await.unwrap();
        assert_eq!(store.context("r1").await.unwrap(), Some(context));
    }
}
