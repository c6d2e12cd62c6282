//! Test doubles shared by unit tests.

use crate::llm::{CompletionClient, LlmError};
use crate::models::{Question, VisibilityAnswer};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Completion client answering through a closure of `(model, prompt)`.
pub struct FnClient<F>(pub F);

#[async_trait]
impl<F> CompletionClient for FnClient<F>
where
    F: Fn(&str, &str) -> Result<String, LlmError> + Send + Sync,
{
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        (self.0)(model, prompt)
    }
}

/// Completion client replaying a fixed list of responses and recording prompts.
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, _model: &str, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }
}

pub fn questions(count: usize) -> Vec<Question> {
    (1..=count)
        .map(|i| Question {
            id: format!("Q{}", i),
            question: format!("Which tool is best for job {}?", i),
        })
        .collect()
}

pub fn mentioned(question_id: &str, model: &str, run: u32, position: Option<u32>) -> VisibilityAnswer {
    VisibilityAnswer::succeeded(question_id, model, run, "answer text", true, position)
}

pub fn not_mentioned(question_id: &str, model: &str, run: u32) -> VisibilityAnswer {
    VisibilityAnswer::succeeded(question_id, model, run, "answer text", false, None)
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_app(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}
