//! Client for a running `visiprobe serve` instance.
//!
//! Used by the client-driven orchestration: the CLI issues the workflow
//! steps over HTTP and polls `/status` itself.

use crate::models::{Question, RunContext, RunStatus, VisibilityAnswer};
use crate::poller::StatusSource;
use crate::probe::{ProbeRequest, ProbeRunner};
use crate::server::{
    ContextResponse, ErrorResponse, ProbeResponse, QuestionsResponse, ResultsResponse,
    StartRunResponse,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Server returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}

/// HTTP client for the run API.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| RemoteError::Http {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self {
            base_url,
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn decode<T: DeserializeOwned>(
        url: &str,
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<ErrorResponse>(&text) {
                Ok(body) => (body.code, body.error),
                Err(_) => ("UNKNOWN".to_string(), text),
            };
            return Err(RemoteError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        response.json().await.map_err(|source| RemoteError::Http {
            url: url.to_string(),
            source,
        })
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|source| RemoteError::Http {
                url: url.clone(),
                source,
            })?;
        Self::decode(&url, response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, run_id: &str) -> Result<T, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .get(&url)
            .query(&[("runId", run_id)])
            .send()
            .await
            .map_err(|source| RemoteError::Http {
                url: url.clone(),
                source,
            })?;
        Self::decode(&url, response).await
    }

    pub async fn create_context(&self, run_id: &str, brand: &str) -> Result<RunContext, RemoteError> {
        let body: ContextResponse = self
            .post("/context", &json!({"runId": run_id, "brand": brand}))
            .await?;
        Ok(body.context)
    }

    pub async fn generate_questions(&self, run_id: &str) -> Result<Vec<Question>, RemoteError> {
        let body: QuestionsResponse = self.post("/questions", &json!({"runId": run_id})).await?;
        Ok(body.questions)
    }

    pub async fn probe(&self, request: &ProbeRequest) -> Result<VisibilityAnswer, RemoteError> {
        let body: ProbeResponse = self.post("/probe", request).await?;
        Ok(body.answer)
    }

    pub async fn status(&self, run_id: &str) -> Result<RunStatus, RemoteError> {
        self.get("/status", run_id).await
    }

    pub async fn results(&self, run_id: &str) -> Result<ResultsResponse, RemoteError> {
        self.get("/results", run_id).await
    }

    /// Ask the server to run the whole flow on its side.
    pub async fn start_run(
        &self,
        brand: &str,
        run_id: Option<&str>,
    ) -> Result<StartRunResponse, RemoteError> {
        self.post("/runs", &json!({"brand": brand, "runId": run_id}))
            .await
    }
}

/// A probe that could not be delivered is only known locally; the server
/// never records it, so the run will not reach completion on its own.
#[async_trait]
impl ProbeRunner for ApiClient {
    async fn run_probe(&self, request: ProbeRequest) -> VisibilityAnswer {
        match self.probe(&request).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(
                    "Probe {} / {} run {} not delivered: {}",
                    request.question_id, request.model, request.run, e
                );
                VisibilityAnswer::failed(request.question_id, request.model, request.run, e.to_string())
            }
        }
    }
}

#[async_trait]
impl StatusSource for ApiClient {
    async fn fetch_status(&self, run_id: &str) -> anyhow::Result<RunStatus> {
        Ok(self.status(run_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::models::{ModelSpec, RunStage};
    use crate::server::{router, AppState};
    use crate::store::RunStore;
    use crate::testing::{spawn_app, FnClient};
    use crate::workflow::{Workflow, WorkflowSettings};
    use std::sync::Arc;

    fn fake_llm(model: &str, _prompt: &str) -> Result<String, LlmError> {
        match model {
            "ctx-model" => Ok("Acme makes anvils.".to_string()),
            "q-model" => Ok(r#"[{"id": "Q1", "question": "Best anvils?"}]"#.to_string()),
            "detector" => Ok(r#"{"isVisible": false, "position": null}"#.to_string()),
            _ => Ok("Try Foo.".to_string()),
        }
    }

    async fn client() -> ApiClient {
        let settings = WorkflowSettings {
            context_model: "ctx-model".to_string(),
            question_model: "q-model".to_string(),
            detection_model: "detector".to_string(),
            question_count: 1,
            max_question_attempts: 1,
            repetitions: 2,
            models: vec![ModelSpec::new("a/one", "One")],
        };
        let workflow = Workflow::new(RunStore::in_memory(), Arc::new(FnClient(fake_llm)), settings);
        let base = spawn_app(router(AppState::new(workflow))).await;
        ApiClient::new(base, Duration::from_secs(10)).unwrap()
    }

    #[tokio::test]
    async fn test_client_driven_flow() {
        let api = client().await;

        let context = api.create_context("r1", "Acme").await.unwrap();
        assert_eq!(context.brand, "Acme");
        assert_eq!(context.context, "Acme makes anvils.");
        let questions = api.generate_questions("r1").await.unwrap();
        assert_eq!(questions.len(), 1);

        for run in 1..=2 {
            let answer = api
                .run_probe(ProbeRequest {
                    run_id: "r1".to_string(),
                    question_id: "Q1".to_string(),
                    question: questions[0].question.clone(),
                    model: "a/one".to_string(),
                    run,
                    brand: "Acme".to_string(),
                })
                .await;
            assert!(!answer.failed);
            assert!(!answer.mentioned);
        }

        let status = api.fetch_status("r1").await.unwrap();
        assert_eq!(status.status, RunStage::Complete);
        assert_eq!(status.completed_answers, 2);

        let results = api.results("r1").await.unwrap();
        assert_eq!(results.results[0].runs, "0/2");
    }

    #[tokio::test]
    async fn test_api_errors_carry_code() {
        let api = client().await;
        match api.generate_questions("missing").await {
            Err(RemoteError::Api { status, code, .. }) => {
                assert_eq!(status, 404);
                assert_eq!(code, "NOT_FOUND");
            }
            other => panic!("unexpected: {:?}", other.map(|q| q.len())),
        }
    }

    #[tokio::test]
    async fn test_undeliverable_probe_is_a_local_failure() {
        let api = ApiClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let answer = api
            .run_probe(ProbeRequest {
                run_id: "r1".to_string(),
                question_id: "Q1".to_string(),
                question: "q".to_string(),
                model: "m".to_string(),
                run: 1,
                brand: "Acme".to_string(),
            })
            .await;
        assert!(answer.failed);
        assert!(api.status("r1").await.is_err());
    }

    #[tokio::test]
    async fn test_start_run() {
        let api = client().await;
        let started = api.start_run("Acme", Some("my-run")).await.unwrap();
        assert_eq!(started.run_id, "my-run");
        assert_eq!(started.brand, "Acme");
    }
}
