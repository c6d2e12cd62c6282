//! HTTP completion client for Ollama and OpenAI-compatible gateways.

use super::{CompletionClient, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Wire protocol spoken by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// `POST {base}/chat/completions` (AI gateways, OpenAI, OpenRouter, ...).
    #[default]
    Openai,
    /// `POST {base}/api/chat` on a local Ollama.
    Ollama,
}

/// Configuration for the completion client.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub provider: Provider,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Openai,
            base_url: "https://ai-gateway.vercel.sh/v1".to_string(),
            api_key: None,
            temperature: 0.7,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

/// OpenAI-style chat completion request.
#[derive(Debug, Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

/// Completion client talking to one provider endpoint.
pub struct LlmClient {
    config: LlmClientConfig,
    http_client: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmClientConfig) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match self.config.provider {
            Provider::Openai => format!("{}/chat/completions", base),
            Provider::Ollama => format!("{}/api/chat", base),
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.config.timeout_seconds)
        } else if e.is_connect() {
            LlmError::Connect(self.config.base_url.clone())
        } else {
            LlmError::Request(e.to_string())
        }
    }

    async fn post_json<B: Serialize>(&self, body: &B) -> Result<reqwest::Response, LlmError> {
        let mut request = self.http_client.post(self.endpoint()).json(body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for LlmClient {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        debug!("Completion request to {} ({} chars)", model, prompt.len());

        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];

        let content = match self.config.provider {
            Provider::Ollama => {
                let request = OllamaChatRequest {
                    model,
                    messages,
                    stream: false,
                    options: OllamaOptions {
                        temperature: self.config.temperature,
                    },
                };
                let response: OllamaChatResponse = self
                    .post_json(&request)
                    .await?
                    .json()
                    .await
                    .map_err(|e| LlmError::Decode(e.to_string()))?;
                response.message.content
            }
            Provider::Openai => {
                let request = OpenAiChatRequest {
                    model,
                    messages,
                    temperature: self.config.temperature,
                };
                let response: OpenAiChatResponse = self
                    .post_json(&request)
                    .await?
                    .json()
                    .await
                    .map_err(|e| LlmError::Decode(e.to_string()))?;
                response
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .ok_or(LlmError::EmptyResponse)?
            }
        };

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(content)
    }
}
