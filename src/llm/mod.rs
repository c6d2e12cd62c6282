//! Text-completion collaborators.
//!
//! Every LLM interaction in a run (context synthesis, question generation,
//! answering a probe, brand detection) is a single prompt → text call through
//! [`CompletionClient`].

pub mod client;

pub use client::{LlmClient, LlmClientConfig, Provider};

use async_trait::async_trait;

/// Errors from a completion call.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Cannot connect to LLM provider at {0}")]
    Connect(String),

    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to send request: {0}")]
    Request(String),

    #[error("Failed to parse LLM response: {0}")]
    Decode(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("LLM client misconfigured: {0}")]
    Configuration(String),
}

/// A single prompt → completion call against a named model.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, LlmError>;
}
