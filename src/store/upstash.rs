//! Upstash (Redis over REST) key-value store.
//!
//! Each operation is a single Redis command posted as a JSON array to the
//! REST endpoint, e.g. `["GET", "run:context"]`, answered with
//! `{"result": ...}` or `{"error": "..."}`.

use super::{KvStore, StoreError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Key-value store backed by the Upstash REST API.
pub struct UpstashKv {
    http_client: reqwest::Client,
    url: String,
    token: String,
}

impl UpstashKv {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self, StoreError> {
        let url = url.into();
        if url.is_empty() {
            return Err(StoreError::Configuration(
                "Upstash REST URL is empty".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            url: url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn command(&self, args: Vec<&str>) -> Result<Value, StoreError> {
        debug!("Upstash command {}", args.first().copied().unwrap_or_default());

        let response = self
            .http_client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await?;

        let status = response.status();
        let body: CommandResponse = response.json().await.map_err(|e| {
            StoreError::Backend(format!("Unreadable Upstash response ({}): {}", status, e))
        })?;

        if let Some(error) = body.error {
            return Err(StoreError::Backend(error));
        }
        if !status.is_success() {
            return Err(StoreError::Backend(format!("Upstash returned {}", status)));
        }

        Ok(body.result)
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl KvStore for UpstashKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let result = self.command(vec!["GET", key]).await?;
        Ok(value_to_string(result))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.command(vec!["SET", key, value]).await?;
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        match self.command(vec!["KEYS", pattern]).await? {
            Value::Array(items) => Ok(items.into_iter().filter_map(value_to_string).collect()),
            Value::Null => Ok(Vec::new()),
            other => Err(StoreError::Backend(format!(
                "KEYS returned a non-array result: {}",
                other
            ))),
        }
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["MGET"];
        args.extend(keys.iter().map(String::as_str));

        match self.command(args).await? {
            Value::Array(items) if items.len() == keys.len() => {
                Ok(items.into_iter().map(value_to_string).collect())
            }
            other => Err(StoreError::Backend(format!(
                "MGET returned an unexpected result: {}",
                other
            ))),
        }
    }
}
