//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.visiprobe.toml` files.

use crate::cli::{Args, Command};
use crate::llm::{LlmClientConfig, Provider};
use crate::models::ModelSpec;
use crate::poller::PollingConfig;
use crate::store::{RunStore, UpstashKv};
use crate::workflow::WorkflowSettings;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default config file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = ".visiprobe.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Completion provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Run store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Probe batch shape.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Status polling settings.
    #[serde(default)]
    pub polling: PollingSettings,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Models every question is asked of.
    #[serde(default = "default_models")]
    pub models: Vec<ModelSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            llm: LlmConfig::default(),
            store: StoreConfig::default(),
            probe: ProbeConfig::default(),
            polling: PollingSettings::default(),
            server: ServerConfig::default(),
            models: default_models(),
        }
    }
}

fn default_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new("openai/gpt-4o-mini", "GPT-4o mini"),
        ModelSpec::new("anthropic/claude-3-5-haiku", "Claude 3.5 Haiku"),
        ModelSpec::new("google/gemini-2.0-flash", "Gemini 2.0 Flash"),
    ]
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// Completion provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: Provider,

    /// Gateway or Ollama base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_helper_model")]
    pub context_model: String,

    #[serde(default = "default_helper_model")]
    pub question_model: String,

    /// Model that classifies answers for brand mentions.
    #[serde(default = "default_helper_model")]
    pub detection_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout_seconds: default_llm_timeout(),
            context_model: default_helper_model(),
            question_model: default_helper_model(),
            detection_model: default_helper_model(),
        }
    }
}

fn default_base_url() -> String {
    "https://ai-gateway.vercel.sh/v1".to_string()
}

fn default_api_key_env() -> String {
    "AI_GATEWAY_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_helper_model() -> String {
    "openai/gpt-4o-mini".to_string()
}

/// Key-value backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map; runs vanish on exit.
    #[default]
    Memory,
    /// Upstash Redis REST API.
    Upstash,
}

/// Run store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// REST URL; falls back to `UPSTASH_REDIS_REST_URL`, then `KV_REST_API_URL`.
    #[serde(default)]
    pub url: Option<String>,

    /// REST token; falls back to `UPSTASH_REDIS_REST_TOKEN`, then `KV_REST_API_TOKEN`.
    #[serde(default)]
    pub token: Option<String>,
}

fn first_set(explicit: &Option<String>, vars: &[&str]) -> Option<String> {
    explicit
        .clone()
        .filter(|v| !v.is_empty())
        .or_else(|| {
            vars.iter()
                .filter_map(|var| std::env::var(var).ok())
                .find(|v| !v.is_empty())
        })
}

impl StoreConfig {
    pub fn resolve_url(&self) -> Option<String> {
        first_set(&self.url, &["UPSTASH_REDIS_REST_URL", "KV_REST_API_URL"])
    }

    pub fn resolve_token(&self) -> Option<String> {
        first_set(&self.token, &["UPSTASH_REDIS_REST_TOKEN", "KV_REST_API_TOKEN"])
    }

    /// Open the configured backend.
    pub fn build(&self) -> Result<RunStore> {
        match self.backend {
            StoreBackend::Memory => Ok(RunStore::in_memory()),
            StoreBackend::Upstash => {
                let url = self
                    .resolve_url()
                    .context("Upstash store selected but no REST URL configured")?;
                let token = self
                    .resolve_token()
                    .context("Upstash store selected but no REST token configured")?;
                let kv = UpstashKv::new(url, token).context("Failed to create Upstash client")?;
                Ok(RunStore::new(Arc::new(kv)))
            }
        }
    }
}

/// Probe batch shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Questions generated per run.
    #[serde(default = "default_question_count")]
    pub question_count: usize,

    /// Times each question is asked of each model.
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,

    /// Question generations tried while the brand keeps leaking into them.
    #[serde(default = "default_max_question_attempts")]
    pub max_question_attempts: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            question_count: default_question_count(),
            repetitions: default_repetitions(),
            max_question_attempts: default_max_question_attempts(),
        }
    }
}

fn default_question_count() -> usize {
    3
}

fn default_repetitions() -> u32 {
    3
}

fn default_max_question_attempts() -> u32 {
    3
}

/// Status polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_poll_timeout")]
    pub timeout_seconds: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_seconds: default_poll_timeout(),
        }
    }
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_poll_timeout() -> u64 {
    300
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when given explicitly.
    pub fn merge_with_args(&mut self, args: &Args) {
        if args.verbose {
            self.general.verbose = true;
        }
        if let Some(provider) = args.provider {
            self.llm.provider = provider;
        }
        if let Some(ref url) = args.llm_url {
            self.llm.base_url = url.clone();
        }

        match args.command {
            Command::Serve(ref serve) => {
                if let Some(ref bind) = serve.bind {
                    self.server.bind = bind.clone();
                }
                if let Some(backend) = serve.store {
                    self.store.backend = backend;
                }
            }
            Command::Run(ref run) => {
                if let Some(repetitions) = run.repetitions {
                    self.probe.repetitions = repetitions;
                }
                if let Some(timeout) = run.timeout {
                    self.polling.timeout_seconds = timeout;
                }
            }
            Command::Status(_) | Command::InitConfig => {}
        }
    }

    /// Reject settings that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            bail!("At least one model must be configured under [[models]]");
        }
        if let Some(model) = self.models.iter().find(|m| m.id.trim().is_empty()) {
            bail!("Model \"{}\" has an empty id", model.name);
        }
        if self.probe.question_count == 0 {
            bail!("probe.question_count must be at least 1");
        }
        if self.probe.repetitions == 0 {
            bail!("probe.repetitions must be at least 1");
        }
        if self.polling.interval_ms == 0 {
            bail!("polling.interval_ms must be at least 1");
        }
        if self.polling.timeout_seconds == 0 {
            bail!("polling.timeout_seconds must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be between 0.0 and 2.0");
        }
        Ok(())
    }

    /// Expected answer records per run.
    pub fn total_answers(&self) -> usize {
        self.probe.question_count * self.models.len() * self.probe.repetitions as usize
    }

    pub fn polling_config(&self) -> PollingConfig {
        PollingConfig {
            interval: Duration::from_millis(self.polling.interval_ms),
            timeout: Duration::from_secs(self.polling.timeout_seconds),
        }
    }

    /// Client settings, with the API key read from `llm.api_key_env`.
    pub fn llm_client_config(&self) -> LlmClientConfig {
        LlmClientConfig {
            provider: self.llm.provider,
            base_url: self.llm.base_url.clone(),
            api_key: std::env::var(&self.llm.api_key_env)
                .ok()
                .filter(|k| !k.is_empty()),
            temperature: self.llm.temperature,
            timeout_seconds: self.llm.timeout_seconds,
        }
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            context_model: self.llm.context_model.clone(),
            question_model: self.llm.question_model.clone(),
            detection_model: self.llm.detection_model.clone(),
            question_count: self.probe.question_count,
            max_question_attempts: self.probe.max_question_attempts,
            repetitions: self.probe.repetitions,
            models: self.models.clone(),
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
