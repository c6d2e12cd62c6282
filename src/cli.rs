//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::StoreBackend;
use crate::llm::Provider;
use crate::workflow::questions::id_is_usable;
use crate::workflow::DispatchMode;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// visiprobe - how visible is your brand in LLM answers?
///
/// Generates discovery questions for a brand, asks them of several models
/// a few times each and reports how often (and how high) the brand shows up.
///
/// Examples:
///   visiprobe serve --bind 0.0.0.0:3000
///   visiprobe run --brand "Acme Anvils"
///   visiprobe run --brand "Acme Anvils" --remote http://localhost:3000
///   visiprobe status --run-id run_1718000000000_1a2b3c4d --remote http://localhost:3000
///   visiprobe init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .visiprobe.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Completion provider wire protocol
    #[arg(long, value_name = "PROVIDER", global = true, env = "VISIPROBE_PROVIDER")]
    pub provider: Option<Provider>,

    /// Completion provider base URL
    #[arg(long, value_name = "URL", global = true, env = "VISIPROBE_LLM_URL")]
    pub llm_url: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the HTTP API
    Serve(ServeArgs),

    /// Run a full visibility check for a brand
    Run(RunArgs),

    /// Show the current status of a run
    Status(StatusArgs),

    /// Generate a default .visiprobe.toml configuration file
    InitConfig,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, value_name = "ADDR", env = "VISIPROBE_BIND")]
    pub bind: Option<String>,

    /// Store backend
    #[arg(long, value_name = "BACKEND")]
    pub store: Option<StoreBackend>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    /// Brand or product to check
    #[arg(short, long)]
    pub brand: String,

    /// Run id to use instead of a generated one
    #[arg(long, value_name = "ID")]
    pub run_id: Option<String>,

    /// Drive the run against a `visiprobe serve` instance
    #[arg(long, value_name = "URL", env = "VISIPROBE_REMOTE")]
    pub remote: Option<String>,

    /// Let the remote server run the whole flow (POST /runs)
    #[arg(long, requires = "remote")]
    pub server_side: bool,

    /// How probes are issued. Defaults to await-all locally and detached remotely
    #[arg(long, value_name = "MODE")]
    pub mode: Option<DispatchMode>,

    /// Times each question is asked of each model
    #[arg(long, value_name = "COUNT")]
    pub repetitions: Option<u32>,

    /// Give up polling after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StatusArgs {
    /// Run to inspect
    #[arg(long, value_name = "ID")]
    pub run_id: String,

    /// Query a `visiprobe serve` instance instead of the configured store
    #[arg(long, value_name = "URL", env = "VISIPROBE_REMOTE")]
    pub remote: Option<String>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl RunArgs {
    /// Dispatch mode after applying the local/remote default.
    pub fn effective_mode(&self) -> DispatchMode {
        self.mode.unwrap_or(if self.remote.is_some() {
            DispatchMode::Detached
        } else {
            DispatchMode::AwaitAll
        })
    }
}

fn validate_url(url: &str, what: &str) -> Result<(), String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(format!("{} must start with 'http://' or 'https://'", what));
    }
    Ok(())
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.llm_url {
            validate_url(url, "LLM URL")?;
        }

        match self.command {
            Command::Run(ref run) => {
                if run.brand.trim().is_empty() {
                    return Err("Brand must not be empty".to_string());
                }
                if let Some(ref remote) = run.remote {
                    validate_url(remote, "Remote URL")?;
                }
                if run.repetitions == Some(0) {
                    return Err("Repetitions must be at least 1".to_string());
                }
                if run.timeout == Some(0) {
                    return Err("Timeout must be at least 1 second".to_string());
                }
                if let Some(ref id) = run.run_id {
                    if !id_is_usable(id) {
                        return Err(
                            "Run id must be non-empty and must not contain ':' or whitespace"
                                .to_string(),
                        );
                    }
                }
            }
            Command::Status(ref status) => {
                if let Some(ref remote) = status.remote {
                    validate_url(remote, "Remote URL")?;
                }
            }
            Command::Serve(_) | Command::InitConfig => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings. `--quiet` wins over
    /// a config file that asks for verbose output.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
