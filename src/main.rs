//! visiprobe - brand visibility probing across LLMs
//!
//! A service and CLI that asks several models natural discovery questions
//! about a brand's market and measures how often, and how high, the brand
//! is mentioned in their answers.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error, or polling timed out before the run completed

mod analysis;
mod cli;
mod config;
mod llm;
mod models;
mod poller;
mod probe;
mod remote;
mod report;
mod server;
mod store;
#[cfg(test)]
mod testing;
mod workflow;

use analysis::StatusReader;
use anyhow::{anyhow, bail, Context, Result};
use cli::{Args, Command, OutputFormat, RunArgs, StatusArgs};
use config::{Config, StoreBackend, DEFAULT_CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use llm::{LlmClient, Provider};
use models::{new_run_id, ModelSpec, RunReport, RunStatus};
use poller::{PollEvent, PollingController, StatusSource};
use probe::{Dispatcher, ProbePlan};
use remote::ApiClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use workflow::{DispatchMode, Workflow};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    // The config file can raise the log level, so read it before logging starts
    let loaded = load_config(&args);
    let config_verbose = loaded
        .as_ref()
        .map(|(config, _)| config.general.verbose)
        .unwrap_or(false);

    // Initialize logging
    init_logging(args.log_level(config_verbose));

    info!("visiprobe v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    let result = match loaded {
        Ok((config, origin)) => {
            origin.log();
            run_command(args, config).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .visiprobe.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize models, repetitions, polling and the store.");
    Ok(())
}

/// Initialize logging. `RUST_LOG` overrides the level from --verbose/--quiet.
fn init_logging(level: tracing::Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Where the configuration came from, logged once logging is up.
enum ConfigOrigin {
    Explicit(PathBuf),
    DefaultFile,
    Builtin,
    Unreadable(String),
}

impl ConfigOrigin {
    fn log(&self) {
        match self {
            ConfigOrigin::Explicit(path) => info!("Loaded config from: {}", path.display()),
            ConfigOrigin::DefaultFile => info!("Loaded default config from {}", DEFAULT_CONFIG_FILE),
            ConfigOrigin::Builtin => debug!("No config file found, using defaults"),
            ConfigOrigin::Unreadable(e) => warn!("Failed to load config: {}", e),
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::Explicit(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigOrigin::DefaultFile)),
        Ok(None) => Ok((Config::default(), ConfigOrigin::Builtin)),
        Err(e) => Ok((Config::default(), ConfigOrigin::Unreadable(e.to_string()))),
    }
}

async fn run_command(args: Args, mut config: Config) -> Result<i32> {
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    let show_progress = !args.quiet;
    match args.command {
        Command::Serve(_) => serve(&config).await,
        Command::Run(ref run) => match run.remote {
            Some(ref url) => run_remote(&config, run, url, show_progress).await,
            None => run_local(&config, run, show_progress).await,
        },
        Command::Status(ref status) => show_status(&config, status).await,
        Command::InitConfig => handle_init_config().map(|_| 0),
    }
}

fn build_workflow(config: &Config) -> Result<Workflow> {
    let llm_config = config.llm_client_config();
    if llm_config.api_key.is_none() && config.llm.provider == Provider::Openai {
        warn!(
            "{} is not set; gateway calls will likely be rejected",
            config.llm.api_key_env
        );
    }

    let client = LlmClient::new(llm_config).context("Failed to create LLM client")?;
    let store = config.store.build()?;
    Ok(Workflow::new(store, Arc::new(client), config.workflow_settings()))
}

async fn serve(config: &Config) -> Result<i32> {
    let workflow = build_workflow(config)?;

    println!("🚀 Starting visiprobe server");
    println!("   Provider: {:?} at {}", config.llm.provider, config.llm.base_url);
    println!("   Store: {:?}", config.store.backend);
    println!(
        "   Batch: {} questions × {} models × {} runs = {} probes",
        config.probe.question_count,
        config.models.len(),
        config.probe.repetitions,
        config.total_answers()
    );

    server::serve(server::AppState::new(workflow), &config.server.bind).await?;
    Ok(0)
}

/// Full flow in this process, watched through the local store.
async fn run_local(config: &Config, args: &RunArgs, show_progress: bool) -> Result<i32> {
    let run_id = args.run_id.clone().unwrap_or_else(new_run_id);
    let mode = args.effective_mode();
    let workflow = Arc::new(build_workflow(config)?);
    let reader = StatusReader::new(workflow.store().clone(), config.total_answers());

    println!("🔎 Checking visibility of \"{}\"", args.brand);
    println!("   Run: {}", run_id);
    println!("   Models: {}", model_names(&config.models));
    println!("   Mode: {:?}\n", mode);

    let flow = {
        let workflow = Arc::clone(&workflow);
        let (run_id, brand) = (run_id.clone(), args.brand.clone());
        tokio::spawn(async move {
            workflow.run_full(&run_id, &brand, mode).await?;
            Ok::<_, anyhow::Error>(())
        })
    };

    let watched = watch(Arc::new(reader), config, &run_id, Some(flow), show_progress).await?;
    finish_run(config, args, watched)
}

/// Drive a run against a remote server, either step by step from here or
/// entirely on the server (`--server-side`).
async fn run_remote(config: &Config, args: &RunArgs, url: &str, show_progress: bool) -> Result<i32> {
    let api = ApiClient::new(url, Duration::from_secs(config.llm.timeout_seconds * 3))?;

    println!("🔎 Checking visibility of \"{}\" via {}", args.brand, api.base_url());

    let (run_id, flow) = if args.server_side {
        let started = api
            .start_run(&args.brand, args.run_id.as_deref())
            .await
            .context("Failed to start remote run")?;
        println!("   {}", started.message);
        (started.run_id, None)
    } else {
        let run_id = args.run_id.clone().unwrap_or_else(new_run_id);
        let plan = ProbePlan {
            run_id: run_id.clone(),
            brand: args.brand.clone(),
            questions: Vec::new(),
            models: config.models.clone(),
            repetitions: config.probe.repetitions,
        };
        let flow = tokio::spawn(drive_remote(api.clone(), plan, args.effective_mode()));
        (run_id, Some(flow))
    };
    println!("   Run: {}\n", run_id);

    let watched = watch(Arc::new(api), config, &run_id, flow, show_progress).await?;
    finish_run(config, args, watched)
}

/// Client-driven flow: context and questions over HTTP, then one `/probe`
/// request per (question, model, repetition).
async fn drive_remote(api: ApiClient, mut plan: ProbePlan, mode: DispatchMode) -> Result<()> {
    api.create_context(&plan.run_id, &plan.brand)
        .await
        .context("Context step failed")?;
    plan.questions = api
        .generate_questions(&plan.run_id)
        .await
        .context("Question step failed")?;
    info!("Got {} questions for run {}", plan.questions.len(), plan.run_id);

    let dispatcher = Dispatcher::new(Arc::new(api));
    match mode {
        DispatchMode::Detached => {
            dispatcher.dispatch_detached(&plan);
        }
        DispatchMode::AwaitAll => {
            let records = dispatcher.dispatch_all(&plan).await;
            let failed = records.iter().filter(|r| r.failed).count();
            if failed > 0 {
                warn!("{} of {} probes failed", failed, records.len());
            }
        }
    }
    Ok(())
}

/// Outcome of watching a run.
struct Watched {
    run_id: String,
    last: Option<RunStatus>,
    timed_out: bool,
    duration_seconds: f64,
}

fn progress_bar(total: usize, show: bool) -> Result<ProgressBar> {
    if !show {
        return Ok(ProgressBar::hidden());
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

async fn join_flow(flow: &mut Option<JoinHandle<Result<()>>>) -> Result<()> {
    match flow.as_mut() {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("Run task failed: {}", e)),
        },
        None => std::future::pending().await,
    }
}

/// Poll the run until it completes or times out, while the flow that
/// produces it (if any) runs alongside.
async fn watch(
    source: Arc<dyn StatusSource>,
    config: &Config,
    run_id: &str,
    mut flow: Option<JoinHandle<Result<()>>>,
    show_progress: bool,
) -> Result<Watched> {
    let started = Instant::now();
    let controller = PollingController::new(source, config.polling_config());
    let mut events = controller.start(run_id);
    let progress = progress_bar(config.total_answers(), show_progress)?;
    let mut last: Option<RunStatus> = None;
    let mut timed_out = false;

    loop {
        tokio::select! {
            result = join_flow(&mut flow), if flow.is_some() => {
                flow = None;
                if let Err(e) = result {
                    controller.stop();
                    progress.abandon_with_message("failed");
                    return Err(e.context(format!("Run {} failed", run_id)));
                }
                debug!("Run {} flow finished", run_id);
            }
            event = events.recv() => match event {
                Some(PollEvent::Status(status)) => {
                    progress.set_length(status.total_answers as u64);
                    progress.set_position(status.completed_answers as u64);
                    progress.set_message(format!("{}: {}", status.status, status.status.describe()));
                    last = Some(status);
                }
                Some(PollEvent::ReadError(e)) => {
                    let elapsed = controller.elapsed().unwrap_or_default();
                    progress.println(format!("⚠️  Status read failed after {:.0?}: {}", elapsed, e));
                }
                Some(PollEvent::Completed) => {
                    progress.finish_with_message("complete");
                    break;
                }
                Some(PollEvent::Aborted) => {
                    progress.abandon_with_message("failed");
                    bail!("Run {} was reported as failed", run_id);
                }
                Some(PollEvent::TimedOut { elapsed, last: snapshot }) => {
                    progress.abandon_with_message("timed out");
                    warn!("Gave up on run {} after {:.0?}", run_id, elapsed);
                    if snapshot.is_some() {
                        last = snapshot;
                    }
                    timed_out = true;
                    break;
                }
                None => break,
            },
        }
    }

    if !controller.state().is_terminal() {
        controller.stop();
    }
    debug!(
        "Polling of run {} ended as {:?} after {} reads",
        run_id,
        controller.state(),
        controller.reads_issued()
    );

    if let Some(handle) = flow {
        if timed_out {
            handle.abort();
        } else {
            match handle.await {
                Ok(result) => result.with_context(|| format!("Run {} failed", run_id))?,
                Err(e) => bail!("Run task failed: {}", e),
            }
        }
    }

    Ok(Watched {
        run_id: run_id.to_string(),
        last,
        timed_out,
        duration_seconds: started.elapsed().as_secs_f64(),
    })
}

fn model_names(models: &[ModelSpec]) -> String {
    models
        .iter()
        .map(|m| m.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render(report: &RunReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => report::generate_json_report(report),
        OutputFormat::Markdown => Ok(report::generate_markdown_report(report)),
    }
}

/// Write the report and print the summary. Returns the exit code.
fn finish_run(config: &Config, args: &RunArgs, watched: Watched) -> Result<i32> {
    let status = watched
        .last
        .with_context(|| format!("No status was read for run {}", watched.run_id))?;

    let report = report::build_report(
        &status,
        &config.models,
        watched.duration_seconds,
        watched.timed_out,
    );
    let output = render(&report, args.format)?;

    match args.output {
        Some(ref path) => {
            std::fs::write(path, &output)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;

            let summary = &report.summary;
            println!("\n📊 Visibility Summary:");
            println!(
                "   Answers: {}/{}",
                status.completed_answers, status.total_answers
            );
            println!(
                "   Mentioned: {} of {} successful ({} failed)",
                summary.mentioned, summary.succeeded, summary.failed
            );
            if let Some(rate) = summary.visibility_rate {
                println!("   Visibility: {:.0}%", rate * 100.0);
            }
            println!("   Duration: {:.1}s", watched.duration_seconds);
            println!("\n✅ Report saved to: {}", path.display());
        }
        None => println!("{}", output),
    }

    if watched.timed_out {
        eprintln!(
            "\n⏱️  Timed out waiting for run {} ({}/{} answers). Stored results are untouched; check later with `visiprobe status --run-id {}`.",
            watched.run_id, status.completed_answers, status.total_answers, watched.run_id
        );
        return Ok(1);
    }

    Ok(0)
}

async fn show_status(config: &Config, args: &StatusArgs) -> Result<i32> {
    let status = match args.remote {
        Some(ref url) => ApiClient::new(url, Duration::from_secs(30))?
            .status(&args.run_id)
            .await
            .context("Failed to fetch remote status")?,
        None => {
            if config.store.backend == StoreBackend::Memory {
                warn!("The memory store only lives inside a running process; use --remote or an upstash store");
            }
            StatusReader::new(config.store.build()?, config.total_answers())
                .read_status(&args.run_id)
                .await
                .context("Failed to read run status")?
        }
    };

    info!(
        "Run {}: {} ({}/{})",
        status.run_id, status.status, status.completed_answers, status.total_answers
    );

    let report = report::build_report(&status, &config.models, 0.0, false);
    println!("{}", render(&report, args.format)?);
    Ok(0)
}
