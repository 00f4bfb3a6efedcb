//! Batch Autotester - concurrent API and UI test orchestration
//!
//! Submits batches of endpoints, runs a set of probes against each one on a
//! bounded worker pool and aggregates the outcomes into reports.
//!
//! ## Features
//!
//! - API probes: query parameters, headers, response time, error cases
//! - UI probes: links, forms, buttons, images
//! - Concurrent endpoint execution with a per-endpoint request budget
//! - HTTP API with status polling, export and retention pruning
//! - Reports as tables, JSON, Markdown and CSV sheets
//!
//! ## Usage
//!
//! ```bash
//! # Test two endpoints in-process
//! autotester run -u https://api.example.com/users -u https://api.example.com/orders -m GET
//!
//! # Test endpoints from a file and export CSV sheets
//! autotester run -f endpoints.yaml --export ./reports
//!
//! # Check a page's links, forms, buttons and images
//! autotester run --ui https://shop.example.com
//!
//! # Start the HTTP API and poll a submitted test
//! autotester serve --bind 0.0.0.0:5000
//! autotester run -f endpoints.yaml --server http://127.0.0.1:5000
//! autotester poll api-batch-20240501102030-ab12cd34 --report
//!
//! # Stored results
//! autotester results list
//! autotester results list --server http://127.0.0.1:5000
//! autotester results export api-batch-20240501102030-ab12cd34 -f markdown
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod cli;
mod config;
mod executor;
mod http;
mod models;
mod output;
mod poller;
mod probes;
mod results;
mod server;
mod utils;

use cli::Args;
use config::{default_config_path, print_env_help, AppConfig, ConfigFile, EnvConfig};
use executor::Orchestrator;
use models::{JobSnapshot, Submission, TestConfig};
use output::{OutputFormat, ResultFormatter};
use poller::{PollState, StatusPoller};
use probes::HttpProbeExecutor;
use results::{
    aggregate, summarize, FileJobStore, JobStore, MemoryJobStore, Report, ReportFormat,
    ReportGenerator,
};
use server::ApiClient;
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env = EnvConfig::load();
    let config_path = args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    let mut config = ConfigFile::load_or_default(config_path.as_deref())?;
    config.app.apply_env(&env);

    init_logger(LogLevel::resolve(&config.app.log_level, args.verbose));

    match args.command {
        cli::Command::Run(run_args) => {
            run_tests(run_args, config).await?;
        }
        cli::Command::Serve(serve_args) => {
            serve(serve_args, config).await?;
        }
        cli::Command::Poll(poll_args) => {
            poll_remote(poll_args, config).await?;
        }
        cli::Command::Results(results_args) => {
            manage_results(results_args, config).await?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args, config, &env)?;
        }
    }

    Ok(())
}

fn open_store(app: &AppConfig, memory: bool, dir: Option<PathBuf>) -> Result<Arc<dyn JobStore>> {
    if memory {
        return Ok(Arc::new(MemoryJobStore::new()));
    }

    let dir = dir.unwrap_or_else(|| app.store_dir());
    let store = FileJobStore::open(&dir)
        .with_context(|| format!("Failed to open job store at {}", dir.display()))?;
    Ok(Arc::new(store))
}

fn build_orchestrator(app: &AppConfig, store: Arc<dyn JobStore>) -> Result<Arc<Orchestrator>> {
    let executor =
        HttpProbeExecutor::new(app.probe_timeout_secs)?.with_settings(app.probe_settings());

    Ok(Arc::new(
        Orchestrator::new(store, Arc::new(executor)).with_max_concurrent(app.max_concurrent),
    ))
}

/// Formatter for `format`, without colors when stdout is not a terminal
fn formatter_for(format: &str) -> Result<ResultFormatter> {
    let format = OutputFormat::from_str(format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {format}"))?;
    let formatter = ResultFormatter::new(format);
    Ok(if std::io::stdout().is_terminal() {
        formatter
    } else {
        formatter.no_color()
    })
}

fn parse_report_format(format: &str) -> Result<ReportFormat> {
    ReportFormat::from_str(format).ok_or_else(|| anyhow::anyhow!("Unknown export format: {format}"))
}

/// Token cancelled on Ctrl-C
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });
    token
}

fn print_progress(formatter: &ResultFormatter, snapshot: &JobSnapshot) {
    print!("\r{}", formatter.format_progress(snapshot));
    let _ = std::io::stdout().flush();
}

async fn run_tests(args: cli::RunArgs, config: ConfigFile) -> Result<()> {
    let mut app = config.app;
    if let Some(n) = args.concurrent {
        app.max_concurrent = n;
    }
    if let Some(secs) = args.timeout {
        app.probe_timeout_secs = secs;
    }

    let formatter = formatter_for(&args.format)?;
    let export_format = match &args.export {
        Some(_) => Some(parse_report_format(&args.export_format)?),
        None => None,
    };

    let submission = build_submission(&args, &config.probes)?;
    let report = match &args.server {
        Some(server) => run_remote(server, submission, &app, &formatter).await?,
        None => run_local(&args, submission, &app, &formatter).await?,
    };
    println!("{}", formatter.format_report(&report));

    if let (Some(dir), Some(format)) = (&args.export, export_format) {
        let path = ReportGenerator::export(&report, format, dir, None)?;
        println!("Report exported to {}", path.display());
    }

    Ok(())
}

fn build_submission(args: &cli::RunArgs, defaults: &TestConfig) -> Result<Submission> {
    let submission = match &args.ui {
        Some(url) => {
            let submission = Submission::ui(url, args.test_config(defaults.clone())?);
            match &args.name {
                Some(name) => submission.with_name(name),
                None => submission,
            }
        }
        None => {
            let loaded = args.endpoints()?;
            let base = loaded.config.unwrap_or_else(|| defaults.clone());
            let submission = Submission::api(loaded.endpoints, args.test_config(base)?);
            match args.name.clone().or(loaded.name) {
                Some(name) => submission.with_name(name),
                None => submission,
            }
        }
    };
    Ok(submission)
}

/// Run in this process. A test still running when polling gives up is
/// cancelled so the report reflects what finished.
async fn run_local(
    args: &cli::RunArgs,
    submission: Submission,
    app: &AppConfig,
    formatter: &ResultFormatter,
) -> Result<Report> {
    let store = open_store(app, args.memory, args.store.clone())?;
    let orchestrator = build_orchestrator(app, store)?;

    let id = orchestrator.submit(submission).await?;
    println!("Submitted test {id}");

    let mut poller =
        StatusPoller::new(orchestrator.as_ref(), app.poll_config()).with_token(interrupt_token());
    let state = poller
        .poll_with(&id, |snapshot| print_progress(formatter, snapshot))
        .await;
    println!();

    if !matches!(state, PollState::Done(_)) && orchestrator.is_active(&id) {
        warn!("Test {} did not finish in time, cancelling", id);
        orchestrator.cancel(&id).await?;
        let snapshot = orchestrator.wait(&id).await?;
        info!("Test {} stopped: {}", id, snapshot);
    }

    Ok(orchestrator.report(&id).await?)
}

/// Submit to a server and poll it. Giving up cancels the remote test.
async fn run_remote(
    server: &str,
    submission: Submission,
    app: &AppConfig,
    formatter: &ResultFormatter,
) -> Result<Report> {
    let client = ApiClient::new(server, app.probe_timeout_secs)?;
    let reply = client
        .submit(submission)
        .await
        .with_context(|| format!("Failed to submit test to {server}"))?;
    println!("Submitted test {} ({})", reply.test_id, reply.message);

    let mut poller = StatusPoller::new(&client, app.poll_config()).with_token(interrupt_token());
    let state = poller
        .poll_with(&reply.test_id, |snapshot| print_progress(formatter, snapshot))
        .await;
    println!();

    if !matches!(state, PollState::Done(_)) {
        println!("{}", formatter.format_poll_outcome(&reply.test_id, &state));
        let snapshot = client.cancel(&reply.test_id).await?;
        info!("Cancel requested for {}: {}", reply.test_id, snapshot);
    }

    let detail = client.detail(&reply.test_id).await?;
    Ok(detail.report)
}

async fn serve(args: cli::ServeArgs, config: ConfigFile) -> Result<()> {
    let mut app = config.app;
    if let Some(bind) = args.bind {
        app.bind = bind;
    }
    if let Some(n) = args.concurrent {
        app.max_concurrent = n;
    }

    let store = open_store(&app, args.memory, args.store)?;
    let orchestrator = build_orchestrator(&app, store)?;

    info!(
        "Starting server (max {} concurrent endpoints per job)",
        app.max_concurrent
    );
    server::serve(orchestrator, &app.bind, app.retention()).await
}

async fn poll_remote(args: cli::PollArgs, config: ConfigFile) -> Result<()> {
    let app = config.app;
    let client = ApiClient::new(&args.server, app.probe_timeout_secs)?;
    let formatter = formatter_for("table")?;

    let mut poller = StatusPoller::new(&client, app.poll_config()).with_token(interrupt_token());
    let state = poller
        .poll_with(&args.id, |snapshot| print_progress(&formatter, snapshot))
        .await;
    println!();
    println!("{}", formatter.format_poll_outcome(&args.id, &state));

    if args.report && matches!(state, PollState::Done(_)) {
        let detail = client
            .detail(&args.id)
            .await
            .with_context(|| format!("Failed to fetch report for {}", args.id))?;
        println!("{}", formatter.format_report(&detail.report));
    }

    Ok(())
}

async fn manage_results(args: cli::ResultsArgs, config: ConfigFile) -> Result<()> {
    let app = config.app;
    if let Some(server) = &args.server {
        let client = ApiClient::new(server, app.probe_timeout_secs)?;
        return manage_remote_results(&client, args.action).await;
    }

    let store = open_store(&app, false, args.store)?;

    match args.action {
        cli::ResultsAction::List { format } => {
            let formatter = formatter_for(&format)?;
            let jobs = summarize(&store.list().await?);
            println!("{}", formatter.format_jobs(&jobs));
        }
        cli::ResultsAction::Show { id, format } => {
            let formatter = formatter_for(&format)?;
            let report = aggregate(&*store.get(&id).await?);
            println!("{}", formatter.format_report(&report));
        }
        cli::ResultsAction::Delete { id } => {
            store.delete(&id).await?;
            println!("Deleted {id}");
        }
        cli::ResultsAction::Export {
            id,
            format,
            output,
            name,
        } => {
            let format = parse_report_format(&format)?;
            let report = aggregate(&*store.get(&id).await?);
            let path = ReportGenerator::export(&report, format, &output, name.as_deref())?;
            println!("Report exported to {}", path.display());
        }
        cli::ResultsAction::Prune { older_than_hours } => {
            let hours = older_than_hours
                .or(app.retention_hours)
                .context("No retention configured; pass --older-than-hours")?;
            let cutoff = Utc::now() - chrono::Duration::hours(hours as i64);
            let removed = store.prune(cutoff).await?;
            println!("Pruned {} job(s) created before {}", removed.len(), cutoff.to_rfc3339());
        }
    }

    Ok(())
}

async fn manage_remote_results(client: &ApiClient, action: cli::ResultsAction) -> Result<()> {
    match action {
        cli::ResultsAction::List { format } => {
            let formatter = formatter_for(&format)?;
            println!("{}", formatter.format_jobs(&client.list().await?));
        }
        cli::ResultsAction::Show { id, format } => {
            let formatter = formatter_for(&format)?;
            let detail = client.detail(&id).await?;
            println!("{}", formatter.format_report(&detail.report));
        }
        cli::ResultsAction::Delete { id } => {
            client
                .delete(&id)
                .await
                .with_context(|| format!("Failed to delete {id}"))?;
            println!("Deleted {id}");
        }
        cli::ResultsAction::Export {
            id,
            format,
            output,
            name,
        } => {
            let format = parse_report_format(&format)?;
            let detail = client.detail(&id).await?;
            let path = ReportGenerator::export(&detail.report, format, &output, name.as_deref())?;
            println!("Report exported to {}", path.display());
        }
        cli::ResultsAction::Prune { .. } => {
            anyhow::bail!("Prune runs against a local store; servers prune on their own when retention_hours is set");
        }
    }

    Ok(())
}

fn manage_config(args: cli::ConfigArgs, config: ConfigFile, env: &EnvConfig) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { path, force } => {
            let path = path.unwrap_or_else(default_config_path);
            write_example_config(&path, force)?;
            println!("Configuration written to {}", path.display());
        }
        cli::ConfigAction::Show => {
            match ConfigFile::find() {
                Some(path) => println!("# Loaded from {}", path.display()),
                None => println!("# No config file found, showing defaults"),
            }
            let yaml = serde_yaml::to_string(&config).context("Failed to serialize config")?;
            println!("{yaml}");
            if env.has_any() {
                env.print_summary();
            }
        }
        cli::ConfigAction::Env => {
            print_env_help();
            println!();
            env.print_summary();
        }
    }

    Ok(())
}

fn write_example_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            path.display()
        );
    }
    ConfigFile::example().save(path)
}
