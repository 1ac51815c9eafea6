use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use assay_runtime::{
    verify_artifacts, AbortSignal, PipelineInputs, PipelineOrchestrator, RunOutcome, RuntimeConfig,
};

#[derive(Debug, Parser)]
#[command(name = "assay")]
#[command(about = "Deterministic questionnaire evaluation with an auditable evidence trail")]
#[command(version)]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate a document against a questionnaire
    Run {
        #[arg(long)]
        document: PathBuf,
        #[arg(long)]
        questionnaire: PathBuf,
        #[arg(long)]
        artifacts_dir: PathBuf,
        /// YAML runtime configuration
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Re-check the manifest, ledger and report of a finished run
    Verify {
        #[arg(long)]
        artifacts_dir: PathBuf,
    },
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Command::Run {
            document,
            questionnaire,
            artifacts_dir,
            config,
            workers,
        } => run(document, questionnaire, artifacts_dir, config, workers).await,
        Command::Verify { artifacts_dir } => verify(artifacts_dir),
    }
}

async fn run(
    document: PathBuf,
    questionnaire: PathBuf,
    artifacts_dir: PathBuf,
    config: Option<PathBuf>,
    workers: Option<usize>,
) -> Result<ExitCode> {
    let mut config = match config {
        Some(path) => RuntimeConfig::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }

    let abort = AbortSignal::new();
    let orchestrator = PipelineOrchestrator::builder()
        .config(config)
        .artifacts_dir(&artifacts_dir)
        .abort_signal(abort.clone())
        .build()?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort("interrupted");
        }
    });

    let inputs = PipelineInputs::from_paths(&questionnaire, &document)
        .context("reading inputs")?;
    let outcome = orchestrator.run(inputs).await;

    println!("manifest: {}", outcome.manifest_path().display());
    match outcome {
        RunOutcome::Completed { report, .. } => {
            println!("macro hash: {}", report.macro_hash);
            println!("ledger chain hash: {}", report.ledger_chain_hash);
            if !report.degraded_tasks.is_empty() {
                println!("degraded tasks: {}", report.degraded_tasks.len());
            }
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Aborted { phase, error, .. } => {
            eprintln!("aborted in {phase}: [{}] {error}", error.kind().as_str());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn verify(artifacts_dir: PathBuf) -> Result<ExitCode> {
    match verify_artifacts(&artifacts_dir) {
        Ok(verification) => {
            info!(
                records = verification.ledger_records,
                phases = verification.manifest.entries.len(),
                "verification passed"
            );
            println!(
                "ok: {:?}, {} phases, {} ledger records",
                verification.manifest.status,
                verification.manifest.entries.len(),
                verification.ledger_records
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            warn!(error = %err, "verification failed");
            eprintln!("verification failed: [{}] {err}", err.kind().as_str());
            Ok(ExitCode::FAILURE)
        }
    }
}
