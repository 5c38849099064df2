//! voxjudge - validate voice-agent test turns with an LLM consensus pipeline
//!
//! ## Commands
//!
//! - `validate`: run one turn through the pipeline and print the decision
//! - `batch`: run a file of turns with bounded concurrency
//! - `check-config`: validate a pipeline configuration and its credentials
//!
//! Decisions are printed to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use voxjudge_core::{ConsensusDecision, EvaluationRequest, FinalVerdict, InvalidInputError};
use voxjudge_runtime::{PipelineConfig, PipelineOrchestrator, ProviderRegistry};

/// Exit code for invalid input or configuration.
const EXIT_INVALID: u8 = 3;

#[derive(Parser)]
#[command(name = "voxjudge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LLM consensus validation for voice-agent test turns", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one turn
    ///
    /// Exit code: 0 PASS, 1 FAIL, 2 HUMAN_REVIEW, 3 invalid input or config.
    Validate {
        /// Pipeline configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Turn to validate (YAML or JSON)
        #[arg(short, long)]
        request: PathBuf,

        /// Pretty-print the decision
        #[arg(long)]
        pretty: bool,
    },

    /// Validate every turn in a file
    Batch {
        /// Pipeline configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// List of turns (YAML or JSON array)
        #[arg(short, long)]
        requests: PathBuf,

        /// Pipelines in flight at once
        #[arg(long, default_value = "4")]
        concurrency: usize,

        /// Pretty-print the decisions
        #[arg(long)]
        pretty: bool,
    },

    /// Check a pipeline configuration and credential availability
    CheckConfig {
        /// Pipeline configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match cli.command {
        Commands::Validate {
            config,
            request,
            pretty,
        } => cmd_validate(&config, &request, pretty).await,
        Commands::Batch {
            config,
            requests,
            concurrency,
            pretty,
        } => cmd_batch(&config, &requests, concurrency, pretty).await,
        Commands::CheckConfig { config } => cmd_check_config(&config),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_INVALID)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn cmd_validate(config: &Path, request: &Path, pretty: bool) -> Result<ExitCode> {
    let pipeline = load_pipeline(config)?;

    let content = std::fs::read_to_string(request)
        .with_context(|| format!("Failed to read request: {}", request.display()))?;
    let request = parse_request(request, &content)?;

    let decision = pipeline.run(&request).await?;
    print_json(&decision, pretty)?;

    Ok(exit_code_for(&decision))
}

async fn cmd_batch(
    config: &Path,
    requests: &Path,
    concurrency: usize,
    pretty: bool,
) -> Result<ExitCode> {
    let pipeline = load_pipeline(config)?;

    let content = std::fs::read_to_string(requests)
        .with_context(|| format!("Failed to read requests: {}", requests.display()))?;
    let turns = parse_batch(requests, &content)?;

    tracing::info!(turns = turns.len(), concurrency, "Running batch");
    let entries = run_turns(&pipeline, turns, concurrency).await;

    print_json(&entries, pretty)?;

    let summary = Summary::from_entries(&entries);
    tracing::info!(
        pass = summary.pass,
        fail = summary.fail,
        human_review = summary.human_review,
        invalid = summary.invalid,
        "Batch complete"
    );

    Ok(if summary.invalid > 0 {
        ExitCode::from(EXIT_INVALID)
    } else {
        ExitCode::SUCCESS
    })
}

/// Split a batch file into turns, validating each one on its own.
///
/// Only a file that is not a list at all is an error; a bad turn is kept
/// in place as its validation error.
fn parse_batch(
    path: &Path,
    content: &str,
) -> Result<Vec<Result<EvaluationRequest, InvalidInputError>>> {
    let turns: Vec<serde_json::Value> = if is_json(path) {
        serde_json::from_str(content).context("Failed to parse requests as a JSON array")?
    } else {
        serde_yaml::from_str(content).context("Failed to parse requests as a YAML list")?
    };

    Ok(turns
        .into_iter()
        .map(|turn| {
            serde_json::from_value(turn).map_err(|e| InvalidInputError::Malformed(e.to_string()))
        })
        .collect())
}

/// Run the valid turns and return one entry per input turn, in input order.
async fn run_turns(
    pipeline: &PipelineOrchestrator,
    turns: Vec<Result<EvaluationRequest, InvalidInputError>>,
    concurrency: usize,
) -> Vec<BatchEntry> {
    let mut valid = Vec::new();
    let mut positions = Vec::with_capacity(turns.len());
    for turn in turns {
        match turn {
            Ok(request) => {
                valid.push(request);
                positions.push(Ok(()));
            }
            Err(e) => positions.push(Err(e)),
        }
    }

    let mut decisions = pipeline.run_batch(&valid, concurrency).await.into_iter();

    positions
        .into_iter()
        .map(|position| match position.and_then(|()| next_decision(&mut decisions)) {
            Ok(decision) => BatchEntry::Decision(decision),
            Err(e) => BatchEntry::Error {
                error: e.to_string(),
            },
        })
        .collect()
}

fn next_decision(
    decisions: &mut impl Iterator<Item = std::result::Result<ConsensusDecision, InvalidInputError>>,
) -> std::result::Result<ConsensusDecision, InvalidInputError> {
    decisions
        .next()
        .unwrap_or_else(|| Err(InvalidInputError::Malformed("no decision produced".to_string())))
}

fn cmd_check_config(config: &Path) -> Result<ExitCode> {
    let pipeline_config = PipelineConfig::from_yaml_file(config)
        .with_context(|| format!("Invalid pipeline config: {}", config.display()))?;
    let registry = ProviderRegistry::with_defaults();

    println!("Config: {}", config.display());
    println!("  evaluation_timeout: {:?}", pipeline_config.evaluation_timeout);
    println!("  curator_timeout: {:?}", pipeline_config.curator_timeout);

    let mut problems = 0;
    for (slot, settings) in pipeline_config.slots() {
        match registry.validate(settings) {
            Ok(()) => println!(
                "  [ok] {}: {} / {} ({:?})",
                slot, settings.provider, settings.model, settings.template
            ),
            Err(e) => {
                problems += 1;
                println!("  [!!] {}: {}", slot, e);
            }
        }
    }

    if problems > 0 {
        println!("Available providers: {}", registry.available_types().join(", "));
        return Ok(ExitCode::from(EXIT_INVALID));
    }
    Ok(ExitCode::SUCCESS)
}

fn load_pipeline(config: &Path) -> Result<PipelineOrchestrator> {
    let pipeline_config = PipelineConfig::from_yaml_file(config)
        .with_context(|| format!("Invalid pipeline config: {}", config.display()))?;

    PipelineOrchestrator::from_config(&pipeline_config, &ProviderRegistry::with_defaults())
        .context("Failed to build pipeline")
}

fn parse_request(path: &Path, content: &str) -> Result<EvaluationRequest> {
    let request = if is_json(path) {
        EvaluationRequest::from_json(content)?
    } else {
        EvaluationRequest::from_yaml(content)?
    };
    Ok(request)
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", output);
    Ok(())
}

fn exit_code_for(decision: &ConsensusDecision) -> ExitCode {
    match decision.final_verdict() {
        FinalVerdict::Pass => ExitCode::SUCCESS,
        FinalVerdict::Fail => ExitCode::from(1),
        FinalVerdict::HumanReview => ExitCode::from(2),
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum BatchEntry {
    Decision(ConsensusDecision),
    Error { error: String },
}

#[derive(Default)]
struct Summary {
    pass: usize,
    fail: usize,
    human_review: usize,
    invalid: usize,
}

impl Summary {
    fn from_entries(entries: &[BatchEntry]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            match entry {
                BatchEntry::Decision(decision) => match decision.final_verdict() {
                    FinalVerdict::Pass => summary.pass += 1,
                    FinalVerdict::Fail => summary.fail += 1,
                    FinalVerdict::HumanReview => summary.human_review += 1,
                },
                BatchEntry::Error { .. } => summary.invalid += 1,
            }
        }
        summary
    }
}
