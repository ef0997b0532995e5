//! opsflow Incident-Response Reference Runtime — Demo CLI
//!
//! Runs one or all of the five incident scenarios, or drives a single
//! incident across process restarts with file-backed checkpoints and audit
//! chains.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- risky-restart
//!   cargo run -p demo -- start --message "Memory usage 93% on api-2, OOM kills observed" --severity high
//!   cargo run -p demo -- pending
//!   cargo run -p demo -- resume <INSTANCE_ID> "rejected"
//!   cargo run -p demo -- audit <INSTANCE_ID>

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use opsflow_audit::FileAuditWriter;
use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    incident::{Alert, Severity},
    run::{RunOutcome, WorkflowInput},
};
use opsflow_core::{EngineConfig, FileCheckpointStore};
use opsflow_ref_ops::{
    oracles::ScriptedDiagnoser,
    scenarios::{cpu_incident, free_text, low_confidence, retry_exhaustion, risky_restart},
    ReferenceRuntime, ReferenceWiring,
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// opsflow — resumable incident-response workflow demo.
///
/// Scenario subcommands run self-contained, in-memory incidents. The
/// start/resume/pending/cancel/audit subcommands share state under
/// `--state-dir`, so an incident suspended by one invocation can be resumed
/// by the next.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "opsflow incident-response reference runtime demo",
    long_about = "Runs opsflow incident scenarios showing stage routing, operator\n\
                  approval, clarification round trips, retries, and audit chain integrity."
)]
struct Cli {
    /// Where checkpoints and audit chains are kept.
    #[arg(long, global = true, default_value = ".opsflow")]
    state_dir: PathBuf,

    /// Engine config TOML; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all five scenarios in sequence.
    RunAll,
    /// Scenario 1: CPU incident, end to end (streaming).
    CpuIncident,
    /// Scenario 2: Low-confidence diagnosis (clarification round trip).
    LowConfidence,
    /// Scenario 3: Risky restart (operator rejects the plan).
    RiskyRestart,
    /// Scenario 4: Free-text report (extraction + information collection).
    FreeText,
    /// Scenario 5: Retry exhaustion (failing diagnoser).
    RetryExhaustion,
    /// Open a checkpointed incident from an alert or free text.
    Start {
        /// Alert message; mutually exclusive with --text.
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        message: Option<String>,
        #[arg(long, default_value = "critical")]
        severity: String,
        /// Free-text description instead of a structured alert.
        #[arg(long)]
        text: Option<String>,
        /// Confidence of the first diagnosis; below the threshold asks for
        /// clarification.
        #[arg(long, default_value_t = 0.85)]
        confidence: f64,
        /// Instance id; generated when omitted.
        #[arg(long)]
        id: Option<String>,
    },
    /// Answer the pending request of a suspended incident.
    Resume {
        instance_id: String,
        reply: String,
        /// Request id; defaults to the instance's pending request.
        #[arg(long)]
        request: Option<String>,
    },
    /// List incidents waiting on an operator.
    Pending,
    /// Discard a suspended incident.
    Cancel { instance_id: String },
    /// Verify and print an incident's audit chain.
    Audit { instance_id: String },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all().await,
        Command::CpuIncident => cpu_incident::run_scenario().await.map(|_| ()),
        Command::LowConfidence => low_confidence::run_scenario().await.map(|_| ()),
        Command::RiskyRestart => risky_restart::run_scenario().await.map(|_| ()),
        Command::FreeText => free_text::run_scenario().await.map(|_| ()),
        Command::RetryExhaustion => retry_exhaustion::run_scenario().await.map(|_| ()),
        Command::Start {
            message,
            severity,
            text,
            confidence,
            id,
        } => {
            let input = match (message, text) {
                (Some(message), _) => parse_severity(&severity)
                    .map(|sev| WorkflowInput::Alert(Alert::new(sev, message).with_source("cli"))),
                (None, Some(text)) => Ok(WorkflowInput::Text(text)),
                (None, None) => Err(OpsflowError::ConfigError {
                    reason: "either --message or --text is required".to_string(),
                }),
            };
            match input {
                Ok(input) => start(&cli.state_dir, cli.config.as_deref(), input, confidence, id).await,
                Err(e) => Err(e),
            }
        }
        Command::Resume {
            instance_id,
            reply,
            request,
        } => resume(&cli.state_dir, cli.config.as_deref(), &instance_id, &reply, request).await,
        Command::Pending => pending(&cli.state_dir, cli.config.as_deref()).await,
        Command::Cancel { instance_id } => {
            cancel(&cli.state_dir, cli.config.as_deref(), &instance_id).await
        }
        Command::Audit { instance_id } => audit(&cli.state_dir, &instance_id),
    };

    match result {
        Ok(()) => {
            println!("Done.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

async fn run_all() -> OpsflowResult<()> {
    cpu_incident::run_scenario().await?;
    low_confidence::run_scenario().await?;
    risky_restart::run_scenario().await?;
    free_text::run_scenario().await?;
    retry_exhaustion::run_scenario().await?;
    Ok(())
}

// ── Checkpointed incidents ────────────────────────────────────────────────────

fn parse_severity(s: &str) -> OpsflowResult<Severity> {
    Severity::parse(s).ok_or_else(|| OpsflowError::ConfigError {
        reason: format!("unknown severity '{}'; expected low, medium, high or critical", s),
    })
}

/// An engine whose checkpoints and audit chains live under `state_dir`.
fn runtime(
    state_dir: &Path,
    config: Option<&Path>,
    diagnoser: ScriptedDiagnoser,
) -> OpsflowResult<ReferenceRuntime> {
    let config = match config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let store = FileCheckpointStore::new(state_dir.join("checkpoints"))?;
    let audit = FileAuditWriter::new(state_dir.join("audit"))?;
    debug!(
        state_dir = %state_dir.display(),
        agent_id = %config.agent_id,
        "opening file-backed runtime"
    );
    ReferenceWiring::new(config)
        .diagnoser(diagnoser)
        .with_extractor()
        .checkpoint_store(Arc::new(store))
        .audit(Arc::new(audit))
        .build()
}

async fn start(
    state_dir: &Path,
    config: Option<&Path>,
    input: WorkflowInput,
    confidence: f64,
    id: Option<String>,
) -> OpsflowResult<()> {
    let runtime = runtime(
        state_dir,
        config,
        ScriptedDiagnoser::scripted(vec![confidence], 0.85),
    )?;
    let instance_id = id.unwrap_or_else(|| format!("inc-{}", uuid::Uuid::new_v4().simple()));
    println!("Starting incident {}", instance_id);
    let outcome = runtime.engine.start_checkpointed(&instance_id, input).await?;
    print_outcome(&instance_id, &outcome);
    Ok(())
}

async fn resume(
    state_dir: &Path,
    config: Option<&Path>,
    instance_id: &str,
    reply: &str,
    request: Option<String>,
) -> OpsflowResult<()> {
    let runtime = runtime(state_dir, config, ScriptedDiagnoser::confident(0.85))?;
    let request_id = match request {
        Some(id) => id,
        None => runtime
            .engine
            .checkpoint(instance_id)
            .await?
            .and_then(|c| c.pending_request().map(|r| r.id.clone()))
            .ok_or_else(|| OpsflowError::NotSuspended {
                instance_id: instance_id.to_string(),
            })?,
    };
    println!("Resuming incident {} with: {}", instance_id, reply);
    let outcome = runtime
        .engine
        .resume(instance_id, &request_id, json!(reply))
        .await?;
    print_outcome(instance_id, &outcome);
    Ok(())
}

async fn pending(state_dir: &Path, config: Option<&Path>) -> OpsflowResult<()> {
    let runtime = runtime(state_dir, config, ScriptedDiagnoser::confident(0.85))?;
    let suspended = runtime.engine.suspended().await?;
    if suspended.is_empty() {
        println!("No incidents are waiting on an operator.");
    }
    for checkpoint in suspended {
        if let Some(request) = checkpoint.pending_request() {
            println!(
                "  {}  [{} at {}]  {}",
                checkpoint.instance_id, request.kind, request.node, request.prompt
            );
        }
    }
    Ok(())
}

async fn cancel(state_dir: &Path, config: Option<&Path>, instance_id: &str) -> OpsflowResult<()> {
    let runtime = runtime(state_dir, config, ScriptedDiagnoser::confident(0.85))?;
    runtime.engine.cancel(instance_id).await?;
    println!("Cancelled incident {}", instance_id);
    Ok(())
}

fn audit(state_dir: &Path, instance_id: &str) -> OpsflowResult<()> {
    let writer = FileAuditWriter::new(state_dir.join("audit"))?;
    let log = writer.export_log(instance_id)?;
    for event in &log.events {
        println!(
            "  #{:<3} {} -> {}  ({})  {}",
            event.sequence,
            event.record.from,
            event.record.to,
            event.record.reason,
            &event.this_hash[..12.min(event.this_hash.len())]
        );
    }
    println!(
        "  Audit chain integrity: {} ({} event(s), {})",
        if writer.verify_integrity(instance_id)? { "VERIFIED" } else { "FAILED" },
        log.events.len(),
        if log.finalized { "finalized" } else { "open" }
    );
    Ok(())
}

fn print_outcome(instance_id: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Suspended { request, .. } => {
            println!();
            println!("  Waiting on operator ({}):", request.kind);
            println!("    {}", request.prompt);
            println!();
            println!("  Resume with:");
            println!("    demo resume {} \"<reply>\"", instance_id);
        }
        RunOutcome::Completed { state, status } => {
            println!();
            for message in state.messages() {
                println!("  {}", message.content);
            }
            println!();
            println!("  Run status: {}", status);
        }
    }
    println!();
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("opsflow — Resumable Incident-Response Workflow");
    println!("Operations Reference Demo");
    println!("==============================================");
    println!();
    println!("Workflow per incident:");
    println!("  [1] Router picks the next stage: hint, then history, then the data present");
    println!("  [2] Stage calls its oracle off-thread; output is verified before it is committed");
    println!("  [3] Risky plans and unsure diagnoses park on an operator request and checkpoint");
    println!("  [4] Failures go to the error node, which retries until the budget is spent");
    println!("  [5] Every hop is written to a SHA-256 hash-chained audit log");
    println!();
}
