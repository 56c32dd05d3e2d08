//! Command implementations. Each returns the process exit code.

use crate::sim::SimulatedAdapter;
use anyhow::Context;
use clap::Args;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use warden_executor::{AdapterRegistry, StepExecutor};
use warden_ledger::{verify_file, FileLedger, MemoryLedger, ReceiptLedger};
use warden_policy::{PolicyConfig, PolicyGate};
use warden_runner::{Orchestrator, RunnerError, SubmitOptions};
use warden_types::{JobStatus, ReceiptAction};
use warden_workflow::{WorkflowDefinition, WorkflowError};

pub const EXIT_VALIDATION: i32 = 2;
pub const EXIT_BLOCKED: i32 = 3;
pub const EXIT_EXECUTION: i32 = 4;
pub const EXIT_INTEGRITY: i32 = 5;

#[derive(Args)]
pub struct RunArgs {
    /// Path to the workflow definition JSON
    pub definition: String,

    /// Policy configuration JSON; permissive defaults when omitted
    #[arg(short, long, env = "WARDEN_POLICY")]
    pub policy: Option<String>,

    /// Receipt ledger file (JSONL); in-memory when omitted
    #[arg(short, long, env = "WARDEN_LEDGER")]
    pub ledger: Option<String>,

    /// Variable override, `name=value` (value parsed as JSON when possible)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,
}

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let text = std::fs::read_to_string(&args.definition)
        .with_context(|| format!("reading definition '{}'", args.definition))?;
    let definition = match WorkflowDefinition::load(&text) {
        Ok(definition) => definition,
        Err(WorkflowError::Validation(issues)) => {
            report_issues(&issues);
            return Ok(EXIT_VALIDATION);
        }
        Err(err) => {
            eprintln!("definition rejected: {err}");
            return Ok(EXIT_VALIDATION);
        }
    };

    let policy = match &args.policy {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading policy '{path}'"))?;
            serde_json::from_str::<PolicyConfig>(&text)
                .with_context(|| format!("parsing policy '{path}'"))?
        }
        None => PolicyConfig {
            approval_threshold: f64::MAX,
            ..PolicyConfig::default()
        },
    };

    let ledger: Arc<dyn ReceiptLedger> = match &args.ledger {
        Some(path) => Arc::new(FileLedger::open(path).await?),
        None => Arc::new(MemoryLedger::new()),
    };

    let mut registry = AdapterRegistry::new();
    for capability in &definition.uses {
        registry.register(Arc::new(SimulatedAdapter::new(capability)));
    }

    let gate = Arc::new(PolicyGate::new(policy, ledger.clone()));
    let executor = Arc::new(StepExecutor::new(gate, ledger.clone(), Arc::new(registry)));
    let orchestrator = Orchestrator::new(executor, ledger);

    let mut options = SubmitOptions::default();
    for var in &args.vars {
        let (name, value) = parse_var(var)?;
        options = options.with_var(name, value);
    }

    let job = match orchestrator.submit(definition, options).await {
        Ok(job) => job,
        Err(RunnerError::Validation(issues)) => {
            report_issues(&issues);
            return Ok(EXIT_VALIDATION);
        }
        Err(err @ (RunnerError::MissingCapabilities(_) | RunnerError::MissingSecret(_))) => {
            eprintln!("submission rejected: {err}");
            return Ok(EXIT_VALIDATION);
        }
        Err(err) => return Err(err.into()),
    };
    println!("job {job} submitted");

    loop {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let state = orchestrator.status(&job)?;
        match state.status {
            JobStatus::Completed => {
                println!("job {job} completed ({} steps)", state.history.len());
                return Ok(0);
            }
            JobStatus::Failed => {
                eprintln!("job {job} failed");
                if let Some(detail) = &state.blocked_on {
                    eprintln!("  {detail}");
                }
                return Ok(EXIT_EXECUTION);
            }
            JobStatus::WaitingHuman => {
                eprintln!("job {job} is blocked pending approval");
                if let (Some(node), Some(detail)) = (&state.current_step_id, &state.blocked_on) {
                    eprintln!("  node '{node}': {}", detail["reason"].as_str().unwrap_or(""));
                }
                return Ok(EXIT_BLOCKED);
            }
            JobStatus::Running | JobStatus::Paused => {}
        }
    }
}

pub fn validate(path: &str) -> anyhow::Result<i32> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading definition '{path}'"))?;
    match WorkflowDefinition::load(&text) {
        Ok(definition) => {
            println!(
                "'{}' is valid ({} nodes, version {})",
                definition.name,
                definition.nodes.len(),
                definition.version
            );
            Ok(0)
        }
        Err(WorkflowError::Validation(issues)) => {
            report_issues(&issues);
            Ok(EXIT_VALIDATION)
        }
        Err(err) => {
            eprintln!("definition rejected: {err}");
            Ok(EXIT_VALIDATION)
        }
    }
}

pub async fn verify(path: &str) -> anyhow::Result<i32> {
    let verification = match verify_file(path).await {
        Ok(v) => v,
        Err(err) => {
            eprintln!("verification failed: {err}");
            return Ok(EXIT_INTEGRITY);
        }
    };

    if verification.ok() {
        println!(
            "ledger ok: {} receipt(s), sidecar {}",
            verification.chain.checked,
            match verification.sidecar_ok {
                Some(true) => "matches",
                Some(false) => "MISMATCH",
                None => "absent",
            }
        );
        return Ok(0);
    }

    eprintln!("ledger integrity failure");
    if let Some(id) = &verification.chain.first_bad_id {
        eprintln!(
            "  first divergence at entry {} (index {:?})",
            id, verification.chain.first_bad_index
        );
    }
    if let Some(detail) = &verification.chain.detail {
        eprintln!("  {detail}");
    }
    if verification.sidecar_ok == Some(false) {
        eprintln!("  sidecar digest does not match the ledger file");
    }
    Ok(EXIT_INTEGRITY)
}

pub async fn status(path: &str) -> anyhow::Result<i32> {
    let ledger = FileLedger::open(path).await?;
    let receipts = ledger.all().await?;

    let mut jobs: Vec<(String, &'static str, usize)> = Vec::new();
    for receipt in &receipts {
        let Some(job_id) = &receipt.job_id else {
            continue;
        };
        let key = job_id.to_string();
        if !jobs.iter().any(|(id, _, _)| id == &key) {
            jobs.push((key.clone(), "in-flight", 0));
        }
        let entry = jobs.iter_mut().find(|(id, _, _)| id == &key);
        if let Some((_, outcome, steps)) = entry {
            match receipt.action {
                ReceiptAction::StepCompleted | ReceiptAction::StepFailed => *steps += 1,
                ReceiptAction::JobCompleted => *outcome = "completed",
                ReceiptAction::JobFailed => *outcome = "failed",
                _ => {}
            }
        }
    }

    if jobs.is_empty() {
        println!("no jobs recorded in '{path}'");
        return Ok(0);
    }
    for (job_id, outcome, steps) in jobs {
        println!("{job_id}  {outcome}  {steps} step receipt(s)");
    }
    Ok(0)
}

fn report_issues(issues: &[warden_workflow::ValidationIssue]) {
    eprintln!("definition failed validation with {} issue(s):", issues.len());
    for issue in issues {
        eprintln!("  - {issue}");
    }
}

/// Parse a `name=value` override. The value keeps its JSON type when it
/// parses as JSON, and falls back to a plain string otherwise.
fn parse_var(raw: &str) -> anyhow::Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("variable '{raw}' is not in name=value form"))?;
    let parsed = serde_json::from_str::<Value>(value)
        .unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), parsed))
}
