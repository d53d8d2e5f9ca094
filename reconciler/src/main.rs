//! Pull-request keepalive reconciliation CLI.
//!
//! Each invocation is short-lived and stateless: classifier evaluations and
//! recovery sessions are triggered by external events (gate completion,
//! comment posted, scheduled tick), and all cross-invocation state lives on
//! the pull request itself plus the append-only audit trail.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use reconciler::core::reason::normalize;
use reconciler::core::summary;
use reconciler::core::types::{DispatchPath, RecoveryOutcome};
use reconciler::evaluate::{EvaluateRequest, evaluate_dispatch};
use reconciler::exit_codes;
use reconciler::io::audit::AuditLog;
use reconciler::io::config::{ReconcilerConfig, load_config};
use reconciler::io::dispatch::RepositoryDispatchConnector;
use reconciler::io::host::GhHost;
use reconciler::io::job_summary::JobSummary;
use reconciler::logging;
use reconciler::recovery::{RecoveryRequest, RecoveryTiming, run_recovery};

#[derive(Parser)]
#[command(
    name = "reconciler",
    version,
    about = "Pull-request keepalive reconciliation engine"
)]
struct Cli {
    /// Config TOML path. Missing file falls back to defaults.
    #[arg(long, global = true, default_value = ".reconciler/config.toml")]
    config: PathBuf,

    /// `owner/name` repository. Falls back to `GITHUB_REPOSITORY`.
    #[arg(long, global = true)]
    repo: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PathArg {
    Gate,
    Comment,
    Unknown,
}

impl From<PathArg> for DispatchPath {
    fn from(path: PathArg) -> Self {
        match path {
            PathArg::Gate => DispatchPath::Gate,
            PathArg::Comment => DispatchPath::Comment,
            PathArg::Unknown => DispatchPath::Unknown,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Classify the gate outcome and print the dispatch summary line.
    Evaluate {
        /// Pull request number from the primary trigger.
        #[arg(long)]
        pr: Option<u64>,
        /// Fallback PR number when the primary lookup fails.
        #[arg(long)]
        fallback_pr: Option<u64>,
        /// Originating trigger.
        #[arg(long, value_enum, default_value = "gate")]
        path: PathArg,
        /// Correlation identifier threaded through all summaries.
        #[arg(long)]
        trace: Option<String>,
    },
    /// Run one branch-recovery session for a stalled round.
    Recover {
        #[arg(long)]
        pr: u64,
        /// Keepalive round number being recovered.
        #[arg(long)]
        round: u32,
        #[arg(long)]
        trace: String,
        /// Activation comment id, used as the connector idempotency key.
        #[arg(long)]
        comment_id: u64,
        #[arg(long, default_value = "")]
        comment_url: String,
    },
    /// Print the canonical reason code for a raw reason string.
    Normalize { reason: String },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;

    match cli.command {
        Command::Evaluate {
            pr,
            fallback_pr,
            path,
            trace,
        } => cmd_evaluate(&cli.repo, &config, pr, fallback_pr, path.into(), trace),
        Command::Recover {
            pr,
            round,
            trace,
            comment_id,
            comment_url,
        } => cmd_recover(&cli.repo, &config, pr, round, trace, comment_id, comment_url),
        Command::Normalize { reason } => {
            println!("{}", normalize(&reason));
            Ok(exit_codes::OK)
        }
    }
}

fn resolve_repo(flag: &Option<String>) -> Result<String> {
    if let Some(repo) = flag {
        return Ok(repo.clone());
    }
    std::env::var("GITHUB_REPOSITORY")
        .context("missing --repo flag and GITHUB_REPOSITORY env var")
}

fn cmd_evaluate(
    repo: &Option<String>,
    config: &ReconcilerConfig,
    pr: Option<u64>,
    fallback_pr: Option<u64>,
    path: DispatchPath,
    trace: Option<String>,
) -> Result<i32> {
    let repo = resolve_repo(repo)?;
    let host = GhHost::new(repo, config);
    let summary_record = JobSummary::from_config_path(config.summary_path.clone());
    let audit = AuditLog::new(&config.audit_dir);

    let decision = evaluate_dispatch(
        &host,
        config,
        &EvaluateRequest {
            path,
            pr_number: pr,
            fallback_number: fallback_pr,
            trace,
        },
        &summary_record,
        &audit,
    )?;

    println!("{}", summary::render(&decision));
    Ok(if decision.ok {
        exit_codes::OK
    } else {
        exit_codes::SKIP
    })
}

fn cmd_recover(
    repo: &Option<String>,
    config: &ReconcilerConfig,
    pr: u64,
    round: u32,
    trace: String,
    comment_id: u64,
    comment_url: String,
) -> Result<i32> {
    let repo = resolve_repo(repo)?;
    let host = GhHost::new(repo.clone(), config);
    let connector = RepositoryDispatchConnector::new(repo, config);
    let summary_record = JobSummary::from_config_path(config.summary_path.clone());
    let audit = AuditLog::new(&config.audit_dir);

    let session = run_recovery(
        &host,
        &connector,
        &RecoveryRequest {
            pr_number: pr,
            round,
            trace,
            comment_id,
            comment_url,
            agent: config.agent.clone(),
        },
        &RecoveryTiming::from_config(config),
        &audit,
        &summary_record,
    )?;

    println!(
        "recovery pr=#{} round={} attempts={} outcome={:?}",
        session.pr_number,
        session.round,
        session.attempts.len(),
        session.outcome
    );
    Ok(match session.outcome {
        RecoveryOutcome::Recovered => exit_codes::OK,
        RecoveryOutcome::Escalated => exit_codes::ESCALATED,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_evaluate_defaults() {
        let cli = Cli::parse_from(["reconciler", "evaluate", "--pr", "42"]);
        match cli.command {
            Command::Evaluate {
                pr,
                fallback_pr,
                path,
                trace,
            } => {
                assert_eq!(pr, Some(42));
                assert_eq!(fallback_pr, None);
                assert_eq!(path, PathArg::Gate);
                assert_eq!(trace, None);
            }
            _ => panic!("expected evaluate"),
        }
    }

    #[test]
    fn parse_evaluate_comment_path() {
        let cli = Cli::parse_from([
            "reconciler",
            "evaluate",
            "--fallback-pr",
            "7",
            "--path",
            "comment",
            "--trace",
            "t-1",
        ]);
        match cli.command {
            Command::Evaluate { path, trace, .. } => {
                assert_eq!(path, PathArg::Comment);
                assert_eq!(trace.as_deref(), Some("t-1"));
            }
            _ => panic!("expected evaluate"),
        }
    }

    #[test]
    fn parse_recover() {
        let cli = Cli::parse_from([
            "reconciler",
            "recover",
            "--pr",
            "42",
            "--round",
            "3",
            "--trace",
            "t-9",
            "--comment-id",
            "555",
        ]);
        match cli.command {
            Command::Recover {
                pr, round, trace, ..
            } => {
                assert_eq!(pr, 42);
                assert_eq!(round, 3);
                assert_eq!(trace, "t-9");
            }
            _ => panic!("expected recover"),
        }
    }

    #[test]
    fn parse_normalize() {
        let cli = Cli::parse_from(["reconciler", "normalize", "gate-not-success"]);
        match cli.command {
            Command::Normalize { reason } => assert_eq!(reason, "gate-not-success"),
            _ => panic!("expected normalize"),
        }
    }
}
