//! Orchestration for one classifier evaluation.
//!
//! Gathers pull-request state from the host, runs the pure classifier, and
//! emits the summary line to the audit trail and the job summary. Host
//! lookup failures are degraded to absent values so classification always
//! produces a decision; the classifier's ordering turns each gap into the
//! most conservative applicable reason code.

use anyhow::Result;
use tracing::warn;

use crate::core::classifier::{ClassifierInputs, classify};
use crate::core::summary;
use crate::core::types::{
    ActivationRecord, DispatchDecision, DispatchPath, GateRun, LabelSet, PullRequestRef,
};
use crate::io::audit::AuditLog;
use crate::io::config::ReconcilerConfig;
use crate::io::host::HostApi;
use crate::io::job_summary::JobSummary;

/// One evaluation request, as delivered by the triggering event.
#[derive(Debug, Clone)]
pub struct EvaluateRequest {
    pub path: DispatchPath,
    /// PR number from the primary trigger, when known.
    pub pr_number: Option<u64>,
    /// Fallback number used when the primary lookup fails.
    pub fallback_number: Option<u64>,
    pub trace: Option<String>,
}

/// Evaluate whether to launch the next agent round.
///
/// Returns the decision; the caller acts on `ok`. The summary line is
/// appended to both durable records before returning.
pub fn evaluate_dispatch<H: HostApi>(
    host: &H,
    config: &ReconcilerConfig,
    request: &EvaluateRequest,
    summary_record: &JobSummary,
    audit: &AuditLog,
) -> Result<DispatchDecision> {
    let effective_number = request.pr_number.or(request.fallback_number);

    let pr: Option<PullRequestRef> = match request.pr_number {
        Some(number) => match host.pull_request(number) {
            Ok(pr) => pr,
            Err(err) => {
                warn!(number, err = %err, "pull request lookup failed, treating as absent");
                None
            }
        },
        None => None,
    };

    let labels: LabelSet = match effective_number {
        Some(number) => match host.labels(number) {
            Ok(labels) => labels,
            Err(err) => {
                warn!(number, err = %err, "label lookup failed, treating as empty");
                LabelSet::new()
            }
        },
        None => LabelSet::new(),
    };

    let gate: Option<GateRun> = match pr.as_ref().map(|pr| pr.head_sha.as_str()) {
        Some(head_sha) if !head_sha.is_empty() => match host.gate_run(head_sha) {
            Ok(run) => run,
            Err(err) => {
                warn!(head_sha, err = %err, "gate run lookup failed, treating as absent");
                None
            }
        },
        _ => None,
    };

    let activation: Option<ActivationRecord> = match effective_number {
        Some(number) => match host.latest_activation(number) {
            Ok(activation) => activation,
            Err(err) => {
                warn!(number, err = %err, "activation lookup failed, treating as absent");
                None
            }
        },
        None => None,
    };

    // When the host's accounting is unreadable the cap check must refuse,
    // not wave the round through.
    let active_run_count = match host.active_run_count() {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(err = %err, "active run count unavailable, refusing via cap");
            None
        }
    };

    let decision = classify(&ClassifierInputs {
        path: request.path,
        pr: pr.as_ref(),
        fallback_number: request.fallback_number,
        labels: &labels,
        gate: gate.as_ref(),
        activation: activation.as_ref(),
        active_run_count,
        run_cap: config.run_cap,
        agent: &config.agent,
        trace: request.trace.as_deref(),
    });

    let line = summary::render(&decision);
    audit.append(request.trace.as_deref().unwrap_or(""), &line)?;
    summary_record.append(&line)?;

    Ok(decision)
}
