//! Gate outcome classification: decide whether to launch the next round.
//!
//! The guard predicates form an explicit total order; the first matching
//! condition wins. Reordering changes observable behavior and is a breaking
//! change to the dispatch contract.

use crate::core::capacity::AdmissionGuard;
use crate::core::reason::{ReasonCode, normalize};
use crate::core::types::{
    ActivationRecord, ActivationValidity, DispatchDecision, DispatchPath, GateConclusion, GateRun,
    LabelSet, PullRequestRef, labels,
};

/// Inputs for one classifier evaluation. Missing or malformed upstream data
/// arrives here as `None` and is handled by the guard ordering; the
/// classifier itself never errors.
#[derive(Debug, Clone)]
pub struct ClassifierInputs<'a> {
    pub path: DispatchPath,
    pub pr: Option<&'a PullRequestRef>,
    /// Fallback PR number used when the primary lookup failed.
    pub fallback_number: Option<u64>,
    pub labels: &'a LabelSet,
    pub gate: Option<&'a GateRun>,
    pub activation: Option<&'a ActivationRecord>,
    /// `None` when the host's accounting could not be read.
    pub active_run_count: Option<u32>,
    pub run_cap: u32,
    pub agent: &'a str,
    pub trace: Option<&'a str>,
}

/// Decide whether to launch the next agent round.
///
/// Always returns a fully populated decision; callers are responsible for
/// acting on `ok`. The raw (pre-normalization) reason is preserved on the
/// decision so the canonical collapsing never loses diagnostic signal.
pub fn classify(inputs: &ClassifierInputs<'_>) -> DispatchDecision {
    let raw = first_refusal(inputs).unwrap_or_else(|| "ok".to_string());
    let reason = normalize(&raw);
    let ok = reason == ReasonCode::Ok;

    let pr = resolve_pr(inputs);
    let head_sha = pr.head_sha.clone();

    DispatchDecision {
        ok,
        path: inputs.path,
        reason,
        raw_reason: raw,
        pr,
        activation_id: inputs.activation.and_then(|a| a.id),
        agent: inputs.agent.to_string(),
        head_sha,
        active_run_count: inputs.active_run_count,
        run_cap: Some(inputs.run_cap),
        trace: inputs.trace.map(str::to_string),
    }
}

/// The documented guard order. Returns the raw reason of the first failing
/// predicate, or `None` when every check passes.
fn first_refusal(inputs: &ClassifierInputs<'_>) -> Option<String> {
    // 1. Dispatch precondition label.
    if !inputs.labels.has(labels::AGENT_CODEX) {
        return Some("missing-label".to_string());
    }
    // 2. Hard pause. Deliberately collapses into the gate-failed bucket:
    //    the public taxonomy stays small, the raw reason keeps the cause.
    if inputs.labels.has(labels::PAUSE) {
        return Some("paused".to_string());
    }
    // 3. Outstanding recovery escalation.
    if inputs.labels.has(labels::SYNC_REQUIRED) {
        return Some("sync-required".to_string());
    }
    // 4. Linked pull request, after fallback.
    if resolve_number(inputs).is_none() {
        return Some("no-linked-pr".to_string());
    }
    // 5./6. Gate run presence and conclusion.
    match inputs.gate {
        None => return Some("gate-run-missing".to_string()),
        Some(run) => match run.conclusion {
            GateConclusion::Pending => return Some("gate-pending".to_string()),
            GateConclusion::Missing => return Some("gate-missing".to_string()),
            GateConclusion::Success => {}
            GateConclusion::Failure | GateConclusion::Cancelled => {
                return Some(if run.rate_limited() {
                    "gate-not-success (rate-limited)".to_string()
                } else {
                    "gate-not-success".to_string()
                });
            }
        },
    }
    // 7. Concurrency cap. An unreadable count refuses, never admits.
    match inputs.active_run_count {
        Some(active) if AdmissionGuard::new(inputs.run_cap).admit(active) => {}
        _ => return Some("cap-reached".to_string()),
    }
    // 8. Activation structure, then human/trust check.
    match inputs.activation {
        None => return Some("no-activation-found".to_string()),
        Some(record) => match record.validity() {
            ActivationValidity::Unstructured => return Some("no-activation-found".to_string()),
            ActivationValidity::Untrusted => return Some("no-human-activation".to_string()),
            ActivationValidity::Valid => {}
        },
    }
    None
}

fn resolve_number(inputs: &ClassifierInputs<'_>) -> Option<u64> {
    inputs
        .pr
        .and_then(|pr| pr.number)
        .filter(|n| *n > 0)
        .or(inputs.fallback_number.filter(|n| *n > 0))
}

fn resolve_pr(inputs: &ClassifierInputs<'_>) -> PullRequestRef {
    match inputs.pr {
        Some(pr) => {
            let mut pr = pr.clone();
            pr.number = resolve_number(inputs);
            pr
        }
        None => match resolve_number(inputs) {
            Some(number) => PullRequestRef::with_number(number),
            None => PullRequestRef::unknown(),
        },
    }
}
