//! Bounded branch-recovery state machine.
//!
//! Runs only when an agent round reported completion but the branch head
//! did not advance. Drives at most two remediation dispatches
//! (`update-branch`, then `create-pr`) separated by head-SHA polls, ending
//! in either `Recovered` or `Escalated`. Poll budgets are explicit per
//! state so cancellation and timeout policy are visible at the type level;
//! budget expiry and connector failure both count as "no new head SHA",
//! never as success.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, warn};

use crate::core::reason::normalize;
use crate::core::summary;
use crate::core::types::{
    DispatchDecision, DispatchPath, LabelSet, PullRequestRef, RecoveryAttempt, RecoveryOutcome,
    RecoverySession, RemediationKind, labels,
};
use crate::io::audit::AuditLog;
use crate::io::config::ReconcilerConfig;
use crate::io::dispatch::{Connector, RemediationPayload};
use crate::io::host::HostApi;
use crate::io::job_summary::JobSummary;

/// Named states of the recovery protocol, in transition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    Snapshotting,
    ShortPoll,
    UpdateBranchDispatch,
    LongPoll,
    CreatePrFallback,
    FinalPoll,
    Recovered,
    Escalated,
}

impl RecoveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryState::Idle => "Idle",
            RecoveryState::Snapshotting => "Snapshotting",
            RecoveryState::ShortPoll => "ShortPoll",
            RecoveryState::UpdateBranchDispatch => "UpdateBranchDispatch",
            RecoveryState::LongPoll => "LongPoll",
            RecoveryState::CreatePrFallback => "CreatePrFallback",
            RecoveryState::FinalPoll => "FinalPoll",
            RecoveryState::Recovered => "Recovered",
            RecoveryState::Escalated => "Escalated",
        }
    }
}

/// Wall-clock budget and read interval for one polling state.
#[derive(Debug, Clone, Copy)]
pub struct PollBudget {
    pub budget: Duration,
    pub interval: Duration,
}

impl PollBudget {
    pub fn new(budget: Duration, interval: Duration) -> Self {
        Self { budget, interval }
    }

    /// Single head read, no waiting. Used by tests to script polls.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }
}

/// Per-state poll budgets.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryTiming {
    pub short_poll: PollBudget,
    pub long_poll: PollBudget,
    pub final_poll: PollBudget,
}

impl RecoveryTiming {
    pub fn from_config(config: &ReconcilerConfig) -> Self {
        let interval = Duration::from_secs(config.poll_interval_secs);
        Self {
            short_poll: PollBudget::new(Duration::from_secs(config.short_poll_budget_secs), interval),
            long_poll: PollBudget::new(Duration::from_secs(config.long_poll_budget_secs), interval),
            final_poll: PollBudget::new(Duration::from_secs(config.final_poll_budget_secs), interval),
        }
    }
}

/// Identifies the stalled round a session is recovering.
#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub pr_number: u64,
    pub round: u32,
    pub trace: String,
    pub comment_id: u64,
    pub comment_url: String,
    pub agent: String,
}

/// Run one recovery session to termination.
///
/// While a prior session's escalation is outstanding (`agents:sync-required`
/// present) remediation dispatches are suppressed; the session only watches
/// the short-poll window, since a new head SHA is the one event allowed to
/// clear the label. Every transition is appended to the trace-keyed audit
/// record, and a summary line is emitted after each remediation step and at
/// the terminal state.
pub fn run_recovery<H: HostApi, C: Connector>(
    host: &H,
    connector: &C,
    request: &RecoveryRequest,
    timing: &RecoveryTiming,
    audit: &AuditLog,
    summary_record: &JobSummary,
) -> Result<RecoverySession> {
    let initial_labels = host
        .labels(request.pr_number)
        .with_context(|| format!("read labels for PR #{}", request.pr_number))?;
    let escalation_outstanding = initial_labels.has(labels::SYNC_REQUIRED);

    let pr = host
        .pull_request(request.pr_number)?
        .ok_or_else(|| anyhow!("pull request #{} not found", request.pr_number))?;
    if pr.head_sha.trim().is_empty() {
        bail!("pull request #{} has no head SHA to snapshot", request.pr_number);
    }
    let snapshot = pr.head_sha.clone();

    let mut machine = Machine {
        state: RecoveryState::Idle,
        audit,
        trace: &request.trace,
    };
    let mut attempts: Vec<RecoveryAttempt> = Vec::new();

    machine.transition(
        RecoveryState::Snapshotting,
        &format!("head={} base={} branch={}", short(&snapshot), pr.base_ref, pr.head_ref),
    )?;

    machine.transition(RecoveryState::ShortPoll, "")?;
    if let Some(observed) = poll_head(host, request.pr_number, &snapshot, timing.short_poll) {
        // Head advanced on its own, no dispatch needed.
        return finish_recovered(
            host, request, &pr, machine, attempts, observed, summary_record,
        );
    }
    if escalation_outstanding {
        machine.note("escalation outstanding, remediation suppressed")?;
        return finish_escalated(
            host, request, &pr, machine, attempts, &initial_labels, summary_record,
        );
    }

    machine.transition(RecoveryState::UpdateBranchDispatch, "")?;
    let mut update_attempt = RecoveryAttempt {
        kind: RemediationKind::UpdateBranch,
        snapshot_head_sha: snapshot.clone(),
        observed_head_sha: None,
        succeeded: false,
    };
    let update_dispatched = dispatch_remediation(
        connector,
        request,
        &pr,
        RemediationKind::UpdateBranch,
        &machine,
    )?;
    emit_step_summary(
        request,
        &pr,
        &step_note(RemediationKind::UpdateBranch, update_dispatched),
        summary_record,
    )?;

    machine.transition(RecoveryState::LongPoll, "")?;
    let observed = if update_dispatched {
        poll_head(host, request.pr_number, &snapshot, timing.long_poll)
    } else {
        None
    };
    let raced = head_ref_changed(host, request.pr_number, &pr);
    if raced {
        machine.note("race detected: head ref changed mid-run")?;
    }
    if let Some(observed) = observed
        && !raced
    {
        update_attempt.observed_head_sha = Some(observed.clone());
        update_attempt.succeeded = true;
        attempts.push(update_attempt);
        return finish_recovered(
            host, request, &pr, machine, attempts, observed, summary_record,
        );
    }
    attempts.push(update_attempt);

    machine.transition(RecoveryState::CreatePrFallback, "")?;
    let mut fallback_attempt = RecoveryAttempt {
        kind: RemediationKind::CreatePr,
        snapshot_head_sha: snapshot.clone(),
        observed_head_sha: None,
        succeeded: false,
    };
    let fallback_dispatched = dispatch_remediation(
        connector,
        request,
        &pr,
        RemediationKind::CreatePr,
        &machine,
    )?;
    emit_step_summary(
        request,
        &pr,
        &step_note(RemediationKind::CreatePr, fallback_dispatched),
        summary_record,
    )?;

    machine.transition(RecoveryState::FinalPoll, "")?;
    let observed = if fallback_dispatched {
        poll_head(host, request.pr_number, &snapshot, timing.final_poll)
    } else {
        None
    };
    if let Some(observed) = observed {
        fallback_attempt.observed_head_sha = Some(observed.clone());
        fallback_attempt.succeeded = true;
        attempts.push(fallback_attempt);
        return finish_recovered(
            host, request, &pr, machine, attempts, observed, summary_record,
        );
    }
    attempts.push(fallback_attempt);

    finish_escalated(host, request, &pr, machine, attempts, &initial_labels, summary_record)
}

/// The single-line escalation message, gated by `agents:debug`.
pub fn escalation_comment(round: u32, trace: &str) -> String {
    format!(
        "Keepalive {round} {trace} escalation: agent \"done\" but branch unchanged after \
         update-branch/create-pr attempts."
    )
}

struct Machine<'a> {
    state: RecoveryState,
    audit: &'a AuditLog,
    trace: &'a str,
}

impl Machine<'_> {
    fn transition(&mut self, next: RecoveryState, note: &str) -> Result<()> {
        let line = if note.is_empty() {
            format!("{} -> {}", self.state.as_str(), next.as_str())
        } else {
            format!("{} -> {} {note}", self.state.as_str(), next.as_str())
        };
        self.audit.append(self.trace, &line)?;
        info!(from = self.state.as_str(), to = next.as_str(), "recovery transition");
        self.state = next;
        Ok(())
    }

    fn note(&self, note: &str) -> Result<()> {
        self.audit
            .append(self.trace, &format!("{} {note}", self.state.as_str()))
    }
}

/// Poll the PR head until a new SHA appears or the budget expires.
///
/// Always reads at least once. Read errors count as "unchanged": the step
/// fails toward escalation, never toward silent success.
fn poll_head<H: HostApi>(
    host: &H,
    number: u64,
    snapshot: &str,
    budget: PollBudget,
) -> Option<String> {
    let deadline = Instant::now() + budget.budget;
    loop {
        match host.head_sha(number) {
            Ok(Some(sha)) if sha != snapshot && !sha.trim().is_empty() => return Some(sha),
            Ok(_) => {}
            Err(err) => {
                warn!(number, err = %err, "head poll failed, treating as unchanged");
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(budget.interval);
    }
}

fn head_ref_changed<H: HostApi>(host: &H, number: u64, snapshot: &PullRequestRef) -> bool {
    match host.pull_request(number) {
        Ok(Some(current)) => current.head_ref != snapshot.head_ref,
        Ok(None) => true,
        Err(err) => {
            warn!(number, err = %err, "race check failed, assuming no race");
            false
        }
    }
}

/// Emit one remediation payload. A connector failure is not a session
/// error: it is recorded and treated as "no new head SHA".
fn dispatch_remediation<C: Connector>(
    connector: &C,
    request: &RecoveryRequest,
    pr: &PullRequestRef,
    kind: RemediationKind,
    machine: &Machine<'_>,
) -> Result<bool> {
    let payload = RemediationPayload {
        action: kind,
        issue: request.pr_number,
        base: pr.base_ref.clone(),
        head: pr.head_ref.clone(),
        comment_id: request.comment_id,
        comment_url: request.comment_url.clone(),
        agent: request.agent.clone(),
        trace: request.trace.clone(),
        round: request.round,
    };
    match connector.dispatch(&payload) {
        Ok(()) => {
            machine.note(&format!("dispatched action={}", kind.as_str()))?;
            Ok(true)
        }
        Err(err) => {
            warn!(action = kind.as_str(), err = %err, "remediation dispatch failed");
            machine.note(&format!("dispatch failed action={}: {err:#}", kind.as_str()))?;
            Ok(false)
        }
    }
}

fn finish_recovered<H: HostApi>(
    host: &H,
    request: &RecoveryRequest,
    pr: &PullRequestRef,
    mut machine: Machine<'_>,
    attempts: Vec<RecoveryAttempt>,
    observed: String,
    summary_record: &JobSummary,
) -> Result<RecoverySession> {
    machine.transition(RecoveryState::Recovered, &format!("head={}", short(&observed)))?;
    // A new head SHA is the only event allowed to clear the sync label.
    host.remove_label(request.pr_number, labels::SYNC_REQUIRED)
        .with_context(|| format!("clear {} on PR #{}", labels::SYNC_REQUIRED, request.pr_number))?;
    emit_step_summary(request, pr, "recovery recovered", summary_record)?;
    Ok(RecoverySession {
        pr_number: request.pr_number,
        round: request.round,
        trace: request.trace.clone(),
        attempts,
        outcome: RecoveryOutcome::Recovered,
    })
}

fn finish_escalated<H: HostApi>(
    host: &H,
    request: &RecoveryRequest,
    pr: &PullRequestRef,
    mut machine: Machine<'_>,
    attempts: Vec<RecoveryAttempt>,
    initial_labels: &LabelSet,
    summary_record: &JobSummary,
) -> Result<RecoverySession> {
    machine.transition(RecoveryState::Escalated, "")?;
    host.add_label(request.pr_number, labels::SYNC_REQUIRED)
        .with_context(|| format!("set {} on PR #{}", labels::SYNC_REQUIRED, request.pr_number))?;
    // The comment belongs to the session that first escalates; watch-only
    // sessions entered with the label already set stay silent.
    if initial_labels.has(labels::DEBUG) && !initial_labels.has(labels::SYNC_REQUIRED) {
        host.post_comment(
            request.pr_number,
            &escalation_comment(request.round, &request.trace),
        )
        .with_context(|| format!("post escalation comment on PR #{}", request.pr_number))?;
    }
    emit_step_summary(request, pr, "recovery escalated", summary_record)?;
    Ok(RecoverySession {
        pr_number: request.pr_number,
        round: request.round,
        trace: request.trace.clone(),
        attempts,
        outcome: RecoveryOutcome::Escalated,
    })
}

/// Raw step note for the job summary; mirrors the audit trail's dispatch
/// outcome wording.
fn step_note(kind: RemediationKind, dispatched: bool) -> String {
    if dispatched {
        format!("recovery {} dispatched", kind.as_str())
    } else {
        format!("recovery {} dispatch failed", kind.as_str())
    }
}

/// Recovery steps reuse the dispatch summary format; the raw step note is
/// preserved on the decision, the canonical code collapses to the
/// conservative bucket.
fn emit_step_summary(
    request: &RecoveryRequest,
    pr: &PullRequestRef,
    raw_reason: &str,
    summary_record: &JobSummary,
) -> Result<()> {
    let decision = DispatchDecision {
        ok: false,
        path: DispatchPath::Unknown,
        reason: normalize(raw_reason),
        raw_reason: raw_reason.to_string(),
        pr: pr.clone(),
        activation_id: Some(request.comment_id).filter(|id| *id > 0),
        agent: request.agent.clone(),
        head_sha: pr.head_sha.clone(),
        active_run_count: None,
        run_cap: None,
        trace: Some(request.trace.clone()),
    };
    summary_record.append(&summary::render(&decision))
}

fn short(sha: &str) -> String {
    sha.chars().take(7).collect()
}
