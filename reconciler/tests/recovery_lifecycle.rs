//! Session-level tests for the branch-recovery state machine.
//!
//! These drive `run_recovery` end to end with scripted hosts and
//! connectors, using immediate poll budgets so each polling state performs
//! exactly one scripted head read.

use std::fs;

use reconciler::core::types::{RecoveryOutcome, RemediationKind, labels};
use reconciler::io::audit::AuditLog;
use reconciler::io::job_summary::JobSummary;
use reconciler::recovery::{
    PollBudget, RecoveryRequest, RecoveryTiming, escalation_comment, run_recovery,
};
use reconciler::test_support::{ScriptedConnector, ScriptedHost, test_pr};

const SNAPSHOT: &str = "0123456789abcdef0123456789abcdef01234567";
const ADVANCED: &str = "fedcba9876543210fedcba9876543210fedcba98";

fn request() -> RecoveryRequest {
    RecoveryRequest {
        pr_number: 42,
        round: 3,
        trace: "trace-9".to_string(),
        comment_id: 555,
        comment_url: "https://example.test/comment/555".to_string(),
        agent: "codex".to_string(),
    }
}

fn timing() -> RecoveryTiming {
    RecoveryTiming {
        short_poll: PollBudget::immediate(),
        long_poll: PollBudget::immediate(),
        final_poll: PollBudget::immediate(),
    }
}

struct Harness {
    host: ScriptedHost,
    connector: ScriptedConnector,
    temp: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            host: ScriptedHost::passing(42),
            connector: ScriptedConnector::new(),
            temp: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn run(&self) -> anyhow::Result<reconciler::core::types::RecoverySession> {
        let audit = AuditLog::new(self.temp.path().join("audit"));
        let summary = JobSummary::new(Some(self.temp.path().join("summary.md")));
        run_recovery(
            &self.host,
            &self.connector,
            &request(),
            &timing(),
            &audit,
            &summary,
        )
    }

    fn audit_trail(&self) -> String {
        AuditLog::new(self.temp.path().join("audit"))
            .read("trace-9")
            .expect("read audit")
    }

    fn summary(&self) -> String {
        fs::read_to_string(self.temp.path().join("summary.md")).unwrap_or_default()
    }
}

/// Head advances during the short poll: no dispatch is needed at all.
#[test]
fn short_poll_recovery_skips_remediation() {
    let harness = Harness::new();
    harness.host.script_heads([ADVANCED]);

    let session = harness.run().expect("recover");

    assert_eq!(session.outcome, RecoveryOutcome::Recovered);
    assert!(session.attempts.is_empty());
    assert!(harness.connector.dispatched.borrow().is_empty());
    assert!(!harness.host.labels.borrow().has(labels::SYNC_REQUIRED));
    assert!(harness.audit_trail().contains("ShortPoll"));
    assert!(harness.audit_trail().contains("-> Recovered"));
}

/// Stale branch full cycle: update-branch does nothing, create-pr's merge
/// advances the head during the final poll.
#[test]
fn full_cycle_recovers_via_create_pr() {
    let harness = Harness::new();
    // Short poll, long poll, final poll.
    harness.host.script_heads([SNAPSHOT, SNAPSHOT, ADVANCED]);
    // Even with debug enabled, recovery must not comment.
    harness.host.labels.borrow_mut().insert(labels::DEBUG);

    let session = harness.run().expect("recover");

    assert_eq!(session.outcome, RecoveryOutcome::Recovered);
    assert_eq!(session.attempts.len(), 2);
    assert_eq!(session.attempts[0].kind, RemediationKind::UpdateBranch);
    assert!(!session.attempts[0].succeeded);
    assert_eq!(session.attempts[1].kind, RemediationKind::CreatePr);
    assert!(session.attempts[1].succeeded);
    assert_eq!(
        session.attempts[1].observed_head_sha.as_deref(),
        Some(ADVANCED)
    );

    let dispatched = harness.connector.dispatched.borrow();
    assert_eq!(dispatched.len(), 2);
    assert_eq!(dispatched[0].action, RemediationKind::UpdateBranch);
    assert_eq!(dispatched[1].action, RemediationKind::CreatePr);

    assert!(!harness.host.labels.borrow().has(labels::SYNC_REQUIRED));
    assert!(harness.host.comments.borrow().is_empty());
}

/// Full escalation: the head never moves through all three poll windows.
#[test]
fn full_escalation_sets_label_and_comments_once() {
    let harness = Harness::new();
    harness.host.script_heads([SNAPSHOT]);
    harness.host.labels.borrow_mut().insert(labels::DEBUG);

    let session = harness.run().expect("recover");

    assert_eq!(session.outcome, RecoveryOutcome::Escalated);
    assert_eq!(session.attempts.len(), 2);
    assert!(session.attempts.iter().all(|attempt| !attempt.succeeded));
    // At most two remediation dispatches per session.
    assert_eq!(harness.connector.dispatched.borrow().len(), 2);

    assert!(harness.host.labels.borrow().has(labels::SYNC_REQUIRED));
    let comments = harness.host.comments.borrow();
    assert_eq!(comments.len(), 1);
    assert_eq!(
        comments[0],
        "Keepalive 3 trace-9 escalation: agent \"done\" but branch unchanged after \
         update-branch/create-pr attempts."
    );
    assert_eq!(comments[0], escalation_comment(3, "trace-9"));

    let trail = harness.audit_trail();
    assert!(trail.contains("Idle -> Snapshotting"));
    assert!(trail.contains("ShortPoll -> UpdateBranchDispatch"));
    assert!(trail.contains("LongPoll -> CreatePrFallback"));
    assert!(trail.contains("FinalPoll -> Escalated"));
}

/// Without `agents:debug`, escalation is summary-only.
#[test]
fn escalation_without_debug_is_silent() {
    let harness = Harness::new();
    harness.host.script_heads([SNAPSHOT]);

    let session = harness.run().expect("recover");

    assert_eq!(session.outcome, RecoveryOutcome::Escalated);
    assert!(harness.host.labels.borrow().has(labels::SYNC_REQUIRED));
    assert!(harness.host.comments.borrow().is_empty());
    let summary = harness.summary();
    assert!(summary.contains("reason=gate-failed"));
    assert!(summary.contains("trace=trace-9"));
}

/// While a prior escalation is outstanding, remediation stays suppressed:
/// the session only watches the short-poll window and stays Escalated when
/// the head does not move. No second escalation comment is posted.
#[test]
fn outstanding_escalation_suppresses_remediation() {
    let harness = Harness::new();
    harness.host.labels.borrow_mut().insert(labels::SYNC_REQUIRED);
    harness.host.labels.borrow_mut().insert(labels::DEBUG);
    harness.host.script_heads([SNAPSHOT]);

    let session = harness.run().expect("recover");

    assert_eq!(session.outcome, RecoveryOutcome::Escalated);
    assert!(session.attempts.is_empty());
    assert!(harness.connector.dispatched.borrow().is_empty());
    assert!(harness.host.labels.borrow().has(labels::SYNC_REQUIRED));
    assert!(harness.host.comments.borrow().is_empty());
    assert!(harness.audit_trail().contains("remediation suppressed"));
}

/// A commit landing after escalation is the one event that clears the sync
/// label: the watch-only session observes the new head and recovers.
#[test]
fn new_head_after_escalation_clears_sync_label() {
    let harness = Harness::new();
    harness.host.labels.borrow_mut().insert(labels::SYNC_REQUIRED);
    harness.host.script_heads([ADVANCED]);

    let session = harness.run().expect("recover");

    assert_eq!(session.outcome, RecoveryOutcome::Recovered);
    assert!(session.attempts.is_empty());
    assert!(harness.connector.dispatched.borrow().is_empty());
    assert!(!harness.host.labels.borrow().has(labels::SYNC_REQUIRED));
    assert!(harness.audit_trail().contains("-> Recovered"));
}

/// Connector failure counts as "no new head SHA" and drives the fallback,
/// then escalation; it never aborts the session.
#[test]
fn connector_failure_falls_back_then_escalates() {
    let mut harness = Harness::new();
    harness.connector = ScriptedConnector::failing();
    harness.host.script_heads([SNAPSHOT]);

    let session = harness.run().expect("recover");

    assert_eq!(session.outcome, RecoveryOutcome::Escalated);
    assert_eq!(session.attempts.len(), 2);
    // Both attempts were emitted even though delivery failed.
    assert_eq!(harness.connector.dispatched.borrow().len(), 2);
    assert!(harness.audit_trail().contains("dispatch failed action=update-branch"));
    assert!(harness.audit_trail().contains("dispatch failed action=create-pr"));
}

/// Remediation payloads carry the idempotency and routing metadata.
#[test]
fn payloads_carry_round_trace_and_comment_metadata() {
    let harness = Harness::new();
    harness.host.script_heads([SNAPSHOT]);

    harness.run().expect("recover");

    let dispatched = harness.connector.dispatched.borrow();
    let pr = test_pr(42);
    for payload in dispatched.iter() {
        assert_eq!(payload.issue, 42);
        assert_eq!(payload.base, pr.base_ref);
        assert_eq!(payload.head, pr.head_ref);
        assert_eq!(payload.comment_id, 555);
        assert_eq!(payload.trace, "trace-9");
        assert_eq!(payload.round, 3);
        assert_eq!(payload.agent, "codex");
    }
}

/// A recovered session emits step summaries for both dispatches plus the
/// terminal state.
#[test]
fn summary_records_every_recovery_step() {
    let harness = Harness::new();
    harness.host.script_heads([SNAPSHOT, SNAPSHOT, ADVANCED]);

    harness.run().expect("recover");

    let summary = harness.summary();
    let lines: Vec<&str> = summary.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|line| line.starts_with("DISPATCH: ok=false")));
    assert!(lines.iter().all(|line| line.contains("trace=trace-9")));
}
