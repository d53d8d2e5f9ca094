//! End-to-end classifier scenarios through `evaluate_dispatch`.
//!
//! Drives the orchestration layer with scripted hosts and verifies both the
//! decision and the emitted summary line, including the contractual token
//! spellings dashboards grep for.

use std::fs;

use reconciler::core::reason::ReasonCode;
use reconciler::core::types::{DispatchPath, GateConclusion, labels};
use reconciler::evaluate::{EvaluateRequest, evaluate_dispatch};
use reconciler::io::audit::AuditLog;
use reconciler::io::config::ReconcilerConfig;
use reconciler::io::job_summary::JobSummary;
use reconciler::test_support::{ScriptedHost, test_gate};

struct Scenario {
    host: ScriptedHost,
    temp: tempfile::TempDir,
}

impl Scenario {
    fn new() -> Self {
        Self {
            host: ScriptedHost::passing(42),
            temp: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn evaluate(&self) -> (reconciler::core::types::DispatchDecision, String) {
        let summary_path = self.temp.path().join("summary.md");
        let summary = JobSummary::new(Some(summary_path.clone()));
        let audit = AuditLog::new(self.temp.path().join("audit"));
        let decision = evaluate_dispatch(
            &self.host,
            &ReconcilerConfig::default(),
            &EvaluateRequest {
                path: DispatchPath::Gate,
                pr_number: Some(42),
                fallback_number: None,
                trace: Some("trace-1".to_string()),
            },
            &summary,
            &audit,
        )
        .expect("evaluate");
        let line = fs::read_to_string(&summary_path).expect("read summary");
        (decision, line)
    }
}

#[test]
fn normal_pass_dispatches() {
    let scenario = Scenario::new();
    let (decision, line) = scenario.evaluate();

    assert!(decision.ok);
    assert_eq!(decision.reason, ReasonCode::Ok);
    assert!(line.contains("ok=true reason=ok"));
    assert!(line.contains("path=gate"));
    assert!(line.contains("pr=#42"));
    assert!(line.contains("cap=3 active=0"));
    assert!(line.contains("trace=trace-1"));
}

#[test]
fn cap_reached_refuses() {
    let mut scenario = Scenario::new();
    scenario.host.active_runs = 3;
    let (decision, line) = scenario.evaluate();

    assert!(!decision.ok);
    assert_eq!(decision.reason, ReasonCode::CapReached);
    assert!(line.contains("ok=false"));
    assert!(line.contains("reason=cap-reached"));
    assert!(line.contains("cap=3 active=3"));
}

#[test]
fn missing_label_precedes_gate_success() {
    let mut scenario = Scenario::new();
    scenario.host.labels.borrow_mut().remove(labels::AGENT_CODEX);
    let (decision, line) = scenario.evaluate();

    assert_eq!(decision.reason, ReasonCode::MissingLabel);
    assert!(line.contains("reason=missing-label"));
}

#[test]
fn pause_label_collapses_to_gate_failed() {
    let mut scenario = Scenario::new();
    scenario.host.labels.borrow_mut().insert(labels::PAUSE);
    let (decision, line) = scenario.evaluate();

    assert!(!decision.ok);
    assert_eq!(decision.reason, ReasonCode::GateFailed);
    assert_eq!(decision.raw_reason, "paused");
    // The public line shows only the canonical bucket.
    assert!(line.contains("reason=gate-failed"));
}

#[test]
fn pending_gate_is_distinguished_from_failure() {
    let mut scenario = Scenario::new();
    scenario.host.gate = Some(test_gate(GateConclusion::Pending));
    let (decision, line) = scenario.evaluate();

    assert_eq!(decision.reason, ReasonCode::GatePending);
    assert!(line.contains("reason=gate-pending"));
}

#[test]
fn missing_activation_refuses() {
    let mut scenario = Scenario::new();
    scenario.host.activation = None;
    let (decision, _) = scenario.evaluate();
    assert_eq!(decision.reason, ReasonCode::NoActivationFound);
}

#[test]
fn head_sha_is_truncated_in_summary() {
    let scenario = Scenario::new();
    let (_, line) = scenario.evaluate();
    assert!(line.contains("head=0123456 "));
}
