//! Shared deterministic types for reconciliation core logic.
//!
//! These types define stable contracts between core components. They should
//! not depend on external state or I/O and must remain deterministic across
//! invocations: all cross-invocation state lives on the pull request itself
//! (labels, head SHA, comments) and in the append-only audit trail.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::reason::ReasonCode;

/// Label strings with contractual meaning. All other labels on a pull
/// request are ignored and must be left untouched.
pub mod labels {
    /// Presence is a precondition for any dispatch.
    pub const AGENT_CODEX: &str = "agent:codex";
    /// Presence forces the classifier to refuse dispatch unconditionally.
    pub const PAUSE: &str = "agents:pause";
    /// Set when branch recovery escalated; cleared only when a recovery
    /// step observes a new head SHA.
    pub const SYNC_REQUIRED: &str = "agents:sync-required";
    /// Enables the human-visible escalation comment on exhausted recovery.
    pub const DEBUG: &str = "agents:debug";
}

/// Instruction sentinel an activation comment must carry to authorize a
/// keepalive round.
pub const INSTRUCTION_SENTINEL: &str = "/keepalive";

/// Identifies one pull request. Owned by the host; read-only to this system
/// except for the contract labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    /// Positive PR number, or `None` when unresolvable.
    pub number: Option<u64>,
    pub head_ref: String,
    /// The unit of progress: any change means a commit landed.
    pub head_sha: String,
    pub base_ref: String,
}

impl PullRequestRef {
    /// A reference where nothing could be resolved.
    pub fn unknown() -> Self {
        Self {
            number: None,
            head_ref: String::new(),
            head_sha: String::new(),
            base_ref: String::new(),
        }
    }

    /// A partially known reference carrying only a fallback number.
    pub fn with_number(number: u64) -> Self {
        Self {
            number: Some(number),
            ..Self::unknown()
        }
    }
}

/// Set of string labels attached to a pull request.
///
/// Ordered so serialized snapshots stay stable. Insert/remove are idempotent
/// to tolerate at-least-once delivery of triggering events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn has(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    /// Returns `true` if the label was newly added.
    pub fn insert(&mut self, label: &str) -> bool {
        self.0.insert(label.to_string())
    }

    /// Returns `true` if the label was present.
    pub fn remove(&mut self, label: &str) -> bool {
        self.0.remove(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Conclusion of the most recent gate run for a head SHA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateConclusion {
    Success,
    Failure,
    Cancelled,
    Pending,
    Missing,
}

/// One job record inside a gate run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateJob {
    pub name: String,
    pub conclusion: GateConclusion,
}

/// The most recent CI gate execution associated with a head SHA.
///
/// Immutable once concluded; a new commit always produces a new run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRun {
    pub conclusion: GateConclusion,
    pub run_id: u64,
    pub jobs: Vec<GateJob>,
    /// Raw log text, used only for heuristic classification.
    pub logs: String,
}

impl GateRun {
    /// Heuristic: the run failed because the host throttled it, not because
    /// the change is bad. Annotates the raw reason; never changes the
    /// canonical code.
    pub fn rate_limited(&self) -> bool {
        static PATTERN: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(?i)rate.?limit(ed)?|\b429\b|secondary rate|abuse detection").unwrap()
        });
        PATTERN.is_match(&self.logs)
    }
}

/// Why an activation record does not authorize a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationValidity {
    Valid,
    /// The comment exists but lacks a recognizable instruction.
    Unstructured,
    /// The acting party fails the human/trust check.
    Untrusted,
}

/// The comment that authorized the current keepalive round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub id: Option<u64>,
    pub author: String,
    pub bot: bool,
    pub from_fork: bool,
    pub instruction: String,
    pub round: Option<u32>,
    pub trace: Option<String>,
}

impl ActivationRecord {
    /// Check whether this record satisfies the human-activation
    /// precondition. Absence or invalidity is a classification outcome, not
    /// a hard failure.
    pub fn validity(&self) -> ActivationValidity {
        if self.instruction.trim().is_empty() {
            return ActivationValidity::Unstructured;
        }
        let trusted = !self.bot
            && !self.from_fork
            && !self.author.trim().is_empty()
            && self.instruction.contains(INSTRUCTION_SENTINEL)
            && self.id.is_some_and(|id| id > 0)
            && self.round.is_some_and(|round| round > 0)
            && self.trace.as_deref().is_some_and(|t| !t.trim().is_empty());
        if trusted {
            ActivationValidity::Valid
        } else {
            ActivationValidity::Untrusted
        }
    }
}

/// The trigger that originated a classifier evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPath {
    Gate,
    Comment,
    Unknown,
}

impl DispatchPath {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchPath::Gate => "gate",
            DispatchPath::Comment => "comment",
            DispatchPath::Unknown => "unknown",
        }
    }
}

/// The classifier's output. Created fresh on every evaluation and never
/// mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchDecision {
    pub ok: bool,
    pub path: DispatchPath,
    pub reason: ReasonCode,
    /// Pre-normalization reason string, preserved so dashboards keep the
    /// diagnostic signal the canonical code collapses away.
    pub raw_reason: String,
    pub pr: PullRequestRef,
    pub activation_id: Option<u64>,
    pub agent: String,
    pub head_sha: String,
    /// Host-reported active rounds; `None` when the accounting was
    /// unreadable.
    pub active_run_count: Option<u32>,
    pub run_cap: Option<u32>,
    pub trace: Option<String>,
}

/// Remediation action kind, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemediationKind {
    #[serde(rename = "update-branch")]
    UpdateBranch,
    #[serde(rename = "create-pr")]
    CreatePr,
}

impl RemediationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RemediationKind::UpdateBranch => "update-branch",
            RemediationKind::CreatePr => "create-pr",
        }
    }
}

/// One step of the branch-recovery protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub kind: RemediationKind,
    /// Head SHA captured before the attempt.
    pub snapshot_head_sha: String,
    /// Head SHA observed after polling, when any poll succeeded.
    pub observed_head_sha: Option<String>,
    /// `observed_head_sha` differs from `snapshot_head_sha`.
    pub succeeded: bool,
}

/// Terminal outcome of a recovery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryOutcome {
    Recovered,
    Escalated,
}

/// An ordered sequence of at most two remediation attempts plus a terminal
/// outcome. Created when a round reports "done" with an unchanged head SHA,
/// discarded once it terminates; nothing survives past the triggering round
/// except the `agents:sync-required` label and the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySession {
    pub pr_number: u64,
    pub round: u32,
    pub trace: String,
    pub attempts: Vec<RecoveryAttempt>,
    pub outcome: RecoveryOutcome,
}
