//! Canonical reason codes and the total raw-reason normalizer.

use serde::{Deserialize, Serialize};

/// Closed vocabulary for dispatch decisions.
///
/// Upstream callers evolve their reason strings freely; downstream
/// consumers (summary lines, dashboards, escalation text) pattern-match on
/// this small stable set. The mapping from raw strings is many-to-one, see
/// [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    Ok,
    MissingLabel,
    GatePending,
    GateFailed,
    CapReached,
    NoLinkedPr,
    NoActivationFound,
    LockHeld,
    InstructionEmpty,
    NoHumanActivation,
}

impl ReasonCode {
    /// Kebab-case wire spelling used in summary lines and dashboards.
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::Ok => "ok",
            ReasonCode::MissingLabel => "missing-label",
            ReasonCode::GatePending => "gate-pending",
            ReasonCode::GateFailed => "gate-failed",
            ReasonCode::CapReached => "cap-reached",
            ReasonCode::NoLinkedPr => "no-linked-pr",
            ReasonCode::NoActivationFound => "no-activation-found",
            ReasonCode::LockHeld => "lock-held",
            ReasonCode::InstructionEmpty => "instruction-empty",
            ReasonCode::NoHumanActivation => "no-human-activation",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a free-form, case-insensitive reason string to a canonical code.
///
/// Total: every input resolves to exactly one code. Unrecognized tokens and
/// the empty string collapse into [`ReasonCode::GateFailed`], the
/// conservative "do not dispatch" bucket. Pure: no side effects, same input
/// always yields the same output.
pub fn normalize(raw: &str) -> ReasonCode {
    match raw.trim().to_ascii_lowercase().as_str() {
        "ok" => ReasonCode::Ok,
        "missing-label" | "label-missing" | "no-agent-label" => ReasonCode::MissingLabel,
        "gate-pending" | "gate-running" | "gate-in-progress" | "gate-queued" => {
            ReasonCode::GatePending
        }
        "cap-reached" | "at-cap" | "run-cap" | "concurrency-cap" => ReasonCode::CapReached,
        "no-linked-pr" | "no-pr" | "pr-missing" | "pr-not-found" => ReasonCode::NoLinkedPr,
        "no-activation-found" | "activation-missing" | "activation-not-found" => {
            ReasonCode::NoActivationFound
        }
        "lock-held" | "locked" | "lock-busy" => ReasonCode::LockHeld,
        "instruction-empty" | "empty-instruction" => ReasonCode::InstructionEmpty,
        "no-human-activation" | "bot-activation" | "non-human-activation" => {
            ReasonCode::NoHumanActivation
        }
        // `gate-failed` and its legacy spellings, plus the default arm for
        // everything unrecognized (including `paused` and `sync-required`,
        // which deliberately collapse into the gate bucket).
        _ => ReasonCode::GateFailed,
    }
}
