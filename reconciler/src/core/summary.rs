//! Deterministic one-line dispatch summaries.
//!
//! Field order and literal token spelling are part of the contract:
//! dashboards grep for `reason=` and `ok=` tokens.

use crate::core::reason::ReasonCode;
use crate::core::types::DispatchDecision;

/// Render the audit line for one decision.
///
/// When `ok=true` the reason is forced to `ok` regardless of what was
/// computed upstream, so the trail never shows a contradictory
/// `ok=true reason=gate-failed` line.
pub fn render(decision: &DispatchDecision) -> String {
    let reason = if decision.ok {
        ReasonCode::Ok
    } else {
        decision.reason
    };
    format!(
        "DISPATCH: ok={} path={} reason={} pr={} activation={} agent={} head={} cap={} active={} trace={}",
        decision.ok,
        decision.path.as_str(),
        reason,
        format_pr_number(decision.pr.number),
        format_activation(decision.activation_id),
        format_agent(&decision.agent),
        format_head(&decision.head_sha),
        format_cap(decision.run_cap),
        format_active(decision.active_run_count),
        format_trace(decision.trace.as_deref()),
    )
}

/// `#<n>` only when present and non-zero, else `#?`.
fn format_pr_number(number: Option<u64>) -> String {
    match number {
        Some(n) if n > 0 => format!("#{n}"),
        _ => "#?".to_string(),
    }
}

fn format_activation(id: Option<u64>) -> String {
    match id {
        Some(id) => id.to_string(),
        None => "none".to_string(),
    }
}

fn format_agent(agent: &str) -> &str {
    if agent.trim().is_empty() { "?" } else { agent }
}

/// First 7 characters, or the literal `unknown` when absent or already
/// the literal "unknown".
fn format_head(sha: &str) -> String {
    let sha = sha.trim();
    if sha.is_empty() || sha == "unknown" {
        return "unknown".to_string();
    }
    sha.chars().take(7).collect()
}

fn format_cap(cap: Option<u32>) -> String {
    match cap {
        Some(cap) => cap.to_string(),
        None => "?".to_string(),
    }
}

/// `?` when the host's run accounting was unreadable; the raw sentinel
/// never reaches the line.
fn format_active(active: Option<u32>) -> String {
    match active {
        Some(active) => active.to_string(),
        None => "?".to_string(),
    }
}

fn format_trace(trace: Option<&str>) -> &str {
    match trace {
        Some(trace) if !trace.trim().is_empty() => trace,
        _ => "-",
    }
}
