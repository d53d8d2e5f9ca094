//! Host API seam for pull-request metadata.
//!
//! The [`HostApi`] trait decouples classification and recovery from the
//! source-control host (currently GitHub via the `gh` CLI). Tests use
//! scripted hosts that return predetermined state without spawning
//! processes. Lookup failures surface as absent values to callers that
//! classify, never as aborts.

use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::core::types::{
    ActivationRecord, GateConclusion, GateJob, GateRun, INSTRUCTION_SENTINEL, LabelSet,
    PullRequestRef,
};
use crate::io::config::ReconcilerConfig;
use crate::io::process::run_command_with_timeout;

/// Read/write operations against the host's pull-request state.
///
/// Labels are the only mutable resource; `add_label`/`remove_label` must be
/// idempotent (already-set / already-absent is a no-op) to tolerate
/// at-least-once delivery of triggering events.
pub trait HostApi {
    fn pull_request(&self, number: u64) -> Result<Option<PullRequestRef>>;
    fn head_sha(&self, number: u64) -> Result<Option<String>>;
    fn labels(&self, number: u64) -> Result<LabelSet>;
    fn add_label(&self, number: u64, label: &str) -> Result<()>;
    fn remove_label(&self, number: u64, label: &str) -> Result<()>;
    fn post_comment(&self, number: u64, body: &str) -> Result<()>;
    /// Most recent gate run for a head SHA, or `None` when absent.
    fn gate_run(&self, head_sha: &str) -> Result<Option<GateRun>>;
    /// Most recent comment carrying the instruction sentinel, or `None`.
    fn latest_activation(&self, number: u64) -> Result<Option<ActivationRecord>>;
    /// Read-only view of the host's running-workflow accounting.
    fn active_run_count(&self) -> Result<u32>;
}

/// Host implementation that shells out to `gh api`.
pub struct GhHost {
    repo: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl GhHost {
    pub fn new(repo: impl Into<String>, config: &ReconcilerConfig) -> Self {
        Self {
            repo: repo.into(),
            timeout: config.gh_timeout(),
            output_limit_bytes: config.gh_output_limit_bytes,
        }
    }

    /// GET an API path, returning `Ok(None)` on 404.
    fn api_get(&self, path: &str) -> Result<Option<Value>> {
        let mut cmd = Command::new("gh");
        cmd.args(["api", path]);
        debug!(path, "gh api get");
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("gh api {path}"))?;
        if output.timed_out {
            bail!("gh api {path} timed out after {:?}", self.timeout);
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            if stderr.contains("HTTP 404") {
                return Ok(None);
            }
            bail!("gh api {path} failed: {}", stderr.trim());
        }
        let value: Value = serde_json::from_str(&output.stdout_text())
            .with_context(|| format!("parse gh api {path} response"))?;
        Ok(Some(value))
    }

    /// Mutating call with a JSON body fed through stdin.
    fn api_send(&self, method: &str, path: &str, body: Option<&Value>) -> Result<()> {
        let mut cmd = Command::new("gh");
        cmd.args(["api", "--method", method, path]);
        let payload;
        let stdin = match body {
            Some(value) => {
                cmd.args(["--input", "-"]);
                payload = serde_json::to_vec(value).context("serialize request body")?;
                Some(payload.as_slice())
            }
            None => None,
        };
        debug!(method, path, "gh api send");
        let output = run_command_with_timeout(cmd, stdin, self.timeout, self.output_limit_bytes)
            .with_context(|| format!("gh api {method} {path}"))?;
        if output.timed_out {
            bail!("gh api {method} {path} timed out after {:?}", self.timeout);
        }
        if !output.status.success() {
            bail!(
                "gh api {method} {path} failed: {}",
                output.stderr_text().trim()
            );
        }
        Ok(())
    }
}

impl HostApi for GhHost {
    fn pull_request(&self, number: u64) -> Result<Option<PullRequestRef>> {
        let path = format!("repos/{}/pulls/{number}", self.repo);
        Ok(self.api_get(&path)?.map(|value| parse_pull_request(&value)))
    }

    fn head_sha(&self, number: u64) -> Result<Option<String>> {
        Ok(self
            .pull_request(number)?
            .map(|pr| pr.head_sha)
            .filter(|sha| !sha.is_empty()))
    }

    fn labels(&self, number: u64) -> Result<LabelSet> {
        let path = format!("repos/{}/issues/{number}/labels?per_page=100", self.repo);
        match self.api_get(&path)? {
            Some(value) => Ok(parse_labels(&value)),
            None => Ok(LabelSet::new()),
        }
    }

    fn add_label(&self, number: u64, label: &str) -> Result<()> {
        // Read-then-write keeps the call a no-op when already set.
        if self.labels(number)?.has(label) {
            return Ok(());
        }
        let path = format!("repos/{}/issues/{number}/labels", self.repo);
        self.api_send("POST", &path, Some(&serde_json::json!({ "labels": [label] })))
    }

    fn remove_label(&self, number: u64, label: &str) -> Result<()> {
        if !self.labels(number)?.has(label) {
            return Ok(());
        }
        let encoded = encode_path_segment(label);
        let path = format!("repos/{}/issues/{number}/labels/{encoded}", self.repo);
        self.api_send("DELETE", &path, None)
    }

    fn post_comment(&self, number: u64, body: &str) -> Result<()> {
        let path = format!("repos/{}/issues/{number}/comments", self.repo);
        self.api_send("POST", &path, Some(&serde_json::json!({ "body": body })))
    }

    fn gate_run(&self, head_sha: &str) -> Result<Option<GateRun>> {
        if head_sha.trim().is_empty() {
            return Ok(None);
        }
        let path = format!(
            "repos/{}/actions/runs?head_sha={head_sha}&per_page=1",
            self.repo
        );
        let Some(value) = self.api_get(&path)? else {
            return Ok(None);
        };
        let Some(mut run) = parse_gate_run(&value) else {
            return Ok(None);
        };
        let jobs_path = format!("repos/{}/actions/runs/{}/jobs", self.repo, run.run_id);
        if let Some(jobs) = self.api_get(&jobs_path)? {
            run.jobs = parse_gate_jobs(&jobs);
        }
        Ok(Some(run))
    }

    fn latest_activation(&self, number: u64) -> Result<Option<ActivationRecord>> {
        let path = format!("repos/{}/issues/{number}/comments?per_page=100", self.repo);
        let Some(value) = self.api_get(&path)? else {
            return Ok(None);
        };
        Ok(parse_latest_activation(&value))
    }

    fn active_run_count(&self) -> Result<u32> {
        let path = format!("repos/{}/actions/runs?status=in_progress&per_page=1", self.repo);
        let value = self
            .api_get(&path)?
            .ok_or_else(|| anyhow!("actions runs endpoint not found for {}", self.repo))?;
        Ok(value
            .get("total_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32)
    }
}

fn encode_path_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            ':' => "%3A".to_string(),
            ' ' => "%20".to_string(),
            '/' => "%2F".to_string(),
            other => other.to_string(),
        })
        .collect()
}

fn str_field(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Map a `pulls/{n}` response. Malformed fields degrade to empty strings,
/// which the classifier treats as absent.
pub(crate) fn parse_pull_request(value: &Value) -> PullRequestRef {
    PullRequestRef {
        number: value.get("number").and_then(Value::as_u64).filter(|n| *n > 0),
        head_ref: str_field(value, "/head/ref"),
        head_sha: str_field(value, "/head/sha"),
        base_ref: str_field(value, "/base/ref"),
    }
}

pub(crate) fn parse_labels(value: &Value) -> LabelSet {
    let names = value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    LabelSet::from_names(names)
}

/// Map an `actions/runs?head_sha=...` response to the most recent run.
pub(crate) fn parse_gate_run(value: &Value) -> Option<GateRun> {
    let run = value.pointer("/workflow_runs/0")?;
    let run_id = run.get("id").and_then(Value::as_u64)?;
    let status = run.get("status").and_then(Value::as_str).unwrap_or_default();
    let conclusion = if status == "completed" {
        match run.get("conclusion").and_then(Value::as_str) {
            Some("success") => GateConclusion::Success,
            Some("cancelled") => GateConclusion::Cancelled,
            Some(_) => GateConclusion::Failure,
            None => GateConclusion::Missing,
        }
    } else {
        GateConclusion::Pending
    };
    Some(GateRun {
        conclusion,
        run_id,
        jobs: Vec::new(),
        logs: String::new(),
    })
}

pub(crate) fn parse_gate_jobs(value: &Value) -> Vec<GateJob> {
    value
        .pointer("/jobs")
        .and_then(Value::as_array)
        .map(|jobs| {
            jobs.iter()
                .map(|job| GateJob {
                    name: str_field(job, "/name"),
                    conclusion: match job.get("conclusion").and_then(Value::as_str) {
                        Some("success") => GateConclusion::Success,
                        Some("cancelled") => GateConclusion::Cancelled,
                        Some(_) => GateConclusion::Failure,
                        None => GateConclusion::Pending,
                    },
                })
                .collect()
        })
        .unwrap_or_default()
}

fn round_pattern() -> &'static Regex {
    static PATTERN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\bround=(\d+)\b").unwrap());
    &PATTERN
}

fn trace_pattern() -> &'static Regex {
    static PATTERN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\btrace=([A-Za-z0-9._-]+)").unwrap());
    &PATTERN
}

/// Scan a comment list (oldest first) for the most recent activation,
/// identified by the instruction sentinel.
pub(crate) fn parse_latest_activation(value: &Value) -> Option<ActivationRecord> {
    let comments = value.as_array()?;
    let comment = comments.iter().rev().find(|comment| {
        comment
            .get("body")
            .and_then(Value::as_str)
            .is_some_and(|body| body.contains(INSTRUCTION_SENTINEL))
    })?;

    let body = str_field(comment, "/body");
    let author = str_field(comment, "/user/login");
    let bot = str_field(comment, "/user/type") == "Bot" || author.ends_with("[bot]");
    let association = str_field(comment, "/author_association");
    let from_fork = matches!(association.as_str(), "NONE" | "FIRST_TIME_CONTRIBUTOR");
    let round = round_pattern()
        .captures(&body)
        .and_then(|captures| captures[1].parse().ok());
    let trace = trace_pattern()
        .captures(&body)
        .map(|captures| captures[1].to_string());

    Some(ActivationRecord {
        id: comment.get("id").and_then(Value::as_u64),
        author,
        bot,
        from_fork,
        instruction: body,
        round,
        trace,
    })
}
