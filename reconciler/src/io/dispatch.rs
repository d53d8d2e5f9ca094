//! Remediation dispatch toward the branch-staging connector.
//!
//! The connector stages commits onto the working branch (`update-branch`)
//! or opens a temporary pull request targeting it (`create-pr`), squash
//! merges it and deletes the temporary branch once merged. Idempotency is
//! keyed on `comment_id` + `trace` at the receiving end: repeated delivery
//! of the same payload must not duplicate work.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::core::types::RemediationKind;
use crate::io::config::ReconcilerConfig;
use crate::io::process::run_command_with_timeout;

const PAYLOAD_SCHEMA: &str = include_str!("../../schemas/remediation_payload.schema.json");

/// Wire payload for one remediation dispatch. Field names are part of the
/// connector contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationPayload {
    pub action: RemediationKind,
    pub issue: u64,
    pub base: String,
    pub head: String,
    pub comment_id: u64,
    pub comment_url: String,
    pub agent: String,
    pub trace: String,
    pub round: u32,
}

/// Abstraction over the remediation transport.
pub trait Connector {
    fn dispatch(&self, payload: &RemediationPayload) -> Result<()>;
}

/// Validate a serialized payload against the embedded schema
/// (Draft 2020-12).
pub fn validate_payload(payload: &RemediationPayload) -> Result<()> {
    let schema: Value = serde_json::from_str(PAYLOAD_SCHEMA).context("parse payload schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile payload schema")?;
    let instance = serde_json::to_value(payload).context("serialize payload")?;
    let messages: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("payload validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}

/// Connector that emits a `repository_dispatch` event via `gh api`.
pub struct RepositoryDispatchConnector {
    repo: String,
    event_type: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl RepositoryDispatchConnector {
    pub const DEFAULT_EVENT_TYPE: &'static str = "keepalive-remediation";

    pub fn new(repo: impl Into<String>, config: &ReconcilerConfig) -> Self {
        Self {
            repo: repo.into(),
            event_type: Self::DEFAULT_EVENT_TYPE.to_string(),
            timeout: config.gh_timeout(),
            output_limit_bytes: config.gh_output_limit_bytes,
        }
    }
}

impl Connector for RepositoryDispatchConnector {
    fn dispatch(&self, payload: &RemediationPayload) -> Result<()> {
        validate_payload(payload)?;
        let body = serde_json::json!({
            "event_type": self.event_type,
            "client_payload": payload,
        });
        let stdin = serde_json::to_vec(&body).context("serialize dispatch body")?;

        let path = format!("repos/{}/dispatches", self.repo);
        let mut cmd = Command::new("gh");
        cmd.args(["api", "--method", "POST", &path, "--input", "-"]);
        info!(
            action = payload.action.as_str(),
            issue = payload.issue,
            trace = %payload.trace,
            "dispatching remediation"
        );
        let output = run_command_with_timeout(
            cmd,
            Some(stdin.as_slice()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("gh api POST {path}"))?;
        if output.timed_out {
            bail!("remediation dispatch timed out after {:?}", self.timeout);
        }
        if !output.status.success() {
            bail!(
                "remediation dispatch failed: {}",
                output.stderr_text().trim()
            );
        }
        Ok(())
    }
}
