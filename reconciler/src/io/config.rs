//! Reconciler configuration stored as TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Reconciler configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Maximum simultaneously active agent rounds for the owning scope.
    pub run_cap: u32,

    /// Identifier of the acting agent, threaded into dispatch payloads.
    pub agent: String,

    /// Seconds between head-SHA reads while polling.
    pub poll_interval_secs: u64,

    /// Wall-clock budget for the pre-remediation short poll.
    pub short_poll_budget_secs: u64,

    /// Wall-clock budget for the poll after `update-branch`.
    pub long_poll_budget_secs: u64,

    /// Wall-clock budget for the poll after `create-pr`.
    pub final_poll_budget_secs: u64,

    /// Timeout for each `gh` invocation.
    pub gh_timeout_secs: u64,

    /// Truncate `gh` stdout/stderr beyond this many bytes.
    pub gh_output_limit_bytes: usize,

    /// Directory for trace-keyed audit records.
    pub audit_dir: PathBuf,

    /// Job summary file. Falls back to `GITHUB_STEP_SUMMARY` when unset.
    pub summary_path: Option<PathBuf>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            run_cap: 3,
            agent: "codex".to_string(),
            poll_interval_secs: 10,
            short_poll_budget_secs: 2 * 60,
            long_poll_budget_secs: 10 * 60,
            final_poll_budget_secs: 2 * 60,
            gh_timeout_secs: 2 * 60,
            gh_output_limit_bytes: 1_000_000,
            audit_dir: PathBuf::from(".reconciler/audit"),
            summary_path: None,
        }
    }
}

impl ReconcilerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.run_cap == 0 {
            return Err(anyhow!("run_cap must be > 0"));
        }
        if self.agent.trim().is_empty() {
            return Err(anyhow!("agent must be non-empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be > 0"));
        }
        for (name, value) in [
            ("short_poll_budget_secs", self.short_poll_budget_secs),
            ("long_poll_budget_secs", self.long_poll_budget_secs),
            ("final_poll_budget_secs", self.final_poll_budget_secs),
            ("gh_timeout_secs", self.gh_timeout_secs),
        ] {
            if value == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        if self.gh_output_limit_bytes == 0 {
            return Err(anyhow!("gh_output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn gh_timeout(&self) -> Duration {
        Duration::from_secs(self.gh_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ReconcilerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ReconcilerConfig> {
    if !path.exists() {
        let cfg = ReconcilerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ReconcilerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ReconcilerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ReconcilerConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = ReconcilerConfig {
            run_cap: 5,
            summary_path: Some(temp.path().join("summary.md")),
            ..ReconcilerConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn zero_cap_is_rejected() {
        let cfg = ReconcilerConfig {
            run_cap: 0,
            ..ReconcilerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_poll_budget_is_rejected() {
        let cfg = ReconcilerConfig {
            long_poll_budget_secs: 0,
            ..ReconcilerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "run_cap = 7\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.run_cap, 7);
        assert_eq!(cfg.agent, "codex");
    }
}
