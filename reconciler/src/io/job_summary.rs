//! Durable job-level summary record.
//!
//! The dispatch summary emitter appends its line here in addition to
//! returning it. The path comes from config, falling back to the
//! `GITHUB_STEP_SUMMARY` environment variable; when neither is set the
//! append is skipped (the line still reaches the audit trail).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct JobSummary {
    path: Option<PathBuf>,
}

impl JobSummary {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Resolve the target: explicit config path wins, then
    /// `GITHUB_STEP_SUMMARY`.
    pub fn from_config_path(configured: Option<PathBuf>) -> Self {
        let path = configured.or_else(|| std::env::var_os("GITHUB_STEP_SUMMARY").map(PathBuf::from));
        Self { path }
    }

    /// Append one summary line. Tolerates repeat appends of the same line.
    pub fn append(&self, line: &str) -> Result<()> {
        let Some(path) = &self.path else {
            debug!("no job summary target, skipping append");
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create summary dir {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open job summary {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("append job summary {}", path.display()))?;
        Ok(())
    }
}
