//! Append-only audit records keyed by trace identifier.
//!
//! One file per trace under the audit directory; one line per classifier
//! evaluation or recovery transition, so a later session (or a human) can
//! reconstruct what was attempted.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, trace: &str) -> PathBuf {
        let key = if trace.trim().is_empty() {
            "untraced"
        } else {
            trace.trim()
        };
        self.dir.join(format!("{}.log", sanitize(key)))
    }

    /// Append one line to the trace's record, creating the file as needed.
    pub fn append(&self, trace: &str, line: &str) -> Result<()> {
        let path = self.path_for(trace);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create audit dir {}", parent.display()))?;
        }
        debug!(path = %path.display(), line, "audit append");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open audit record {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("append audit {}", path.display()))?;
        Ok(())
    }

    /// Read the full record for a trace. Missing records read as empty.
    pub fn read(&self, trace: &str) -> Result<String> {
        let path = self.path_for(trace);
        if !path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&path).with_context(|| format!("read audit {}", path.display()))
    }
}

/// Keep trace-derived file names on a safe alphabet.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Sanitized file-name key (exposed for path assertions in tests).
pub fn record_name(trace: &str) -> String {
    format!("{}.log", sanitize(trace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_preserve_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::new(temp.path().join("audit"));

        log.append("trace-1", "Idle -> Snapshotting").expect("append");
        log.append("trace-1", "Snapshotting -> ShortPoll").expect("append");
        log.append("trace-1", "ShortPoll -> UpdateBranchDispatch")
            .expect("append");

        let record = log.read("trace-1").expect("read");
        let lines: Vec<&str> = record.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Idle -> Snapshotting",
                "Snapshotting -> ShortPoll",
                "ShortPoll -> UpdateBranchDispatch",
            ]
        );
    }

    #[test]
    fn traces_are_isolated() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::new(temp.path().join("audit"));

        log.append("trace-a", "a-line").expect("append");
        log.append("trace-b", "b-line").expect("append");

        assert_eq!(log.read("trace-a").expect("read"), "a-line\n");
        assert_eq!(log.read("trace-b").expect("read"), "b-line\n");
    }

    #[test]
    fn missing_record_reads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::new(temp.path().join("audit"));
        assert_eq!(log.read("nothing").expect("read"), "");
    }

    #[test]
    fn hostile_trace_names_are_sanitized() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::new(temp.path().join("audit"));
        log.append("../../etc/passwd", "x").expect("append");
        assert!(temp
            .path()
            .join("audit")
            .join(record_name("../../etc/passwd"))
            .exists());
    }

    #[test]
    fn empty_trace_falls_back_to_untraced() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::new(temp.path().join("audit"));
        log.append("  ", "line").expect("append");
        assert_eq!(log.read("").expect("read"), "line\n");
    }
}
