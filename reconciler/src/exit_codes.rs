//! Stable exit codes for reconciler CLI commands.

/// Command succeeded; for `evaluate`, a dispatch was approved.
pub const OK: i32 = 0;
/// Command failed due to invalid flags/config or an unrecoverable host error.
pub const INVALID: i32 = 1;
/// `reconciler evaluate` refused dispatch (decision `ok=false`).
pub const SKIP: i32 = 2;
/// `reconciler recover` exhausted remediation and escalated.
pub const ESCALATED: i32 = 3;
