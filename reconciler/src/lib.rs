//! Reconciliation engine for pull-request keepalive rounds.
//!
//! This crate decides whether another agent execution round should be
//! dispatched for a pull request, and recovers when a round reports success
//! without landing a commit. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic decision logic (reason normalization,
//!   gate classification, admission control, summary rendering). No I/O,
//!   fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (host API via `gh`, connector
//!   dispatch, audit trail, job summary, config). Isolated to enable
//!   scripted fakes in tests.
//!
//! Orchestration modules ([`evaluate`], [`recovery`]) coordinate core logic
//! with I/O to implement CLI commands.

pub mod core;
pub mod evaluate;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod recovery;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
