//! Side-effecting adapters: host API, connector dispatch, durable records.

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod host;
pub mod job_summary;
pub mod process;
