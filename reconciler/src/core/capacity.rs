//! Soft admission control over concurrently active agent rounds.

/// Caps the number of simultaneously active rounds for one scope (a pull
/// request or an organization-wide pool, depending on configuration).
///
/// The active count is read from the host's own accounting and never owned
/// here; this guard only gates the dispatch bit. A race between the read
/// and the actual dispatch is tolerated and self-corrects within one
/// polling interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionGuard {
    run_cap: u32,
}

impl AdmissionGuard {
    pub fn new(run_cap: u32) -> Self {
        Self { run_cap }
    }

    pub fn run_cap(self) -> u32 {
        self.run_cap
    }

    /// `true` while the scope has spare capacity for one more round.
    pub fn admit(self, active_run_count: u32) -> bool {
        active_run_count < self.run_cap
    }
}
