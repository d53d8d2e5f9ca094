//! Test-only scripted fakes for the host and connector seams.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::{Result, anyhow};

use crate::core::types::{
    ActivationRecord, GateConclusion, GateJob, GateRun, INSTRUCTION_SENTINEL, LabelSet,
    PullRequestRef, labels,
};
use crate::io::dispatch::{Connector, RemediationPayload};
use crate::io::host::HostApi;

/// Deterministic pull request used across tests.
pub fn test_pr(number: u64) -> PullRequestRef {
    PullRequestRef {
        number: Some(number),
        head_ref: "feature/keepalive".to_string(),
        head_sha: "0123456789abcdef0123456789abcdef01234567".to_string(),
        base_ref: "main".to_string(),
    }
}

/// Gate run with the given conclusion and empty logs.
pub fn test_gate(conclusion: GateConclusion) -> GateRun {
    GateRun {
        conclusion,
        run_id: 7001,
        jobs: vec![GateJob {
            name: "gate".to_string(),
            conclusion,
        }],
        logs: String::new(),
    }
}

/// Activation that passes both the structure and trust checks.
pub fn test_activation() -> ActivationRecord {
    ActivationRecord {
        id: Some(555),
        author: "maintainer".to_string(),
        bot: false,
        from_fork: false,
        instruction: format!("{INSTRUCTION_SENTINEL} round=2 trace=trace-1"),
        round: Some(2),
        trace: Some("trace-1".to_string()),
    }
}

/// Scripted [`HostApi`] implementation.
///
/// `head_sha` answers from a script (front to back), then repeats the last
/// entry; this lets tests decide exactly which poll observes a new SHA when
/// paired with [`crate::recovery::PollBudget::immediate`].
pub struct ScriptedHost {
    pub pr: RefCell<Option<PullRequestRef>>,
    pub labels: RefCell<LabelSet>,
    pub gate: Option<GateRun>,
    pub activation: Option<ActivationRecord>,
    pub active_runs: u32,
    pub head_script: RefCell<VecDeque<String>>,
    pub comments: RefCell<Vec<String>>,
    pub fail_pull_request: bool,
    pub fail_active_count: bool,
}

impl ScriptedHost {
    /// Host where every classifier precondition passes.
    pub fn passing(number: u64) -> Self {
        Self {
            pr: RefCell::new(Some(test_pr(number))),
            labels: RefCell::new(LabelSet::from_names([labels::AGENT_CODEX])),
            gate: Some(test_gate(GateConclusion::Success)),
            activation: Some(test_activation()),
            active_runs: 0,
            head_script: RefCell::new(VecDeque::new()),
            comments: RefCell::new(Vec::new()),
            fail_pull_request: false,
            fail_active_count: false,
        }
    }

    /// Queue the SHAs successive `head_sha` calls will observe.
    pub fn script_heads<I, S>(&self, shas: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut script = self.head_script.borrow_mut();
        for sha in shas {
            script.push_back(sha.into());
        }
    }
}

impl HostApi for ScriptedHost {
    fn pull_request(&self, _number: u64) -> Result<Option<PullRequestRef>> {
        if self.fail_pull_request {
            return Err(anyhow!("scripted pull request failure"));
        }
        Ok(self.pr.borrow().clone())
    }

    fn head_sha(&self, _number: u64) -> Result<Option<String>> {
        let mut script = self.head_script.borrow_mut();
        let sha = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        match sha {
            Some(sha) => Ok(Some(sha)),
            None => Ok(self.pr.borrow().as_ref().map(|pr| pr.head_sha.clone())),
        }
    }

    fn labels(&self, _number: u64) -> Result<LabelSet> {
        Ok(self.labels.borrow().clone())
    }

    fn add_label(&self, _number: u64, label: &str) -> Result<()> {
        self.labels.borrow_mut().insert(label);
        Ok(())
    }

    fn remove_label(&self, _number: u64, label: &str) -> Result<()> {
        self.labels.borrow_mut().remove(label);
        Ok(())
    }

    fn post_comment(&self, _number: u64, body: &str) -> Result<()> {
        self.comments.borrow_mut().push(body.to_string());
        Ok(())
    }

    fn gate_run(&self, _head_sha: &str) -> Result<Option<GateRun>> {
        Ok(self.gate.clone())
    }

    fn latest_activation(&self, _number: u64) -> Result<Option<ActivationRecord>> {
        Ok(self.activation.clone())
    }

    fn active_run_count(&self) -> Result<u32> {
        if self.fail_active_count {
            return Err(anyhow!("scripted run count failure"));
        }
        Ok(self.active_runs)
    }
}

/// Scripted [`Connector`] that records payloads instead of dispatching.
#[derive(Default)]
pub struct ScriptedConnector {
    pub dispatched: RefCell<Vec<RemediationPayload>>,
    pub fail: bool,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            dispatched: RefCell::new(Vec::new()),
            fail: true,
        }
    }
}

impl Connector for ScriptedConnector {
    fn dispatch(&self, payload: &RemediationPayload) -> Result<()> {
        self.dispatched.borrow_mut().push(payload.clone());
        if self.fail {
            return Err(anyhow!("scripted connector failure"));
        }
        Ok(())
    }
}
