//! Per-node status state machine for one run.
//!
//! ```text
//! pending ──begin──▶ running ──finish──▶ success | error
//! ```
//!
//! Terminal states are final. Overall status is always derived from the node
//! statuses by [`derive_status`], never set directly.

use std::collections::HashMap;

use db::RunStatus;
use thiserror::Error;

/// Rejected transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("node '{0}' is not part of this run")]
    UnknownNode(String),

    #[error("node '{node_id}' cannot move from {from} to {to}")]
    Invalid {
        node_id: String,
        from: RunStatus,
        to: RunStatus,
    },
}

/// Node statuses of a single execution, in program order.
#[derive(Debug, Clone)]
pub struct RunState {
    order: Vec<String>,
    statuses: HashMap<String, RunStatus>,
}

impl RunState {
    /// Every node starts `pending`.
    pub fn new(node_ids: impl IntoIterator<Item = String>) -> Self {
        let order: Vec<String> = node_ids.into_iter().collect();
        let statuses = order.iter().map(|id| (id.clone(), RunStatus::Pending)).collect();
        Self { order, statuses }
    }

    pub fn status(&self, node_id: &str) -> Option<RunStatus> {
        self.statuses.get(node_id).copied()
    }

    /// `pending → running`. Re-dispatching a running or finished node fails.
    pub fn begin(&mut self, node_id: &str) -> Result<(), TransitionError> {
        self.transition(node_id, RunStatus::Pending, RunStatus::Running)
    }

    /// `running → success | error`.
    pub fn finish(&mut self, node_id: &str, succeeded: bool) -> Result<(), TransitionError> {
        let to = if succeeded { RunStatus::Success } else { RunStatus::Error };
        self.transition(node_id, RunStatus::Running, to)
    }

    fn transition(
        &mut self,
        node_id: &str,
        from: RunStatus,
        to: RunStatus,
    ) -> Result<(), TransitionError> {
        let current = self
            .statuses
            .get_mut(node_id)
            .ok_or_else(|| TransitionError::UnknownNode(node_id.to_owned()))?;
        if *current != from {
            return Err(TransitionError::Invalid {
                node_id: node_id.to_owned(),
                from: *current,
                to,
            });
        }
        *current = to;
        Ok(())
    }

    pub fn overall(&self) -> RunStatus {
        derive_status(self.statuses.values().copied())
    }

    /// `(node_id, status)` pairs in program order.
    pub fn snapshot(&self) -> Vec<(String, RunStatus)> {
        self.order
            .iter()
            .map(|id| (id.clone(), self.statuses[id]))
            .collect()
    }
}

/// Overall status of a set of node statuses.
///
/// Any `error` wins; all `success` (or no nodes at all) is `success`; all
/// `pending` is `pending`; anything else is still `running`.
pub fn derive_status(statuses: impl IntoIterator<Item = RunStatus>) -> RunStatus {
    let mut all_success = true;
    let mut all_pending = true;
    for status in statuses {
        match status {
            RunStatus::Error => return RunStatus::Error,
            RunStatus::Success => all_pending = false,
            RunStatus::Running => {
                all_success = false;
                all_pending = false;
            }
            RunStatus::Pending => all_success = false,
        }
    }
    if all_success {
        RunStatus::Success
    } else if all_pending {
        RunStatus::Pending
    } else {
        RunStatus::Running
    }
}
