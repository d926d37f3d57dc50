//! Handle shared by the reflection task and the decision/status surface

use crate::alerts::AlertQueue;
use crate::approval::PendingApprovalStore;
use mend_core::{Alert, PatchProposal};
use std::sync::Arc;

/// Owned approval slot and alert queue, cloned into every task that needs them
#[derive(Debug, Clone)]
pub struct ControlPlane {
    pub approvals: Arc<PendingApprovalStore>,
    pub alerts: Arc<AlertQueue>,
}

impl ControlPlane {
    pub fn new(alert_capacity: usize) -> Self {
        Self {
            approvals: Arc::new(PendingApprovalStore::new()),
            alerts: Arc::new(AlertQueue::new(alert_capacity)),
        }
    }

    pub fn pending(&self) -> Option<PatchProposal> {
        self.approvals.peek()
    }

    pub fn drain_alerts(&self) -> Vec<Alert> {
        self.alerts.drain()
    }
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new(100)
    }
}
