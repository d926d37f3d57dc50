//! Single-slot rendezvous between the reflection task and the decision surface

use mend_core::{Decision, MendError, PatchProposal, ProposalStatus, Result};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Holds at most one proposal awaiting an operator decision
///
/// All operations take the slot lock for their full duration, so a reader
/// never observes a half-written proposal and exactly one `consume` call
/// receives a given proposal.
#[derive(Debug, Default)]
pub struct PendingApprovalStore {
    slot: Mutex<Option<PatchProposal>>,
}

impl PendingApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `proposal` in the slot
    ///
    /// Fails with [`MendError::ProposalPending`] if the slot is occupied; the
    /// resident proposal is left untouched.
    pub fn publish(&self, proposal: PatchProposal) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref() {
            debug!("Publish of {} refused, {} is pending", proposal.id, existing.id);
            return Err(MendError::ProposalPending(existing.id.clone()));
        }
        info!("Proposal {} pending approval: {}", proposal.id, proposal.query.text);
        *slot = Some(proposal);
        Ok(())
    }

    pub fn peek(&self) -> Option<PatchProposal> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Take the resident proposal and stamp it with `decision`
    pub fn consume(&self, decision: Decision) -> Option<PatchProposal> {
        let mut proposal = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        proposal.status = match decision {
            Decision::Approve => ProposalStatus::Approved,
            Decision::Reject => ProposalStatus::Rejected,
        };
        info!("Proposal {} {}", proposal.id, proposal.status);
        Some(proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mend_core::{ImprovementQuery, QueryOrigin};
    use std::sync::Arc;

    fn proposal(text: &str) -> PatchProposal {
        PatchProposal::new(
            ImprovementQuery::new(text, "core.py", QueryOrigin::Seed),
            vec![],
            0,
        )
    }

    #[test]
    fn test_second_publish_keeps_resident() {
        let store = PendingApprovalStore::new();
        let first = proposal("first");
        store.publish(first.clone()).unwrap();

        let err = store.publish(proposal("second")).unwrap_err();
        assert!(matches!(err, MendError::ProposalPending(ref id) if *id == first.id));
        assert_eq!(store.peek(), Some(first));
    }

    #[test]
    fn test_consume_clears_and_sets_status() {
        let store = PendingApprovalStore::new();
        store.publish(proposal("sort faster")).unwrap();

        let taken = store.consume(Decision::Reject).unwrap();
        assert_eq!(taken.status, ProposalStatus::Rejected);
        assert!(!store.is_pending());
        assert!(store.consume(Decision::Approve).is_none());

        // The slot is free again
        store.publish(proposal("next")).unwrap();
        assert_eq!(
            store.consume(Decision::Approve).unwrap().status,
            ProposalStatus::Approved
        );
    }

    #[test]
    fn test_concurrent_consume_has_one_winner() {
        let store = Arc::new(PendingApprovalStore::new());
        store.publish(proposal("race")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.consume(Decision::Approve).is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_concurrent_publish_has_one_resident() {
        let store = Arc::new(PendingApprovalStore::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.publish(proposal(&format!("idea {}", i))).is_ok())
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
        assert!(store.is_pending());
    }
}
