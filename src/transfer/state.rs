//! Transfer status state machine
//!
//! The only writer of `status` on ledger records. Transitions outside the
//! allowed table are rejected, and the store write is conditional on the
//! status read just before, so concurrent callers cannot both win.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::store::LedgerStore;
use crate::types::{Transfer, TransferId, TransferStatus};

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("transfer {0} not found")]
    NotFound(TransferId),

    #[error("transition {from} -> {to} is not allowed for transfer {id}")]
    InvalidTransition {
        id: TransferId,
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("transfer {id} left {expected} before the update was applied")]
    Conflict {
        id: TransferId,
        expected: TransferStatus,
    },

    #[error("ledger store error: {0}")]
    Store(String),
}

#[derive(Clone)]
pub struct TransferStateMachine {
    store: Arc<dyn LedgerStore>,
}

impl TransferStateMachine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Move a transfer to `new_status`, recording `tx_hash` if given.
    pub async fn update_status(
        &self,
        id: &TransferId,
        new_status: TransferStatus,
        tx_hash: Option<&str>,
    ) -> Result<Transfer, TransitionError> {
        let current = self
            .store
            .find_transfer(id)
            .await
            .map_err(|e| TransitionError::Store(format!("{:#}", e)))?
            .ok_or(TransitionError::NotFound(*id))?;

        if !current.status.can_transition_to(new_status) {
            metrics::record_transition(current.status, new_status, false);
            warn!(
                transfer_id = %id,
                from = %current.status,
                to = %new_status,
                "Rejected invalid status transition"
            );
            return Err(TransitionError::InvalidTransition {
                id: *id,
                from: current.status,
                to: new_status,
            });
        }

        let updated = self
            .store
            .update_transfer_status(id, current.status, new_status, tx_hash)
            .await
            .map_err(|e| TransitionError::Store(format!("{:#}", e)))?;

        match updated {
            Some(transfer) => {
                metrics::record_transition(current.status, new_status, true);
                info!(
                    transfer_id = %id,
                    from = %current.status,
                    to = %new_status,
                    tx_hash = ?tx_hash,
                    "Transfer status updated"
                );
                Ok(transfer)
            }
            None => {
                debug!(transfer_id = %id, expected = %current.status, "Status changed concurrently");
                Err(TransitionError::Conflict {
                    id: *id,
                    expected: current.status,
                })
            }
        }
    }
}
