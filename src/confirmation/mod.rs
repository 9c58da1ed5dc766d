//! Destination finality tracking
//!
//! Relayed transfers sit in `CONFIRMED` until their destination receipt is
//! buried under the chain's required confirmations, then move to `RELEASED`.
//! Reverted or missing receipts are reported and left alone: marking a
//! transfer `FAILED` is an operator decision.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::store::LedgerStore;
use crate::transfer::TransferStateMachine;
use crate::types::{ChainId, Transfer, TransferStatus};

pub mod evm;

pub use evm::EvmReceiptSource;

const DEFAULT_BATCH_SIZE: i64 = 100;

/// Result of checking a transaction receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// No receipt yet
    Pending,
    /// Mined, fewer confirmations than required
    WaitingConfirmations(u64),
    /// Mined with enough confirmations
    Confirmed,
    /// Reverted on-chain
    Failed,
}

#[async_trait]
pub trait ReceiptSource: Send + Sync {
    async fn confirmation_status(&self, tx_hash: &str) -> Result<ConfirmationStatus>;
}

pub struct ConfirmationTracker {
    store: Arc<dyn LedgerStore>,
    state_machine: TransferStateMachine,
    receipts: HashMap<ChainId, Arc<dyn ReceiptSource>>,
    poll_interval: Duration,
    batch_size: i64,
}

impl ConfirmationTracker {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        receipts: HashMap<ChainId, Arc<dyn ReceiptSource>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state_machine: TransferStateMachine::new(store.clone()),
            store,
            receipts,
            poll_interval,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Check one batch of `CONFIRMED` transfers. Returns how many were released.
    pub async fn process_confirmed(&self) -> Result<usize> {
        let transfers = self
            .store
            .list_transfers_by_status(TransferStatus::Confirmed, self.batch_size)
            .await?;
        if transfers.is_empty() {
            return Ok(0);
        }

        let checks = transfers.iter().map(|t| self.check_transfer(t));
        let released = futures::future::join_all(checks)
            .await
            .into_iter()
            .filter(|released| *released)
            .count();

        if released > 0 {
            info!(released, checked = transfers.len(), "Released finalized transfers");
        }
        Ok(released)
    }

    async fn check_transfer(&self, transfer: &Transfer) -> bool {
        let Some(tx_hash) = transfer.tx_hash.as_deref() else {
            warn!(transfer_id = %transfer.id, "Confirmed transfer has no destination tx hash");
            return false;
        };
        let Some(receipts) = self.receipts.get(&transfer.destination_chain) else {
            debug!(
                transfer_id = %transfer.id,
                destination_chain = transfer.destination_chain,
                "No receipt source for destination chain"
            );
            return false;
        };

        match receipts.confirmation_status(tx_hash).await {
            Ok(ConfirmationStatus::Confirmed) => {
                match self
                    .state_machine
                    .update_status(&transfer.id, TransferStatus::Released, None)
                    .await
                {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(transfer_id = %transfer.id, error = %e, "Failed to release transfer");
                        false
                    }
                }
            }
            Ok(ConfirmationStatus::WaitingConfirmations(n)) => {
                debug!(transfer_id = %transfer.id, confirmations = n, "Waiting for confirmations");
                false
            }
            Ok(ConfirmationStatus::Pending) => {
                debug!(transfer_id = %transfer.id, tx_hash, "Destination receipt not found yet");
                false
            }
            Ok(ConfirmationStatus::Failed) => {
                error!(
                    transfer_id = %transfer.id,
                    tx_hash,
                    "Destination transaction reverted, operator review required"
                );
                metrics::record_error(transfer.destination_chain, "relay_reverted");
                false
            }
            Err(e) => {
                metrics::record_error(transfer.destination_chain, "receipt_check");
                warn!(transfer_id = %transfer.id, error = %e, "Receipt check failed");
                false
            }
        }
    }

    /// Poll until `shutdown` becomes true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            chains = self.receipts.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting confirmation tracker"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.process_confirmed().await {
                error!(error = %e, "Confirmation check failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Confirmation tracker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLedgerStore;
    use crate::types::NewTransfer;
    use alloy::primitives::{Address, B256, U256};
    use std::sync::Mutex;

    struct FixedReceipts(Mutex<HashMap<String, ConfirmationStatus>>);

    #[async_trait]
    impl ReceiptSource for FixedReceipts {
        async fn confirmation_status(&self, tx_hash: &str) -> Result<ConfirmationStatus> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .get(tx_hash)
                .copied()
                .unwrap_or(ConfirmationStatus::Pending))
        }
    }

    async fn confirmed_transfer(store: &InMemoryLedgerStore, id: u8, tx_hash: &str) {
        store
            .create_transfer(NewTransfer {
                id: B256::repeat_byte(id),
                user: Address::repeat_byte(1),
                recipient: Address::repeat_byte(2),
                token: Address::repeat_byte(3),
                destination_token: Some(Address::repeat_byte(4)),
                amount: U256::from(100u64),
                fee: U256::ZERO,
                source_chain: 1,
                destination_chain: 8453,
                status: TransferStatus::Locked,
            })
            .await
            .unwrap();
        store
            .update_transfer_status(
                &B256::repeat_byte(id),
                TransferStatus::Locked,
                TransferStatus::Confirmed,
                Some(tx_hash),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_only_finalized_transfers_are_released() {
        let store = Arc::new(InMemoryLedgerStore::new());
        confirmed_transfer(&store, 1, "0x01").await;
        confirmed_transfer(&store, 2, "0x02").await;
        confirmed_transfer(&store, 3, "0x03").await;

        let mut statuses = HashMap::new();
        statuses.insert("0x01".to_string(), ConfirmationStatus::Confirmed);
        statuses.insert("0x02".to_string(), ConfirmationStatus::WaitingConfirmations(3));
        statuses.insert("0x03".to_string(), ConfirmationStatus::Failed);
        let mut receipts: HashMap<ChainId, Arc<dyn ReceiptSource>> = HashMap::new();
        receipts.insert(8453, Arc::new(FixedReceipts(Mutex::new(statuses))));

        let tracker = ConfirmationTracker::new(store.clone(), receipts, Duration::from_millis(10));
        assert_eq!(tracker.process_confirmed().await.unwrap(), 1);

        let status = |id: u8| {
            let store = store.clone();
            async move {
                store
                    .find_transfer(&B256::repeat_byte(id))
                    .await
                    .unwrap()
                    .unwrap()
                    .status
            }
        };
        assert_eq!(status(1).await, TransferStatus::Released);
        assert_eq!(status(2).await, TransferStatus::Confirmed);
        // Reverted relays are not failed automatically
        assert_eq!(status(3).await, TransferStatus::Confirmed);
    }
}
