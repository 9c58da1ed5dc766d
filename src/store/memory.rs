use std::collections::HashMap;

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::Utc;
use eyre::{eyre, Result};
use tokio::sync::RwLock;

use super::LedgerStore;
use crate::types::{NewTransfer, Transfer, TransferId, TransferStatus};

/// Process-local ledger, used when no database is configured and in tests
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    transfers: RwLock<HashMap<TransferId, Transfer>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_transfer(&self, transfer: NewTransfer) -> Result<Transfer> {
        let mut transfers = self.transfers.write().await;
        if transfers.contains_key(&transfer.id) {
            return Err(eyre!("Transfer {} already exists", transfer.id));
        }

        let now = Utc::now();
        let record = Transfer {
            id: transfer.id,
            user: transfer.user,
            recipient: transfer.recipient,
            token: transfer.token,
            destination_token: transfer.destination_token,
            amount: transfer.amount,
            fee: transfer.fee,
            source_chain: transfer.source_chain,
            destination_chain: transfer.destination_chain,
            status: transfer.status,
            tx_hash: None,
            created_at: now,
            updated_at: now,
        };
        transfers.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_transfer_status(
        &self,
        id: &TransferId,
        expected: TransferStatus,
        status: TransferStatus,
        tx_hash: Option<&str>,
    ) -> Result<Option<Transfer>> {
        let mut transfers = self.transfers.write().await;
        let Some(record) = transfers.get_mut(id) else {
            return Ok(None);
        };
        if record.status != expected {
            return Ok(None);
        }

        record.status = status;
        if let Some(hash) = tx_hash {
            record.tx_hash = Some(hash.to_string());
        }
        record.updated_at = Utc::now();
        Ok(Some(record.clone()))
    }

    async fn find_transfer(&self, id: &TransferId) -> Result<Option<Transfer>> {
        Ok(self.transfers.read().await.get(id).cloned())
    }

    async fn list_transfers_by_user(&self, user: &Address) -> Result<Vec<Transfer>> {
        let mut found: Vec<Transfer> = self
            .transfers
            .read()
            .await
            .values()
            .filter(|t| t.user == *user)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn list_transfers_by_status(
        &self,
        status: TransferStatus,
        limit: i64,
    ) -> Result<Vec<Transfer>> {
        let mut found: Vec<Transfer> = self
            .transfers
            .read()
            .await
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }
}
