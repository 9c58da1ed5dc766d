//! Transfer ledger persistence
//!
//! [`LedgerStore`] is the collaborator boundary for transfer records. The
//! status update is a compare-and-set on the expected previous status so two
//! writers can never both apply a transition from the same state.

use alloy::primitives::Address;
use async_trait::async_trait;
use eyre::Result;

use crate::types::{NewTransfer, Transfer, TransferId, TransferStatus};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new transfer record. Fails if the id already exists.
    async fn create_transfer(&self, transfer: NewTransfer) -> Result<Transfer>;

    /// Set `status` (and `tx_hash` when given) only if the record is still in `expected`.
    /// Returns `None` when the record is missing or its status changed concurrently.
    async fn update_transfer_status(
        &self,
        id: &TransferId,
        expected: TransferStatus,
        status: TransferStatus,
        tx_hash: Option<&str>,
    ) -> Result<Option<Transfer>>;

    async fn find_transfer(&self, id: &TransferId) -> Result<Option<Transfer>>;

    /// All transfers created by `user`, newest first
    async fn list_transfers_by_user(&self, user: &Address) -> Result<Vec<Transfer>>;

    /// Up to `limit` transfers in `status`, oldest first
    async fn list_transfers_by_status(
        &self,
        status: TransferStatus,
        limit: i64,
    ) -> Result<Vec<Transfer>>;
}
