//! Typed chain capabilities
//!
//! Each trait covers one contract or RPC concern so call sites are checked at
//! compile time. [`evm::EvmChainClient`] implements all of them for one EVM
//! chain; tests substitute in-memory doubles.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use eyre::Result;

use crate::types::{ChainId, OnChainTransfer, RelayRequest, TransferId, TransferInitiatedEvent};

pub mod evm;

pub use evm::EvmChainClient;

/// Source of `TransferInitiated` events for one chain
#[async_trait]
pub trait TransferEventSource: Send + Sync {
    /// Chain this source observes
    fn chain_id(&self) -> ChainId;

    /// Current block height
    async fn block_number(&self) -> Result<u64>;

    /// Decoded `TransferInitiated` events in the inclusive range `[from_block, to_block]`,
    /// in block/log order
    async fn transfer_initiated_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferInitiatedEvent>>;
}

/// Destination-side settlement contract used for relaying
#[async_trait]
pub trait RelayContract: Send + Sync {
    /// The contract's record for `transfer_id`, `None` if it has never seen it
    async fn get_transfer(&self, transfer_id: &TransferId) -> Result<Option<OnChainTransfer>>;

    /// Submit `relayTransfer` and wait for a successful receipt.
    /// Returns the destination transaction hash.
    async fn relay(&self, request: &RelayRequest) -> Result<String>;
}

/// Fee schedule of the settlement contract
#[async_trait]
pub trait SettlementContract: Send + Sync {
    async fn calculate_fee(&self, amount: U256) -> Result<U256>;
}

/// ERC20 reads needed for transfer initiation
#[async_trait]
pub trait TokenContract: Send + Sync {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256>;
}
