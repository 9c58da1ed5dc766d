//! Common types for cross-chain transfers
//!
//! Transfer records, the decoded `TransferInitiated` event, the relay request
//! handed to the destination contract, and the transfer status lifecycle.

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transfer identifier (content hash, 32 bytes)
pub type TransferId = B256;

/// Native chain identifier (EIP-155 chain id)
pub type ChainId = u64;

// ============================================================================
// Transfer Status
// ============================================================================

/// Lifecycle status of a transfer record
///
/// `Initiated` is the entry state for same-chain transfers, `Locked` for
/// cross-chain transfers. `Released` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransferStatus {
    Initiated,
    Locked,
    Confirmed,
    Released,
    Failed,
}

impl TransferStatus {
    /// Get the status as an uppercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Initiated => "INITIATED",
            TransferStatus::Locked => "LOCKED",
            TransferStatus::Confirmed => "CONFIRMED",
            TransferStatus::Released => "RELEASED",
            TransferStatus::Failed => "FAILED",
        }
    }

    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Released | TransferStatus::Failed)
    }

    /// Whether `self -> next` is in the allowed transition table
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Initiated, Locked)
                | (Initiated, Failed)
                | (Locked, Confirmed)
                | (Locked, Failed)
                | (Confirmed, Released)
                | (Confirmed, Failed)
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INITIATED" => Ok(TransferStatus::Initiated),
            "LOCKED" => Ok(TransferStatus::Locked),
            "CONFIRMED" => Ok(TransferStatus::Confirmed),
            "RELEASED" => Ok(TransferStatus::Released),
            "FAILED" => Ok(TransferStatus::Failed),
            other => Err(eyre::eyre!("Unknown transfer status: {}", other)),
        }
    }
}

// ============================================================================
// Transfer Records
// ============================================================================

/// A transfer as held by the ledger store
///
/// Only `status`, `tx_hash` and `updated_at` change after creation, and only
/// through the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub user: Address,
    pub recipient: Address,
    pub token: Address,
    /// Destination-chain token, resolved through the token map for cross-chain transfers
    pub destination_token: Option<Address>,
    pub amount: U256,
    pub fee: U256,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub status: TransferStatus,
    /// Destination-chain transaction hash once submitted
    pub tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    pub fn is_cross_chain(&self) -> bool {
        self.source_chain != self.destination_chain
    }
}

/// For inserting new transfers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub id: TransferId,
    pub user: Address,
    pub recipient: Address,
    pub token: Address,
    pub destination_token: Option<Address>,
    pub amount: U256,
    pub fee: U256,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub status: TransferStatus,
}

// ============================================================================
// Chain Events
// ============================================================================

/// Normalized `TransferInitiated` event observed on a source chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInitiatedEvent {
    pub transfer_id: TransferId,
    pub user: Address,
    /// Token on the source chain
    pub token: Address,
    pub amount: U256,
    pub fee: U256,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub recipient: Address,
    pub source_tx_hash: B256,
    pub block_number: u64,
}

impl TransferInitiatedEvent {
    /// Whether the event was emitted for a transfer that stays on `chain_id`
    pub fn is_same_chain(&self, chain_id: ChainId) -> bool {
        self.destination_chain == chain_id
    }
}

/// Arguments of the destination contract's `relayTransfer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub transfer_id: TransferId,
    pub user: Address,
    /// Token on the destination chain
    pub token: Address,
    pub amount: U256,
    pub source_chain: ChainId,
    pub recipient: Address,
    pub source_tx_hash: B256,
}

impl RelayRequest {
    pub fn from_event(
        event: &TransferInitiatedEvent,
        destination_token: Address,
        source_chain: ChainId,
    ) -> Self {
        Self {
            transfer_id: event.transfer_id,
            user: event.user,
            token: destination_token,
            amount: event.amount,
            source_chain,
            recipient: event.recipient,
            source_tx_hash: event.source_tx_hash,
        }
    }
}

/// Transfer record as stored by a destination contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainTransfer {
    pub id: TransferId,
    pub user: Address,
    pub token: Address,
    pub amount: U256,
    pub source_chain: U256,
    pub status: u8,
    pub tx_hash: String,
}

// ============================================================================
// Validators
// ============================================================================

/// A validator whose signature counts toward threshold proofs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub stake: U256,
    pub active: bool,
    pub slash_amount: U256,
}

/// Trust set for multi-signature threshold checks
#[derive(Debug, Clone, Default)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<Validator>) -> Self {
        Self { validators }
    }

    /// Addresses of active validators, in registration order
    pub fn active_addresses(&self) -> Vec<Address> {
        self.validators
            .iter()
            .filter(|v| v.active)
            .map(|v| v.address)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}
