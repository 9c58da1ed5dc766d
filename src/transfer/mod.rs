//! Transfer initiation, fee quotes and ledger queries
//!
//! Inputs are validated before anything touches the ledger: a request that
//! fails validation leaves no record behind.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::utils::{parse_units, ParseUnits};
use alloy::primitives::{Address, U256};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::chain::{SettlementContract, TokenContract};
use crate::hash::{compute_cross_chain_transfer_id, compute_transfer_id};
use crate::store::LedgerStore;
use crate::token_map::{TokenDecimals, TokenMap};
use crate::types::{ChainId, NewTransfer, Transfer, TransferId, TransferStatus};

pub mod state;

pub use state::{TransferStateMachine, TransitionError};

/// Rejection reasons at transfer initiation
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid {field} address: {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("invalid amount '{amount}': {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("source and destination are both chain {0}, use a same-chain transfer")]
    SameChain(ChainId),

    #[error("unsupported chain {0}")]
    UnsupportedChain(ChainId),

    #[error("no destination token mapped for {token} on chain {source_chain}")]
    NoTokenMapping { source_chain: ChainId, token: Address },

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: U256, available: U256 },

    #[error("fee {fee} exceeds amount {amount}")]
    FeeExceedsAmount { amount: U256, fee: U256 },

    #[error("transfer {0} not found")]
    NotFound(TransferId),

    #[error("chain call failed: {0}")]
    Chain(String),

    #[error("ledger store error: {0}")]
    Store(String),
}

/// Contracts used on a chain where transfers can be initiated
#[derive(Clone)]
pub struct ChainContracts {
    pub settlement: Arc<dyn SettlementContract>,
    pub tokens: Arc<dyn TokenContract>,
}

/// Fee quote in token base units
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub amount: U256,
    pub fee: U256,
    pub net_amount: U256,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
}

struct Validated {
    token: Address,
    recipient: Address,
    amount: U256,
    fee: U256,
}

pub struct TransferService {
    store: Arc<dyn LedgerStore>,
    state: TransferStateMachine,
    chains: HashMap<ChainId, ChainContracts>,
    token_map: TokenMap,
    decimals: TokenDecimals,
}

impl TransferService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        chains: HashMap<ChainId, ChainContracts>,
        token_map: TokenMap,
        decimals: TokenDecimals,
    ) -> Self {
        Self {
            state: TransferStateMachine::new(store.clone()),
            store,
            chains,
            token_map,
            decimals,
        }
    }

    pub fn state_machine(&self) -> &TransferStateMachine {
        &self.state
    }

    /// Create a transfer that settles on `chain_id` itself. Starts as `INITIATED`.
    pub async fn initiate_same_chain(
        &self,
        user: Address,
        chain_id: ChainId,
        token: &str,
        recipient: &str,
        amount: &str,
    ) -> Result<Transfer, TransferError> {
        let contracts = self.contracts(chain_id)?;
        let validated = self
            .validate(contracts, user, token, recipient, amount)
            .await?;

        let nonce = Self::nonce();
        let id = compute_transfer_id(&user, &validated.recipient, &validated.amount, nonce);

        self.persist(NewTransfer {
            id,
            user,
            recipient: validated.recipient,
            token: validated.token,
            destination_token: None,
            amount: validated.amount,
            fee: validated.fee,
            source_chain: chain_id,
            destination_chain: chain_id,
            status: TransferStatus::Initiated,
        })
        .await
    }

    /// Create a cross-chain transfer. Starts as `LOCKED`.
    pub async fn initiate_cross_chain(
        &self,
        user: Address,
        source_chain: ChainId,
        destination_chain: ChainId,
        token: &str,
        recipient: &str,
        amount: &str,
    ) -> Result<Transfer, TransferError> {
        if source_chain == destination_chain {
            return Err(TransferError::SameChain(source_chain));
        }
        let contracts = self.contracts(source_chain)?;
        if !self.chains.contains_key(&destination_chain) {
            return Err(TransferError::UnsupportedChain(destination_chain));
        }

        let validated = self
            .validate(contracts, user, token, recipient, amount)
            .await?;

        let destination_token = self
            .token_map
            .resolve(source_chain, &validated.token)
            .ok_or(TransferError::NoTokenMapping {
                source_chain,
                token: validated.token,
            })?;

        let nonce = Self::nonce();
        let id = compute_cross_chain_transfer_id(
            &user,
            &validated.recipient,
            &validated.amount,
            destination_chain,
            nonce,
        );

        self.persist(NewTransfer {
            id,
            user,
            recipient: validated.recipient,
            token: validated.token,
            destination_token: Some(destination_token),
            amount: validated.amount,
            fee: validated.fee,
            source_chain,
            destination_chain,
            status: TransferStatus::Locked,
        })
        .await
    }

    /// Fee quote from the source chain's settlement contract
    pub async fn calculate_quote(
        &self,
        amount: U256,
        source_chain: ChainId,
        destination_chain: ChainId,
    ) -> Result<Quote, TransferError> {
        if amount.is_zero() {
            return Err(TransferError::ZeroAmount);
        }
        let contracts = self.contracts(source_chain)?;
        if !self.chains.contains_key(&destination_chain) {
            return Err(TransferError::UnsupportedChain(destination_chain));
        }

        let fee = contracts
            .settlement
            .calculate_fee(amount)
            .await
            .map_err(|e| TransferError::Chain(format!("{:#}", e)))?;
        let net_amount = amount
            .checked_sub(fee)
            .ok_or(TransferError::FeeExceedsAmount { amount, fee })?;

        Ok(Quote {
            amount,
            fee,
            net_amount,
            source_chain,
            destination_chain,
        })
    }

    pub async fn get_transfer(&self, id: &TransferId) -> Result<Transfer, TransferError> {
        self.store
            .find_transfer(id)
            .await
            .map_err(|e| TransferError::Store(format!("{:#}", e)))?
            .ok_or(TransferError::NotFound(*id))
    }

    pub async fn list_user_transfers(&self, user: &Address) -> Result<Vec<Transfer>, TransferError> {
        self.store
            .list_transfers_by_user(user)
            .await
            .map_err(|e| TransferError::Store(format!("{:#}", e)))
    }

    fn contracts(&self, chain_id: ChainId) -> Result<&ChainContracts, TransferError> {
        self.chains
            .get(&chain_id)
            .ok_or(TransferError::UnsupportedChain(chain_id))
    }

    async fn validate(
        &self,
        contracts: &ChainContracts,
        user: Address,
        token: &str,
        recipient: &str,
        amount: &str,
    ) -> Result<Validated, TransferError> {
        let token = parse_address("token", token)?;
        let recipient = parse_address("recipient", recipient)?;
        let amount = self.parse_amount(&token, amount)?;

        let available = contracts
            .tokens
            .balance_of(token, user)
            .await
            .map_err(|e| TransferError::Chain(format!("{:#}", e)))?;
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                required: amount,
                available,
            });
        }

        let fee = contracts
            .settlement
            .calculate_fee(amount)
            .await
            .map_err(|e| TransferError::Chain(format!("{:#}", e)))?;
        if fee > amount {
            return Err(TransferError::FeeExceedsAmount { amount, fee });
        }

        Ok(Validated {
            token,
            recipient,
            amount,
            fee,
        })
    }

    /// Human-readable amount to base units using the token's decimals
    fn parse_amount(&self, token: &Address, raw: &str) -> Result<U256, TransferError> {
        let decimals = self.decimals.decimals_for(token);
        let parsed = parse_units(raw.trim(), decimals).map_err(|e| TransferError::InvalidAmount {
            amount: raw.to_string(),
            reason: e.to_string(),
        })?;

        let amount = match parsed {
            ParseUnits::U256(value) => value,
            ParseUnits::I256(_) => {
                return Err(TransferError::InvalidAmount {
                    amount: raw.to_string(),
                    reason: "amount must not be negative".to_string(),
                })
            }
        };
        if amount.is_zero() {
            return Err(TransferError::ZeroAmount);
        }
        Ok(amount)
    }

    async fn persist(&self, transfer: NewTransfer) -> Result<Transfer, TransferError> {
        let created = self.store.create_transfer(transfer).await.map_err(|e| {
            warn!(error = %e, "Failed to persist transfer");
            TransferError::Store(format!("{:#}", e))
        })?;

        info!(
            transfer_id = %created.id,
            user = %created.user,
            source_chain = created.source_chain,
            destination_chain = created.destination_chain,
            amount = %created.amount,
            fee = %created.fee,
            status = %created.status,
            "Transfer created"
        );
        Ok(created)
    }

    fn nonce() -> u64 {
        let now = Utc::now();
        now.timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_millis().saturating_mul(1_000_000)) as u64
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, TransferError> {
    Address::from_str(value.trim()).map_err(|_| TransferError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLedgerStore;
    use crate::token_map::{BASE_MAINNET, BASE_USDC, ETHEREUM_MAINNET, ETHEREUM_USDC};
    use async_trait::async_trait;

    struct MockChain {
        fee: U256,
        balance: U256,
    }

    #[async_trait]
    impl SettlementContract for MockChain {
        async fn calculate_fee(&self, _amount: U256) -> eyre::Result<U256> {
            Ok(self.fee)
        }
    }

    #[async_trait]
    impl TokenContract for MockChain {
        async fn balance_of(&self, _token: Address, _owner: Address) -> eyre::Result<U256> {
            Ok(self.balance)
        }
    }

    fn service_with(fee: u64, balance: u64) -> (TransferService, Arc<InMemoryLedgerStore>) {
        let store = Arc::new(InMemoryLedgerStore::new());
        let mock = Arc::new(MockChain {
            fee: U256::from(fee),
            balance: U256::from(balance),
        });
        let contracts = ChainContracts {
            settlement: mock.clone(),
            tokens: mock,
        };
        let mut chains = HashMap::new();
        chains.insert(ETHEREUM_MAINNET, contracts.clone());
        chains.insert(BASE_MAINNET, contracts);

        let service = TransferService::new(
            store.clone(),
            chains,
            TokenMap::mainnet_defaults(),
            TokenDecimals::default(),
        );
        (service, store)
    }

    fn usdc() -> String {
        ETHEREUM_USDC.to_string()
    }

    fn recipient() -> String {
        Address::repeat_byte(0x22).to_string()
    }

    #[tokio::test]
    async fn test_quote_subtracts_contract_fee() {
        let (service, _) = service_with(15_000, 0);
        let quote = service
            .calculate_quote(U256::from(1_500_000u64), ETHEREUM_MAINNET, BASE_MAINNET)
            .await
            .unwrap();
        assert_eq!(quote.fee, U256::from(15_000u64));
        assert_eq!(quote.net_amount, U256::from(1_485_000u64));
        assert_eq!(quote.amount, U256::from(1_500_000u64));
    }

    #[tokio::test]
    async fn test_quote_rejects_fee_above_amount() {
        let (service, _) = service_with(2_000, 0);
        let err = service
            .calculate_quote(U256::from(1_000u64), ETHEREUM_MAINNET, BASE_MAINNET)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::FeeExceedsAmount { .. }));
    }

    #[tokio::test]
    async fn test_cross_chain_transfer_is_locked_with_mapped_token() {
        let (service, _) = service_with(15_000, 10_000_000);
        let user = Address::repeat_byte(0x11);

        let transfer = service
            .initiate_cross_chain(user, ETHEREUM_MAINNET, BASE_MAINNET, &usdc(), &recipient(), "1.5")
            .await
            .unwrap();

        assert_eq!(transfer.status, TransferStatus::Locked);
        // USDC has 6 decimals
        assert_eq!(transfer.amount, U256::from(1_500_000u64));
        assert_eq!(transfer.fee, U256::from(15_000u64));
        assert_eq!(transfer.destination_token, Some(BASE_USDC));
        assert_eq!(service.get_transfer(&transfer.id).await.unwrap(), transfer);
    }

    #[tokio::test]
    async fn test_same_chain_transfer_is_initiated() {
        let (service, _) = service_with(0, 10_000_000);
        let user = Address::repeat_byte(0x11);

        let transfer = service
            .initiate_same_chain(user, ETHEREUM_MAINNET, &usdc(), &recipient(), "2")
            .await
            .unwrap();

        assert_eq!(transfer.status, TransferStatus::Initiated);
        assert!(!transfer.is_cross_chain());
        assert_eq!(transfer.destination_token, None);
        assert_eq!(service.list_user_transfers(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_errors_create_nothing() {
        let (service, _) = service_with(0, 1_000_000);
        let user = Address::repeat_byte(0x11);

        let err = service
            .initiate_cross_chain(user, ETHEREUM_MAINNET, BASE_MAINNET, &usdc(), "not-an-address", "1")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidAddress { field: "recipient", .. }));

        let err = service
            .initiate_cross_chain(user, ETHEREUM_MAINNET, BASE_MAINNET, &usdc(), &recipient(), "0")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ZeroAmount));

        let err = service
            .initiate_cross_chain(user, ETHEREUM_MAINNET, BASE_MAINNET, &usdc(), &recipient(), "-1")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidAmount { .. }));

        let err = service
            .initiate_cross_chain(user, ETHEREUM_MAINNET, BASE_MAINNET, &usdc(), &recipient(), "5")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InsufficientBalance { .. }));

        let err = service
            .initiate_cross_chain(user, ETHEREUM_MAINNET, ETHEREUM_MAINNET, &usdc(), &recipient(), "1")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SameChain(ETHEREUM_MAINNET)));

        let err = service
            .initiate_cross_chain(user, ETHEREUM_MAINNET, 10, &usdc(), &recipient(), "1")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::UnsupportedChain(10)));

        // Unmapped token on the source chain
        let unmapped = Address::repeat_byte(0x99).to_string();
        let err = service
            .initiate_cross_chain(user, ETHEREUM_MAINNET, BASE_MAINNET, &unmapped, &recipient(), "0.000000000001")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NoTokenMapping { .. }));

        assert!(service.list_user_transfers(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_transfer_is_not_found() {
        let (service, _) = service_with(0, 0);
        let err = service
            .get_transfer(&TransferId::repeat_byte(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));
    }
}
