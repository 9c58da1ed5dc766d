//! EVM chain client
//!
//! Wraps an alloy HTTP provider and the validator signer for one chain.
//! Reads go straight to the shared provider and may run concurrently;
//! `relayTransfer` submissions are serialized behind an async mutex because
//! they share one signing account and therefore one nonce sequence.

use std::str::FromStr;
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::{RelayContract, SettlementContract, TokenContract, TransferEventSource};
use crate::config::{ChainConfig, RelayerConfig};
use crate::contracts::{ChainSync, IERC20};
use crate::types::{ChainId, OnChainTransfer, RelayRequest, TransferId, TransferInitiatedEvent};

/// Event signature of `TransferInitiated`
pub const TRANSFER_INITIATED_SIGNATURE: &[u8] =
    b"TransferInitiated(bytes32,address,address,uint256,uint256,uint256,uint256,address)";

/// Topic hash of `TransferInitiated`
pub fn transfer_initiated_topic() -> B256 {
    alloy::primitives::keccak256(TRANSFER_INITIATED_SIGNATURE)
}

/// Client for one EVM chain's settlement contract
pub struct EvmChainClient {
    name: String,
    chain_id: ChainId,
    rpc_url: String,
    provider: RootProvider<Http<Client>>,
    contract_address: Address,
    signer: PrivateKeySigner,
    gas_limit: u64,
    confirmation_timeout: Duration,
    submit_lock: Mutex<()>,
}

impl EvmChainClient {
    /// Create a new client for a configured chain
    pub fn new(chain: &ChainConfig, relayer: &RelayerConfig, private_key: &str) -> Result<Self> {
        let url = chain
            .rpc_url
            .parse()
            .wrap_err_with(|| format!("Failed to parse RPC URL for chain {}", chain.name))?;
        let provider = ProviderBuilder::new().on_http(url);

        let contract_address = Address::from_str(&chain.contract_address)
            .wrap_err_with(|| format!("Invalid contract address for chain {}", chain.name))?;

        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| eyre!("Invalid validator private key: {}", e))?;

        info!(
            chain_name = %chain.name,
            chain_id = chain.chain_id,
            contract = %contract_address,
            validator = %signer.address(),
            "EVM chain client initialized"
        );

        Ok(Self {
            name: chain.name.clone(),
            chain_id: chain.chain_id,
            rpc_url: chain.rpc_url.clone(),
            provider,
            contract_address,
            signer,
            gas_limit: relayer.gas_limit,
            confirmation_timeout: relayer.confirmation_timeout,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the validator account that signs relays
    pub fn validator_address(&self) -> Address {
        self.signer.address()
    }

    /// Whether the settlement contract lists our validator account
    pub async fn is_validator(&self) -> Result<bool> {
        let contract = ChainSync::new(self.contract_address, &self.provider);
        let result = contract
            .validators(self.signer.address())
            .call()
            .await
            .wrap_err("Failed to query validator registration")?;
        Ok(result._0)
    }

    /// Native balance of the validator account, for gas monitoring
    pub async fn validator_gas_balance(&self) -> Result<U256> {
        self.provider
            .get_balance(self.signer.address())
            .await
            .wrap_err("Failed to get validator balance")
    }

    fn parse_log(&self, log: &Log) -> Result<TransferInitiatedEvent> {
        let tx_hash = log
            .transaction_hash
            .ok_or_else(|| eyre!("Missing transaction hash"))?;
        let block_number = log
            .block_number
            .ok_or_else(|| eyre!("Missing block number"))?;

        decode_transfer_initiated(log.topics(), log.data().data.as_ref(), tx_hash, block_number)
    }
}

/// Decode a `TransferInitiated` log
///
/// Indexed topics:
/// - topics[0] = event signature
/// - topics[1] = transferId (bytes32)
/// - topics[2] = user (address)
/// - topics[3] = token (address)
///
/// Non-indexed data (abi encoded, one 32-byte word each):
/// amount, fee, sourceChain, destinationChain, recipient
pub fn decode_transfer_initiated(
    topics: &[B256],
    data: &[u8],
    tx_hash: B256,
    block_number: u64,
) -> Result<TransferInitiatedEvent> {
    if topics.len() != 4 {
        return Err(eyre!("Expected 4 topics, got {}", topics.len()));
    }
    if topics[0] != transfer_initiated_topic() {
        return Err(eyre!("Not a TransferInitiated log"));
    }
    if data.len() < 160 {
        return Err(eyre!("TransferInitiated data too short: {} bytes", data.len()));
    }

    let amount = U256::from_be_slice(&data[0..32]);
    let fee = U256::from_be_slice(&data[32..64]);
    let source_chain: u64 = U256::from_be_slice(&data[64..96])
        .try_into()
        .map_err(|_| eyre!("sourceChain does not fit in u64"))?;
    let destination_chain: u64 = U256::from_be_slice(&data[96..128])
        .try_into()
        .map_err(|_| eyre!("destinationChain does not fit in u64"))?;
    let recipient = Address::from_slice(&data[140..160]);

    Ok(TransferInitiatedEvent {
        transfer_id: topics[1],
        user: Address::from_slice(&topics[2][12..32]),
        token: Address::from_slice(&topics[3][12..32]),
        amount,
        fee,
        source_chain,
        destination_chain,
        recipient,
        source_tx_hash: tx_hash,
        block_number,
    })
}

#[async_trait]
impl TransferEventSource for EvmChainClient {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err("Failed to get block number")
    }

    async fn transfer_initiated_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferInitiatedEvent>> {
        let filter = Filter::new()
            .address(self.contract_address)
            .event_signature(transfer_initiated_topic())
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.provider.get_logs(&filter).await.wrap_err_with(|| {
            format!("Failed to get logs from block {} to {}", from_block, to_block)
        })?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            match self.parse_log(&log) {
                Ok(event) => events.push(event),
                Err(e) => {
                    // A malformed log will not decode on retry either
                    error!(
                        chain_id = self.chain_id,
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        error = %e,
                        "Failed to parse TransferInitiated log"
                    );
                }
            }
        }

        if !events.is_empty() {
            debug!(
                chain_id = self.chain_id,
                count = events.len(),
                from = from_block,
                to = to_block,
                "Found TransferInitiated events"
            );
        }

        Ok(events)
    }
}

#[async_trait]
impl RelayContract for EvmChainClient {
    async fn get_transfer(&self, transfer_id: &TransferId) -> Result<Option<OnChainTransfer>> {
        let contract = ChainSync::new(self.contract_address, &self.provider);
        let record = contract
            .transfers(*transfer_id)
            .call()
            .await
            .wrap_err("Failed to read destination transfer record")?;

        if record.id == B256::ZERO {
            return Ok(None);
        }

        Ok(Some(OnChainTransfer {
            id: record.id,
            user: record.user,
            token: record.token,
            amount: record.amount,
            source_chain: record.sourceChain,
            status: record.status,
            tx_hash: record.txHash,
        }))
    }

    async fn relay(&self, request: &RelayRequest) -> Result<String> {
        let _guard = self.submit_lock.lock().await;

        // Build provider with signer
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.parse().wrap_err("Invalid RPC URL")?);

        let contract = ChainSync::new(self.contract_address, &provider);

        debug!(
            chain_id = self.chain_id,
            transfer_id = %request.transfer_id,
            token = %request.token,
            recipient = %request.recipient,
            amount = %request.amount,
            source_chain = request.source_chain,
            "Submitting relayTransfer"
        );

        let call = contract
            .relayTransfer(
                request.transfer_id,
                request.user,
                request.token,
                request.amount,
                U256::from(request.source_chain),
                request.recipient,
                request.source_tx_hash.to_string(),
            )
            .gas(self.gas_limit);

        let pending_tx = call
            .send()
            .await
            .map_err(|e| eyre!("Failed to send transaction: {}", e))?;

        let tx_hash = *pending_tx.tx_hash();
        info!(
            chain_id = self.chain_id,
            tx_hash = %tx_hash,
            "Transaction sent, waiting for confirmation"
        );

        // Wait for confirmation
        let receipt = tokio::time::timeout(self.confirmation_timeout, pending_tx.get_receipt())
            .await
            .map_err(|_| eyre!("Timeout waiting for receipt of {}", tx_hash))?
            .map_err(|e| eyre!("Failed to get receipt: {}", e))?;

        if !receipt.status() {
            return Err(eyre!("Transaction {} reverted", tx_hash));
        }

        Ok(format!("{:#x}", tx_hash))
    }
}

#[async_trait]
impl SettlementContract for EvmChainClient {
    async fn calculate_fee(&self, amount: U256) -> Result<U256> {
        let contract = ChainSync::new(self.contract_address, &self.provider);
        let fee = contract
            .calculateFee(amount)
            .call()
            .await
            .wrap_err("Failed to call calculateFee")?;
        Ok(fee._0)
    }
}

#[async_trait]
impl TokenContract for EvmChainClient {
    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        let erc20 = IERC20::new(token, &self.provider);
        let balance = erc20
            .balanceOf(owner)
            .call()
            .await
            .wrap_err_with(|| format!("Failed to read balance of {} for {}", token, owner))?;
        Ok(balance._0)
    }
}
