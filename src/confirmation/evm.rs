use std::time::Duration;

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use reqwest::Client;
use serde::Deserialize;

use super::{ConfirmationStatus, ReceiptSource};

/// EVM transaction receipt from RPC
#[derive(Debug, Deserialize)]
struct TransactionReceipt {
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    status: Option<String>,
}

/// EVM RPC response wrapper
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// EVM RPC error
#[derive(Debug, Deserialize)]
struct RpcError {
    code: i32,
    message: String,
}

/// Receipt checker speaking raw JSON-RPC to one EVM chain
pub struct EvmReceiptSource {
    required_confirmations: u64,
    rpc_url: String,
    client: Client,
}

impl EvmReceiptSource {
    pub fn new(rpc_url: String, required_confirmations: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .wrap_err("Failed to build HTTP client")?;

        Ok(Self {
            required_confirmations,
            rpc_url,
            client,
        })
    }

    /// Get transaction receipt from RPC
    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_getTransactionReceipt",
            "params": [tx_hash],
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .json::<RpcResponse<TransactionReceipt>>()
            .await?;

        if let Some(error) = response.error {
            return Err(eyre!("RPC error: {} - {}", error.code, error.message));
        }

        Ok(response.result)
    }

    /// Get current block number from RPC
    async fn get_block_number(&self) -> Result<u64> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_blockNumber",
            "params": [],
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .json::<RpcResponse<String>>()
            .await?;

        let hex = response
            .result
            .ok_or_else(|| eyre!("No block number returned"))?;
        parse_hex_u64(&hex)
    }
}

fn parse_hex_u64(value: &str) -> Result<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .wrap_err_with(|| format!("Invalid hex quantity '{}'", value))
}

/// Classify a receipt given the current head
fn evaluate_receipt(
    receipt: &TransactionReceipt,
    current_block: u64,
    required_confirmations: u64,
) -> Result<ConfirmationStatus> {
    if receipt.status.as_deref() == Some("0x0") {
        return Ok(ConfirmationStatus::Failed);
    }

    let Some(block) = receipt.block_number.as_deref() else {
        return Ok(ConfirmationStatus::Pending);
    };
    let confirmations = current_block.saturating_sub(parse_hex_u64(block)?);

    if confirmations >= required_confirmations {
        Ok(ConfirmationStatus::Confirmed)
    } else {
        Ok(ConfirmationStatus::WaitingConfirmations(confirmations))
    }
}

#[async_trait]
impl ReceiptSource for EvmReceiptSource {
    async fn confirmation_status(&self, tx_hash: &str) -> Result<ConfirmationStatus> {
        let Some(receipt) = self.get_transaction_receipt(tx_hash).await? else {
            return Ok(ConfirmationStatus::Pending);
        };
        let current_block = self.get_block_number().await?;
        evaluate_receipt(&receipt, current_block, self.required_confirmations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(json: &str) -> TransactionReceipt {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_evaluate_receipt() {
        let ok = receipt(r#"{"blockNumber":"0x64","status":"0x1","transactionHash":"0xab"}"#);
        assert_eq!(evaluate_receipt(&ok, 0x64 + 12, 12).unwrap(), ConfirmationStatus::Confirmed);
        assert_eq!(
            evaluate_receipt(&ok, 0x64 + 3, 12).unwrap(),
            ConfirmationStatus::WaitingConfirmations(3)
        );

        let reverted = receipt(r#"{"blockNumber":"0x64","status":"0x0"}"#);
        assert_eq!(evaluate_receipt(&reverted, 1_000, 12).unwrap(), ConfirmationStatus::Failed);

        let unmined = receipt(r#"{"blockNumber":null,"status":null}"#);
        assert_eq!(evaluate_receipt(&unmined, 1_000, 12).unwrap(), ConfirmationStatus::Pending);
    }

    #[test]
    fn test_rpc_error_response_parses() {
        let response: RpcResponse<String> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"header not found"}}"#)
                .unwrap();
        assert!(response.result.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert_eq!(error.message, "header not found");
    }

    #[test]
    fn test_parse_hex_u64() {
        assert_eq!(parse_hex_u64("0x1a").unwrap(), 26);
        assert!(parse_hex_u64("0xzz").is_err());
    }
}
