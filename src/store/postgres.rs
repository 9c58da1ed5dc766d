//! PostgreSQL ledger
//!
//! Amounts are stored as NUMERIC(78,0) and read back as TEXT so no decimal
//! crate is needed; addresses and hashes are lowercase 0x-hex strings.

use std::str::FromStr;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::error;

use super::LedgerStore;
use crate::types::{NewTransfer, Transfer, TransferId, TransferStatus};

const SELECT_COLUMNS: &str = r#"id, user_address, recipient, token, destination_token,
    amount::TEXT AS amount, fee::TEXT AS fee, source_chain, destination_chain,
    status, tx_hash, created_at, updated_at"#;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Row shape of the `transfers` table
#[derive(Debug, Clone, FromRow)]
struct TransferRow {
    id: String,
    user_address: String,
    recipient: String,
    token: String,
    destination_token: Option<String>,
    amount: String,
    fee: String,
    source_chain: i64,
    destination_chain: i64,
    status: String,
    tx_hash: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TransferRow> for Transfer {
    type Error = eyre::Report;

    fn try_from(row: TransferRow) -> Result<Self> {
        Ok(Transfer {
            id: B256::from_str(&row.id).wrap_err("Invalid transfer id in database")?,
            user: Address::from_str(&row.user_address).wrap_err("Invalid user address")?,
            recipient: Address::from_str(&row.recipient).wrap_err("Invalid recipient")?,
            token: Address::from_str(&row.token).wrap_err("Invalid token")?,
            destination_token: row
                .destination_token
                .as_deref()
                .map(Address::from_str)
                .transpose()
                .wrap_err("Invalid destination token")?,
            amount: U256::from_str(&row.amount).wrap_err("Invalid amount")?,
            fee: U256::from_str(&row.fee).wrap_err("Invalid fee")?,
            source_chain: u64::try_from(row.source_chain)
                .map_err(|_| eyre!("Negative source chain {}", row.source_chain))?,
            destination_chain: u64::try_from(row.destination_chain)
                .map_err(|_| eyre!("Negative destination chain {}", row.destination_chain))?,
            status: row.status.parse()?,
            tx_hash: row.tx_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn hex_address(address: &Address) -> String {
    format!("0x{:x}", address)
}

fn hex_id(id: &TransferId) -> String {
    format!("0x{}", hex::encode(id))
}

/// Ledger backed by the `transfers` table
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and migrate
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    fn rows_to_transfers(rows: Vec<TransferRow>) -> Result<Vec<Transfer>> {
        rows.into_iter().map(Transfer::try_from).collect()
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_transfer(&self, transfer: NewTransfer) -> Result<Transfer> {
        // amount and fee are bound as text and cast to NUMERIC
        let query = format!(
            r#"INSERT INTO transfers (id, user_address, recipient, token, destination_token,
                   amount, fee, source_chain, destination_chain, status)
               VALUES ($1, $2, $3, $4, $5, $6::NUMERIC, $7::NUMERIC, $8, $9, $10)
               RETURNING {}"#,
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, TransferRow>(&query)
            .bind(hex_id(&transfer.id))
            .bind(hex_address(&transfer.user))
            .bind(hex_address(&transfer.recipient))
            .bind(hex_address(&transfer.token))
            .bind(transfer.destination_token.as_ref().map(hex_address))
            .bind(transfer.amount.to_string())
            .bind(transfer.fee.to_string())
            .bind(transfer.source_chain as i64)
            .bind(transfer.destination_chain as i64)
            .bind(transfer.status.as_str())
            .fetch_one(&self.pool)
            .await
            .wrap_err("Failed to insert transfer")?;

        row.try_into()
    }

    async fn update_transfer_status(
        &self,
        id: &TransferId,
        expected: TransferStatus,
        status: TransferStatus,
        tx_hash: Option<&str>,
    ) -> Result<Option<Transfer>> {
        let query = format!(
            r#"UPDATE transfers
               SET status = $3, tx_hash = COALESCE($4, tx_hash), updated_at = NOW()
               WHERE id = $1 AND status = $2
               RETURNING {}"#,
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, TransferRow>(&query)
            .bind(hex_id(id))
            .bind(expected.as_str())
            .bind(status.as_str())
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("SQL error updating transfer status: {:?}", e);
                e
            })
            .wrap_err("Failed to update transfer status")?;

        row.map(Transfer::try_from).transpose()
    }

    async fn find_transfer(&self, id: &TransferId) -> Result<Option<Transfer>> {
        let query = format!("SELECT {} FROM transfers WHERE id = $1", SELECT_COLUMNS);
        let row = sqlx::query_as::<_, TransferRow>(&query)
            .bind(hex_id(id))
            .fetch_optional(&self.pool)
            .await
            .wrap_err("Failed to get transfer")?;

        row.map(Transfer::try_from).transpose()
    }

    async fn list_transfers_by_user(&self, user: &Address) -> Result<Vec<Transfer>> {
        let query = format!(
            "SELECT {} FROM transfers WHERE user_address = $1 ORDER BY created_at DESC",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransferRow>(&query)
            .bind(hex_address(user))
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to list user transfers")?;

        Self::rows_to_transfers(rows)
    }

    async fn list_transfers_by_status(
        &self,
        status: TransferStatus,
        limit: i64,
    ) -> Result<Vec<Transfer>> {
        let query = format!(
            "SELECT {} FROM transfers WHERE status = $1 ORDER BY created_at ASC LIMIT $2",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, TransferRow>(&query)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to list transfers by status")?;

        Self::rows_to_transfers(rows)
    }
}
