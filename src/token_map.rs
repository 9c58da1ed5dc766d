//! Token address mapping and decimals lookup
//!
//! [`TokenMap`] translates a token on a source chain to its counterpart on the
//! destination chain. A missing entry stops the transfer: no mapping appears
//! without an operator change, so it is never retried.
//!
//! [`TokenDecimals`] resolves the base-unit scale of a token from a known list
//! plus operator overrides, defaulting to 18.

use alloy::primitives::{address, Address};
use eyre::{eyre, Result, WrapErr};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

use crate::types::ChainId;

pub const ETHEREUM_MAINNET: ChainId = 1;
pub const BASE_MAINNET: ChainId = 8453;

pub const ETHEREUM_USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
pub const ETHEREUM_USDT: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");
pub const ETHEREUM_WBTC: Address = address!("2260FAC5E5542a773Aa44fBCfEDf7C193bc2C599");
pub const BASE_USDC: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

/// Static `(source chain, source token) -> destination token` lookup
#[derive(Debug, Clone, Default)]
pub struct TokenMap {
    entries: HashMap<(ChainId, Address), Address>,
}

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mappings of the production Ethereum <-> Base deployment
    pub fn mainnet_defaults() -> Self {
        let mut map = Self::new();
        map.insert(ETHEREUM_MAINNET, ETHEREUM_USDC, BASE_USDC);
        // USDT bridges into USDC on Base
        map.insert(ETHEREUM_MAINNET, ETHEREUM_USDT, BASE_USDC);
        map.insert(BASE_MAINNET, BASE_USDC, ETHEREUM_USDC);
        map
    }

    pub fn insert(&mut self, source_chain: ChainId, source_token: Address, destination_token: Address) {
        self.entries
            .insert((source_chain, source_token), destination_token);
    }

    /// Resolve the destination token for a source-chain token
    pub fn resolve(&self, source_chain: ChainId, source_token: &Address) -> Option<Address> {
        self.entries.get(&(source_chain, *source_token)).copied()
    }

    /// Source chains that have at least one mapping
    pub fn source_chains(&self) -> Vec<ChainId> {
        let mut chains: Vec<ChainId> = self.entries.keys().map(|(c, _)| *c).collect();
        chains.sort_unstable();
        chains.dedup();
        chains
    }

    /// Merge `<srcChain>:<srcToken>=<dstToken>` entries separated by commas.
    /// Later entries override earlier ones.
    pub fn extend_from_list(&mut self, raw: &str) -> Result<()> {
        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (source, destination) = entry
                .split_once('=')
                .ok_or_else(|| eyre!("Token mapping '{}' is missing '='", entry))?;
            let (chain, token) = source
                .split_once(':')
                .ok_or_else(|| eyre!("Token mapping '{}' is missing '<chain>:'", entry))?;

            let chain: ChainId = chain
                .trim()
                .parse()
                .wrap_err_with(|| format!("Invalid chain id in token mapping '{}'", entry))?;
            let source_token = Address::from_str(token.trim())
                .wrap_err_with(|| format!("Invalid source token in token mapping '{}'", entry))?;
            let destination_token = Address::from_str(destination.trim()).wrap_err_with(|| {
                format!("Invalid destination token in token mapping '{}'", entry)
            })?;

            self.insert(chain, source_token, destination_token);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decimals registry for converting human amounts into base units
#[derive(Debug, Clone)]
pub struct TokenDecimals {
    known: HashMap<Address, u8>,
}

impl Default for TokenDecimals {
    fn default() -> Self {
        let mut known = HashMap::new();
        known.insert(ETHEREUM_USDT, 6);
        known.insert(ETHEREUM_USDC, 6);
        known.insert(ETHEREUM_WBTC, 8);
        known.insert(BASE_USDC, 6);
        Self { known }
    }
}

impl TokenDecimals {
    pub fn insert(&mut self, token: Address, decimals: u8) {
        self.known.insert(token, decimals);
    }

    /// Decimals for `token`, falling back to 18 for unlisted tokens
    pub fn decimals_for(&self, token: &Address) -> u8 {
        match self.known.get(token) {
            Some(decimals) => *decimals,
            None => {
                warn!(
                    token = %token,
                    default = DEFAULT_TOKEN_DECIMALS,
                    "Token decimals not registered, assuming default"
                );
                DEFAULT_TOKEN_DECIMALS
            }
        }
    }

    /// Merge `<token>=<decimals>` entries separated by commas.
    pub fn extend_from_list(&mut self, raw: &str) -> Result<()> {
        for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (token, decimals) = entry
                .split_once('=')
                .ok_or_else(|| eyre!("Token decimals entry '{}' is missing '='", entry))?;
            let token = Address::from_str(token.trim())
                .wrap_err_with(|| format!("Invalid token in decimals entry '{}'", entry))?;
            let decimals: u8 = decimals
                .trim()
                .parse()
                .wrap_err_with(|| format!("Invalid decimals in entry '{}'", entry))?;
            if decimals > 77 {
                return Err(eyre!("Decimals {} out of range for {}", decimals, token));
            }
            self.insert(token, decimals);
        }
        Ok(())
    }
}
