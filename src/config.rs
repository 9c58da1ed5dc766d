use eyre::{eyre, Result, WrapErr};
use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;

use crate::relay::RetryConfig;
use crate::token_map::{TokenDecimals, TokenMap};
use crate::types::ChainId;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub chains: Vec<ChainConfig>,
    pub validator: ValidatorConfig,
    pub relayer: RelayerConfig,
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub tokens: TokenConfig,
}

/// One settlement chain (source and destination)
#[derive(Clone)]
pub struct ChainConfig {
    /// Human-readable name (e.g., "ethereum", "base")
    pub name: String,
    /// Native EVM chain ID
    pub chain_id: ChainId,
    pub rpc_url: String,
    /// Settlement contract address
    pub contract_address: String,
    /// First block to scan; defaults to head minus START_BLOCK_LAG
    pub start_block: Option<u64>,
    /// Confirmations before a relayed transfer counts as released
    pub required_confirmations: u64,
    pub enabled: bool,
}

/// Custom Debug that redacts the RPC URL (hosted endpoints embed API keys).
impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("name", &self.name)
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &"<redacted>")
            .field("contract_address", &self.contract_address)
            .field("start_block", &self.start_block)
            .field("required_confirmations", &self.required_confirmations)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Validator signing key
#[derive(Clone)]
pub struct ValidatorConfig {
    pub private_key: String,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for ValidatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorConfig")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Relay loop tuning
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub poll_interval: Duration,
    pub start_block_lag: u64,
    pub max_block_range: u64,
    pub gas_limit: u64,
    pub confirmation_timeout: Duration,
    /// Age after which processed ids are forgotten; `None` keeps them
    pub processed_max_age: Option<Duration>,
    pub max_retries: u32,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            start_block_lag: default_start_block_lag(),
            max_block_range: default_max_block_range(),
            gas_limit: default_gas_limit(),
            confirmation_timeout: Duration::from_secs(default_confirmation_timeout_secs()),
            processed_max_age: None,
            max_retries: RetryConfig::default().max_retries,
        }
    }
}

impl RelayerConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            ..RetryConfig::default()
        }
    }
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
}

/// Token mapping and decimals
#[derive(Debug, Clone, Default)]
pub struct TokenConfig {
    /// Built-in mappings merged with operator overrides
    pub map: TokenMap,
    /// Operator-supplied mappings only (from TOKEN_MAPPINGS)
    pub overrides: TokenMap,
    /// Registry plus TOKEN_DECIMALS. The relay path moves base units and
    /// never reads this; it is for library consumers building a
    /// `TransferService` from the loaded config.
    pub decimals: TokenDecimals,
}

/// Default functions
fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_start_block_lag() -> u64 {
    100
}

fn default_max_block_range() -> u64 {
    2_000
}

fn default_gas_limit() -> u64 {
    500_000
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_required_confirmations() -> u64 {
    12
}

fn default_api_port() -> u16 {
    9090
}

/// Parse an optional variable, failing on a present but malformed value
fn parse_opt<T>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| eyre!("{} has an invalid value '{}': {}", key, raw, e)),
        _ => Ok(None),
    }
}

fn required(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| eyre!("{} environment variable is required", key))
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        Self::from_lookup(&|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let count: usize = parse_opt(lookup, "CHAINS_COUNT")?
            .ok_or_else(|| eyre!("CHAINS_COUNT environment variable is required"))?;

        let mut chains = Vec::with_capacity(count);
        for i in 1..=count {
            let prefix = format!("CHAIN_{}", i);

            let chain_id: ChainId = parse_opt(lookup, &format!("{}_CHAIN_ID", prefix))?
                .ok_or_else(|| eyre!("Missing {}_CHAIN_ID", prefix))?;

            chains.push(ChainConfig {
                name: lookup(&format!("{}_NAME", prefix))
                    .unwrap_or_else(|| format!("chain_{}", chain_id)),
                chain_id,
                rpc_url: required(lookup, &format!("{}_RPC_URL", prefix))?,
                contract_address: required(lookup, &format!("{}_CONTRACT_ADDRESS", prefix))?,
                start_block: parse_opt(lookup, &format!("{}_START_BLOCK", prefix))?,
                required_confirmations: parse_opt(
                    lookup,
                    &format!("{}_REQUIRED_CONFIRMATIONS", prefix),
                )?
                .unwrap_or(default_required_confirmations()),
                enabled: parse_opt(lookup, &format!("{}_ENABLED", prefix))?.unwrap_or(true),
            });
        }

        let validator = ValidatorConfig {
            private_key: required(lookup, "VALIDATOR_PRIVATE_KEY")?,
        };

        let defaults = RelayerConfig::default();
        let relayer = RelayerConfig {
            poll_interval: parse_opt(lookup, "POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            start_block_lag: parse_opt(lookup, "START_BLOCK_LAG")?
                .unwrap_or(defaults.start_block_lag),
            max_block_range: parse_opt(lookup, "MAX_BLOCK_RANGE")?
                .unwrap_or(defaults.max_block_range),
            gas_limit: parse_opt(lookup, "RELAY_GAS_LIMIT")?.unwrap_or(defaults.gas_limit),
            confirmation_timeout: parse_opt(lookup, "CONFIRMATION_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.confirmation_timeout),
            processed_max_age: parse_opt(lookup, "PROCESSED_SET_MAX_AGE_SECS")?
                .map(Duration::from_secs),
            max_retries: parse_opt(lookup, "RELAY_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
        };

        let database = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| DatabaseConfig { url });

        let api = ApiConfig {
            port: parse_opt(lookup, "API_PORT")?.unwrap_or(default_api_port()),
        };

        let mut tokens = TokenConfig {
            map: TokenMap::mainnet_defaults(),
            overrides: TokenMap::new(),
            decimals: TokenDecimals::default(),
        };
        if let Some(raw) = lookup("TOKEN_MAPPINGS") {
            tokens
                .overrides
                .extend_from_list(&raw)
                .wrap_err("TOKEN_MAPPINGS is malformed")?;
            tokens.map.extend_from_list(&raw)?;
        }
        if let Some(raw) = lookup("TOKEN_DECIMALS") {
            tokens
                .decimals
                .extend_from_list(&raw)
                .wrap_err("TOKEN_DECIMALS is malformed")?;
        }

        let config = Config {
            chains,
            validator,
            relayer,
            database,
            api,
            tokens,
        };

        config.validate()?;
        Ok(config)
    }

    /// Chains that are switched on
    pub fn enabled_chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.iter().filter(|c| c.enabled)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.enabled_chains().next().is_none() {
            return Err(eyre!("At least one enabled chain must be configured"));
        }

        let mut seen_ids = HashSet::new();
        for chain in &self.chains {
            if !seen_ids.insert(chain.chain_id) {
                return Err(eyre!("Duplicate chain ID: {}", chain.chain_id));
            }

            if chain.rpc_url.is_empty() {
                return Err(eyre!("RPC URL for chain {} cannot be empty", chain.name));
            }

            // Validate contract address format
            if chain.contract_address.len() != 42
                || !chain.contract_address.starts_with("0x")
                || Address::from_str(&chain.contract_address).is_err()
            {
                return Err(eyre!(
                    "Invalid contract address for chain {}: {}",
                    chain.name,
                    chain.contract_address
                ));
            }
        }

        // Validate validator private key
        if self.validator.private_key.len() != 66
            || !self.validator.private_key.starts_with("0x")
            || self.validator.private_key.parse::<PrivateKeySigner>().is_err()
        {
            return Err(eyre!(
                "VALIDATOR_PRIVATE_KEY must be 66 chars (0x + 64 hex chars)"
            ));
        }

        if self.relayer.poll_interval.is_zero() {
            return Err(eyre!("POLL_INTERVAL_MS must be greater than zero"));
        }
        if self.relayer.max_block_range == 0 {
            return Err(eyre!("MAX_BLOCK_RANGE must be greater than zero"));
        }
        if self.relayer.gas_limit == 0 {
            return Err(eyre!("RELAY_GAS_LIMIT must be greater than zero"));
        }

        for source_chain in self.tokens.overrides.source_chains() {
            if !seen_ids.contains(&source_chain) {
                return Err(eyre!(
                    "TOKEN_MAPPINGS references chain {} which is not configured",
                    source_chain
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

    fn base_env() -> HashMap<&'static str, String> {
        let mut vars = HashMap::new();
        vars.insert("CHAINS_COUNT", "2".to_string());
        vars.insert("CHAIN_1_CHAIN_ID", "1".to_string());
        vars.insert("CHAIN_1_NAME", "ethereum".to_string());
        vars.insert("CHAIN_1_RPC_URL", "http://localhost:8545".to_string());
        vars.insert(
            "CHAIN_1_CONTRACT_ADDRESS",
            "0x0000000000000000000000000000000000000001".to_string(),
        );
        vars.insert("CHAIN_2_CHAIN_ID", "8453".to_string());
        vars.insert("CHAIN_2_RPC_URL", "http://localhost:8546".to_string());
        vars.insert(
            "CHAIN_2_CONTRACT_ADDRESS",
            "0x0000000000000000000000000000000000000002".to_string(),
        );
        vars.insert("VALIDATOR_PRIVATE_KEY", KEY.to_string());
        vars
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<Config> {
        Config::from_lookup(&|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.chains.len(), 2);
        assert_eq!(config.chains[1].name, "chain_8453");
        assert_eq!(config.chains[0].required_confirmations, 12);
        assert_eq!(config.relayer.poll_interval, Duration::from_millis(30_000));
        assert_eq!(config.relayer.start_block_lag, 100);
        assert_eq!(config.relayer.gas_limit, 500_000);
        assert_eq!(config.relayer.processed_max_age, None);
        assert_eq!(config.api.port, 9090);
        assert!(config.database.is_none());
        assert!(!config.tokens.map.is_empty());
    }

    #[test]
    fn test_missing_required_values() {
        let mut vars = base_env();
        vars.remove("VALIDATOR_PRIVATE_KEY");
        assert!(load(&vars).is_err());

        let mut vars = base_env();
        vars.remove("CHAIN_2_RPC_URL");
        assert!(load(&vars).is_err());

        let mut vars = base_env();
        vars.remove("CHAINS_COUNT");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_malformed_number_is_rejected() {
        let mut vars = base_env();
        vars.insert("POLL_INTERVAL_MS", "soon".to_string());
        assert!(load(&vars).is_err());

        vars.insert("POLL_INTERVAL_MS", "0".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_contract_address_validation() {
        let mut vars = base_env();
        vars.insert("CHAIN_1_CONTRACT_ADDRESS", "0x1234".to_string());
        assert!(load(&vars).is_err());

        vars.insert(
            "CHAIN_1_CONTRACT_ADDRESS",
            "0xZZ00000000000000000000000000000000000001".to_string(),
        );
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_duplicate_chain_id_rejected() {
        let mut vars = base_env();
        vars.insert("CHAIN_2_CHAIN_ID", "1".to_string());
        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("Duplicate chain ID"));
    }

    #[test]
    fn test_token_mappings_must_reference_configured_chains() {
        let mut vars = base_env();
        vars.insert(
            "TOKEN_MAPPINGS",
            "1:0x1111111111111111111111111111111111111111=0x2222222222222222222222222222222222222222"
                .to_string(),
        );
        let config = load(&vars).unwrap();
        assert_eq!(
            config.tokens.map.resolve(1, &Address::repeat_byte(0x11)),
            Some(Address::repeat_byte(0x22))
        );

        vars.insert(
            "TOKEN_MAPPINGS",
            "137:0x1111111111111111111111111111111111111111=0x2222222222222222222222222222222222222222"
                .to_string(),
        );
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_token_decimals_overrides() {
        let mut vars = base_env();
        vars.insert(
            "TOKEN_DECIMALS",
            "0x4444444444444444444444444444444444444444=9".to_string(),
        );
        let config = load(&vars).unwrap();
        assert_eq!(config.tokens.decimals.decimals_for(&Address::repeat_byte(0x44)), 9);
        assert_eq!(config.tokens.decimals.decimals_for(&Address::repeat_byte(0x45)), 18);

        vars.insert("TOKEN_DECIMALS", "0x4444444444444444444444444444444444444444=six".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_secrets_are_redacted() {
        let mut vars = base_env();
        vars.insert("DATABASE_URL", "postgres://user:hunter2@db/chainsync".to_string());
        let config = load(&vars).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains(&KEY[2..]));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("localhost:8545"));
    }

    #[test]
    fn test_disabled_chains() {
        let mut vars = base_env();
        vars.insert("CHAIN_2_ENABLED", "false".to_string());
        let config = load(&vars).unwrap();
        assert_eq!(config.enabled_chains().count(), 1);

        vars.insert("CHAIN_1_ENABLED", "false".to_string());
        assert!(load(&vars).is_err());
    }
}
