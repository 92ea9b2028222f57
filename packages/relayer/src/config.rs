//! Relayer configuration, loaded from environment variables (with optional
//! `.env` file support).

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{eyre, Result, WrapErr};

use crate::message::ChainId;

/// Main configuration for the relayer.
#[derive(Debug, Clone)]
pub struct Config {
    pub substrate: SubstrateConfig,
    pub evm: EvmConfig,
    pub relayer: RelayerConfig,
    pub blockstore: BlockstoreConfig,
    pub api: ApiConfig,
}

/// Substrate chain configuration.
#[derive(Clone)]
pub struct SubstrateConfig {
    /// Node WebSocket endpoint, e.g. `ws://localhost:9944`.
    pub ws_url: String,
    /// Bridge chain id of this chain.
    pub chain_id: ChainId,
    /// Human-readable chain name, used in logs, metrics and the blockstore.
    pub name: String,
    /// Name of the bridge pallet emitting transfer events.
    pub bridge_pallet: String,
    /// sr25519 signer seed (secret URI form).
    pub signer_seed: String,
    /// First block to process.
    pub start_block: u64,
}

/// Custom Debug that redacts the signer seed to prevent accidental log leakage.
impl fmt::Debug for SubstrateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubstrateConfig")
            .field("ws_url", &self.ws_url)
            .field("chain_id", &self.chain_id)
            .field("name", &self.name)
            .field("bridge_pallet", &self.bridge_pallet)
            .field("signer_seed", &"<redacted>")
            .field("start_block", &self.start_block)
            .finish()
    }
}

/// EVM chain configuration.
#[derive(Clone)]
pub struct EvmConfig {
    /// Node WebSocket endpoint, e.g. `ws://localhost:8545`.
    pub ws_url: String,
    /// Bridge chain id of this chain.
    pub chain_id: ChainId,
    /// Native EVM network id, used when signing transactions.
    pub network_id: u64,
    /// Human-readable chain name, used in logs, metrics and the blockstore.
    pub name: String,
    /// Bridge contract address.
    pub bridge_address: String,
    /// Hex-encoded secp256k1 private key.
    pub private_key: String,
    /// First block to process.
    pub start_block: u64,
}

/// Custom Debug that redacts the private key to prevent accidental log leakage.
impl fmt::Debug for EvmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmConfig")
            .field("ws_url", &self.ws_url)
            .field("chain_id", &self.chain_id)
            .field("network_id", &self.network_id)
            .field("name", &self.name)
            .field("bridge_address", &self.bridge_address)
            .field("private_key", &"<redacted>")
            .field("start_block", &self.start_block)
            .finish()
    }
}

/// Polling and retry tuning shared by the listeners.
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub block_retry_limit: u32,
    pub block_retry_interval_ms: u64,
}

impl RelayerConfig {
    pub fn block_retry_interval(&self) -> Duration {
        Duration::from_millis(self.block_retry_interval_ms)
    }
}

/// Blockstore configuration.
#[derive(Debug, Clone)]
pub struct BlockstoreConfig {
    pub path: PathBuf,
}

/// Health/metrics API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
}

fn default_block_retry_limit() -> u32 {
    5
}

fn default_block_retry_interval_ms() -> u64 {
    5000
}

fn default_api_port() -> u16 {
    9090
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| eyre!("{} environment variable is required", name))
}

fn optional_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration, reading `.env` from the working directory first if
    /// present.
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load configuration after applying a specific `.env` file.
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let substrate = SubstrateConfig {
            ws_url: required("SUBSTRATE_WS_URL")?,
            chain_id: required("SUBSTRATE_CHAIN_ID")?
                .parse()
                .wrap_err("SUBSTRATE_CHAIN_ID must be a valid u8")?,
            name: env::var("SUBSTRATE_CHAIN_NAME").unwrap_or_else(|_| "substrate".to_string()),
            bridge_pallet: env::var("SUBSTRATE_BRIDGE_PALLET")
                .unwrap_or_else(|_| "ChainBridge".to_string()),
            signer_seed: required("SUBSTRATE_SIGNER_SEED")?,
            start_block: optional_parsed("SUBSTRATE_START_BLOCK", 0),
        };

        let evm = EvmConfig {
            ws_url: required("EVM_WS_URL")?,
            chain_id: required("EVM_CHAIN_ID")?
                .parse()
                .wrap_err("EVM_CHAIN_ID must be a valid u8")?,
            network_id: required("EVM_NETWORK_ID")?
                .parse()
                .wrap_err("EVM_NETWORK_ID must be a valid u64")?,
            name: env::var("EVM_CHAIN_NAME").unwrap_or_else(|_| "evm".to_string()),
            bridge_address: required("EVM_BRIDGE_ADDRESS")?,
            private_key: required("EVM_PRIVATE_KEY")?,
            start_block: optional_parsed("EVM_START_BLOCK", 0),
        };

        let relayer = RelayerConfig {
            block_retry_limit: optional_parsed("BLOCK_RETRY_LIMIT", default_block_retry_limit()),
            block_retry_interval_ms: optional_parsed(
                "BLOCK_RETRY_INTERVAL_MS",
                default_block_retry_interval_ms(),
            ),
        };

        let blockstore = BlockstoreConfig {
            path: env::var("BLOCKSTORE_PATH")
                .unwrap_or_else(|_| "relayer.db".to_string())
                .into(),
        };

        let api = ApiConfig {
            port: optional_parsed("API_PORT", default_api_port()),
        };

        let config = Config {
            substrate,
            evm,
            relayer,
            blockstore,
            api,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.substrate.ws_url.starts_with("ws://") && !self.substrate.ws_url.starts_with("wss://")
        {
            return Err(eyre!("substrate.ws_url must use the ws:// or wss:// scheme"));
        }
        if !self.evm.ws_url.starts_with("ws://") && !self.evm.ws_url.starts_with("wss://") {
            return Err(eyre!("evm.ws_url must use the ws:// or wss:// scheme"));
        }

        if self.substrate.bridge_pallet.is_empty() {
            return Err(eyre!("substrate.bridge_pallet cannot be empty"));
        }
        if self.substrate.signer_seed.is_empty() {
            return Err(eyre!("substrate.signer_seed cannot be empty"));
        }

        if self.evm.bridge_address.len() != 42 || !self.evm.bridge_address.starts_with("0x") {
            return Err(eyre!(
                "evm.bridge_address must be a valid hex address (42 chars with 0x prefix)"
            ));
        }
        if self.evm.private_key.len() != 66 || !self.evm.private_key.starts_with("0x") {
            return Err(eyre!("evm.private_key must be 66 chars (0x + 64 hex chars)"));
        }

        // Two listeners with the same bridge id would race on the router and
        // produce ambiguous message sources.
        if self.substrate.chain_id == self.evm.chain_id {
            return Err(eyre!(
                "substrate.chain_id and evm.chain_id must differ (both are {})",
                self.evm.chain_id
            ));
        }

        if self.relayer.block_retry_limit == 0 {
            return Err(eyre!("relayer.block_retry_limit must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            substrate: SubstrateConfig {
                ws_url: "ws://localhost:9944".to_string(),
                chain_id: 1,
                name: "substrate".to_string(),
                bridge_pallet: "ChainBridge".to_string(),
                signer_seed: "//Alice".to_string(),
                start_block: 0,
            },
            evm: EvmConfig {
                ws_url: "ws://localhost:8545".to_string(),
                chain_id: 2,
                network_id: 31337,
                name: "evm".to_string(),
                bridge_address: "0x0000000000000000000000000000000000000001".to_string(),
                private_key:
                    "0x0000000000000000000000000000000000000000000000000000000000000001"
                        .to_string(),
                start_block: 0,
            },
            relayer: RelayerConfig {
                block_retry_limit: 5,
                block_retry_interval_ms: 5000,
            },
            blockstore: BlockstoreConfig {
                path: "relayer.db".into(),
            },
            api: ApiConfig { port: 9090 },
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_block_retry_limit(), 5);
        assert_eq!(default_block_retry_interval_ms(), 5000);
        assert_eq!(default_api_port(), 9090);
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_ws_scheme_enforced() {
        let mut config = valid_config();
        config.evm.ws_url = "http://localhost:8545".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_evm_address_and_key_validation() {
        let mut config = valid_config();
        config.evm.bridge_address = "invalid".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.evm.private_key = "0x123".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_chain_ids_rejected() {
        let mut config = valid_config();
        config.evm.chain_id = config.substrate.chain_id;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_zero_retry_limit_rejected() {
        let mut config = valid_config();
        config.relayer.block_retry_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let config = valid_config();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("//Alice"));
        assert!(rendered.contains("<redacted>"));
    }
}
