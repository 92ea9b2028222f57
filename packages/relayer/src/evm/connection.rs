//! WebSocket connection to an EVM node.

use std::sync::RwLock;

use alloy::primitives::Address;
use alloy::providers::{Provider, RootProvider, WsConnect};
use alloy::pubsub::{PubSubFrontend, Subscription};
use alloy::rpc::client::ClientBuilder;
use alloy::rpc::types::{Filter, Log};
use alloy::transports::RpcError;
use eyre::{eyre, Result, WrapErr};
use tracing::{debug, info};

/// Node error returned when the sender cannot cover `gas * price + value`.
/// Surfaced verbatim so callers can treat it as benign in dry-run setups.
pub const INSUFFICIENT_FUNDS: &str = "insufficient funds for gas * price + value";

/// Thin wrapper around an alloy WebSocket provider with an explicit
/// connect/close lifecycle. Shared by the chain's listener and writer.
pub struct EvmConnection {
    url: String,
    provider: RwLock<Option<RootProvider<PubSubFrontend>>>,
}

impl EvmConnection {
    pub fn new(url: &str) -> Self {
        EvmConnection {
            url: url.to_string(),
            provider: RwLock::new(None),
        }
    }

    /// Establish the WebSocket session. Errors from the transport are
    /// returned as-is.
    pub async fn connect(&self) -> Result<()> {
        info!(url = %self.url, "Connecting to evm node");
        let client = ClientBuilder::default()
            .ws(WsConnect::new(self.url.clone()))
            .await
            .wrap_err_with(|| format!("Failed to connect to evm node at {}", self.url))?;
        let provider = RootProvider::<PubSubFrontend>::new(client);
        *self
            .provider
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(provider);
        Ok(())
    }

    /// Drop the session. Safe to call repeatedly.
    pub fn close(&self) {
        if self
            .provider
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .is_some()
        {
            info!(url = %self.url, "Closed evm connection");
        }
    }

    fn provider(&self) -> Result<RootProvider<PubSubFrontend>> {
        self.provider
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| eyre!("not connected to {}", self.url))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of the latest block known to the node.
    pub async fn latest_block(&self) -> Result<u64> {
        self.provider()?
            .get_block_number()
            .await
            .wrap_err("Failed to fetch latest block")
    }

    /// Account nonce at the given block height.
    pub async fn nonce_at(&self, address: Address, block: u64) -> Result<u64> {
        self.provider()?
            .get_transaction_count(address)
            .block_id(block.into())
            .await
            .wrap_err("Failed to fetch account nonce")
    }

    /// Submit a signed transaction. `raw` is the canonical JSON encoding of
    /// the signed transaction envelope. Node rejections (including
    /// [`INSUFFICIENT_FUNDS`]) pass through with their message verbatim.
    pub async fn submit_tx(&self, raw: &[u8]) -> Result<()> {
        let tx: alloy::consensus::TxEnvelope =
            serde_json::from_slice(raw).wrap_err("Failed to decode signed transaction")?;
        let pending = self
            .provider()?
            .send_tx_envelope(tx)
            .await
            .map_err(|e| match e {
                RpcError::ErrorResp(payload) => eyre!("{}", payload.message),
                other => eyre!(other),
            })?;
        debug!(tx_hash = %pending.tx_hash(), "Submitted transaction");
        Ok(())
    }

    /// Subscribe to logs matching the filter.
    pub async fn subscribe_to_event(&self, filter: &Filter) -> Result<Subscription<Log>> {
        self.provider()?
            .subscribe_logs(filter)
            .await
            .wrap_err("Failed to subscribe to logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::contract::Bridge;
    use alloy::sol_types::SolEvent;

    const TEST_ENDPOINT: &str = "ws://localhost:8545";

    #[tokio::test]
    async fn test_operations_require_connection() {
        let conn = EvmConnection::new(TEST_ENDPOINT);
        let err = conn.latest_block().await.unwrap_err();
        assert!(err.to_string().contains("not connected"));

        // Closing an unconnected connection is a no-op.
        conn.close();
        conn.close();
    }

    #[tokio::test]
    async fn test_submit_tx_rejects_malformed_payload() {
        let conn = EvmConnection::new(TEST_ENDPOINT);
        let err = conn.submit_tx(b"not-a-transaction").await.unwrap_err();
        assert!(err.to_string().contains("Failed to decode signed transaction"));
    }

    #[test]
    fn test_insufficient_funds_sentinel_is_stable() {
        assert_eq!(INSUFFICIENT_FUNDS, "insufficient funds for gas * price + value");
    }

    #[test]
    fn test_deposit_event_signature() {
        assert_eq!(
            Bridge::Deposit::SIGNATURE,
            "Deposit(uint8,bytes32,uint64,uint256,bytes)"
        );
        assert_eq!(
            Bridge::Deposit::SIGNATURE_HASH,
            alloy::primitives::keccak256(Bridge::Deposit::SIGNATURE.as_bytes())
        );
    }

    // The tests below need a local node (e.g. anvil) on ws://localhost:8545.

    #[tokio::test]
    #[ignore]
    async fn test_connect_close() {
        let conn = EvmConnection::new(TEST_ENDPOINT);
        conn.connect().await.unwrap();
        assert!(conn.latest_block().await.is_ok());
        conn.close();
    }

    #[tokio::test]
    #[ignore]
    async fn test_subscribe() {
        let conn = EvmConnection::new(TEST_ENDPOINT);
        conn.connect().await.unwrap();
        let filter = Filter::new();
        conn.subscribe_to_event(&filter).await.unwrap();
        conn.close();
    }
}
