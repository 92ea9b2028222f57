//! WebSocket connection to a substrate node.
//!
//! Owns the signing keypair and a cached runtime-metadata snapshot. The
//! snapshot is swapped atomically on `update_metadata`; readers clone the
//! `Arc` and never hold the lock across an RPC call.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use codec::{Compact, Decode, Encode};
use eyre::{eyre, Result, WrapErr};
use frame_metadata::v14::RuntimeMetadataV14;
use frame_metadata::{RuntimeMetadata, RuntimeMetadataPrefixed};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::{Deserialize, Deserializer};
use sp_core::crypto::Ss58Codec;
use sp_core::hashing::blake2_256;
use sp_core::storage::StorageKey;
use sp_core::{sr25519, Bytes, Pair, H256};
use tracing::{debug, info};

/// Node error returned when a block hash is requested for a height the chain
/// has not produced yet. Matched by value in the listener's poll loop.
pub const BLOCK_NOT_READY: &str = "required result to be 32 bytes, but got 0";

/// Block header in the node's RPC representation (numbers are hex strings).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstrateHeader {
    #[serde(deserialize_with = "deserialize_hex_number")]
    pub number: u64,
    pub parent_hash: H256,
    pub state_root: H256,
    pub extrinsics_root: H256,
}

fn deserialize_hex_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let raw = String::deserialize(deserializer)?;
    let digits = raw.strip_prefix("0x").unwrap_or(&raw);
    u64::from_str_radix(digits, 16).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeVersion {
    spec_version: u32,
    transaction_version: u32,
}

/// Chain queries the substrate listener depends on; implemented by the live
/// connection and by scripted fakes in tests.
#[async_trait]
pub trait SubstrateRpc: Send + Sync {
    async fn latest_header(&self) -> Result<SubstrateHeader>;
    async fn finalized_head(&self) -> Result<H256>;
    async fn header(&self, hash: H256) -> Result<SubstrateHeader>;
    async fn block_hash(&self, height: u64) -> Result<H256>;
    async fn update_metadata(&self) -> Result<()>;
}

pub struct SubstrateConnection {
    url: String,
    client: WsClient,
    signer: sr25519::Pair,
    genesis_hash: H256,
    metadata: RwLock<Arc<RuntimeMetadataV14>>,
}

impl SubstrateConnection {
    /// Connect to the node, fetch the genesis hash and the initial metadata
    /// snapshot.
    pub async fn connect(url: &str, signer: sr25519::Pair) -> Result<Self> {
        info!(url, "Connecting to substrate node");
        let client = WsClientBuilder::default()
            .build(url)
            .await
            .wrap_err_with(|| format!("Failed to connect to substrate node at {url}"))?;

        let genesis_hash: Option<H256> = client
            .request("chain_getBlockHash", rpc_params![0u64])
            .await
            .wrap_err("Failed to fetch genesis hash")?;
        let genesis_hash = genesis_hash.ok_or_else(|| eyre!("node returned no genesis hash"))?;

        let metadata = Self::fetch_metadata(&client).await?;
        info!(
            url,
            genesis_hash = ?genesis_hash,
            pallets = metadata.pallets.len(),
            "Substrate connection established"
        );

        Ok(SubstrateConnection {
            url: url.to_string(),
            client,
            signer,
            genesis_hash,
            metadata: RwLock::new(Arc::new(metadata)),
        })
    }

    async fn fetch_metadata(client: &WsClient) -> Result<RuntimeMetadataV14> {
        let raw: Bytes = client
            .request("state_getMetadata", rpc_params![])
            .await
            .wrap_err("Failed to fetch runtime metadata")?;
        let prefixed = RuntimeMetadataPrefixed::decode(&mut &raw.0[..])
            .wrap_err("Failed to decode runtime metadata")?;
        match prefixed.1 {
            RuntimeMetadata::V14(metadata) => Ok(metadata),
            _ => Err(eyre!("unsupported runtime metadata version")),
        }
    }

    /// Current metadata snapshot. Cheap to clone; never blocks decoders on a
    /// concurrent refresh.
    pub fn metadata(&self) -> Arc<RuntimeMetadataV14> {
        self.metadata
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Raw storage read at an optional block hash.
    pub async fn storage(&self, key: StorageKey, at: Option<H256>) -> Result<Option<Bytes>> {
        self.client
            .request("state_getStorage", rpc_params![key, at])
            .await
            .wrap_err("Failed to read storage")
    }

    /// Submit an already-encoded (signed) extrinsic.
    pub async fn submit_extrinsic(&self, extrinsic: Bytes) -> Result<H256> {
        self.client
            .request("author_submitExtrinsic", rpc_params![extrinsic])
            .await
            .wrap_err("Failed to submit extrinsic")
    }

    async fn account_nonce(&self) -> Result<u32> {
        let account = self.signer.public().to_ss58check();
        self.client
            .request("system_accountNextIndex", rpc_params![account])
            .await
            .wrap_err("Failed to fetch account nonce")
    }

    async fn runtime_version(&self) -> Result<RuntimeVersion> {
        self.client
            .request("state_getRuntimeVersion", rpc_params![])
            .await
            .wrap_err("Failed to fetch runtime version")
    }

    /// Wrap a SCALE-encoded call into a v4 signed extrinsic (immortal era,
    /// zero tip) and submit it.
    pub async fn sign_and_submit(&self, call: Vec<u8>) -> Result<H256> {
        let nonce = self.account_nonce().await?;
        let runtime = self.runtime_version().await?;

        let extra = (0u8, Compact(nonce), Compact(0u128)); // (era, nonce, tip)
        let additional = (
            runtime.spec_version,
            runtime.transaction_version,
            self.genesis_hash,
            self.genesis_hash,
        );

        let mut payload = call.clone();
        extra.encode_to(&mut payload);
        additional.encode_to(&mut payload);
        // Payloads longer than 256 bytes are signed through their hash.
        let signature = if payload.len() > 256 {
            self.signer.sign(&blake2_256(&payload))
        } else {
            self.signer.sign(&payload)
        };

        let mut extrinsic = Vec::new();
        extrinsic.push(0x84); // version 4, signed
        extrinsic.push(0x00); // MultiAddress::Id
        extrinsic.extend_from_slice(self.signer.public().as_ref());
        extrinsic.push(0x01); // MultiSignature::Sr25519
        extrinsic.extend_from_slice(signature.as_ref());
        extra.encode_to(&mut extrinsic);
        extrinsic.extend_from_slice(&call);

        let mut framed = Vec::new();
        Compact(extrinsic.len() as u32).encode_to(&mut framed);
        framed.extend_from_slice(&extrinsic);

        debug!(nonce, len = framed.len(), "Submitting signed extrinsic");
        self.submit_extrinsic(Bytes(framed)).await
    }
}

#[async_trait]
impl SubstrateRpc for SubstrateConnection {
    async fn latest_header(&self) -> Result<SubstrateHeader> {
        let header: Option<SubstrateHeader> = self
            .client
            .request("chain_getHeader", rpc_params![])
            .await
            .wrap_err("Failed to fetch latest header")?;
        header.ok_or_else(|| eyre!("node returned no latest header"))
    }

    async fn finalized_head(&self) -> Result<H256> {
        self.client
            .request("chain_getFinalizedHead", rpc_params![])
            .await
            .wrap_err("Failed to fetch finalized head")
    }

    async fn header(&self, hash: H256) -> Result<SubstrateHeader> {
        let header: Option<SubstrateHeader> = self
            .client
            .request("chain_getHeader", rpc_params![hash])
            .await
            .wrap_err("Failed to fetch header")?;
        header.ok_or_else(|| eyre!("no header for block {:?}", hash))
    }

    /// The node answers with null until the height exists; that is surfaced
    /// as the canonical not-ready error string.
    async fn block_hash(&self, height: u64) -> Result<H256> {
        let hash: Option<H256> = self
            .client
            .request("chain_getBlockHash", rpc_params![height])
            .await
            .wrap_err("Failed to fetch block hash")?;
        hash.ok_or_else(|| eyre!(BLOCK_NOT_READY))
    }

    async fn update_metadata(&self) -> Result<()> {
        let fresh = Self::fetch_metadata(&self.client).await?;
        *self
            .metadata
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(fresh);
        info!("Runtime metadata refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_deserializes_hex_numbers() {
        let raw = r#"{
            "number": "0x64",
            "parentHash": "0x0000000000000000000000000000000000000000000000000000000000000001",
            "stateRoot": "0x0000000000000000000000000000000000000000000000000000000000000002",
            "extrinsicsRoot": "0x0000000000000000000000000000000000000000000000000000000000000003",
            "digest": { "logs": [] }
        }"#;
        let header: SubstrateHeader = serde_json::from_str(raw).unwrap();
        assert_eq!(header.number, 100);
        assert_eq!(header.parent_hash, H256::from_low_u64_be(1));
    }

    #[test]
    fn test_block_not_ready_sentinel_is_stable() {
        assert_eq!(BLOCK_NOT_READY, "required result to be 32 bytes, but got 0");
    }
}
