//! Destination writer for the EVM chain.
//!
//! Votes the incoming proposal on the bridge contract. Transactions are
//! signed locally and pushed through the shared connection's raw-submission
//! path.

use std::sync::Arc;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{keccak256, Address, B256, FixedBytes};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use tracing::info;

use super::connection::EvmConnection;
use super::contract::Bridge;
use crate::message::{Message, TransferKind};
use crate::router::Writer;

const VOTE_GAS_LIMIT: u64 = 1_000_000;
const VOTE_GAS_PRICE: u128 = 1_000_000_000; // 1 gwei

pub struct EvmWriter {
    conn: Arc<EvmConnection>,
    bridge_address: Address,
    network_id: u64,
    address: Address,
    wallet: EthereumWallet,
}

impl EvmWriter {
    pub fn new(
        conn: Arc<EvmConnection>,
        bridge_address: Address,
        private_key: &str,
        network_id: u64,
    ) -> Result<Self> {
        let signer: PrivateKeySigner = private_key.parse().wrap_err("Invalid private key")?;
        let address = signer.address();
        info!(operator = %address, bridge = %bridge_address, "EVM writer initialized");
        Ok(EvmWriter {
            conn,
            bridge_address,
            network_id,
            address,
            wallet: EthereumWallet::from(signer),
        })
    }
}

#[async_trait]
impl Writer for EvmWriter {
    async fn resolve(&self, message: Message) -> Result<()> {
        let call = Bridge::voteProposalCall {
            chainId: message.source,
            depositNonce: message.deposit_nonce,
            resourceId: FixedBytes(message.resource_id),
            dataHash: data_hash(&message),
        };

        let latest = self.conn.latest_block().await?;
        let nonce = self.conn.nonce_at(self.address, latest).await?;

        let request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(self.bridge_address)
            .with_input(call.abi_encode())
            .with_nonce(nonce)
            .with_chain_id(self.network_id)
            .with_gas_limit(VOTE_GAS_LIMIT)
            .with_gas_price(VOTE_GAS_PRICE);
        let envelope = request
            .build(&self.wallet)
            .await
            .wrap_err("Failed to sign transaction")?;
        let raw = serde_json::to_vec(&envelope).wrap_err("Failed to encode signed transaction")?;

        self.conn.submit_tx(&raw).await?;
        info!(
            source = message.source,
            nonce = message.deposit_nonce,
            kind = %message.kind,
            "Voted proposal on evm chain"
        );
        Ok(())
    }
}

/// Commitment to the transfer payload carried alongside the vote.
fn data_hash(message: &Message) -> B256 {
    let mut buf = Vec::new();
    match &message.kind {
        TransferKind::FungibleTransfer { amount, recipient } => {
            buf.extend_from_slice(&amount.to_big_endian());
            buf.extend_from_slice(recipient);
        }
        TransferKind::NonFungibleTransfer {
            token_id,
            recipient,
            metadata,
        } => {
            buf.extend_from_slice(&token_id.to_big_endian());
            buf.extend_from_slice(recipient);
            buf.extend_from_slice(metadata);
        }
        TransferKind::GenericTransfer { metadata } => {
            buf.extend_from_slice(metadata);
        }
    }
    keccak256(&buf)
}
