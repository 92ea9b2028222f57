//! Destination writer for the substrate chain.
//!
//! Incoming messages are acknowledged on-chain through the bridge pallet's
//! `acknowledge_proposal` call. The call is assembled against the current
//! metadata snapshot, so a runtime upgrade that moves the pallet or call
//! index is picked up on the next metadata refresh.

use std::sync::Arc;

use async_trait::async_trait;
use codec::Encode;
use eyre::{eyre, Result};
use frame_metadata::v14::RuntimeMetadataV14;
use scale_info::TypeDef;
use tracing::info;

use super::connection::SubstrateConnection;
use crate::message::{Message, TransferKind};
use crate::router::Writer;

const ACKNOWLEDGE_CALL: &str = "acknowledge_proposal";

pub struct SubstrateWriter {
    conn: Arc<SubstrateConnection>,
    bridge_pallet: String,
}

impl SubstrateWriter {
    pub fn new(conn: Arc<SubstrateConnection>, bridge_pallet: &str) -> Self {
        SubstrateWriter {
            conn,
            bridge_pallet: bridge_pallet.to_string(),
        }
    }
}

#[async_trait]
impl Writer for SubstrateWriter {
    async fn resolve(&self, message: Message) -> Result<()> {
        let metadata = self.conn.metadata();
        let call = encode_proposal_call(&metadata, &self.bridge_pallet, &message)?;
        let tx_hash = self.conn.sign_and_submit(call).await?;
        info!(
            source = message.source,
            nonce = message.deposit_nonce,
            kind = %message.kind,
            tx_hash = ?tx_hash,
            "Acknowledged proposal on substrate chain"
        );
        Ok(())
    }
}

/// Locate a call of a pallet in the metadata, returning (pallet index,
/// call index).
fn find_call_index(
    metadata: &RuntimeMetadataV14,
    pallet_name: &str,
    call_name: &str,
) -> Result<(u8, u8)> {
    let pallet = metadata
        .pallets
        .iter()
        .find(|p| p.name == pallet_name)
        .ok_or_else(|| eyre!("no pallet named {}", pallet_name))?;
    let calls = pallet
        .calls
        .as_ref()
        .ok_or_else(|| eyre!("pallet {} declares no calls", pallet_name))?;
    let ty = metadata
        .types
        .resolve(calls.ty.id)
        .ok_or_else(|| eyre!("call type of pallet {} missing from registry", pallet_name))?;
    let TypeDef::Variant(variants) = &ty.type_def else {
        return Err(eyre!("call type of pallet {} is not an enum", pallet_name));
    };
    let variant = variants
        .variants
        .iter()
        .find(|v| v.name == call_name)
        .ok_or_else(|| eyre!("pallet {} has no call named {}", pallet_name, call_name))?;
    Ok((pallet.index, variant.index))
}

/// SCALE-encode `acknowledge_proposal(nonce, src_id, r_id, payload)` for a
/// message.
fn encode_proposal_call(
    metadata: &RuntimeMetadataV14,
    pallet_name: &str,
    message: &Message,
) -> Result<Vec<u8>> {
    let (pallet_index, call_index) = find_call_index(metadata, pallet_name, ACKNOWLEDGE_CALL)?;

    let payload = match &message.kind {
        TransferKind::FungibleTransfer { amount, recipient } => (amount, recipient).encode(),
        TransferKind::NonFungibleTransfer {
            token_id,
            recipient,
            metadata,
        } => (token_id, recipient, metadata).encode(),
        TransferKind::GenericTransfer { metadata } => metadata.encode(),
    };

    let mut call = vec![pallet_index, call_index];
    message.deposit_nonce.encode_to(&mut call);
    message.source.encode_to(&mut call);
    call.extend_from_slice(&message.resource_id);
    payload.encode_to(&mut call);
    Ok(call)
}
