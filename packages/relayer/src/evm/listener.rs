//! Deposit-log listener for the EVM chain.
//!
//! Watches the bridge contract over a WebSocket log subscription, normalizes
//! each deposit into a [`Message`] and routes it. Logs arrive in block order
//! from the node, so per-chain ordering falls out of the subscription.

use std::sync::Arc;

use alloy::primitives::Address;
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use eyre::{eyre, Report, Result, WrapErr};
use futures::StreamExt;
use primitive_types::U256;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::connection::EvmConnection;
use super::contract::Bridge;
use crate::blockstore::Blockstorer;
use crate::message::{ChainId, Message};
use crate::metrics::ChainMetrics;
use crate::router::Router;

pub struct EvmListener {
    name: String,
    chain_id: ChainId,
    start_block: u64,
    bridge_address: Address,
    conn: Arc<EvmConnection>,
    router: Arc<Router>,
    blockstore: Arc<dyn Blockstorer>,
    sys_err: mpsc::UnboundedSender<Report>,
    metrics: Option<ChainMetrics>,
}

impl EvmListener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        chain_id: ChainId,
        start_block: u64,
        bridge_address: Address,
        conn: Arc<EvmConnection>,
        router: Arc<Router>,
        blockstore: Arc<dyn Blockstorer>,
        sys_err: mpsc::UnboundedSender<Report>,
        metrics: Option<ChainMetrics>,
    ) -> Self {
        EvmListener {
            name: name.to_string(),
            chain_id,
            start_block,
            bridge_address,
            conn,
            router,
            blockstore,
            sys_err,
            metrics,
        }
    }

    /// Subscribe to deposit logs and process them until stopped. A closed
    /// subscription is fatal and reported on the system-error channel.
    pub async fn run(&self, mut stop: mpsc::Receiver<()>) -> Result<()> {
        let filter = Filter::new()
            .address(self.bridge_address)
            .event_signature(Bridge::Deposit::SIGNATURE_HASH)
            .from_block(self.start_block);
        let subscription = self.conn.subscribe_to_event(&filter).await?;
        let mut stream = subscription.into_stream();
        info!(
            chain = %self.name,
            bridge = %self.bridge_address,
            start_block = self.start_block,
            "Subscribed to deposit events"
        );

        loop {
            tokio::select! {
                _ = stop.recv() => return Err(eyre!("polling terminated")),
                log = stream.next() => {
                    let Some(log) = log else {
                        let _ = self.sys_err.send(eyre!(
                            "deposit log subscription closed (chain={}, name={})",
                            self.chain_id,
                            self.name
                        ));
                        return Ok(());
                    };
                    self.handle_log(log).await;
                }
            }
        }
    }

    async fn handle_log(&self, log: Log) {
        let block_number = log.block_number;
        if let Some(number) = block_number {
            if number < self.start_block {
                return;
            }
            if let Some(metrics) = &self.metrics {
                metrics.latest_known_block.set(number as f64);
            }
        }

        let mut message = match decode_deposit(&log) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, tx_hash = ?log.transaction_hash, "Critical error processing event");
                return;
            }
        };
        message.source = self.chain_id;
        debug!(
            destination = message.destination,
            nonce = message.deposit_nonce,
            "Handling deposit event"
        );
        if let Some(metrics) = &self.metrics {
            metrics.messages_submitted.inc();
        }
        if let Err(e) = self.router.send(message).await {
            error!(error = %e, "Failed to route event");
        }

        if let Some(number) = block_number {
            if let Err(e) = self.blockstore.store_block(number).await {
                error!(error = %e, "Failed to write to blockstore");
            }
            if let Some(metrics) = &self.metrics {
                metrics.blocks_processed.inc();
                metrics.latest_processed_block.set(number as f64);
            }
        }
    }
}

/// Decode a deposit log into a fungible transfer message with an unset
/// source.
fn decode_deposit(log: &Log) -> Result<Message> {
    let event = Bridge::Deposit::decode_log(&log.inner, true).wrap_err("Failed to decode deposit log")?;
    let amount = U256::from_little_endian(&event.data.amount.to_le_bytes::<32>());
    Ok(Message::new_fungible_transfer(
        0, // unset, stamped by the listener
        event.data.destinationChainId,
        event.data.depositNonce,
        amount,
        event.data.resourceId.0,
        event.data.recipient.to_vec(),
    ))
}
