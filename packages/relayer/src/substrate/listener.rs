//! Finalization-tracking poll loop for the substrate chain.
//!
//! The listener walks finalized blocks starting from its configured height,
//! fetches the decoded events of each block, dispatches them to the
//! registered handlers and hands the resulting messages to the router. A
//! block is only left behind once its events were processed cleanly, so a
//! transient failure is never mistaken for "no events in this block".

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use eyre::{eyre, Report, Result, WrapErr};
use sp_core::H256;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use super::connection::{SubstrateRpc, BLOCK_NOT_READY};
use super::decode::EventRetriever;
use super::events::{self, EventHandler, METADATA_UPDATE_EVENT};
use crate::blockstore::Blockstorer;
use crate::message::{ChainId, Message};
use crate::metrics::ChainMetrics;
use crate::router::Router;

/// Default number of consecutive failures tolerated at one height.
pub const BLOCK_RETRY_LIMIT: u32 = 5;
/// Default delay between polls for a new block.
pub const BLOCK_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Height and freshness of the listener's most recent progress, exposed for
/// monitoring.
#[derive(Debug, Clone)]
pub struct LatestBlock {
    pub height: u64,
    pub last_updated: Instant,
}

pub struct SubstrateListener {
    name: String,
    chain_id: ChainId,
    start_block: u64,
    conn: Arc<dyn SubstrateRpc>,
    retriever: Arc<dyn EventRetriever>,
    blockstore: Arc<dyn Blockstorer>,
    router: Arc<Router>,
    subscriptions: HashMap<String, EventHandler>,
    sys_err: mpsc::UnboundedSender<Report>,
    metrics: Option<ChainMetrics>,
    latest_block: Mutex<LatestBlock>,
    retry_limit: u32,
    retry_interval: Duration,
}

impl SubstrateListener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        chain_id: ChainId,
        start_block: u64,
        conn: Arc<dyn SubstrateRpc>,
        retriever: Arc<dyn EventRetriever>,
        blockstore: Arc<dyn Blockstorer>,
        router: Arc<Router>,
        sys_err: mpsc::UnboundedSender<Report>,
        metrics: Option<ChainMetrics>,
    ) -> Self {
        SubstrateListener {
            name: name.to_string(),
            chain_id,
            start_block,
            conn,
            retriever,
            blockstore,
            router,
            subscriptions: HashMap::new(),
            sys_err,
            metrics,
            latest_block: Mutex::new(LatestBlock {
                height: start_block,
                last_updated: Instant::now(),
            }),
            retry_limit: BLOCK_RETRY_LIMIT,
            retry_interval: BLOCK_RETRY_INTERVAL,
        }
    }

    /// Override the retry budget and poll interval.
    pub fn with_retry(mut self, limit: u32, interval: Duration) -> Self {
        self.retry_limit = limit;
        self.retry_interval = interval;
        self
    }

    /// Enable a handler for an event name. Not supported once polling runs.
    pub fn register_event_handler(&mut self, name: &str, handler: EventHandler) -> Result<()> {
        if self.subscriptions.contains_key(name) {
            return Err(eyre!("event {} already registered", name));
        }
        self.subscriptions.insert(name.to_string(), handler);
        Ok(())
    }

    /// Register the three transfer handlers under the given bridge pallet.
    pub fn register_transfer_handlers(&mut self, pallet: &str) -> Result<()> {
        for (suffix, handler) in events::subscriptions() {
            self.register_event_handler(&format!("{pallet}.{suffix}"), handler)?;
        }
        Ok(())
    }

    /// Most recent progress observation.
    pub fn latest_block(&self) -> LatestBlock {
        self.latest_block
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Validate the starting height against the chain head, then poll until
    /// stopped or the retry budget runs out.
    pub async fn run(&self, stop: mpsc::Receiver<()>) -> Result<()> {
        let header = self.conn.latest_header().await?;
        if header.number < self.start_block {
            return Err(eyre!(
                "starting block ({}) is greater than latest known block ({})",
                self.start_block,
                header.number
            ));
        }
        self.poll_blocks(stop).await
    }

    async fn poll_blocks(&self, mut stop: mpsc::Receiver<()>) -> Result<()> {
        info!(chain = %self.name, start_block = self.start_block, "Polling blocks...");
        let mut current_block = self.start_block;
        let mut retry = self.retry_limit;
        loop {
            match stop.try_recv() {
                Ok(()) | Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(eyre!("polling terminated"));
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            // Retry budget exhausted at this height: fatal for the relayer.
            if retry == 0 {
                let _ = self.sys_err.send(eyre!(
                    "event polling retries exceeded (chain={}, name={})",
                    self.chain_id,
                    self.name
                ));
                return Ok(());
            }

            let finalized_hash = match self.conn.finalized_head().await {
                Ok(hash) => hash,
                Err(e) => {
                    error!(error = %e, "Failed to fetch finalized hash");
                    retry -= 1;
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
            };

            let finalized_header = match self.conn.header(finalized_hash).await {
                Ok(header) => header,
                Err(e) => {
                    error!(error = %e, "Failed to fetch finalized header");
                    retry -= 1;
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
            };

            if let Some(metrics) = &self.metrics {
                metrics.latest_known_block.set(finalized_header.number as f64);
            }

            // The wanted block is ahead of finality; steady state, not a
            // failure.
            if current_block > finalized_header.number {
                debug!(
                    target_block = current_block,
                    latest = finalized_header.number,
                    "Block not yet finalized"
                );
                tokio::time::sleep(self.retry_interval).await;
                continue;
            }

            let hash = match self.conn.block_hash(current_block).await {
                Ok(hash) => hash,
                Err(e) if e.to_string() == BLOCK_NOT_READY => {
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
                Err(e) => {
                    error!(block = current_block, error = %e, "Failed to query latest block");
                    retry -= 1;
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
            };

            debug!(target_block = current_block, "Querying block for deposit events");

            if let Err(e) = self.process_events(hash).await {
                error!(block = current_block, error = %e, "Failed to process events in block");
                retry -= 1;
                continue;
            }

            if let Err(e) = self.blockstore.store_block(current_block).await {
                error!(error = %e, "Failed to write to blockstore");
            }

            if let Some(metrics) = &self.metrics {
                metrics.blocks_processed.inc();
                metrics.latest_processed_block.set(current_block as f64);
            }

            current_block += 1;
            {
                let mut latest = self
                    .latest_block
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                latest.height = current_block;
                latest.last_updated = Instant::now();
            }
            retry = self.retry_limit;
        }
    }

    /// Fetch and dispatch the events of one block. A retrieval failure fails
    /// the whole block; handler failures only drop the affected message.
    async fn process_events(&self, hash: H256) -> Result<()> {
        trace!(block = ?hash, "Fetching events for block");

        let events = self
            .retriever
            .events_at(hash)
            .await
            .wrap_err("event retrieving error")?;

        for event in &events {
            if let Some(handler) = self.subscriptions.get(&event.name) {
                debug!(event = %event.name, "Handling event");
                self.submit_message(handler(&event.fields)).await;
            } else if event.name == METADATA_UPDATE_EVENT {
                debug!("Received metadata update event");
                if let Err(e) = self.conn.update_metadata().await {
                    error!(error = %e, "Unable to update metadata");
                }
            }
        }

        trace!(block = ?hash, "Finished processing events");
        Ok(())
    }

    /// Stamp the source chain id into the message and send it to the router.
    async fn submit_message(&self, result: Result<Message>) {
        let mut message = match result {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Critical error processing event");
                return;
            }
        };
        message.source = self.chain_id;
        if let Some(metrics) = &self.metrics {
            metrics.messages_submitted.inc();
        }
        if let Err(e) = self.router.send(message).await {
            error!(error = %e, "Failed to route event");
        }
    }
}
