//! Prometheus metrics for the Chainspan relayer.
//!
//! Exposed on the /metrics endpoint for scraping. Listeners hold an optional
//! [`ChainMetrics`] handle with the per-chain label children bound once.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, Counter, CounterVec, Gauge, GaugeVec,
};

lazy_static! {
    pub static ref BLOCKS_PROCESSED: CounterVec = register_counter_vec!(
        "relayer_blocks_processed_total",
        "Total number of blocks processed",
        &["chain"]
    )
    .unwrap();

    pub static ref LATEST_KNOWN_BLOCK: GaugeVec = register_gauge_vec!(
        "relayer_latest_known_block",
        "Latest finalized block observed on the chain",
        &["chain"]
    )
    .unwrap();

    pub static ref LATEST_PROCESSED_BLOCK: GaugeVec = register_gauge_vec!(
        "relayer_latest_processed_block",
        "Latest block fully processed by the listener",
        &["chain"]
    )
    .unwrap();

    pub static ref MESSAGES_SUBMITTED: CounterVec = register_counter_vec!(
        "relayer_messages_submitted_total",
        "Total number of messages submitted to the router",
        &["chain"]
    )
    .unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "relayer_errors_total",
        "Total number of errors",
        &["chain", "type"]
    )
    .unwrap();

    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    )
    .unwrap();
}

/// Per-chain metrics handle with bound label children.
#[derive(Clone)]
pub struct ChainMetrics {
    pub blocks_processed: Counter,
    pub latest_known_block: Gauge,
    pub latest_processed_block: Gauge,
    pub messages_submitted: Counter,
}

impl ChainMetrics {
    pub fn new(chain: &str) -> Self {
        ChainMetrics {
            blocks_processed: BLOCKS_PROCESSED.with_label_values(&[chain]),
            latest_known_block: LATEST_KNOWN_BLOCK.with_label_values(&[chain]),
            latest_processed_block: LATEST_PROCESSED_BLOCK.with_label_values(&[chain]),
            messages_submitted: MESSAGES_SUBMITTED.with_label_values(&[chain]),
        }
    }
}

/// Record an error by chain and type.
pub fn record_error(chain: &str, error_type: &str) {
    ERRORS.with_label_values(&[chain, error_type]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_metrics_bind_per_chain() {
        let a = ChainMetrics::new("chain-a");
        let b = ChainMetrics::new("chain-b");

        let before = a.blocks_processed.get();
        a.blocks_processed.inc();
        assert_eq!(a.blocks_processed.get(), before + 1.0);
        // Separate label child, unaffected.
        assert_eq!(b.blocks_processed.get(), 0.0);

        a.latest_processed_block.set(123.0);
        assert_eq!(a.latest_processed_block.get(), 123.0);
    }
}
