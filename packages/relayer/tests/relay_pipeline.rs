//! End-to-end pipeline tests: scripted chains feeding listeners into one
//! shared router.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eyre::{eyre, Result};
use primitive_types::U256;
use sp_core::H256;
use tokio::sync::mpsc;

use chainspan_relayer::blockstore::Blockstorer;
use chainspan_relayer::message::{ChainId, Message};
use chainspan_relayer::router::{Router, Writer};
use chainspan_relayer::substrate::connection::SubstrateHeader;
use chainspan_relayer::substrate::decode::{DecodedField, DecodedValue, Event, EventRetriever};
use chainspan_relayer::substrate::{SubstrateListener, SubstrateRpc, BLOCK_NOT_READY};

const CHAIN_A: ChainId = 1;
const CHAIN_B: ChainId = 2;
const DEST: ChainId = 9;

fn hash_for(chain: ChainId, height: u64) -> H256 {
    H256::from_low_u64_be(((chain as u64) << 32) | height)
}

/// Fixed-head chain: every block up to `finalized` exists and is final.
struct ScriptedChain {
    chain: ChainId,
    finalized: u64,
}

#[async_trait]
impl SubstrateRpc for ScriptedChain {
    async fn latest_header(&self) -> Result<SubstrateHeader> {
        Ok(header(self.finalized))
    }

    async fn finalized_head(&self) -> Result<H256> {
        Ok(hash_for(self.chain, self.finalized))
    }

    async fn header(&self, hash: H256) -> Result<SubstrateHeader> {
        Ok(header(hash.to_low_u64_be() & 0xffff_ffff))
    }

    async fn block_hash(&self, height: u64) -> Result<H256> {
        if height > self.finalized {
            return Err(eyre!(BLOCK_NOT_READY));
        }
        Ok(hash_for(self.chain, height))
    }

    async fn update_metadata(&self) -> Result<()> {
        Ok(())
    }
}

fn header(number: u64) -> SubstrateHeader {
    SubstrateHeader {
        number,
        parent_hash: H256::zero(),
        state_root: H256::zero(),
        extrinsics_root: H256::zero(),
    }
}

struct ScriptedEvents {
    events: HashMap<H256, Vec<Event>>,
}

#[async_trait]
impl EventRetriever for ScriptedEvents {
    async fn events_at(&self, block_hash: H256) -> Result<Vec<Event>> {
        Ok(self.events.get(&block_hash).cloned().unwrap_or_default())
    }
}

struct MemoryStore {
    heights: Mutex<Vec<u64>>,
}

#[async_trait]
impl Blockstorer for MemoryStore {
    async fn store_block(&self, height: u64) -> Result<()> {
        self.heights.lock().unwrap().push(height);
        Ok(())
    }
}

struct RecordingWriter {
    received: Mutex<Vec<Message>>,
}

#[async_trait]
impl Writer for RecordingWriter {
    async fn resolve(&self, message: Message) -> Result<()> {
        self.received.lock().unwrap().push(message);
        Ok(())
    }
}

fn fungible_event(destination: ChainId, nonce: u64) -> Event {
    let resource: Vec<u8> = (1..=32).collect();
    let amount = U256::from(nonce) * U256::from(1_000u64);
    Event {
        name: "ChainBridge.FungibleTransfer".to_string(),
        fields: vec![
            DecodedField {
                name: "ChainId".to_string(),
                value: DecodedValue::U8(destination),
            },
            DecodedField {
                name: "DepositNonce".to_string(),
                value: DecodedValue::U64(nonce),
            },
            DecodedField {
                name: "ResourceId".to_string(),
                value: DecodedValue::Seq(resource.iter().map(|b| DecodedValue::U8(*b)).collect()),
            },
            DecodedField {
                name: "primitive_types.U256.U256".to_string(),
                value: DecodedValue::Record(vec![(
                    "[u64; 4]".to_string(),
                    DecodedValue::Seq(
                        amount.0.iter().map(|limb| DecodedValue::U64(*limb)).collect(),
                    ),
                )]),
            },
            DecodedField {
                name: "Vec<u8>".to_string(),
                value: DecodedValue::Seq(vec![DecodedValue::U8(0x01)]),
            },
        ],
    }
}

fn listener(
    chain: ChainId,
    blocks: u64,
    nonces_per_block: u64,
    router: Arc<Router>,
) -> (Arc<SubstrateListener>, Arc<MemoryStore>) {
    let mut events = HashMap::new();
    let mut nonce = 0;
    for height in 0..=blocks {
        let mut list = Vec::new();
        for _ in 0..nonces_per_block {
            list.push(fungible_event(DEST, nonce));
            nonce += 1;
        }
        events.insert(hash_for(chain, height), list);
    }

    let store = Arc::new(MemoryStore {
        heights: Mutex::new(Vec::new()),
    });
    let (sys_err_tx, _sys_err_rx) = mpsc::unbounded_channel();
    let mut listener = SubstrateListener::new(
        &format!("chain-{chain}"),
        chain,
        0,
        Arc::new(ScriptedChain {
            chain,
            finalized: blocks,
        }),
        Arc::new(ScriptedEvents { events }),
        store.clone(),
        router,
        sys_err_tx,
        None,
    )
    .with_retry(5, Duration::from_millis(1));
    listener.register_transfer_handlers("ChainBridge").unwrap();
    (Arc::new(listener), store)
}

/// Two listeners submitting into one router concurrently: each listener's
/// messages arrive in its own block order, whatever the interleaving.
#[tokio::test]
async fn test_concurrent_listeners_preserve_per_chain_order() {
    let router = Arc::new(Router::new());
    let writer = Arc::new(RecordingWriter {
        received: Mutex::new(Vec::new()),
    });
    router.register(DEST, writer.clone()).unwrap();

    let (listener_a, store_a) = listener(CHAIN_A, 20, 2, router.clone());
    let (listener_b, store_b) = listener(CHAIN_B, 20, 2, router.clone());

    let (stop_a_tx, stop_a_rx) = mpsc::channel(1);
    let (stop_b_tx, stop_b_rx) = mpsc::channel(1);
    let runner_a = listener_a.clone();
    let runner_b = listener_b.clone();
    let handle_a = tokio::spawn(async move { runner_a.run(stop_a_rx).await });
    let handle_b = tokio::spawn(async move { runner_b.run(stop_b_rx).await });

    // 21 blocks x 2 events per chain.
    for _ in 0..1000 {
        if writer.received.lock().unwrap().len() == 84 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    stop_a_tx.send(()).await.unwrap();
    stop_b_tx.send(()).await.unwrap();
    handle_a.await.unwrap().unwrap_err();
    handle_b.await.unwrap().unwrap_err();

    let received = writer.received.lock().unwrap().clone();
    assert_eq!(received.len(), 84);

    // Every message carries its listener's chain id as source.
    assert!(received
        .iter()
        .all(|m| m.source == CHAIN_A || m.source == CHAIN_B));

    // Per-chain nonce sequences are strictly increasing.
    for chain in [CHAIN_A, CHAIN_B] {
        let nonces: Vec<u64> = received
            .iter()
            .filter(|m| m.source == chain)
            .map(|m| m.deposit_nonce)
            .collect();
        assert_eq!(nonces.len(), 42);
        assert!(nonces.windows(2).all(|w| w[0] < w[1]), "out of order: {nonces:?}");
    }

    // Blockstores advanced strictly by one from the start block.
    for store in [&store_a, &store_b] {
        let heights = store.heights.lock().unwrap().clone();
        assert_eq!(heights, (0..=20).collect::<Vec<u64>>());
    }
}
