//! Routes messages from chain listeners to the writer registered for the
//! destination chain.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use eyre::{eyre, Result};
use tracing::debug;

use crate::message::{ChainId, Message};

/// Destination-side counterpart of a listener. Accepts messages from the
/// router and commits them on the destination chain; whether acceptance is a
/// synchronous commit or an enqueue is up to the implementation. Must be safe
/// to call from multiple listeners concurrently.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn resolve(&self, message: Message) -> Result<()>;
}

/// Message router keyed by destination [`ChainId`].
///
/// Writers are registered before the listeners start; after that the map is
/// only read, so `send` is safe to call concurrently.
#[derive(Default)]
pub struct Router {
    writers: RwLock<HashMap<ChainId, Arc<dyn Writer>>>,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    /// Register the writer for a destination chain. Registering the same
    /// chain twice is a configuration error.
    pub fn register(&self, id: ChainId, writer: Arc<dyn Writer>) -> Result<()> {
        let mut writers = self
            .writers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if writers.contains_key(&id) {
            return Err(eyre!("writer for chain {} already registered", id));
        }
        writers.insert(id, writer);
        Ok(())
    }

    /// Forward a message to the writer for its destination chain.
    pub async fn send(&self, message: Message) -> Result<()> {
        debug!(
            source = message.source,
            destination = message.destination,
            nonce = message.deposit_nonce,
            kind = %message.kind,
            "Routing message"
        );
        let writer = {
            let writers = self
                .writers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            writers.get(&message.destination).cloned()
        };
        let writer = writer.ok_or_else(|| {
            eyre!(
                "no writer registered for destination chain {}",
                message.destination
            )
        })?;
        writer.resolve(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;
    use std::sync::Mutex;

    /// Writer that records every message it receives.
    pub struct RecordingWriter {
        pub received: Mutex<Vec<Message>>,
    }

    impl RecordingWriter {
        pub fn new() -> Arc<Self> {
            Arc::new(RecordingWriter {
                received: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Writer for RecordingWriter {
        async fn resolve(&self, message: Message) -> Result<()> {
            self.received.lock().unwrap().push(message);
            Ok(())
        }
    }

    fn fungible(source: ChainId, destination: ChainId, nonce: u64) -> Message {
        Message::new_fungible_transfer(
            source,
            destination,
            nonce,
            U256::from(10u64),
            [0u8; 32],
            vec![1, 2, 3],
        )
    }

    #[tokio::test]
    async fn test_send_dispatches_on_destination() {
        let router = Router::new();
        let writer_a = RecordingWriter::new();
        let writer_b = RecordingWriter::new();
        router.register(1, writer_a.clone()).unwrap();
        router.register(2, writer_b.clone()).unwrap();

        router.send(fungible(2, 1, 1)).await.unwrap();
        router.send(fungible(1, 2, 1)).await.unwrap();
        router.send(fungible(2, 1, 2)).await.unwrap();

        assert_eq!(writer_a.received.lock().unwrap().len(), 2);
        assert_eq!(writer_b.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_unknown_destination_errors() {
        let router = Router::new();
        let err = router.send(fungible(1, 9, 1)).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("no writer registered for destination chain 9"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let router = Router::new();
        let writer = RecordingWriter::new();
        router.register(1, writer.clone()).unwrap();
        let err = router.register(1, writer).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }
}
