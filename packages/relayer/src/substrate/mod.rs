//! Substrate chain support: connection lifecycle, dynamic event decoding,
//! the finalization-tracking listener and the destination writer.

pub mod connection;
pub mod decode;
pub mod events;
pub mod listener;
pub mod writer;

pub use connection::{SubstrateConnection, SubstrateRpc, BLOCK_NOT_READY};
pub use decode::{EventRetriever, StorageEventRetriever};
pub use listener::SubstrateListener;
pub use writer::SubstrateWriter;
