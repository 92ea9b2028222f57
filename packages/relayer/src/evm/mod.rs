//! EVM chain support: connection lifecycle, the deposit-log listener and the
//! destination writer.

pub mod connection;
pub mod contract;
pub mod listener;
pub mod writer;

pub use connection::{EvmConnection, INSUFFICIENT_FUNDS};
pub use listener::EvmListener;
pub use writer::EvmWriter;
