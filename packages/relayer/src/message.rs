//! The normalized bridge-transfer message exchanged between listeners and
//! writers.

use primitive_types::U256;
use std::fmt;

/// 8-bit identifier of a chain participating in the bridge.
pub type ChainId = u8;

/// Per-source-chain monotonically increasing deposit counter. The pair
/// (source [`ChainId`], nonce) uniquely identifies a bridge deposit.
pub type DepositNonce = u64;

/// 32-byte asset/resource class identifier agreed between chains. Opaque to
/// the relayer.
pub type ResourceId = [u8; 32];

/// Payload of a bridge transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferKind {
    FungibleTransfer {
        amount: U256,
        recipient: Vec<u8>,
    },
    NonFungibleTransfer {
        token_id: U256,
        recipient: Vec<u8>,
        metadata: Vec<u8>,
    },
    GenericTransfer {
        metadata: Vec<u8>,
    },
}

impl TransferKind {
    /// Short name used in logs and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            TransferKind::FungibleTransfer { .. } => "fungible",
            TransferKind::NonFungibleTransfer { .. } => "nonfungible",
            TransferKind::GenericTransfer { .. } => "generic",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A normalized transfer event.
///
/// Decoders construct messages with `source = 0`; the listener stamps its own
/// chain id before handing the message to the router, so a zero source means
/// "unset".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub source: ChainId,
    pub destination: ChainId,
    pub deposit_nonce: DepositNonce,
    pub resource_id: ResourceId,
    pub kind: TransferKind,
}

impl Message {
    pub fn new_fungible_transfer(
        source: ChainId,
        destination: ChainId,
        deposit_nonce: DepositNonce,
        amount: U256,
        resource_id: ResourceId,
        recipient: Vec<u8>,
    ) -> Self {
        Message {
            source,
            destination,
            deposit_nonce,
            resource_id,
            kind: TransferKind::FungibleTransfer { amount, recipient },
        }
    }

    pub fn new_nonfungible_transfer(
        source: ChainId,
        destination: ChainId,
        deposit_nonce: DepositNonce,
        token_id: U256,
        resource_id: ResourceId,
        recipient: Vec<u8>,
        metadata: Vec<u8>,
    ) -> Self {
        Message {
            source,
            destination,
            deposit_nonce,
            resource_id,
            kind: TransferKind::NonFungibleTransfer {
                token_id,
                recipient,
                metadata,
            },
        }
    }

    pub fn new_generic_transfer(
        source: ChainId,
        destination: ChainId,
        deposit_nonce: DepositNonce,
        resource_id: ResourceId,
        metadata: Vec<u8>,
    ) -> Self {
        Message {
            source,
            destination,
            deposit_nonce,
            resource_id,
            kind: TransferKind::GenericTransfer { metadata },
        }
    }
}
