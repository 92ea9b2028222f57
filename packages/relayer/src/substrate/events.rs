//! Typed extraction of bridge-transfer messages from decoded event fields.

use codec::{Decode, Encode};
use eyre::{eyre, Result};
use primitive_types::U256;
use tracing::{info, warn};

use super::decode::{DecodedField, DecodedValue};
use crate::message::{Message, ResourceId};

/// Handler turning an event's field list into a message. Handlers leave
/// `source` unset; the listener stamps it before routing.
pub type EventHandler = fn(&[DecodedField]) -> Result<Message>;

pub const FUNGIBLE_TRANSFER: &str = "FungibleTransfer";
pub const NON_FUNGIBLE_TRANSFER: &str = "NonFungibleTransfer";
pub const GENERIC_TRANSFER: &str = "GenericTransfer";

/// Event signalling a runtime upgrade; the listener refreshes its metadata
/// snapshot when it sees one.
pub const METADATA_UPDATE_EVENT: &str = "ParachainSystem.ValidationFunctionApplied";

/// Field name carrying the transfer amount. The registry labels the unnamed
/// U256 event field with the type's full path.
const AMOUNT_FIELD: &str = "primitive_types.U256.U256";
/// Sole entry of the decoded U256 record.
const LIMBS_FIELD: &str = "[u64; 4]";

/// The transfer events the listener subscribes to, as (event suffix, handler)
/// pairs. Full event names are `<pallet>.<suffix>`.
pub fn subscriptions() -> [(&'static str, EventHandler); 3] {
    [
        (FUNGIBLE_TRANSFER, fungible_transfer_handler as EventHandler),
        (NON_FUNGIBLE_TRANSFER, non_fungible_transfer_handler),
        (GENERIC_TRANSFER, generic_transfer_handler),
    ]
}

pub fn fungible_transfer_handler(fields: &[DecodedField]) -> Result<Message> {
    let chain_id = field_as_u8("ChainId", fields)?;
    let deposit_nonce = field_as_u64("DepositNonce", fields)?;
    let resource_bytes = field_as_byte_seq("ResourceId", fields)?;
    let resource_id = to_32_bytes(&resource_bytes)?;
    let amount = field_as_u256(fields)?;
    let recipient = field_as_byte_seq("Vec<u8>", fields)?;

    info!(
        destination = chain_id,
        nonce = deposit_nonce,
        resource_id = %hex::encode(resource_id),
        %amount,
        "Got fungible transfer event"
    );

    Ok(Message::new_fungible_transfer(
        0, // unset, stamped by the listener
        chain_id,
        deposit_nonce,
        amount,
        resource_id,
        recipient,
    ))
}

pub fn non_fungible_transfer_handler(_fields: &[DecodedField]) -> Result<Message> {
    warn!("Got non-fungible transfer event");
    Err(eyre!("non-fungible transfer not supported"))
}

pub fn generic_transfer_handler(fields: &[DecodedField]) -> Result<Message> {
    let chain_id = field_as_u8("ChainId", fields)?;
    let deposit_nonce = field_as_u64("DepositNonce", fields)?;
    let resource_bytes = field_as_byte_seq("ResourceId", fields)?;
    let resource_id = to_32_bytes(&resource_bytes)?;
    let metadata = field_as_byte_seq("Vec<u8>", fields)?;

    info!(
        destination = chain_id,
        nonce = deposit_nonce,
        resource_id = %hex::encode(resource_id),
        "Got generic transfer event"
    );

    Ok(Message::new_generic_transfer(
        0, // unset, stamped by the listener
        chain_id,
        deposit_nonce,
        resource_id,
        metadata,
    ))
}

fn field<'a>(name: &str, fields: &'a [DecodedField]) -> Result<&'a DecodedValue> {
    fields
        .iter()
        .find(|f| f.name == name)
        .map(|f| &f.value)
        .ok_or_else(|| eyre!("field with name '{}' not found", name))
}

fn field_as_u8(name: &str, fields: &[DecodedField]) -> Result<u8> {
    match field(name, fields)? {
        DecodedValue::U8(value) => Ok(*value),
        other => Err(eyre!(
            "field type mismatch, expected U8, got {}",
            other.kind()
        )),
    }
}

fn field_as_u64(name: &str, fields: &[DecodedField]) -> Result<u64> {
    match field(name, fields)? {
        DecodedValue::U64(value) => Ok(*value),
        other => Err(eyre!(
            "field type mismatch, expected U64, got {}",
            other.kind()
        )),
    }
}

fn field_as_byte_seq(name: &str, fields: &[DecodedField]) -> Result<Vec<u8>> {
    match field(name, fields)? {
        DecodedValue::Seq(items) => items
            .iter()
            .map(|item| match item {
                DecodedValue::U8(byte) => Ok(*byte),
                other => Err(eyre!("couldn't cast '{}' to 'U8'", other.kind())),
            })
            .collect(),
        _ => Err(eyre!("field value not an array")),
    }
}

fn to_32_bytes(bytes: &[u8]) -> Result<ResourceId> {
    if bytes.len() != 32 {
        return Err(eyre!("array length mismatch"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Reassemble the transfer amount.
///
/// The decoder presents a U256 as a record holding its 4-limb array; rather
/// than assembling limbs by hand, the limbs are round-tripped through the
/// chain's own codec and decoded as a single big integer.
fn field_as_u256(fields: &[DecodedField]) -> Result<U256> {
    let value = fields
        .iter()
        .find(|f| f.name == AMOUNT_FIELD)
        .map(|f| &f.value)
        .ok_or_else(|| eyre!("amount field not found"))?;
    let DecodedValue::Record(entries) = value else {
        return Err(eyre!("unexpected amount field structure"));
    };
    let limbs_value = entries
        .iter()
        .find(|(name, _)| name == LIMBS_FIELD)
        .map(|(_, value)| value)
        .ok_or_else(|| eyre!("unexpected amount field structure"))?;
    let DecodedValue::Seq(items) = limbs_value else {
        return Err(eyre!("unexpected amount field structure"));
    };
    if items.len() != 4 {
        return Err(eyre!("unexpected amount field structure"));
    }

    let mut limbs = [0u64; 4];
    for (limb, item) in limbs.iter_mut().zip(items) {
        match item {
            DecodedValue::U64(value) => *limb = *value,
            other => {
                return Err(eyre!(
                    "field type mismatch, expected U64, got {}",
                    other.kind()
                ))
            }
        }
    }

    let encoded = limbs.encode();
    U256::decode(&mut &encoded[..]).map_err(|_| eyre!("couldn't decode amount"))
}
