//! Dynamic decoding of on-chain events against the runtime metadata.
//!
//! The node stores the events of a block as a SCALE-encoded
//! `Vec<EventRecord>` under the `System.Events` storage key. The shape of
//! each event is only known through the runtime metadata's portable type
//! registry, so decoding walks the registry and produces [`DecodedValue`]s, a
//! tagged algebra the typed event handlers pattern-match instead of downcasting.

use std::sync::Arc;

use async_trait::async_trait;
use codec::{Compact, Decode};
use eyre::{bail, eyre, Result, WrapErr};
use frame_metadata::v14::RuntimeMetadataV14;
use scale_info::form::PortableForm;
use scale_info::{Field, PortableRegistry, Type, TypeDef, TypeDefPrimitive};
use sp_core::hashing::twox_128;
use sp_core::storage::StorageKey;
use sp_core::H256;

use super::connection::SubstrateConnection;

/// Dynamically-typed value decoded from a SCALE payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    Str(String),
    /// Sequences, fixed arrays and tuples.
    Seq(Vec<DecodedValue>),
    /// Structs; entries keep declaration order, names are unique.
    Record(Vec<(String, DecodedValue)>),
    /// Enum values.
    Variant {
        name: String,
        fields: Vec<(String, DecodedValue)>,
    },
}

impl DecodedValue {
    /// Name of the value's shape, used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodedValue::Bool(_) => "Bool",
            DecodedValue::U8(_) => "U8",
            DecodedValue::U16(_) => "U16",
            DecodedValue::U32(_) => "U32",
            DecodedValue::U64(_) => "U64",
            DecodedValue::U128(_) => "U128",
            DecodedValue::Str(_) => "Str",
            DecodedValue::Seq(_) => "sequence",
            DecodedValue::Record(_) => "record",
            DecodedValue::Variant { .. } => "variant",
        }
    }
}

/// A single named event field.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField {
    pub name: String,
    pub value: DecodedValue,
}

/// A decoded on-chain event: `<Pallet>.<Variant>` plus its field list.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub fields: Vec<DecodedField>,
}

/// Storage key of `System.Events`.
pub fn system_events_key() -> StorageKey {
    let mut key = twox_128(b"System").to_vec();
    key.extend_from_slice(&twox_128(b"Events"));
    StorageKey(key)
}

/// Decode the raw `System.Events` storage value into named events.
pub fn decode_events(metadata: &RuntimeMetadataV14, data: &[u8]) -> Result<Vec<Event>> {
    let input = &mut &data[..];
    let count = Compact::<u32>::decode(input)
        .wrap_err("invalid event record count")?
        .0;
    let mut events = Vec::with_capacity(count as usize);
    for _ in 0..count {
        // Phase: ApplyExtrinsic(u32) | Finalization | Initialization.
        let phase = u8::decode(input).wrap_err("invalid event phase")?;
        match phase {
            0 => {
                let _extrinsic_index = u32::decode(input).wrap_err("invalid extrinsic index")?;
            }
            1 | 2 => {}
            other => bail!("unknown event phase {}", other),
        }

        let pallet_index = u8::decode(input).wrap_err("invalid pallet index")?;
        let pallet = metadata
            .pallets
            .iter()
            .find(|p| p.index == pallet_index)
            .ok_or_else(|| eyre!("no pallet with index {}", pallet_index))?;
        let event_ty = pallet
            .event
            .as_ref()
            .ok_or_else(|| eyre!("pallet {} declares no events", pallet.name))?
            .ty
            .id;
        let ty = metadata
            .types
            .resolve(event_ty)
            .ok_or_else(|| eyre!("event type {} missing from registry", event_ty))?;
        let TypeDef::Variant(variants) = &ty.type_def else {
            bail!("event type of pallet {} is not an enum", pallet.name);
        };

        let variant_index = u8::decode(input).wrap_err("invalid event variant index")?;
        let variant = variants
            .variants
            .iter()
            .find(|v| v.index == variant_index)
            .ok_or_else(|| {
                eyre!(
                    "pallet {} has no event variant with index {}",
                    pallet.name,
                    variant_index
                )
            })?;

        let mut fields = Vec::with_capacity(variant.fields.len());
        for field in &variant.fields {
            fields.push(DecodedField {
                name: field_label(field, &metadata.types),
                value: decode_value(input, field.ty.id, &metadata.types)?,
            });
        }

        let _topics = Vec::<H256>::decode(input).wrap_err("invalid event topics")?;

        events.push(Event {
            name: format!("{}.{}", pallet.name, variant.name),
            fields,
        });
    }
    Ok(events)
}

/// Decode one value of the given registry type from the input.
pub fn decode_value(
    input: &mut &[u8],
    ty_id: u32,
    registry: &PortableRegistry,
) -> Result<DecodedValue> {
    let ty = registry
        .resolve(ty_id)
        .ok_or_else(|| eyre!("type {} missing from registry", ty_id))?;
    match &ty.type_def {
        TypeDef::Primitive(primitive) => decode_primitive(input, primitive),
        TypeDef::Composite(composite) => {
            let mut entries = Vec::with_capacity(composite.fields.len());
            for field in &composite.fields {
                entries.push((
                    field_label(field, registry),
                    decode_value(input, field.ty.id, registry)?,
                ));
            }
            Ok(DecodedValue::Record(entries))
        }
        TypeDef::Variant(variants) => {
            let index = u8::decode(input).wrap_err("invalid variant index")?;
            let variant = variants
                .variants
                .iter()
                .find(|v| v.index == index)
                .ok_or_else(|| eyre!("no variant with index {}", index))?;
            let mut fields = Vec::with_capacity(variant.fields.len());
            for field in &variant.fields {
                fields.push((
                    field_label(field, registry),
                    decode_value(input, field.ty.id, registry)?,
                ));
            }
            Ok(DecodedValue::Variant {
                name: variant.name.clone(),
                fields,
            })
        }
        TypeDef::Sequence(sequence) => {
            let len = Compact::<u32>::decode(input)
                .wrap_err("invalid sequence length")?
                .0;
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(decode_value(input, sequence.type_param.id, registry)?);
            }
            Ok(DecodedValue::Seq(items))
        }
        TypeDef::Array(array) => {
            let mut items = Vec::with_capacity(array.len as usize);
            for _ in 0..array.len {
                items.push(decode_value(input, array.type_param.id, registry)?);
            }
            Ok(DecodedValue::Seq(items))
        }
        TypeDef::Tuple(tuple) => {
            let mut items = Vec::with_capacity(tuple.fields.len());
            for field in &tuple.fields {
                items.push(decode_value(input, field.id, registry)?);
            }
            Ok(DecodedValue::Seq(items))
        }
        TypeDef::Compact(compact) => decode_compact(input, compact.type_param.id, registry),
        TypeDef::BitSequence(_) => bail!("bit sequences are not supported in event fields"),
    }
}

fn decode_primitive(input: &mut &[u8], primitive: &TypeDefPrimitive) -> Result<DecodedValue> {
    Ok(match primitive {
        TypeDefPrimitive::Bool => DecodedValue::Bool(bool::decode(input)?),
        TypeDefPrimitive::Str => DecodedValue::Str(String::decode(input)?),
        TypeDefPrimitive::U8 => DecodedValue::U8(u8::decode(input)?),
        TypeDefPrimitive::U16 => DecodedValue::U16(u16::decode(input)?),
        TypeDefPrimitive::U32 => DecodedValue::U32(u32::decode(input)?),
        TypeDefPrimitive::U64 => DecodedValue::U64(u64::decode(input)?),
        TypeDefPrimitive::U128 => DecodedValue::U128(u128::decode(input)?),
        other => bail!("unsupported primitive type {:?} in event field", other),
    })
}

fn decode_compact(
    input: &mut &[u8],
    inner_ty_id: u32,
    registry: &PortableRegistry,
) -> Result<DecodedValue> {
    let inner = registry
        .resolve(inner_ty_id)
        .ok_or_else(|| eyre!("type {} missing from registry", inner_ty_id))?;
    let TypeDef::Primitive(primitive) = &inner.type_def else {
        bail!("compact encoding of non-primitive types is not supported");
    };
    Ok(match primitive {
        TypeDefPrimitive::U8 => DecodedValue::U8(Compact::<u8>::decode(input)?.0),
        TypeDefPrimitive::U16 => DecodedValue::U16(Compact::<u16>::decode(input)?.0),
        TypeDefPrimitive::U32 => DecodedValue::U32(Compact::<u32>::decode(input)?.0),
        TypeDefPrimitive::U64 => DecodedValue::U64(Compact::<u64>::decode(input)?.0),
        TypeDefPrimitive::U128 => DecodedValue::U128(Compact::<u128>::decode(input)?.0),
        other => bail!("unsupported compact primitive {:?}", other),
    })
}

/// Label for an event or struct field.
///
/// Named fields keep their name. Unnamed fields are labeled by the resolved
/// type's fully-qualified path when it has one (`primitive_types.U256.U256`),
/// otherwise by the source-level type name recorded in the metadata
/// (`ChainId`, `ResourceId`, `Vec<u8>`), otherwise by a label synthesized
/// from the type's shape (`[u64; 4]`).
fn field_label(field: &Field<PortableForm>, registry: &PortableRegistry) -> String {
    if let Some(name) = &field.name {
        return name.clone();
    }
    if let Some(ty) = registry.resolve(field.ty.id) {
        if !ty.path.segments.is_empty() {
            let joined = ty.path.segments.join(".");
            return match ty.path.segments.last() {
                Some(ident) => format!("{joined}.{ident}"),
                None => joined,
            };
        }
        if let Some(type_name) = &field.type_name {
            return type_name.clone();
        }
        return synthesized_label(ty, registry);
    }
    field.type_name.clone().unwrap_or_default()
}

fn synthesized_label(ty: &Type<PortableForm>, registry: &PortableRegistry) -> String {
    match &ty.type_def {
        TypeDef::Primitive(primitive) => primitive_label(primitive).to_string(),
        TypeDef::Sequence(sequence) => {
            format!("Vec<{}>", type_label(sequence.type_param.id, registry))
        }
        TypeDef::Array(array) => {
            format!("[{}; {}]", type_label(array.type_param.id, registry), array.len)
        }
        _ => "_".to_string(),
    }
}

fn type_label(ty_id: u32, registry: &PortableRegistry) -> String {
    match registry.resolve(ty_id) {
        Some(ty) => synthesized_label(ty, registry),
        None => "_".to_string(),
    }
}

fn primitive_label(primitive: &TypeDefPrimitive) -> &'static str {
    match primitive {
        TypeDefPrimitive::Bool => "bool",
        TypeDefPrimitive::Char => "char",
        TypeDefPrimitive::Str => "str",
        TypeDefPrimitive::U8 => "u8",
        TypeDefPrimitive::U16 => "u16",
        TypeDefPrimitive::U32 => "u32",
        TypeDefPrimitive::U64 => "u64",
        TypeDefPrimitive::U128 => "u128",
        TypeDefPrimitive::U256 => "u256",
        TypeDefPrimitive::I8 => "i8",
        TypeDefPrimitive::I16 => "i16",
        TypeDefPrimitive::I32 => "i32",
        TypeDefPrimitive::I64 => "i64",
        TypeDefPrimitive::I128 => "i128",
        TypeDefPrimitive::I256 => "i256",
    }
}

/// Returns the decoded events emitted during a block.
#[async_trait]
pub trait EventRetriever: Send + Sync {
    async fn events_at(&self, block_hash: H256) -> Result<Vec<Event>>;
}

/// Reads `System.Events` at a block hash and decodes it against the
/// connection's current metadata snapshot.
pub struct StorageEventRetriever {
    conn: Arc<SubstrateConnection>,
}

impl StorageEventRetriever {
    pub fn new(conn: Arc<SubstrateConnection>) -> Self {
        StorageEventRetriever { conn }
    }
}

#[async_trait]
impl EventRetriever for StorageEventRetriever {
    async fn events_at(&self, block_hash: H256) -> Result<Vec<Event>> {
        let raw = self
            .conn
            .storage(system_events_key(), Some(block_hash))
            .await
            .wrap_err("event retrieving error")?;
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        let metadata = self.conn.metadata();
        decode_events(&metadata, &raw.0)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use codec::Encode;
    use primitive_types::U256;

    fn resource_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        for (i, byte) in id.iter_mut().enumerate() {
            *byte = (i + 1) as u8;
        }
        id
    }

    #[test]
    fn test_decode_fungible_transfer_event() {
        let metadata = test_metadata();
        let amount = U256::from(1_000_000_000_000_000_000u64);
        let event = BridgeEvent::FungibleTransfer(
            2,
            7,
            resource_id(),
            amount,
            vec![0xde, 0xad, 0xbe, 0xef],
        );
        let raw = encode_event_records(&[(BRIDGE_PALLET_INDEX, event.encode())]);

        let events = decode_events(&metadata, &raw).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.name, "ChainBridge.FungibleTransfer");

        let names: Vec<&str> = event.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ChainId",
                "DepositNonce",
                "ResourceId",
                "primitive_types.U256.U256",
                "Vec<u8>"
            ]
        );

        assert_eq!(event.fields[0].value, DecodedValue::U8(2));
        assert_eq!(event.fields[1].value, DecodedValue::U64(7));
        match &event.fields[2].value {
            DecodedValue::Seq(items) => {
                assert_eq!(items.len(), 32);
                assert_eq!(items[0], DecodedValue::U8(1));
                assert_eq!(items[31], DecodedValue::U8(32));
            }
            other => panic!("unexpected resource id shape {other:?}"),
        }
        // The U256 appears as a record whose sole entry is the 4-limb array.
        match &event.fields[3].value {
            DecodedValue::Record(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].0, "[u64; 4]");
                match &entries[0].1 {
                    DecodedValue::Seq(limbs) => {
                        assert_eq!(limbs.len(), 4);
                        assert_eq!(limbs[0], DecodedValue::U64(amount.low_u64()));
                        assert_eq!(limbs[1], DecodedValue::U64(amount.0[1]));
                    }
                    other => panic!("unexpected limb shape {other:?}"),
                }
            }
            other => panic!("unexpected amount shape {other:?}"),
        }
    }

    #[test]
    fn test_decode_multiple_events_in_order() {
        let metadata = test_metadata();
        let first = BridgeEvent::GenericTransfer(3, 1, resource_id(), vec![0x01]);
        let second =
            BridgeEvent::FungibleTransfer(3, 2, resource_id(), U256::from(5u64), vec![0x02]);
        let metadata_update = ParachainSystemEvent::ValidationFunctionApplied {
            relay_chain_block_num: 77,
        };
        let raw = encode_event_records(&[
            (BRIDGE_PALLET_INDEX, first.encode()),
            (PARACHAIN_SYSTEM_INDEX, metadata_update.encode()),
            (BRIDGE_PALLET_INDEX, second.encode()),
        ]);

        let events = decode_events(&metadata, &raw).unwrap();
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ChainBridge.GenericTransfer",
                "ParachainSystem.ValidationFunctionApplied",
                "ChainBridge.FungibleTransfer"
            ]
        );
        // Named fields keep their source name.
        assert_eq!(events[1].fields[0].name, "relay_chain_block_num");
        assert_eq!(events[1].fields[0].value, DecodedValue::U32(77));
    }

    #[test]
    fn test_unknown_pallet_index_fails() {
        let metadata = test_metadata();
        let event = BridgeEvent::GenericTransfer(1, 1, resource_id(), vec![]);
        let raw = encode_event_records(&[(200, event.encode())]);
        let err = decode_events(&metadata, &raw).unwrap_err();
        assert!(err.to_string().contains("no pallet with index 200"));
    }

    #[test]
    fn test_truncated_payload_fails() {
        let metadata = test_metadata();
        let event = BridgeEvent::FungibleTransfer(
            2,
            7,
            resource_id(),
            U256::from(1u64),
            vec![0xaa; 16],
        );
        let mut raw = encode_event_records(&[(BRIDGE_PALLET_INDEX, event.encode())]);
        raw.truncate(raw.len() - 8);
        assert!(decode_events(&metadata, &raw).is_err());
    }

    #[test]
    fn test_system_events_key_is_stable() {
        // twox128("System") ++ twox128("Events"), the well-known key.
        assert_eq!(
            hex::encode(system_events_key().0),
            "26aa394eea5630e07c48ae0c9558cef780d41e5e16056765bc8461851072c9d7"
        );
    }
}
