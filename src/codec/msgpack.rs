//! MessagePack codec carried in binary frames.
//!
//! Packets are written with named (map) encoding, which is what MessagePack
//! libraries produce for plain objects, so `{event, data}` maps from other
//! runtimes decode directly.
//!
//! Payloads may use MessagePack types JSON has no word for. They are mapped
//! when decoding:
//!
//! - `bin` becomes an array of byte values.
//! - The timestamp extension (type `-1`) becomes an RFC 3339 string.
//! - Any other extension becomes `{ "type": <tag>, "data": [bytes] }`.
//! - Non-string map keys are rendered as JSON text.

use std::fmt;

use chrono::{DateTime, SecondsFormat};
use serde::Deserialize;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};

use super::{CodecError, Frame, Packet, PacketCodec, WireFormat};

/// Extension type reserved for timestamps.
const TIMESTAMP_EXT: i8 = -1;

/// Encodes packets as MessagePack maps in binary frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl PacketCodec for MsgPackCodec {
    fn encode(&self, packet: &Packet) -> Result<Frame, CodecError> {
        Ok(Frame::Binary(rmp_serde::to_vec_named(packet)?))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Packet, CodecError> {
        let envelope = rmp_serde::from_slice::<Envelope>(bytes)?;
        Packet::new(envelope.event, envelope.data.0).validate()
    }

    fn format(&self) -> WireFormat {
        WireFormat::Binary
    }
}

/// Inbound envelope with a MessagePack-aware payload.
#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: WireValue,
}

/// A decoded MessagePack value, already mapped into JSON.
#[derive(Default)]
struct WireValue(Value);

impl<'de> Deserialize<'de> for WireValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(WireValueVisitor).map(WireValue)
    }
}

struct WireValueVisitor;

impl<'de> Visitor<'de> for WireValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a MessagePack value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Number::from_f64(v).map_or(Value::Null, Value::Number))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Value, E> {
        Ok(byte_array(v))
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        WireValue::deserialize(deserializer).map(|value| value.0)
    }

    // rmp-serde surfaces extension types as a newtype around (tag, bytes).
    fn visit_newtype_struct<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> Result<Value, D::Error> {
        let (tag, bytes) = deserializer.deserialize_any(ExtVisitor)?;
        Ok(extension(tag, &bytes))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(WireValue(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut object = Map::new();
        while let Some((WireValue(key), WireValue(value))) = map.next_entry()? {
            let key = match key {
                Value::String(key) => key,
                other => other.to_string(),
            };
            object.insert(key, value);
        }
        Ok(Value::Object(object))
    }
}

struct ExtVisitor;

impl<'de> Visitor<'de> for ExtVisitor {
    type Value = (i8, Vec<u8>);

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a MessagePack extension")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let tag = seq
            .next_element::<i8>()?
            .ok_or_else(|| de::Error::invalid_length(0, &self))?;
        let ExtData(bytes) = seq
            .next_element()?
            .ok_or_else(|| de::Error::invalid_length(1, &self))?;
        Ok((tag, bytes))
    }
}

struct ExtData(Vec<u8>);

impl<'de> Deserialize<'de> for ExtData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BytesVisitor;

        impl Visitor<'_> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("extension bytes")
            }

            fn visit_bytes<E>(self, v: &[u8]) -> Result<Vec<u8>, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
                Ok(v)
            }
        }

        deserializer.deserialize_bytes(BytesVisitor).map(ExtData)
    }
}

fn byte_array(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().copied().map(Value::from).collect())
}

fn extension(tag: i8, bytes: &[u8]) -> Value {
    if tag == TIMESTAMP_EXT {
        if let Some(at) = timestamp(bytes) {
            return Value::String(at);
        }
    }
    let mut object = Map::new();
    object.insert("type".to_string(), Value::from(tag));
    object.insert("data".to_string(), byte_array(bytes));
    Value::Object(object)
}

/// Decodes the 32, 64 and 96 bit timestamp layouts.
fn timestamp(bytes: &[u8]) -> Option<String> {
    let (secs, nanos) = match bytes.len() {
        4 => (i64::from(u32::from_be_bytes(bytes.try_into().ok()?)), 0),
        8 => {
            let raw = u64::from_be_bytes(bytes.try_into().ok()?);
            let secs = i64::try_from(raw & 0x3_ffff_ffff).ok()?;
            let nanos = u32::try_from(raw >> 34).ok()?;
            (secs, nanos)
        }
        12 => {
            let (nanos, secs) = bytes.split_at_checked(4)?;
            (
                i64::from_be_bytes(secs.try_into().ok()?),
                u32::from_be_bytes(nanos.try_into().ok()?),
            )
        }
        _ => return None,
    };
    DateTime::from_timestamp(secs, nanos)
        .map(|at| at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}
