//! JSON codec carried in text frames.

use super::{CodecError, Frame, Packet, PacketCodec, WireFormat};

/// Encodes packets as JSON objects in text frames.
///
/// Decoding accepts the payload of either frame kind as long as it is a
/// UTF-8 JSON object with a string `event` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PacketCodec for JsonCodec {
    fn encode(&self, packet: &Packet) -> Result<Frame, CodecError> {
        Ok(Frame::Text(serde_json::to_string(packet)?))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Packet, CodecError> {
        serde_json::from_slice::<Packet>(bytes)?.validate()
    }

    fn format(&self) -> WireFormat {
        WireFormat::Text
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn encodes_as_text_frame() {
        let packet = Packet::new("ping", json!({ "text": "hi" }));
        let Ok(Frame::Text(text)) = JsonCodec.encode(&packet) else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
        assert_eq!(value, json!({ "event": "ping", "data": { "text": "hi" } }));
    }

    #[test]
    fn round_trip_preserves_packet() {
        let packet = Packet::new(
            "order",
            json!({ "id": 7, "price": -1.25, "tags": ["a", "b"], "note": null }),
        );
        let Ok(frame) = JsonCodec.encode(&packet) else {
            panic!("encode failed");
        };
        let Ok(decoded) = JsonCodec.decode(frame.as_bytes()) else {
            panic!("decode failed");
        };
        assert_eq!(decoded, packet);
    }

    #[test]
    fn missing_data_decodes_as_null() {
        let Ok(packet) = JsonCodec.decode(br#"{"event":"ping"}"#) else {
            panic!("decode failed");
        };
        assert_eq!(packet.data, serde_json::Value::Null);
    }

    #[test]
    fn rejects_malformed_envelopes() {
        assert!(JsonCodec.decode(b"not json").is_err());
        assert!(JsonCodec.decode(br#"{"data":1}"#).is_err());
        assert!(JsonCodec.decode(br#"{"event":5,"data":1}"#).is_err());
        assert!(JsonCodec.decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn rejects_empty_event() {
        let result = JsonCodec.decode(br#"{"event":"","data":1}"#);
        assert!(matches!(result, Err(CodecError::EmptyEvent)));
    }
}
