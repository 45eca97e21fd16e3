//! Message <-> bytes conversion.

use crate::message::{Message, Value};
use objectlink_types::{LinkResult, WireFormat};

/// Serializes messages in the configured [`WireFormat`].
///
/// Both formats carry the same tagged array. JSON integers decode back to
/// exact 64-bit integers; floats stay floats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageConverter {
    format: WireFormat,
}

impl MessageConverter {
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Encode a message to bytes.
    pub fn encode(&self, msg: &Message) -> LinkResult<Vec<u8>> {
        let value = msg.to_value();
        let bytes = match self.format {
            WireFormat::Json => serde_json::to_vec(&value)?,
            WireFormat::MsgPack => rmp_serde::to_vec(&value)?,
        };
        Ok(bytes)
    }

    /// Decode bytes into a message.
    pub fn decode(&self, data: &[u8]) -> LinkResult<Message> {
        let value: Value = match self.format {
            WireFormat::Json => serde_json::from_slice(data)?,
            WireFormat::MsgPack => rmp_serde::from_slice(data)?,
        };
        Message::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MsgType, Props};
    use objectlink_types::LinkError;
    use serde_json::json;

    fn samples() -> Vec<Message> {
        let mut props = Props::new();
        props.insert("count".to_string(), json!(0));
        props.insert("label".to_string(), json!("clicks"));
        vec![
            Message::link("demo.Counter"),
            Message::init("demo.Counter", props),
            Message::set_property("demo.Counter/count", json!(3.5)),
            Message::invoke(u64::MAX, "demo.Counter/add", vec![json!(1), json!([2, 3])]),
            Message::signal("demo.Counter/changed", vec![json!({"count": 1})]),
            Message::error(MsgType::Invoke, 2, "boom failed"),
        ]
    }

    #[test]
    fn test_json_roundtrip() {
        let conv = MessageConverter::new(WireFormat::Json);
        for msg in samples() {
            let bytes = conv.encode(&msg).unwrap();
            assert_eq!(conv.decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_msgpack_roundtrip() {
        let conv = MessageConverter::new(WireFormat::MsgPack);
        for msg in samples() {
            let bytes = conv.encode(&msg).unwrap();
            assert_eq!(conv.decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn test_json_text_is_tagged_array() {
        let conv = MessageConverter::default();
        let bytes = conv
            .encode(&Message::invoke_reply(1, "demo.Counter/increment", json!(1)))
            .unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"[31,1,"demo.Counter/increment",1]"#
        );
    }

    #[test]
    fn test_large_integers_survive() {
        let conv = MessageConverter::default();
        let msg = conv
            .decode(br#"[21, "a.B/big", 9007199254740993]"#)
            .unwrap();
        assert_eq!(
            msg,
            Message::property_change("a.B/big", json!(9007199254740993u64))
        );
    }

    #[test]
    fn test_malformed_input() {
        let conv = MessageConverter::default();
        assert!(matches!(conv.decode(b"[10, "), Err(LinkError::Codec(_))));
        assert!(matches!(conv.decode(b"not json"), Err(LinkError::Codec(_))));
        let msgpack = MessageConverter::new(WireFormat::MsgPack);
        assert!(matches!(msgpack.decode(&[0xc1]), Err(LinkError::Codec(_))));
    }
}
