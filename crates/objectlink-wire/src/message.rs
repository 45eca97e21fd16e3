//! Wire protocol message types.
//!
//! On the wire every message is a JSON (or MessagePack) array whose first
//! element is the numeric [`MsgType`] code. Locally the array is decoded once
//! into the [`Message`] enum and dispatched by pattern matching.
//!
//! ```text
//! Link          [10, objectId]
//! Init          [11, objectId, props]
//! Unlink        [12, objectId]
//! SetProperty   [20, symbolId, value]
//! PropertyChange[21, symbolId, value]
//! Invoke        [30, requestId, symbolId, args]
//! InvokeReply   [31, requestId, symbolId, value]
//! Signal        [40, symbolId, args]
//! Error         [90, originalType, requestId, message]
//! ```

use objectlink_types::{LinkError, LinkResult};
use std::fmt;
use tracing::warn;

/// A loosely-typed wire value.
pub type Value = serde_json::Value;

/// Positional arguments of an invoke or signal.
pub type Args = Vec<Value>;

/// Property name to value mapping, as carried by `Init`.
pub type Props = serde_json::Map<String, Value>;

/// Message discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Unknown,
    Link,
    Init,
    Unlink,
    SetProperty,
    PropertyChange,
    Invoke,
    InvokeReply,
    Signal,
    Error,
}

impl MsgType {
    /// Numeric code used on the wire.
    pub fn code(self) -> i64 {
        match self {
            MsgType::Unknown => 0,
            MsgType::Link => 10,
            MsgType::Init => 11,
            MsgType::Unlink => 12,
            MsgType::SetProperty => 20,
            MsgType::PropertyChange => 21,
            MsgType::Invoke => 30,
            MsgType::InvokeReply => 31,
            MsgType::Signal => 40,
            MsgType::Error => 90,
        }
    }

    /// Map a wire code back to a kind; unrecognized codes are `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            10 => MsgType::Link,
            11 => MsgType::Init,
            12 => MsgType::Unlink,
            20 => MsgType::SetProperty,
            21 => MsgType::PropertyChange,
            30 => MsgType::Invoke,
            31 => MsgType::InvokeReply,
            40 => MsgType::Signal,
            90 => MsgType::Error,
            _ => MsgType::Unknown,
        }
    }

    /// Short name, as used in logs and accepted by the decoder.
    pub fn name(self) -> &'static str {
        match self {
            MsgType::Unknown => "unknown",
            MsgType::Link => "link",
            MsgType::Init => "init",
            MsgType::Unlink => "unlink",
            MsgType::SetProperty => "set",
            MsgType::PropertyChange => "change",
            MsgType::Invoke => "invoke",
            MsgType::InvokeReply => "reply",
            MsgType::Signal => "signal",
            MsgType::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name {
            "link" => MsgType::Link,
            "init" => MsgType::Init,
            "unlink" => MsgType::Unlink,
            "set" => MsgType::SetProperty,
            "change" => MsgType::PropertyChange,
            "invoke" => MsgType::Invoke,
            "reply" => MsgType::InvokeReply,
            "signal" => MsgType::Signal,
            "error" => MsgType::Error,
            _ => MsgType::Unknown,
        }
    }

    /// Number of array elements (discriminator included) for this kind.
    pub fn arity(self) -> Option<usize> {
        match self {
            MsgType::Unknown => None,
            MsgType::Link | MsgType::Unlink => Some(2),
            MsgType::Init
            | MsgType::SetProperty
            | MsgType::PropertyChange
            | MsgType::Signal => Some(3),
            MsgType::Invoke | MsgType::InvokeReply | MsgType::Error => Some(4),
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Consumer asks to link to an object.
    Link { object_id: String },
    /// Provider answers a link with the full property snapshot.
    Init { object_id: String, props: Props },
    /// Consumer ends its interest in an object.
    Unlink { object_id: String },
    /// Consumer asks the provider to change a property.
    SetProperty { symbol_id: String, value: Value },
    /// Provider reports a changed property.
    PropertyChange { symbol_id: String, value: Value },
    /// Consumer calls a method.
    Invoke {
        request_id: u64,
        symbol_id: String,
        args: Args,
    },
    /// Provider returns the result of a method call.
    InvokeReply {
        request_id: u64,
        symbol_id: String,
        value: Value,
    },
    /// Provider emits a signal.
    Signal { symbol_id: String, args: Args },
    /// Provider reports a failed request.
    Error {
        msg_type: MsgType,
        request_id: u64,
        error: String,
    },
}

impl Message {
    pub fn link(object_id: impl Into<String>) -> Self {
        Message::Link {
            object_id: object_id.into(),
        }
    }

    pub fn init(object_id: impl Into<String>, props: Props) -> Self {
        Message::Init {
            object_id: object_id.into(),
            props,
        }
    }

    pub fn unlink(object_id: impl Into<String>) -> Self {
        Message::Unlink {
            object_id: object_id.into(),
        }
    }

    pub fn set_property(symbol_id: impl Into<String>, value: Value) -> Self {
        Message::SetProperty {
            symbol_id: symbol_id.into(),
            value,
        }
    }

    pub fn property_change(symbol_id: impl Into<String>, value: Value) -> Self {
        Message::PropertyChange {
            symbol_id: symbol_id.into(),
            value,
        }
    }

    pub fn invoke(request_id: u64, symbol_id: impl Into<String>, args: Args) -> Self {
        Message::Invoke {
            request_id,
            symbol_id: symbol_id.into(),
            args,
        }
    }

    pub fn invoke_reply(request_id: u64, symbol_id: impl Into<String>, value: Value) -> Self {
        Message::InvokeReply {
            request_id,
            symbol_id: symbol_id.into(),
            value,
        }
    }

    pub fn signal(symbol_id: impl Into<String>, args: Args) -> Self {
        Message::Signal {
            symbol_id: symbol_id.into(),
            args,
        }
    }

    pub fn error(msg_type: MsgType, request_id: u64, error: impl Into<String>) -> Self {
        Message::Error {
            msg_type,
            request_id,
            error: error.into(),
        }
    }

    /// The discriminator of this message.
    pub fn msg_type(&self) -> MsgType {
        match self {
            Message::Link { .. } => MsgType::Link,
            Message::Init { .. } => MsgType::Init,
            Message::Unlink { .. } => MsgType::Unlink,
            Message::SetProperty { .. } => MsgType::SetProperty,
            Message::PropertyChange { .. } => MsgType::PropertyChange,
            Message::Invoke { .. } => MsgType::Invoke,
            Message::InvokeReply { .. } => MsgType::InvokeReply,
            Message::Signal { .. } => MsgType::Signal,
            Message::Error { .. } => MsgType::Error,
        }
    }

    /// Build the tagged array sent on the wire.
    pub fn to_value(&self) -> Value {
        let tag = Value::from(self.msg_type().code());
        let items = match self {
            Message::Link { object_id } | Message::Unlink { object_id } => {
                vec![tag, Value::from(object_id.as_str())]
            }
            Message::Init { object_id, props } => vec![
                tag,
                Value::from(object_id.as_str()),
                Value::Object(props.clone()),
            ],
            Message::SetProperty { symbol_id, value }
            | Message::PropertyChange { symbol_id, value } => {
                vec![tag, Value::from(symbol_id.as_str()), value.clone()]
            }
            Message::Invoke {
                request_id,
                symbol_id,
                args,
            } => vec![
                tag,
                Value::from(*request_id),
                Value::from(symbol_id.as_str()),
                Value::Array(args.clone()),
            ],
            Message::InvokeReply {
                request_id,
                symbol_id,
                value,
            } => vec![
                tag,
                Value::from(*request_id),
                Value::from(symbol_id.as_str()),
                value.clone(),
            ],
            Message::Signal { symbol_id, args } => vec![
                tag,
                Value::from(symbol_id.as_str()),
                Value::Array(args.clone()),
            ],
            Message::Error {
                msg_type,
                request_id,
                error,
            } => vec![
                tag,
                Value::from(msg_type.code()),
                Value::from(*request_id),
                Value::from(error.as_str()),
            ],
        };
        Value::Array(items)
    }

    /// Decode a tagged array.
    ///
    /// Fails on a non-array, an unknown discriminator or the wrong number of
    /// elements. Field values of the wrong type are coerced to empty values
    /// with a warning instead.
    pub fn from_value(value: Value) -> LinkResult<Self> {
        let items = match value {
            Value::Array(items) => items,
            other => {
                return Err(LinkError::Codec(format!(
                    "message must be an array, got {other}"
                )))
            }
        };
        let Some(tag) = items.first() else {
            return Err(LinkError::Codec("empty message".to_string()));
        };
        let msg_type = as_msg_type(tag);
        let Some(expected) = msg_type.arity() else {
            return Err(LinkError::UnknownMessageKind(tag.to_string()));
        };
        if items.len() != expected {
            return Err(LinkError::Codec(format!(
                "{msg_type} message expects {expected} elements, got {}",
                items.len()
            )));
        }

        let mut fields = items.into_iter().skip(1);
        let mut next = move || fields.next().unwrap_or(Value::Null);

        let msg = match msg_type {
            MsgType::Link => Message::Link {
                object_id: as_string(&next()),
            },
            MsgType::Init => Message::Init {
                object_id: as_string(&next()),
                props: as_props(next()),
            },
            MsgType::Unlink => Message::Unlink {
                object_id: as_string(&next()),
            },
            MsgType::SetProperty => Message::SetProperty {
                symbol_id: as_string(&next()),
                value: next(),
            },
            MsgType::PropertyChange => Message::PropertyChange {
                symbol_id: as_string(&next()),
                value: next(),
            },
            MsgType::Invoke => Message::Invoke {
                request_id: as_request_id(&next()),
                symbol_id: as_string(&next()),
                args: as_args(next()),
            },
            MsgType::InvokeReply => Message::InvokeReply {
                request_id: as_request_id(&next()),
                symbol_id: as_string(&next()),
                value: next(),
            },
            MsgType::Signal => Message::Signal {
                symbol_id: as_string(&next()),
                args: as_args(next()),
            },
            MsgType::Error => Message::Error {
                msg_type: as_msg_type(&next()),
                request_id: as_request_id(&next()),
                error: as_string(&next()),
            },
            MsgType::Unknown => {
                return Err(LinkError::UnknownMessageKind(msg_type.to_string()))
            }
        };
        Ok(msg)
    }
}

/// Coerce a discriminator: integer codes, float-encoded codes and names.
pub fn as_msg_type(v: &Value) -> MsgType {
    match v {
        Value::Number(n) => {
            if let Some(code) = n.as_i64() {
                MsgType::from_code(code)
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => MsgType::from_code(f as i64),
                    _ => MsgType::Unknown,
                }
            }
        }
        Value::String(s) => match s.parse::<i64>() {
            Ok(code) => MsgType::from_code(code),
            Err(_) => MsgType::from_name(s),
        },
        _ => MsgType::Unknown,
    }
}

/// Coerce a request id; anything that is not a non-negative integer is 0.
pub fn as_request_id(v: &Value) -> u64 {
    match v {
        Value::Number(n) => {
            if let Some(id) = n.as_u64() {
                return id;
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f >= 0.0 => f as u64,
                _ => {
                    warn!(value = %v, "Request id out of range, using 0");
                    0
                }
            }
        }
        Value::String(s) => s.parse().unwrap_or_else(|_| {
            warn!(value = %v, "Request id is not numeric, using 0");
            0
        }),
        other => {
            warn!(value = %other, "Expected request id, using 0");
            0
        }
    }
}

pub fn as_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => {
            warn!(value = %other, "Expected string, using empty string");
            String::new()
        }
    }
}

pub fn as_args(v: Value) -> Args {
    match v {
        Value::Array(args) => args,
        Value::Null => Args::new(),
        other => {
            warn!(value = %other, "Expected argument list, using empty list");
            Args::new()
        }
    }
}

pub fn as_props(v: Value) -> Props {
    match v {
        Value::Object(props) => props,
        Value::Null => Props::new(),
        other => {
            warn!(value = %other, "Expected property map, using empty map");
            Props::new()
        }
    }
}

/// Name positional arguments `arg0`, `arg1`, ...
pub fn args_to_kwargs(args: &[Value]) -> Props {
    args.iter()
        .enumerate()
        .map(|(i, v)| (format!("arg{i}"), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_codes_and_names() {
        for t in [
            MsgType::Link,
            MsgType::Init,
            MsgType::Unlink,
            MsgType::SetProperty,
            MsgType::PropertyChange,
            MsgType::Invoke,
            MsgType::InvokeReply,
            MsgType::Signal,
            MsgType::Error,
        ] {
            assert_eq!(MsgType::from_code(t.code()), t);
            assert_eq!(MsgType::from_name(t.name()), t);
        }
        assert_eq!(MsgType::from_code(55), MsgType::Unknown);
        assert_eq!(MsgType::SetProperty.to_string(), "set");
    }

    #[test]
    fn test_wire_shapes() {
        assert_eq!(
            Message::link("demo.Counter").to_value(),
            json!([10, "demo.Counter"])
        );
        assert_eq!(
            Message::invoke(1, "demo.Counter/increment", vec![json!(1)]).to_value(),
            json!([30, 1, "demo.Counter/increment", [1]])
        );
        assert_eq!(
            Message::error(MsgType::Invoke, 2, "boom failed").to_value(),
            json!([90, 30, 2, "boom failed"])
        );
    }

    #[test]
    fn test_decode_init() {
        let msg = Message::from_value(json!([11, "demo.Counter", {"count": 0}])).unwrap();
        match msg {
            Message::Init { object_id, props } => {
                assert_eq!(object_id, "demo.Counter");
                assert_eq!(props.get("count"), Some(&json!(0)));
            }
            other => panic!("Expected Init, got {other:?}"),
        }
    }

    #[test]
    fn test_float_and_string_discriminators() {
        let msg = Message::from_value(json!([30.0, 7.0, "a.B/m", []])).unwrap();
        assert_eq!(msg, Message::invoke(7, "a.B/m", vec![]));

        let msg = Message::from_value(json!(["unlink", "a.B"])).unwrap();
        assert_eq!(msg, Message::unlink("a.B"));
    }

    #[test]
    fn test_wrong_arity_is_codec_error() {
        let err = Message::from_value(json!([10])).unwrap_err();
        assert!(matches!(err, LinkError::Codec(_)));
        let err = Message::from_value(json!([31, 1, "a.B/m"])).unwrap_err();
        assert!(matches!(err, LinkError::Codec(_)));
    }

    #[test]
    fn test_unknown_kind() {
        let err = Message::from_value(json!([55, "x"])).unwrap_err();
        assert!(matches!(err, LinkError::UnknownMessageKind(_)));
        let err = Message::from_value(json!([{}, "x"])).unwrap_err();
        assert!(matches!(err, LinkError::UnknownMessageKind(_)));
    }

    #[test]
    fn test_not_an_array() {
        assert!(matches!(
            Message::from_value(json!({"type": 10})),
            Err(LinkError::Codec(_))
        ));
        assert!(matches!(
            Message::from_value(json!([])),
            Err(LinkError::Codec(_))
        ));
    }

    #[test]
    fn test_bad_fields_degrade_to_empty() {
        let msg = Message::from_value(json!([30, -1, 42, "not-a-list"])).unwrap();
        assert_eq!(msg, Message::invoke(0, "", vec![]));

        let msg = Message::from_value(json!([11, "a.B", [1, 2]])).unwrap();
        assert_eq!(msg, Message::init("a.B", Props::new()));
    }

    #[test]
    fn test_error_carries_original_kind() {
        let msg = Message::from_value(json!([90, 20, 0, "read-only"])).unwrap();
        assert_eq!(msg, Message::error(MsgType::SetProperty, 0, "read-only"));
    }

    #[test]
    fn test_args_to_kwargs() {
        let kwargs = args_to_kwargs(&[json!(1), json!("two")]);
        assert_eq!(kwargs.get("arg0"), Some(&json!(1)));
        assert_eq!(kwargs.get("arg1"), Some(&json!("two")));
        assert_eq!(kwargs.len(), 2);
    }
}
