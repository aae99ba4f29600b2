//! Value codec adapter (C2): canonical binary encoding of parameter values
//! and a hashing hook for [`crate::hash`]. The self-describing structured
//! value format itself is out of scope (`spec.md` §1); this module adapts
//! around `prost_types::Value`, a real, generic, recursively-typed
//! protobuf value, the same way `spanner/src/statement.rs`'s `ToKind`
//! reuses it for Spanner's parameter binding.

use prost::Message;
use prost_types::value::Kind;
use prost_types::Value as ProstValue;

use crate::error::DriverError;
use crate::hash::{hash_bytes, CommitHash};

/// A bound parameter or decoded row column. Thin wrapper over
/// `prost_types::Value` so callers build values with ordinary Rust types
/// via [`Value::from`] impls rather than reaching into `prost_types`
/// directly.
#[derive(Clone, Debug, PartialEq)]
pub struct Value(pub ProstValue);

impl Value {
    pub fn null() -> Self {
        Value(ProstValue {
            kind: Some(Kind::NullValue(0)),
        })
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value(ProstValue {
            kind: Some(Kind::StringValue(s.into())),
        })
    }

    pub fn number(n: f64) -> Self {
        Value(ProstValue {
            kind: Some(Kind::NumberValue(n)),
        })
    }

    pub fn bool(b: bool) -> Self {
        Value(ProstValue {
            kind: Some(Kind::BoolValue(b)),
        })
    }

    pub fn list(values: Vec<Value>) -> Self {
        Value(ProstValue {
            kind: Some(Kind::ListValue(prost_types::ListValue {
                values: values.into_iter().map(|v| v.0).collect(),
            })),
        })
    }

    pub fn is_null(&self) -> bool {
        matches!(self.0.kind, None | Some(Kind::NullValue(_)))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::number(n as f64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::null(),
        }
    }
}

/// Failure to encode or decode a value via the codec adapter. Never
/// retried; surfaced directly to the caller (`spec.md` §4.2, §7).
#[derive(thiserror::Error, Debug)]
#[error("failed to serialize value: {cause}")]
pub struct SerializationError {
    #[source]
    pub cause: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl SerializationError {
    pub fn new(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        SerializationError {
            cause: Box::new(cause),
        }
    }
}

impl From<SerializationError> for DriverError {
    fn from(e: SerializationError) -> Self {
        DriverError::Serialization(e.cause)
    }
}

/// Produces canonical binary bytes for on-wire transmission and a hashing
/// traversal for C1. The default implementation ([`ProstValueCodec`])
/// encodes via `prost_types::Value`'s own protobuf wire format, which is
/// already deterministic for a given field-value assignment.
pub trait ValueCodec: Send + Sync {
    /// Canonical binary encoding, sent as a statement parameter's bytes.
    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializationError>;

    /// Decode a row's raw column bytes back into a [`Value`].
    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializationError>;

    /// `H(v)`: SHA-256 of the canonical encoding. Must be deterministic
    /// across runs for a given `value` (`spec.md` invariant 9).
    fn hash(&self, value: &Value) -> Result<CommitHash, SerializationError> {
        let encoded = self.encode(value)?;
        Ok(hash_bytes(&encoded))
    }
}

/// Default [`ValueCodec`]: encodes through `prost_types::Value`'s protobuf
/// wire format.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProstValueCodec;

impl ValueCodec for ProstValueCodec {
    fn encode(&self, value: &Value) -> Result<Vec<u8>, SerializationError> {
        Ok(value.0.encode_to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, SerializationError> {
        ProstValue::decode(bytes)
            .map(Value)
            .map_err(SerializationError::new)
    }
}
