//! Binary wire codec — string-keyed maps over CBOR.
//!
//! Everything the endpoint sends or receives is one packed [`Dict`]: a
//! string-keyed map whose values are byte strings, signed integers, text,
//! booleans, lists, or nested maps. The encoding is self-describing CBOR;
//! the protocol never relies on key ordering (a `BTreeMap` canonicalises
//! it on our side).

use std::collections::BTreeMap;

use ciborium::value::Value as CborValue;
use thiserror::Error;

// ── Values ────────────────────────────────────────────────────────────────────

/// A single wire value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Vec<u8>),
    Int(i64),
    Str(String),
    Bool(bool),
    Map(Dict),
    List(Vec<Value>),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Dict> for Value {
    fn from(v: Dict) -> Self {
        Value::Map(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

// ── Dict ──────────────────────────────────────────────────────────────────────

/// A string-keyed wire map.
///
/// Accessors fail with [`CodecError::MissingOrWrongType`] when the key is
/// absent or holds a value of another type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dict(BTreeMap<String, Value>);

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Insert every entry of `other`, overwriting on key collision.
    pub fn merge(&mut self, other: Dict) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_bytes(&self, key: &str) -> Result<&[u8], CodecError> {
        match self.0.get(key) {
            Some(Value::Bytes(b)) => Ok(b),
            _ => Err(CodecError::MissingOrWrongType(key.to_string())),
        }
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, CodecError> {
        match self.0.get(key) {
            Some(Value::Int(i)) => Ok(*i),
            _ => Err(CodecError::MissingOrWrongType(key.to_string())),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&str, CodecError> {
        match self.0.get(key) {
            Some(Value::Str(s)) => Ok(s),
            _ => Err(CodecError::MissingOrWrongType(key.to_string())),
        }
    }

    pub fn get_dict(&self, key: &str) -> Result<&Dict, CodecError> {
        match self.0.get(key) {
            Some(Value::Map(d)) => Ok(d),
            _ => Err(CodecError::MissingOrWrongType(key.to_string())),
        }
    }

    pub fn get_list(&self, key: &str) -> Result<&[Value], CodecError> {
        match self.0.get(key) {
            Some(Value::List(l)) => Ok(l),
            _ => Err(CodecError::MissingOrWrongType(key.to_string())),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

// ── Pack / unpack ─────────────────────────────────────────────────────────────

/// Encode a map into its packed wire form.
pub fn pack(dict: &Dict) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(&encode_dict(dict), &mut out)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode packed wire bytes back into a map.
///
/// The top-level value must be a map with string keys; integers must fit
/// in `i64`. Anything else is rejected rather than silently coerced.
pub fn unpack(bytes: &[u8]) -> Result<Dict, CodecError> {
    let value: CborValue =
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    match value {
        CborValue::Map(entries) => decode_entries(entries),
        _ => Err(CodecError::NotAMap),
    }
}

fn encode_dict(dict: &Dict) -> CborValue {
    CborValue::Map(
        dict.0
            .iter()
            .map(|(k, v)| (CborValue::Text(k.clone()), encode_value(v)))
            .collect(),
    )
}

fn encode_value(value: &Value) -> CborValue {
    match value {
        Value::Bytes(b) => CborValue::Bytes(b.clone()),
        Value::Int(i) => CborValue::Integer((*i).into()),
        Value::Str(s) => CborValue::Text(s.clone()),
        Value::Bool(b) => CborValue::Bool(*b),
        Value::Map(d) => encode_dict(d),
        Value::List(items) => CborValue::Array(items.iter().map(encode_value).collect()),
    }
}

fn decode_entries(entries: Vec<(CborValue, CborValue)>) -> Result<Dict, CodecError> {
    let mut dict = Dict::new();
    for (key, value) in entries {
        let CborValue::Text(key) = key else {
            return Err(CodecError::NonStringKey);
        };
        dict.0.insert(key, decode_value(value)?);
    }
    Ok(dict)
}

fn decode_value(value: CborValue) -> Result<Value, CodecError> {
    match value {
        CborValue::Bytes(b) => Ok(Value::Bytes(b)),
        CborValue::Integer(i) => i64::try_from(i)
            .map(Value::Int)
            .map_err(|_| CodecError::IntOutOfRange),
        CborValue::Text(s) => Ok(Value::Str(s)),
        CborValue::Bool(b) => Ok(Value::Bool(b)),
        CborValue::Map(entries) => decode_entries(entries).map(Value::Map),
        CborValue::Array(items) => items
            .into_iter()
            .map(decode_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        other => {
            let name = match other {
                CborValue::Float(_) => "float",
                CborValue::Null => "null",
                CborValue::Tag(..) => "tag",
                _ => "unknown",
            };
            Err(CodecError::UnsupportedType(name))
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("key {0:?} is missing or has the wrong type")]
    MissingOrWrongType(String),

    #[error("top-level wire value is not a map")]
    NotAMap,

    #[error("map key is not a string")]
    NonStringKey,

    #[error("integer value does not fit in 64 bits")]
    IntOutOfRange,

    #[error("unsupported wire type: {0}")]
    UnsupportedType(&'static str),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
