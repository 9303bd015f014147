//! Property value kinds and the GATT wire buffer.
//!
//! `Value` is the logical, typed value carried by a cloud property.
//! `GattValue` is the raw byte buffer BlueZ hands back from `ReadValue` /
//! expects for `WriteValue`; property definitions in [`crate::gdb`] convert
//! between the two.

use std::convert::TryFrom;

use crate::error::{Error, ErrorKind};

/// Declared property type, fixed once a property is first added to a node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, strum::Display)]
pub enum ValueType {
    Integer,
    Boolean,
    Decimal,
    String,
    Blob,
    File,
    Message,
}

/// Direction a property flows, fixed once a property is first added.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    /// Cloud -> node.
    ToDevice,
    /// Node -> cloud.
    FromDevice,
}

/// A logical property value: the tagged union of §3.1.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Integer(i32),
    Boolean(bool),
    Decimal(f64),
    String(String),
    Blob(Vec<u8>),
    /// Content addressed by a local path; the bytes themselves travel out of
    /// band via the POQ file-property state machine (§4.4.5).
    File(String),
    /// Opaque payload up to an implementation-defined cap.
    Message(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Integer(_) => ValueType::Integer,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Decimal(_) => ValueType::Decimal,
            Value::String(_) => ValueType::String,
            Value::Blob(_) => ValueType::Blob,
            Value::File(_) => ValueType::File,
            Value::Message(_) => ValueType::Message,
        }
    }

    /// Encodes into a cloud-facing JSON scalar.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Integer(v) => serde_json::json!(v),
            Value::Boolean(v) => serde_json::json!(v),
            Value::Decimal(v) => serde_json::json!(v),
            Value::String(v) => serde_json::json!(v),
            Value::Blob(v) => serde_json::json!(hex::encode(v)),
            Value::File(v) => serde_json::json!(v),
            Value::Message(v) => serde_json::json!(hex::encode(v)),
        }
    }

    /// Decodes a cloud-facing JSON scalar against the expected type.
    pub fn from_json(ty: ValueType, json: &serde_json::Value) -> Result<Self, Error> {
        match ty {
            ValueType::Integer => json
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Integer)
                .ok_or_else(bad_val),
            ValueType::Boolean => json.as_bool().map(Value::Boolean).ok_or_else(bad_val),
            ValueType::Decimal => json.as_f64().map(Value::Decimal).ok_or_else(bad_val),
            ValueType::String => json.as_str().map(|s| Value::String(s.to_string())).ok_or_else(bad_val),
            ValueType::Blob => json
                .as_str()
                .and_then(|s| hex::decode(s).ok())
                .map(Value::Blob)
                .ok_or_else(bad_val),
            ValueType::File => json.as_str().map(|s| Value::File(s.to_string())).ok_or_else(bad_val),
            ValueType::Message => json
                .as_str()
                .and_then(|s| hex::decode(s).ok())
                .map(Value::Message)
                .ok_or_else(bad_val),
        }
    }
}

fn bad_val() -> Error {
    Error::new(ErrorKind::Ipc(crate::error::IpcErrorKind::BadValue))
}

/// A variable-sized GATT byte buffer, as read from / written to a
/// characteristic's `Value` property.
///
/// Capacity is always `>= len`; [`Self::get_string`] guarantees a trailing
/// NUL in the backing storage without counting it in `len`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GattValue {
    buf: Vec<u8>,
}

impl GattValue {
    pub fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { buf: bytes.into() }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Replaces the entire contents.
    pub fn set(&mut self, bytes: impl Into<Vec<u8>>) {
        self.buf = bytes.into();
    }

    /// Grows or truncates the logical length, zero-filling on growth.
    pub fn resize(&mut self, len: usize) {
        self.buf.resize(len, 0);
    }

    /// Writes `bytes` at `offset`, zero-filling any gap before it and
    /// extending the buffer if `bytes` runs past the current end.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) {
        let end = offset + bytes.len();
        if self.buf.len() < end {
            self.buf.resize(end, 0);
        }
        self.buf[offset..end].copy_from_slice(bytes);
    }

    /// UTF-8 view of the buffer, not counting an implicit trailing NUL.
    ///
    /// Returns `None` if the bytes are not valid UTF-8.
    pub fn get_string(&self) -> Option<String> {
        std::str::from_utf8(&self.buf).ok().map(|s| s.to_string())
    }

    /// Little-endian `i32` at offset 0.
    pub fn get_i32_le(&self) -> Option<i32> {
        self.buf.get(0..4).map(|b| i32::from_le_bytes(b.try_into().unwrap()))
    }

    /// Little-endian `f64` at offset 0.
    pub fn get_f64_le(&self) -> Option<f64> {
        self.buf.get(0..8).map(|b| f64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn get_bool(&self) -> Option<bool> {
        self.buf.first().map(|b| *b != 0)
    }

    pub fn from_i32_le(v: i32) -> Self {
        Self { buf: v.to_le_bytes().to_vec() }
    }

    pub fn from_f64_le(v: f64) -> Self {
        Self { buf: v.to_le_bytes().to_vec() }
    }

    pub fn from_bool(v: bool) -> Self {
        Self { buf: vec![v as u8] }
    }
}
