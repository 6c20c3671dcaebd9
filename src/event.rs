//! Trace event representation consumed by the automaton.
//!
//! An [`Event`] is one already-ordered kernel trace event: a name, a nanosecond
//! timestamp, the CPU it was recorded on, its payload fields and its context
//! fields (LTTng-style per-event contexts such as `pid` or `procname`).
//!
//! Field lookups never fail loudly. A missing field, or a field holding a value
//! of another type, is reported as `None`, which providers treat as "this event
//! does not apply to me".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A typed scalar carried by an event field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Str(String),
    Bytes(Vec<u8>),
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value as i64)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(value as i64)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(v) => FieldValue::Int(v),
            Err(_) => FieldValue::UInt(value),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Bytes(value)
    }
}

impl<const N: usize> From<[u8; N]> for FieldValue {
    fn from(value: [u8; N]) -> Self {
        FieldValue::Bytes(value.to_vec())
    }
}

/// One kernel trace event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    /// Nanoseconds, non-decreasing across the stream.
    pub timestamp: u64,
    #[serde(default)]
    pub cpu: u32,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub context: BTreeMap<String, FieldValue>,
}

impl Event {
    pub fn new(name: impl Into<String>, timestamp: u64, cpu: u32) -> Self {
        Self {
            name: name.into(),
            timestamp,
            cpu,
            fields: BTreeMap::new(),
            context: BTreeMap::new(),
        }
    }

    /// Builder-style payload field setter.
    pub fn with(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style context field setter.
    pub fn with_context(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn has(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Signed integer payload field. Unsigned values that do not fit are absent.
    pub fn int(&self, key: &str) -> Option<i64> {
        as_int(self.fields.get(key)?)
    }

    /// Unsigned integer payload field. Negative values are absent.
    pub fn uint(&self, key: &str) -> Option<u64> {
        as_uint(self.fields.get(key)?)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        match self.fields.get(key)? {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn bytes(&self, key: &str) -> Option<&[u8]> {
        match self.fields.get(key)? {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn context_int(&self, key: &str) -> Option<i64> {
        as_int(self.context.get(key)?)
    }

    pub fn context_str(&self, key: &str) -> Option<&str> {
        match self.context.get(key)? {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Payload field narrowed to a tid/pid. Out-of-range values are absent.
    pub fn tid(&self, key: &str) -> Option<i32> {
        self.int(key).and_then(|v| i32::try_from(v).ok())
    }
}

fn as_int(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Int(v) => Some(*v),
        FieldValue::UInt(v) => i64::try_from(*v).ok(),
        _ => None,
    }
}

fn as_uint(value: &FieldValue) -> Option<u64> {
    match value {
        FieldValue::Int(v) => u64::try_from(*v).ok(),
        FieldValue::UInt(v) => Some(*v),
        _ => None,
    }
}
