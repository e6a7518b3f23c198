use std::borrow::Cow;

use bytes::Bytes;
use serde_json::Value;

/// A single message handed to the sink by the framework.
///
/// A record always has a raw byte form. Its structured form is either set
/// explicitly or parsed from the raw bytes as JSON on demand.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    raw: Bytes,
    structured: Option<Value>,
}

impl Record {
    pub fn from_bytes(raw: impl Into<Bytes>) -> Self {
        Self {
            raw: raw.into(),
            structured: None,
        }
    }

    /// The raw form of a structured record is its JSON serialization.
    pub fn from_structured(value: Value) -> Self {
        let raw = serde_json::to_vec(&value).map(Bytes::from).unwrap_or_default();
        Self {
            raw,
            structured: Some(value),
        }
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    pub fn as_structured(&self) -> Result<Cow<'_, Value>, serde_json::Error> {
        match &self.structured {
            Some(value) => Ok(Cow::Borrowed(value)),
            None => serde_json::from_slice(&self.raw).map(Cow::Owned),
        }
    }
}

impl From<Value> for Record {
    fn from(value: Value) -> Self {
        Self::from_structured(value)
    }
}

impl From<Bytes> for Record {
    fn from(raw: Bytes) -> Self {
        Self::from_bytes(raw)
    }
}

impl From<&'static str> for Record {
    fn from(raw: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(raw.as_bytes()))
    }
}
