//! Tolerant JSON Reader
//!
//! A thin view over a parsed `serde_json::Value` used during `insert` and
//! `patch` hydration. Every accessor returns `Option`: a field that is
//! missing, null, or the wrong shape simply yields `None`, and the caller
//! skips it and continues. Partially-corrupt or forward-incompatible
//! streams must never hard-fail hydration.
//!
//! The only error surfaced from this module is `HydrateError`, raised when
//! a top-level payload is not parseable JSON at all.

use serde_json::Value;
use thiserror::Error;

/// Top-level hydration failure: the payload was not JSON.
#[derive(Debug, Error)]
pub enum HydrateError {
    #[error("malformed json payload: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A borrowed view of one JSON value.
#[derive(Debug, Clone, Copy)]
pub struct JsonNode<'a> {
    value: &'a Value,
}

impl<'a> JsonNode<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { value }
    }

    /// The underlying parsed value.
    pub fn raw(&self) -> &'a Value {
        self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    /// 64-bit integers arrive as either a JSON string or a number.
    pub fn as_i64(&self) -> Option<i64> {
        match self.value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.value.as_str()
    }

    /// Field access on an object; `None` for any other shape.
    pub fn get(&self, name: &str) -> Option<JsonNode<'a>> {
        self.value.get(name).map(JsonNode::new)
    }

    /// Iterate object fields in document order.
    pub fn fields(&self) -> impl Iterator<Item = (&'a str, JsonNode<'a>)> {
        self.value
            .as_object()
            .into_iter()
            .flat_map(|m| m.iter())
            .map(|(k, v)| (k.as_str(), JsonNode::new(v)))
    }

    /// Iterate array elements.
    pub fn elements(&self) -> impl Iterator<Item = JsonNode<'a>> {
        self.value
            .as_array()
            .into_iter()
            .flat_map(|a| a.iter())
            .map(JsonNode::new)
    }

    pub fn is_object(&self) -> bool {
        self.value.is_object()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
