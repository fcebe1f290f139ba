//! Text Cells
//!
//! Plain strings and the fast-string variant. A `FastStr` carries its
//! stable 32-bit hash from construction: the hash doubles as the
//! secondary-index bucket and as an equality fast path, which matters for
//! long strings rewritten on every pass of a formula.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::json::{JsonNode, JsonWriter};
use crate::scalar::value::ScalarValue;

/// Stable 32-bit hash used for index buckets. Folding the high half keeps
/// all 64 input bits relevant.
pub fn stable_hash32(text: &str) -> i32 {
    let mut hasher = FxHasher::default();
    text.hash(&mut hasher);
    let wide = hasher.finish();
    (wide ^ (wide >> 32)) as i32
}

impl ScalarValue for String {
    fn write(&self, w: &mut JsonWriter) {
        w.write_str(self);
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        node.as_str().map(str::to_owned)
    }

    fn index_value(&self) -> Option<i32> {
        Some(stable_hash32(self))
    }
}

/// A string with its index hash computed eagerly.
#[derive(Debug, Clone)]
pub struct FastStr {
    text: String,
    hash: i32,
}

impl FastStr {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let hash = stable_hash32(&text);
        Self { text, hash }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn hash32(&self) -> i32 {
        self.hash
    }
}

impl PartialEq for FastStr {
    fn eq(&self, other: &Self) -> bool {
        // Hash first: a mismatch settles it without a byte compare.
        self.hash == other.hash && self.text == other.text
    }
}

impl From<&str> for FastStr {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl ScalarValue for FastStr {
    fn write(&self, w: &mut JsonWriter) {
        w.write_str(&self.text);
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        node.as_str().map(FastStr::new)
    }

    fn index_value(&self) -> Option<i32> {
        Some(self.hash)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
