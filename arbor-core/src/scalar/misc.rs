//! Assets, Enums, and Dynamic Blobs
//!
//! Three cell flavors that don't fit the plain payload mold:
//!
//! - [`AssetRef`] points at an uploaded binary by id; the bytes live
//!   elsewhere, only the reference is tracked.
//! - [`RxEnum`] wraps an i32 behind a repair function so values arriving
//!   from old or corrupt streams land on a declared default instead of an
//!   out-of-range ordinal.
//! - `RxValue<serde_json::Value>` holds an opaque JSON blob the schema
//!   knows nothing about; equality is structural.

use std::any::Any;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json::{JsonNode, JsonWriter};
use crate::scalar::value::{RxHandle, ScalarSlot, ScalarValue, ValueState};
use crate::tree::{CellId, CellKind, Tree};

/// Reference to an uploaded binary asset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: String,
    pub size: i64,
    pub name: String,
    pub content_type: String,
    pub md5: String,
}

impl AssetRef {
    /// The placeholder reference for "no asset attached".
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.id.is_empty()
    }
}

impl ScalarValue for AssetRef {
    fn write(&self, w: &mut JsonWriter) {
        w.begin_object();
        w.key("id");
        w.write_str(&self.id);
        w.key("size");
        w.write_i64(self.size);
        w.key("name");
        w.write_str(&self.name);
        w.key("type");
        w.write_str(&self.content_type);
        w.key("md5");
        w.write_str(&self.md5);
        w.end_object();
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        Some(Self {
            id: node.get("id")?.as_str()?.to_owned(),
            size: node.get("size").and_then(|n| n.as_i64()).unwrap_or(0),
            name: node
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_owned(),
            content_type: node
                .get("type")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_owned(),
            md5: node
                .get("md5")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_owned(),
        })
    }
}

impl ScalarValue for Value {
    fn write(&self, w: &mut JsonWriter) {
        w.write_raw(&serde_json::to_string(self).unwrap_or_else(|_| "null".to_string()));
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        Some(node.raw().clone())
    }
}

/// Enum slot: an i32 with a repair function applied to every externally
/// ingested value.
#[derive(Debug)]
pub struct EnumSlot {
    state: ValueState<i32>,
    repair: fn(i32) -> i32,
}

impl EnumSlot {
    pub fn new(seed: i32, repair: fn(i32) -> i32) -> Self {
        Self {
            state: ValueState::new(seed),
            repair,
        }
    }

    pub fn value(&self) -> i32 {
        *self.state.value()
    }

    pub(crate) fn state_mut(&mut self) -> &mut ValueState<i32> {
        &mut self.state
    }
}

impl ScalarSlot for EnumSlot {
    fn write_value(&self, w: &mut JsonWriter) {
        self.state.write_value(w);
    }

    fn write_backup(&self, w: &mut JsonWriter) {
        self.state.write_backup(w);
    }

    fn promote(&mut self) {
        self.state.promote();
    }

    fn restore(&mut self) {
        self.state.restore();
    }

    fn hydrate(&mut self, node: &JsonNode<'_>) {
        if let Some(raw) = node.as_i32() {
            self.state.hydrate_both((self.repair)(raw));
        }
    }

    fn patch_value(&mut self, node: &JsonNode<'_>) -> bool {
        match node.as_i32() {
            Some(raw) => {
                let repaired = (self.repair)(raw);
                if repaired != *self.state.value() {
                    self.state.assign(repaired);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    fn index_value(&self) -> Option<i32> {
        Some(*self.state.value())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed handle to an enum cell.
#[derive(Debug, Clone, Copy)]
pub struct RxEnum {
    id: CellId,
}

impl RxEnum {
    /// `repair` maps any incoming ordinal onto a valid one; it is applied
    /// to insert/patch ingestion, not to programmatic `set`.
    pub fn new(tree: &mut Tree, parent: Option<CellId>, seed: i32, repair: fn(i32) -> i32) -> Self {
        let id = tree.alloc(CellKind::Scalar(Box::new(EnumSlot::new(seed, repair))), parent);
        Self { id }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn get(&self, tree: &Tree) -> i32 {
        tree.enum_slot(self.id)
            .expect("enum handle points at a live enum cell")
            .value()
    }

    pub fn set(&self, tree: &mut Tree, next: i32) {
        tree.enum_set(self.id, next);
    }

    pub fn commit(&self, tree: &mut Tree, name: &str, fwd: &mut JsonWriter, rev: &mut JsonWriter) {
        tree.commit(self.id, name, fwd, rev);
    }

    pub fn revert(&self, tree: &mut Tree) {
        tree.revert(self.id);
    }
}

impl RxHandle for RxEnum {
    fn wrap(id: CellId) -> Self {
        Self { id }
    }

    fn id(self) -> CellId {
        self.id
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clamp_small(v: i32) -> i32 {
        if (0..=2).contains(&v) {
            v
        } else {
            0
        }
    }

    #[test]
    fn enum_repairs_on_hydrate() {
        let mut slot = EnumSlot::new(1, clamp_small);
        let raw = json!(99);
        slot.hydrate(&JsonNode::new(&raw));
        assert_eq!(slot.value(), 0);
    }

    #[test]
    fn enum_repairs_on_patch() {
        let mut slot = EnumSlot::new(1, clamp_small);
        let raw = json!(7);
        // 7 repairs to 0, which differs from 1 -> changed
        assert!(slot.patch_value(&JsonNode::new(&raw)));
        assert_eq!(slot.value(), 0);

        // 8 also repairs to 0 -> no change this time
        let raw = json!(8);
        assert!(!slot.patch_value(&JsonNode::new(&raw)));
    }

    #[test]
    fn asset_wire_round_trip() {
        let asset = AssetRef {
            id: "a1".into(),
            size: 1024,
            name: "photo.png".into(),
            content_type: "image/png".into(),
            md5: "d41d8cd9".into(),
        };
        let mut w = JsonWriter::new();
        asset.write(&mut w);
        let raw: Value = serde_json::from_str(w.as_str()).unwrap();
        assert_eq!(AssetRef::read(&JsonNode::new(&raw)), Some(asset));
    }

    #[test]
    fn blob_equality_is_structural() {
        let a = json!({"k": [1, 2]});
        let b = json!({"k": [1, 2]});
        assert_eq!(a, b);
    }
}
