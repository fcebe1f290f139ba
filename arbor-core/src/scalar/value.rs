//! Value Cell Core
//!
//! Every scalar cell is a `ValueState<T>`: the committed `backup` and the
//! current `value`. The whole family shares one implementation of the
//! change-tracking contract through two traits:
//!
//! - [`ScalarValue`] is implemented per payload type and knows the wire
//!   shape (write/read) and the optional secondary-index bucket.
//! - [`ScalarSlot`] is the object-safe surface the arena drives: promote
//!   on commit, restore on revert, hydrate on insert, patch through the
//!   equality guard.
//!
//! # Invariant
//!
//! `backup == value` whenever the owning cell is not dirty. `set` refuses
//! no-op writes (equality, not identity), which is what keeps spurious
//! dirty/invalidate storms out of the graph.

use std::any::Any;
use std::marker::PhantomData;

use crate::json::{JsonNode, JsonWriter};
use crate::tree::{CellId, Tree};

/// A payload that can live in a value cell.
pub trait ScalarValue: Clone + PartialEq + std::fmt::Debug + 'static {
    /// Write the wire form of this value.
    fn write(&self, w: &mut JsonWriter);

    /// Read a value back from the wire; `None` on any unexpected shape.
    fn read(node: &JsonNode<'_>) -> Option<Self>;

    /// Secondary-index bucket, for indexable payloads only.
    fn index_value(&self) -> Option<i32> {
        None
    }
}

/// Backup/value pair for one scalar cell.
#[derive(Debug, Clone)]
pub struct ValueState<T: ScalarValue> {
    backup: T,
    value: T,
}

impl<T: ScalarValue> ValueState<T> {
    pub fn new(seed: T) -> Self {
        Self {
            backup: seed.clone(),
            value: seed,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn backup(&self) -> &T {
        &self.backup
    }

    pub(crate) fn assign(&mut self, next: T) {
        self.value = next;
    }

    /// Hydrate both sides; used by `insert`, which never dirties.
    pub(crate) fn hydrate_both(&mut self, next: T) {
        self.backup = next.clone();
        self.value = next;
    }
}

/// Object-safe scalar surface the arena dispatches through.
pub trait ScalarSlot: std::fmt::Debug {
    /// Write the current value (forward deltas, dumps).
    fn write_value(&self, w: &mut JsonWriter);

    /// Write the last committed value (reverse deltas).
    fn write_backup(&self, w: &mut JsonWriter);

    /// Commit: backup becomes the current value.
    fn promote(&mut self);

    /// Revert: current value becomes the backup.
    fn restore(&mut self);

    /// Full hydration of both sides; never dirties.
    fn hydrate(&mut self, node: &JsonNode<'_>);

    /// Partial update through the equality guard; true if the value
    /// actually changed.
    fn patch_value(&mut self, node: &JsonNode<'_>) -> bool;

    /// Current secondary-index bucket, if this payload is indexable.
    fn index_value(&self) -> Option<i32>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: ScalarValue> ScalarSlot for ValueState<T> {
    fn write_value(&self, w: &mut JsonWriter) {
        self.value.write(w);
    }

    fn write_backup(&self, w: &mut JsonWriter) {
        self.backup.write(w);
    }

    fn promote(&mut self) {
        self.backup = self.value.clone();
    }

    fn restore(&mut self) {
        self.value = self.backup.clone();
    }

    fn hydrate(&mut self, node: &JsonNode<'_>) {
        if let Some(next) = T::read(node) {
            self.hydrate_both(next);
        }
    }

    fn patch_value(&mut self, node: &JsonNode<'_>) -> bool {
        match T::read(node) {
            Some(next) if next != self.value => {
                self.value = next;
                true
            }
            _ => false,
        }
    }

    fn index_value(&self) -> Option<i32> {
        self.value.index_value()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed handle to a scalar cell in a [`Tree`].
///
/// Handles are small copyable tokens; all state lives in the arena. The
/// concrete cells of the family are aliases of this type: `RxBoolean`,
/// `RxInt64`, `RxPrincipal`, and so on.
pub struct RxValue<T> {
    id: CellId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RxValue<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RxValue<T> {}

impl<T> std::fmt::Debug for RxValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxValue").field("id", &self.id).finish()
    }
}

impl<T: ScalarValue> RxValue<T> {
    /// Allocate a new cell seeded with `seed` (`backup == value == seed`).
    pub fn new(tree: &mut Tree, parent: Option<CellId>, seed: T) -> Self {
        let id = tree.alloc(
            crate::tree::CellKind::Scalar(Box::new(ValueState::new(seed))),
            parent,
        );
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// Current value.
    pub fn get(&self, tree: &Tree) -> T {
        tree.scalar_state::<T>(self.id)
            .expect("scalar handle points at a live cell of its type")
            .value()
            .clone()
    }

    /// Equality-guarded write. A real change dirties the cell, fires the
    /// index trigger pair, and invalidates subscribers.
    pub fn set(&self, tree: &mut Tree, next: T) {
        tree.scalar_set(self.id, next);
    }

    pub fn commit(&self, tree: &mut Tree, name: &str, fwd: &mut JsonWriter, rev: &mut JsonWriter) {
        tree.commit(self.id, name, fwd, rev);
    }

    pub fn revert(&self, tree: &mut Tree) {
        tree.revert(self.id);
    }

    pub fn dump(&self, tree: &Tree, w: &mut JsonWriter) {
        tree.dump(self.id, w);
    }

    pub fn insert(&self, tree: &mut Tree, node: &JsonNode<'_>) {
        tree.insert(self.id, node);
    }

    pub fn patch(&self, tree: &mut Tree, node: &JsonNode<'_>) {
        tree.patch(self.id, node);
    }
}

/// Anything addressable as a cell: scalar handles, containers, records.
/// Container handles hand out children through this.
pub trait RxHandle: Copy {
    fn wrap(id: CellId) -> Self;
    fn id(self) -> CellId;
}

impl<T: ScalarValue> RxHandle for RxValue<T> {
    fn wrap(id: CellId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
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
    use crate::json::JsonWriter;

    #[test]
    fn backup_tracks_seed_until_promoted() {
        let mut st = ValueState::new(5i32);
        assert_eq!(*st.value(), 5);
        assert_eq!(*st.backup(), 5);

        st.assign(9);
        assert_eq!(*st.value(), 9);
        assert_eq!(*st.backup(), 5);

        st.promote();
        assert_eq!(*st.backup(), 9);
    }

    #[test]
    fn restore_rolls_back_to_backup() {
        let mut st = ValueState::new(1i32);
        st.assign(2);
        st.restore();
        assert_eq!(*st.value(), 1);
    }

    #[test]
    fn slot_writes_value_and_backup_separately() {
        let mut st = ValueState::new(1i32);
        st.assign(2);

        let mut fwd = JsonWriter::new();
        let mut rev = JsonWriter::new();
        st.write_value(&mut fwd);
        st.write_backup(&mut rev);
        assert_eq!(fwd.as_str(), "2");
        assert_eq!(rev.as_str(), "1");
    }
}
