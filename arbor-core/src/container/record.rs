//! Records (Table Rows)
//!
//! A record is a container of named fields, constructed eagerly from a
//! schema. Delta emission order is schema order.
//!
//! # Liveness
//!
//! Rows move `Alive → Dying → Dead`. `delete()` only registers intent: it
//! enters `Dying`, tells the owning table the primary key is going away
//! (so guards capturing that key fire), and raises dirty. The row stays
//! readable until the table commits the removal, and a revert walks it
//! back to `Alive`. Liveness queries climb the parent chain: a record is
//! alive only if it is locally `Alive` and every ancestor agrees.

use std::rc::Rc;

use crate::container::ctor::RecordSchema;
use crate::json::{JsonNode, JsonWriter};
use crate::scalar::value::RxHandle;
use crate::tree::{CellId, Liveness, Tree};

/// Arena state of one record.
#[derive(Debug)]
pub struct RecordState {
    pub(crate) schema: Rc<RecordSchema>,
    pub(crate) fields: Vec<(String, CellId)>,
    pub(crate) liveness: Liveness,
    /// Set when this record is a table row.
    pub(crate) pk: Option<i64>,
}

impl RecordState {
    pub(crate) fn new(schema: Rc<RecordSchema>, pk: Option<i64>) -> Self {
        Self {
            schema,
            fields: Vec::new(),
            liveness: Liveness::Alive,
            pk,
        }
    }
}

// ----------------------------------------------------------------------------
// Operations
// ----------------------------------------------------------------------------

pub(crate) fn field(tree: &Tree, id: CellId, name: &str) -> Option<CellId> {
    tree.record_state(id)?
        .fields
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, c)| *c)
}

/// Delete-intent: enter `Dying`, notify the owning table, raise dirty.
pub(crate) fn delete(tree: &mut Tree, id: CellId) {
    {
        let Some(state) = tree.record_state_mut(id) else { return };
        if state.liveness != Liveness::Alive {
            return;
        }
        state.liveness = Liveness::Dying;
    }
    tree.raise_dirty(id);
    // The owning table sees this as a primary(pk) death event.
    tree.notify_ancestors(id);
}

pub(crate) fn liveness(tree: &Tree, id: CellId) -> Liveness {
    tree.record_state(id)
        .map(|s| s.liveness)
        .unwrap_or(Liveness::Dead)
}

// ----------------------------------------------------------------------------
// Contract
// ----------------------------------------------------------------------------

pub(crate) fn commit(
    tree: &mut Tree,
    id: CellId,
    name: &str,
    fwd: &mut JsonWriter,
    rev: &mut JsonWriter,
) {
    let fields: Vec<(String, CellId)> = {
        let Some(state) = tree.record_state(id) else { return };
        state.fields.clone()
    };
    let has_changes = fields.iter().any(|(_, c)| tree.is_dirty(*c));
    if has_changes {
        fwd.key(name);
        fwd.begin_object();
        rev.key(name);
        rev.begin_object();
        for (field_name, child) in &fields {
            if tree.is_dirty(*child) {
                tree.commit(*child, field_name, fwd, rev);
            }
        }
        fwd.end_object();
        rev.end_object();
    }
    if let Some(node) = tree.node_mut(id) {
        node.dirty = false;
        node.invalid = false;
    }
}

pub(crate) fn revert(tree: &mut Tree, id: CellId) {
    let fields: Vec<CellId> = {
        let Some(state) = tree.record_state_mut(id) else { return };
        // Uncommitted delete-intent is walked back.
        if state.liveness == Liveness::Dying {
            state.liveness = Liveness::Alive;
        }
        state.fields.iter().map(|(_, c)| *c).collect()
    };
    for child in fields {
        tree.revert(child);
    }
    if let Some(node) = tree.node_mut(id) {
        node.dirty = false;
        node.invalid = false;
    }
    tree.invalidate_subscribers(id);
}

pub(crate) fn insert(tree: &mut Tree, id: CellId, data: &JsonNode<'_>) {
    if !data.is_object() {
        return;
    }
    let entries: Vec<(String, serde_json::Value)> = data
        .fields()
        .map(|(k, v)| (k.to_string(), v.raw().clone()))
        .collect();
    for (field_name, value) in entries {
        // Unknown fields are forward-compatibility noise; skip them.
        let Some(child) = field(tree, id, &field_name) else {
            continue;
        };
        tree.insert(child, &JsonNode::new(&value));
    }
}

pub(crate) fn patch(tree: &mut Tree, id: CellId, data: &JsonNode<'_>) {
    if !data.is_object() {
        return;
    }
    let entries: Vec<(String, serde_json::Value)> = data
        .fields()
        .map(|(k, v)| (k.to_string(), v.raw().clone()))
        .collect();
    for (field_name, value) in entries {
        let Some(child) = field(tree, id, &field_name) else {
            continue;
        };
        tree.patch(child, &JsonNode::new(&value));
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Typed handle to a record.
#[derive(Debug, Clone, Copy)]
pub struct RxRecord {
    id: CellId,
}

impl RxRecord {
    /// A standalone record (the usual document root).
    pub fn new(tree: &mut Tree, parent: Option<CellId>, schema: Rc<RecordSchema>) -> Self {
        let id = crate::container::ctor::construct_record(tree, parent, schema, None);
        Self { id }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// Typed access to a field. The caller names the handle type; a
    /// mismatched type will fail on first use, not here.
    pub fn field<H: RxHandle>(&self, tree: &Tree, name: &str) -> Option<H> {
        field(tree, self.id, name).map(H::wrap)
    }

    pub fn pk(&self, tree: &Tree) -> Option<i64> {
        tree.record_state(self.id).and_then(|s| s.pk)
    }

    pub fn liveness(&self, tree: &Tree) -> Liveness {
        liveness(tree, self.id)
    }

    /// Delete-intent; final removal happens when the owning table commits.
    pub fn delete(&self, tree: &mut Tree) {
        delete(tree, self.id);
    }

    pub fn commit(&self, tree: &mut Tree, name: &str, fwd: &mut JsonWriter, rev: &mut JsonWriter) {
        tree.commit(self.id, name, fwd, rev);
    }

    pub fn revert(&self, tree: &mut Tree) {
        tree.revert(self.id);
    }
}

impl RxHandle for RxRecord {
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
    use crate::container::ctor::CellCtor;
    use crate::scalar::{RxBoolean, RxInt64};

    fn schema() -> Rc<RecordSchema> {
        RecordSchema::new(vec![
            ("name".to_string(), CellCtor::Text(String::new())),
            ("score".to_string(), CellCtor::Int64(0)),
            ("active".to_string(), CellCtor::Boolean(true)),
        ])
    }

    #[test]
    fn only_dirty_fields_commit() {
        let mut tree = Tree::new();
        let rec = RxRecord::new(&mut tree, None, schema());
        let score: RxInt64 = rec.field(&tree, "score").unwrap();
        score.set(&mut tree, 9);

        let mut fwd = JsonWriter::new();
        let mut rev = JsonWriter::new();
        rec.commit(&mut tree, "r", &mut fwd, &mut rev);
        assert_eq!(fwd.as_str(), "\"r\":{\"score\":\"9\"}");
        assert_eq!(rev.as_str(), "\"r\":{\"score\":\"0\"}");
    }

    #[test]
    fn clean_record_emits_nothing() {
        let mut tree = Tree::new();
        let rec = RxRecord::new(&mut tree, None, schema());
        let mut fwd = JsonWriter::new();
        let mut rev = JsonWriter::new();
        rec.commit(&mut tree, "r", &mut fwd, &mut rev);
        assert!(fwd.is_empty());
        assert!(rev.is_empty());
    }

    #[test]
    fn unknown_fields_skip_during_hydration() {
        let mut tree = Tree::new();
        let rec = RxRecord::new(&mut tree, None, schema());
        tree.insert_json(rec.id(), "{\"score\":\"4\",\"mystery\":true}")
            .unwrap();
        let score: RxInt64 = rec.field(&tree, "score").unwrap();
        assert_eq!(score.get(&tree), 4);
        assert!(!tree.is_dirty(rec.id()));
    }

    #[test]
    fn liveness_gates_alive_queries() {
        let mut tree = Tree::new();
        let rec = RxRecord::new(&mut tree, None, schema());
        let active: RxBoolean = rec.field(&tree, "active").unwrap();

        assert!(tree.is_alive(active.id()));
        rec.delete(&mut tree);
        assert_eq!(rec.liveness(&tree), Liveness::Dying);
        // Dying is readable but not alive.
        assert!(!tree.is_alive(active.id()));

        rec.revert(&mut tree);
        assert_eq!(rec.liveness(&tree), Liveness::Alive);
        assert!(tree.is_alive(active.id()));
    }
}
