//! Tables
//!
//! A table owns records keyed by an i64 primary key. Row creation enters
//! the `created` set; row deletion is *intent only*: the record flips to
//! `Dying` and stays readable until the table commits the removal, at
//! which point it goes `Dead` and its delta emits `null` forward plus a
//! full dump in reverse.
//!
//! # Guard Events
//!
//! Guards attach to the table's watcher list and receive three targeted
//! events: `primary(pk)` when a row appears, changes, or registers its
//! death; `index(field, bucket)` when a declared indexed column leaves
//! one bucket and enters another; and the blanket hit for captures of
//! "all". Reads attribute to the innermost guard on the eval stack:
//! `lookup` captures the pk, `scan_index` the bucket, `iterate` all.

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use std::rc::Rc;

use crate::container::ctor::{construct_record, RecordSchema};
use crate::container::record;
use crate::formula::guard;
use crate::json::{JsonNode, JsonWriter};
use crate::scalar::value::RxHandle;
use crate::tree::{CellId, CellKind, Liveness, Tree};

/// Arena state of one table.
#[derive(Debug)]
pub struct TableState {
    pub(crate) schema: Rc<RecordSchema>,
    /// Field names whose buckets feed `index(field, bucket)` events.
    pub(crate) indexed: Vec<String>,
    pub(crate) rows: IndexMap<i64, CellId>,
    pub(crate) created: IndexSet<i64>,
    pub(crate) watchers: SmallVec<[CellId; 2]>,
    pub(crate) guard_stack: SmallVec<[CellId; 2]>,
    pub(crate) next_pk: i64,
}

impl TableState {
    pub(crate) fn new(schema: Rc<RecordSchema>, indexed: Vec<String>) -> Self {
        Self {
            schema,
            indexed,
            rows: IndexMap::new(),
            created: IndexSet::new(),
            watchers: SmallVec::new(),
            guard_stack: SmallVec::new(),
            next_pk: 0,
        }
    }
}

pub(crate) fn row_visible(tree: &Tree, row: CellId) -> bool {
    record::liveness(tree, row) != Liveness::Dead
}

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

pub(crate) fn fire_primary(tree: &mut Tree, id: CellId, pk: i64) {
    let watchers = match tree.table_state(id) {
        Some(state) => state.watchers.clone(),
        None => return,
    };
    let mut dead: SmallVec<[CellId; 2]> = SmallVec::new();
    for g in watchers {
        if !guard::on_primary(tree, g, pk) {
            dead.push(g);
        }
    }
    if !dead.is_empty() {
        if let Some(state) = tree.table_state_mut(id) {
            state.watchers.retain(|g| !dead.contains(g));
        }
    }
}

pub(crate) fn fire_index(tree: &mut Tree, id: CellId, field: u16, bucket: i32) {
    let watchers = match tree.table_state(id) {
        Some(state) => state.watchers.clone(),
        None => return,
    };
    let mut dead: SmallVec<[CellId; 2]> = SmallVec::new();
    for g in watchers {
        if !guard::on_index(tree, g, field, bucket) {
            dead.push(g);
        }
    }
    if !dead.is_empty() {
        if let Some(state) = tree.table_state_mut(id) {
            state.watchers.retain(|g| !dead.contains(g));
        }
    }
}

// ----------------------------------------------------------------------------
// Operations
// ----------------------------------------------------------------------------

pub(crate) fn create(tree: &mut Tree, id: CellId, pk: Option<i64>) -> Option<(i64, CellId)> {
    let (schema, assigned) = {
        let state = tree.table_state_mut(id)?;
        let assigned = match pk {
            Some(pk) => {
                state.next_pk = state.next_pk.max(pk + 1);
                pk
            }
            None => {
                let pk = state.next_pk;
                state.next_pk += 1;
                pk
            }
        };
        (state.schema.clone(), assigned)
    };
    if let Some(existing) = tree.table_state(id)?.rows.get(&assigned).copied() {
        return Some((assigned, existing));
    }
    let row = construct_record(tree, Some(id), schema, Some(assigned));
    {
        let state = tree.table_state_mut(id)?;
        state.rows.insert(assigned, row);
        state.created.insert(assigned);
    }
    tree.raise_dirty(id);
    // Birth event: primary(pk) here plus whatever containers enclose the
    // table, then the row's initial index buckets.
    tree.notify_ancestors(row);
    fire_initial_buckets(tree, id, row);
    Some((assigned, row))
}

/// A fresh row seeds every indexed column's bucket.
fn fire_initial_buckets(tree: &mut Tree, id: CellId, row: CellId) {
    let seeds: Vec<(u16, i32)> = {
        let Some(table) = tree.table_state(id) else {
            return;
        };
        let Some(rec) = tree.record_state(row) else {
            return;
        };
        rec.fields
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| table.indexed.iter().any(|n| n == name))
            .filter_map(|(pos, (_, cell))| {
                tree.index_value_of(*cell).map(|b| (pos as u16, b))
            })
            .collect()
    };
    for (field, bucket) in seeds {
        fire_index(tree, id, field, bucket);
    }
}

/// Read path: attributes the pk to the innermost active guard. Dying rows
/// stay readable.
pub(crate) fn lookup(tree: &mut Tree, id: CellId, pk: i64) -> Option<CellId> {
    let innermost = tree.table_state(id)?.guard_stack.last().copied();
    if let Some(g) = innermost {
        guard::read_pk(tree, g, pk);
    }
    tree.table_state(id)?.rows.get(&pk).copied()
}

/// Read path over everything: captures "all".
pub(crate) fn iterate(tree: &mut Tree, id: CellId) -> Vec<(i64, CellId)> {
    let Some(state) = tree.table_state(id) else {
        return Vec::new();
    };
    let snapshot: Vec<(i64, CellId)> = state.rows.iter().map(|(pk, c)| (*pk, *c)).collect();
    if let Some(g) = state.guard_stack.last().copied() {
        guard::read_all(tree, g);
    }
    snapshot
}

/// Read path by secondary-index bucket: captures `(field, bucket)` and
/// returns the alive rows whose column currently hashes there.
pub(crate) fn scan_index(
    tree: &mut Tree,
    id: CellId,
    field_name: &str,
    bucket: i32,
) -> Vec<(i64, CellId)> {
    let Some(state) = tree.table_state(id) else {
        return Vec::new();
    };
    let Some(pos) = state.schema.field_position(field_name) else {
        return Vec::new();
    };
    let rows: Vec<(i64, CellId)> = state.rows.iter().map(|(pk, c)| (*pk, *c)).collect();
    if let Some(g) = state.guard_stack.last().copied() {
        guard::read_index(tree, g, pos as u16, bucket);
    }
    rows.into_iter()
        .filter(|(_, row)| record::liveness(tree, *row) == Liveness::Alive)
        .filter(|(_, row)| {
            tree.record_state(*row)
                .and_then(|r| r.fields.get(pos))
                .and_then(|(_, cell)| tree.index_value_of(*cell))
                == Some(bucket)
        })
        .collect()
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
    struct RowPlan {
        pk: i64,
        cell: CellId,
        created: bool,
        dying: bool,
    }
    let rows: Vec<RowPlan> = {
        let Some(state) = tree.table_state(id) else { return };
        state
            .rows
            .iter()
            .map(|(pk, cell)| RowPlan {
                pk: *pk,
                cell: *cell,
                created: state.created.contains(pk),
                dying: record::liveness(tree, *cell) == Liveness::Dying,
            })
            .collect()
    };
    let has_changes = rows.iter().any(|r| match (r.created, r.dying) {
        // Created and deleted in one transaction: nothing to say.
        (true, true) => false,
        (true, false) | (false, true) => true,
        (false, false) => tree.is_dirty(r.cell),
    });
    let mut removed: Vec<(i64, CellId)> = Vec::new();
    if has_changes {
        fwd.key(name);
        fwd.begin_object();
        rev.key(name);
        rev.begin_object();
        for row in &rows {
            let rendered = row.pk.to_string();
            match (row.created, row.dying) {
                (true, true) => {
                    // Created and deleted in one transaction: no footprint.
                    removed.push((row.pk, row.cell));
                }
                (true, false) => {
                    fwd.key(&rendered);
                    tree.dump(row.cell, fwd);
                    rev.key(&rendered);
                    rev.write_null();
                    tree.mark_clean_subtree(row.cell);
                }
                (false, true) => {
                    fwd.key(&rendered);
                    fwd.write_null();
                    rev.key(&rendered);
                    tree.dump(row.cell, rev);
                    removed.push((row.pk, row.cell));
                }
                (false, false) => {
                    if tree.is_dirty(row.cell) {
                        tree.commit(row.cell, &rendered, fwd, rev);
                    }
                }
            }
        }
        fwd.end_object();
        rev.end_object();
    } else {
        for row in &rows {
            if row.created && row.dying {
                removed.push((row.pk, row.cell));
            }
        }
    }
    for (pk, cell) in removed {
        if let Some(state) = tree.table_state_mut(id) {
            state.rows.shift_remove(&pk);
        }
        if let Some(rec) = tree.record_state_mut(cell) {
            rec.liveness = Liveness::Dead;
        }
        tree.free_subtree(cell);
    }
    if let Some(state) = tree.table_state_mut(id) {
        state.created.clear();
    }
    if let Some(node) = tree.node_mut(id) {
        node.dirty = false;
        node.invalid = false;
    }
}

pub(crate) fn revert(tree: &mut Tree, id: CellId) {
    let (discarded, survivors) = {
        let Some(state) = tree.table_state(id) else { return };
        let discarded: Vec<(i64, CellId)> = state
            .created
            .iter()
            .filter_map(|pk| state.rows.get(pk).map(|c| (*pk, *c)))
            .collect();
        let survivors: Vec<CellId> = state
            .rows
            .iter()
            .filter(|(pk, _)| !state.created.contains(*pk))
            .map(|(_, c)| *c)
            .collect();
        (discarded, survivors)
    };
    {
        let Some(state) = tree.table_state_mut(id) else { return };
        for (pk, _) in &discarded {
            state.rows.shift_remove(pk);
        }
        state.created.clear();
    }
    for (_, cell) in discarded {
        if let Some(rec) = tree.record_state_mut(cell) {
            rec.liveness = Liveness::Dead;
        }
        tree.free_subtree(cell);
    }
    for cell in survivors {
        // Walks Dying rows back to Alive and reverts their fields.
        tree.revert(cell);
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
    for (raw_key, value) in entries {
        let Ok(pk) = raw_key.parse::<i64>() else { continue };
        let node = JsonNode::new(&value);
        if node.is_null() {
            let removed = tree
                .table_state_mut(id)
                .and_then(|s| s.rows.shift_remove(&pk));
            if let Some(cell) = removed {
                tree.free_subtree(cell);
            }
            continue;
        }
        let existing = tree.table_state(id).and_then(|s| s.rows.get(&pk).copied());
        let row = match existing {
            Some(row) => row,
            None => {
                let Some(schema) = tree.table_state(id).map(|s| s.schema.clone()) else {
                    return;
                };
                let row = construct_record(tree, Some(id), schema, Some(pk));
                if let Some(state) = tree.table_state_mut(id) {
                    state.rows.insert(pk, row);
                    state.next_pk = state.next_pk.max(pk + 1);
                }
                row
            }
        };
        tree.insert(row, &node);
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
    for (raw_key, value) in entries {
        let Ok(pk) = raw_key.parse::<i64>() else { continue };
        let node = JsonNode::new(&value);
        if node.is_null() {
            let row = tree.table_state(id).and_then(|s| s.rows.get(&pk).copied());
            if let Some(row) = row {
                record::delete(tree, row);
            }
        } else if let Some((_, row)) = create(tree, id, Some(pk)) {
            tree.patch(row, &node);
        }
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Typed handle to a table.
#[derive(Debug, Clone, Copy)]
pub struct RxTable {
    id: CellId,
}

impl RxTable {
    pub fn new(
        tree: &mut Tree,
        parent: Option<CellId>,
        schema: Rc<RecordSchema>,
        indexed: Vec<String>,
    ) -> Self {
        let id = tree.alloc(CellKind::Table(TableState::new(schema, indexed)), parent);
        Self { id }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// Create a row with an auto-assigned primary key.
    pub fn create(&self, tree: &mut Tree) -> (i64, crate::container::record::RxRecord) {
        let (pk, cell) =
            create(tree, self.id, None).expect("table handle points at a live table cell");
        (pk, crate::container::record::RxRecord::wrap(cell))
    }

    /// Create (or fetch) the row with a specific primary key.
    pub fn create_with(
        &self,
        tree: &mut Tree,
        pk: i64,
    ) -> crate::container::record::RxRecord {
        let (_, cell) =
            create(tree, self.id, Some(pk)).expect("table handle points at a live table cell");
        crate::container::record::RxRecord::wrap(cell)
    }

    pub fn lookup(&self, tree: &mut Tree, pk: i64) -> Option<crate::container::record::RxRecord> {
        lookup(tree, self.id, pk).map(crate::container::record::RxRecord::wrap)
    }

    pub fn delete(&self, tree: &mut Tree, pk: i64) {
        let row = tree.table_state(self.id).and_then(|s| s.rows.get(&pk).copied());
        if let Some(row) = row {
            record::delete(tree, row);
        }
    }

    pub fn iterate(&self, tree: &mut Tree) -> Vec<(i64, crate::container::record::RxRecord)> {
        iterate(tree, self.id)
            .into_iter()
            .map(|(pk, c)| (pk, crate::container::record::RxRecord::wrap(c)))
            .collect()
    }

    pub fn scan_index(
        &self,
        tree: &mut Tree,
        field: &str,
        bucket: i32,
    ) -> Vec<(i64, crate::container::record::RxRecord)> {
        scan_index(tree, self.id, field, bucket)
            .into_iter()
            .map(|(pk, c)| (pk, crate::container::record::RxRecord::wrap(c)))
            .collect()
    }

    pub fn len(&self, tree: &Tree) -> usize {
        tree.table_state(self.id).map(|s| s.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, tree: &Tree) -> bool {
        self.len(tree) == 0
    }

    pub fn commit(&self, tree: &mut Tree, name: &str, fwd: &mut JsonWriter, rev: &mut JsonWriter) {
        tree.commit(self.id, name, fwd, rev);
    }

    pub fn revert(&self, tree: &mut Tree) {
        tree.revert(self.id);
    }
}

impl RxHandle for RxTable {
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
    use crate::scalar::{RxInt64, RxString};

    fn people(tree: &mut Tree) -> RxTable {
        let schema = RecordSchema::new(vec![
            ("name".to_string(), CellCtor::Text(String::new())),
            ("score".to_string(), CellCtor::Int64(0)),
        ]);
        RxTable::new(tree, None, schema, vec!["name".to_string()])
    }

    fn commit_pair(tree: &mut Tree, table: RxTable) -> (String, String) {
        let mut fwd = JsonWriter::new();
        let mut rev = JsonWriter::new();
        table.commit(tree, "t", &mut fwd, &mut rev);
        (fwd.into_string(), rev.into_string())
    }

    #[test]
    fn primary_keys_auto_increment() {
        let mut tree = Tree::new();
        let table = people(&mut tree);
        assert_eq!(table.create(&mut tree).0, 0);
        assert_eq!(table.create(&mut tree).0, 1);
        table.create_with(&mut tree, 10);
        assert_eq!(table.create(&mut tree).0, 11);
    }

    #[test]
    fn row_creation_commits_as_dump() {
        let mut tree = Tree::new();
        let table = people(&mut tree);
        let (pk, row) = table.create(&mut tree);
        row.field::<RxInt64>(&tree, "score")
            .unwrap()
            .set(&mut tree, 5);

        let (fwd, rev) = commit_pair(&mut tree, table);
        assert_eq!(fwd, format!("\"t\":{{\"{pk}\":{{\"name\":\"\",\"score\":\"5\"}}}}"));
        assert_eq!(rev, format!("\"t\":{{\"{pk}\":null}}"));
    }

    #[test]
    fn dying_rows_stay_readable_until_commit() {
        let mut tree = Tree::new();
        let table = people(&mut tree);
        let (pk, row) = table.create(&mut tree);
        row.field::<RxInt64>(&tree, "score")
            .unwrap()
            .set(&mut tree, 5);
        commit_pair(&mut tree, table);

        table.delete(&mut tree, pk);
        let found = table.lookup(&mut tree, pk).unwrap();
        assert_eq!(found.liveness(&tree), Liveness::Dying);
        assert_eq!(
            found.field::<RxInt64>(&tree, "score").unwrap().get(&tree),
            5
        );

        let (fwd, rev) = commit_pair(&mut tree, table);
        assert_eq!(fwd, format!("\"t\":{{\"{pk}\":null}}"));
        assert_eq!(rev, format!("\"t\":{{\"{pk}\":{{\"name\":\"\",\"score\":\"5\"}}}}"));
        assert!(table.lookup(&mut tree, pk).is_none());
    }

    #[test]
    fn create_then_delete_same_transaction_has_no_footprint() {
        let mut tree = Tree::new();
        let table = people(&mut tree);
        let (pk, _) = table.create(&mut tree);
        table.delete(&mut tree, pk);

        let (fwd, rev) = commit_pair(&mut tree, table);
        assert!(fwd.is_empty());
        assert!(rev.is_empty());
        assert!(table.is_empty(&tree));
    }

    #[test]
    fn revert_walks_dying_back_to_alive() {
        let mut tree = Tree::new();
        let table = people(&mut tree);
        let (pk, _) = table.create(&mut tree);
        commit_pair(&mut tree, table);

        table.delete(&mut tree, pk);
        table.revert(&mut tree);
        let row = table.lookup(&mut tree, pk).unwrap();
        assert_eq!(row.liveness(&tree), Liveness::Alive);
    }

    #[test]
    fn scan_index_matches_current_buckets() {
        let mut tree = Tree::new();
        let table = people(&mut tree);
        let (_, a) = table.create(&mut tree);
        let (_, b) = table.create(&mut tree);
        a.field::<RxString>(&tree, "name")
            .unwrap()
            .set(&mut tree, "red".to_string());
        b.field::<RxString>(&tree, "name")
            .unwrap()
            .set(&mut tree, "blue".to_string());

        let red = crate::scalar::stable_hash32("red");
        let hits = table.scan_index(&mut tree, "name", red);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1.id(), a.id());
    }

    #[test]
    fn hydration_rebuilds_rows_clean() {
        let mut tree = Tree::new();
        let table = people(&mut tree);
        tree.insert_json(
            table.id(),
            "{\"3\":{\"name\":\"x\",\"score\":\"7\"},\"bad\":{},\"5\":{\"score\":\"9\"}}",
        )
        .unwrap();
        assert_eq!(table.len(&tree), 2);
        assert!(!tree.is_dirty(table.id()));
        let row = table.lookup(&mut tree, 3).unwrap();
        assert_eq!(row.pk(&tree), Some(3));
        assert_eq!(row.field::<RxInt64>(&tree, "score").unwrap().get(&tree), 7);
        // Auto keys continue past hydrated rows.
        assert_eq!(table.create(&mut tree).0, 6);
    }
}
