//! Commit, Revert, and Hydration Dispatch
//!
//! The change-tracking contract, implemented once over the arena:
//!
//! - `commit` is a no-op unless the cell is dirty. It writes the field
//!   under its name into both writers (forward carries the new state,
//!   reverse the prior state), then promotes `backup := value` and clears
//!   the flags.
//! - `revert` is a no-op unless dirty. It restores `value := backup`,
//!   clears the flags, and *unconditionally* re-invalidates subscribers:
//!   downstream formulas must drop stale intermediates even though the
//!   final value is unchanged.
//! - `dump` writes the full current snapshot, ignoring dirtiness.
//! - `insert` hydrates both backup and value and never dirties.
//! - `patch` routes through `set`, so it participates in dirty tracking
//!   and index triggering.
//!
//! Scalars complete inline; containers dispatch into their modules.

use tracing::debug;

use crate::container::{grid, list, map, maybe, record, table};
use crate::json::{HydrateError, JsonNode, JsonWriter};
use crate::tree::arena::Tree;
use crate::tree::cell::{CellId, CellKind};

/// Container dispatch tag, extracted so recursion never holds a borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KindTag {
    Scalar,
    Maybe,
    Map,
    Grid,
    List,
    Record,
    Table,
    Ephemeral,
}

impl Tree {
    pub(crate) fn kind_tag(&self, id: CellId) -> Option<KindTag> {
        Some(match &self.node(id)?.kind {
            CellKind::Scalar(_) => KindTag::Scalar,
            CellKind::Maybe(_) => KindTag::Maybe,
            CellKind::Map(_) => KindTag::Map,
            CellKind::Grid(_) => KindTag::Grid,
            CellKind::List(_) => KindTag::List,
            CellKind::Record(_) => KindTag::Record,
            CellKind::Table(_) => KindTag::Table,
            CellKind::Formula(_) | CellKind::Guard(_) | CellKind::Projection(_) => {
                KindTag::Ephemeral
            }
        })
    }

    /// Emit this cell's delta pair under `name`. No-op unless dirty.
    pub fn commit(&mut self, id: CellId, name: &str, fwd: &mut JsonWriter, rev: &mut JsonWriter) {
        {
            let Some(node) = self.node_mut(id) else { return };
            if !node.dirty {
                return;
            }
            if let CellKind::Scalar(slot) = &mut node.kind {
                fwd.key(name);
                slot.write_value(fwd);
                rev.key(name);
                slot.write_backup(rev);
                slot.promote();
                node.dirty = false;
                node.invalid = false;
                return;
            }
        }
        match self.kind_tag(id) {
            Some(KindTag::Maybe) => maybe::commit(self, id, name, fwd, rev),
            Some(KindTag::Map) => map::commit(self, id, name, fwd, rev),
            Some(KindTag::Grid) => grid::commit(self, id, name, fwd, rev),
            Some(KindTag::List) => list::commit(self, id, name, fwd, rev),
            Some(KindTag::Record) => record::commit(self, id, name, fwd, rev),
            Some(KindTag::Table) => table::commit(self, id, name, fwd, rev),
            _ => {
                // Memoization-layer cells are not persisted.
                if let Some(node) = self.node_mut(id) {
                    node.dirty = false;
                }
            }
        }
        debug!(?id, name, "committed");
    }

    /// Discard uncommitted mutation. No-op unless dirty.
    pub fn revert(&mut self, id: CellId) {
        let scalar_done = {
            let Some(node) = self.node_mut(id) else { return };
            if !node.dirty {
                return;
            }
            if let CellKind::Scalar(slot) = &mut node.kind {
                slot.restore();
                node.dirty = false;
                node.invalid = false;
                true
            } else {
                false
            }
        };
        if scalar_done {
            self.invalidate_subscribers(id);
            return;
        }
        match self.kind_tag(id) {
            Some(KindTag::Maybe) => maybe::revert(self, id),
            Some(KindTag::Map) => map::revert(self, id),
            Some(KindTag::Grid) => grid::revert(self, id),
            Some(KindTag::List) => list::revert(self, id),
            Some(KindTag::Record) => record::revert(self, id),
            Some(KindTag::Table) => table::revert(self, id),
            _ => {
                if let Some(node) = self.node_mut(id) {
                    node.dirty = false;
                }
            }
        }
        debug!(?id, "reverted");
    }

    /// Write the full current snapshot of this cell (bare value, no key).
    pub fn dump(&self, id: CellId, w: &mut JsonWriter) {
        let Some(node) = self.node(id) else {
            w.write_null();
            return;
        };
        match &node.kind {
            CellKind::Scalar(slot) => slot.write_value(w),
            CellKind::Maybe(m) => match m.value {
                Some(child) => self.dump(child, w),
                None => w.write_null(),
            },
            CellKind::Map(m) => {
                w.begin_object();
                for (key, child) in &m.live {
                    w.key(&key.render());
                    self.dump(*child, w);
                }
                w.end_object();
            }
            CellKind::Grid(g) => {
                w.begin_object();
                for (at, child) in &g.live {
                    w.key(&grid::render_at(*at));
                    self.dump(*child, w);
                }
                w.end_object();
            }
            CellKind::List(l) => {
                w.begin_object();
                for (pos, child) in &l.entries {
                    w.key(&list::render_pos(pos.into_inner()));
                    self.dump(*child, w);
                }
                w.end_object();
            }
            CellKind::Record(r) => {
                w.begin_object();
                for (name, child) in &r.fields {
                    w.key(name);
                    self.dump(*child, w);
                }
                w.end_object();
            }
            CellKind::Table(t) => {
                w.begin_object();
                for (pk, child) in &t.rows {
                    if table::row_visible(self, *child) {
                        w.key(&pk.to_string());
                        self.dump(*child, w);
                    }
                }
                w.end_object();
            }
            CellKind::Formula(_) | CellKind::Guard(_) | CellKind::Projection(_) => {
                w.write_null();
            }
        }
    }

    /// Full hydration from a parsed snapshot. Sets both backup and value;
    /// never dirties. Unexpected shapes are skipped.
    pub fn insert(&mut self, id: CellId, data: &JsonNode<'_>) {
        {
            let Some(node) = self.node_mut(id) else { return };
            if let CellKind::Scalar(slot) = &mut node.kind {
                slot.hydrate(data);
                return;
            }
        }
        match self.kind_tag(id) {
            Some(KindTag::Maybe) => maybe::insert(self, id, data),
            Some(KindTag::Map) => map::insert(self, id, data),
            Some(KindTag::Grid) => grid::insert(self, id, data),
            Some(KindTag::List) => list::insert(self, id, data),
            Some(KindTag::Record) => record::insert(self, id, data),
            Some(KindTag::Table) => table::insert(self, id, data),
            _ => {}
        }
    }

    /// Partial external update, routed through `set` semantics so it
    /// participates in dirty tracking. Unexpected shapes are skipped.
    pub fn patch(&mut self, id: CellId, data: &JsonNode<'_>) {
        let patched = {
            let Some(node) = self.node_mut(id) else { return };
            if let CellKind::Scalar(slot) = &mut node.kind {
                let old = slot.index_value();
                let changed = slot.patch_value(data);
                let new = slot.index_value();
                Some((changed, old, new))
            } else {
                None
            }
        };
        if let Some((changed, old, new)) = patched {
            if changed {
                if let (Some(old), Some(new)) = (old, new) {
                    if let Some(hook) = self.hook_mut(id) {
                        hook.trigger(old);
                        hook.trigger(new);
                    }
                    self.notify_index_change(id, old, new);
                }
                self.raise_dirty(id);
                self.notify_ancestors(id);
            }
            return;
        }
        match self.kind_tag(id) {
            Some(KindTag::Maybe) => maybe::patch(self, id, data),
            Some(KindTag::Map) => map::patch(self, id, data),
            Some(KindTag::Grid) => grid::patch(self, id, data),
            Some(KindTag::List) => list::patch(self, id, data),
            Some(KindTag::Record) => record::patch(self, id, data),
            Some(KindTag::Table) => table::patch(self, id, data),
            _ => {}
        }
    }

    /// Parse and `insert`. The only hydration error surfaced to callers
    /// is an unparseable top-level payload.
    pub fn insert_json(&mut self, id: CellId, text: &str) -> Result<(), HydrateError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        self.insert(id, &JsonNode::new(&value));
        Ok(())
    }

    /// Parse and `patch`.
    pub fn patch_json(&mut self, id: CellId, text: &str) -> Result<(), HydrateError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        self.patch(id, &JsonNode::new(&value));
        Ok(())
    }

    /// Full snapshot of a cell as a standalone JSON string.
    pub fn dump_json(&self, id: CellId) -> String {
        let mut w = JsonWriter::new();
        self.dump(id, &mut w);
        w.into_string()
    }

    /// After a same-transaction creation commits as a full dump, the whole
    /// fresh subtree becomes the committed baseline: promote every scalar,
    /// clear transient sets, clear flags.
    pub(crate) fn mark_clean_subtree(&mut self, id: CellId) {
        let mut orphans: Vec<CellId> = Vec::new();
        let children: Vec<CellId> = {
            let Some(node) = self.node_mut(id) else { return };
            node.dirty = false;
            node.invalid = false;
            match &mut node.kind {
                CellKind::Scalar(slot) => {
                    slot.promote();
                    return;
                }
                CellKind::Maybe(m) => {
                    m.prior = m.value;
                    m.value.into_iter().collect()
                }
                CellKind::Map(m) => {
                    m.created.clear();
                    orphans.extend(m.deleted.drain(..).map(|(_, c)| c));
                    m.live.values().copied().collect()
                }
                CellKind::Grid(g) => {
                    g.created.clear();
                    orphans.extend(g.deleted.drain(..).map(|(_, c)| c));
                    g.live.values().copied().collect()
                }
                CellKind::List(l) => {
                    l.created.clear();
                    for tomb in std::mem::take(&mut l.deleted).into_values() {
                        if !tomb.moved {
                            orphans.push(tomb.cell);
                        }
                    }
                    l.entries.values().copied().collect()
                }
                CellKind::Record(r) => r.fields.iter().map(|(_, c)| *c).collect(),
                CellKind::Table(t) => {
                    t.created.clear();
                    t.rows.values().copied().collect()
                }
                CellKind::Formula(_) | CellKind::Guard(_) | CellKind::Projection(_) => return,
            }
        };
        for orphan in orphans {
            self.free_subtree(orphan);
        }
        for child in children {
            self.mark_clean_subtree(child);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::{RxBoolean, RxInt64};

    #[test]
    fn boolean_commit_emits_paired_delta() {
        let mut tree = Tree::new();
        let cell = RxBoolean::new(&mut tree, None, false);
        cell.set(&mut tree, true);

        let mut fwd = JsonWriter::new();
        let mut rev = JsonWriter::new();
        cell.commit(&mut tree, "v", &mut fwd, &mut rev);
        assert_eq!(fwd.as_str(), "\"v\":true");
        assert_eq!(rev.as_str(), "\"v\":false");

        // Second commit with no intervening mutation: both stay empty.
        let mut fwd2 = JsonWriter::new();
        let mut rev2 = JsonWriter::new();
        cell.commit(&mut tree, "v2", &mut fwd2, &mut rev2);
        assert!(fwd2.is_empty());
        assert!(rev2.is_empty());
    }

    #[test]
    fn int64_commit_is_string_encoded() {
        let mut tree = Tree::new();
        let cell = RxInt64::new(&mut tree, None, 42);
        cell.set(&mut tree, 60);

        let mut fwd = JsonWriter::new();
        let mut rev = JsonWriter::new();
        cell.commit(&mut tree, "v", &mut fwd, &mut rev);
        assert_eq!(fwd.as_str(), "\"v\":\"60\"");
        assert_eq!(rev.as_str(), "\"v\":\"42\"");
    }

    #[test]
    fn revert_restores_and_reinvalidates() {
        let mut tree = Tree::new();
        let cell = RxInt64::new(&mut tree, None, 7);
        let watcher = RxInt64::new(&mut tree, None, 0);
        tree.subscribe(cell.id(), watcher.id());

        cell.set(&mut tree, 8);
        // Clear the watcher's invalid bit to observe the revert fan-out.
        tree.node_mut(watcher.id()).unwrap().invalid = false;

        cell.revert(&mut tree);
        assert_eq!(cell.get(&tree), 7);
        assert!(!tree.is_dirty(cell.id()));
        assert!(tree.is_invalid(watcher.id()));
    }

    #[test]
    fn insert_never_dirties() {
        let mut tree = Tree::new();
        let cell = RxInt64::new(&mut tree, None, 0);
        tree.insert_json(cell.id(), "\"99\"").unwrap();
        assert_eq!(cell.get(&tree), 99);
        assert!(!tree.is_dirty(cell.id()));
    }

    #[test]
    fn patch_routes_through_set() {
        let mut tree = Tree::new();
        let cell = RxInt64::new(&mut tree, None, 0);
        tree.patch_json(cell.id(), "\"99\"").unwrap();
        assert_eq!(cell.get(&tree), 99);
        assert!(tree.is_dirty(cell.id()));
    }

    #[test]
    fn dump_ignores_dirtiness() {
        let mut tree = Tree::new();
        let cell = RxInt64::new(&mut tree, None, 1);
        cell.set(&mut tree, 2);
        assert_eq!(tree.dump_json(cell.id()), "\"2\"");
        assert!(tree.is_dirty(cell.id()));
    }

    #[test]
    fn malformed_payload_is_the_only_surfaced_error() {
        let mut tree = Tree::new();
        let cell = RxInt64::new(&mut tree, None, 0);
        assert!(tree.insert_json(cell.id(), "{not json").is_err());
        // Wrong shape parses fine and is silently skipped.
        tree.insert_json(cell.id(), "[1,2,3]").unwrap();
        assert_eq!(cell.get(&tree), 0);
    }
}
