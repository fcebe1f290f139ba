//! Sparse 2D Grid Container
//!
//! A grid is a map keyed by a coordinate pair. It shares the map's
//! transaction mechanics (`created`/`deleted` transient sets,
//! resurrection, the same commit/revert table) but has no per-key
//! pub/sub: grid consumers subscribe to the grid cell itself.
//!
//! Wire keys render as `"x,y"`; unparseable keys are skipped during
//! hydration.

use indexmap::{IndexMap, IndexSet};

use crate::container::ctor::CellCtor;
use crate::json::{JsonNode, JsonWriter};
use crate::scalar::value::RxHandle;
use crate::tree::{CellId, CellKind, Tree};

/// Grid coordinates.
pub type GridAt = (i32, i32);

pub(crate) fn render_at(at: GridAt) -> String {
    format!("{},{}", at.0, at.1)
}

pub(crate) fn parse_at(raw: &str) -> Option<GridAt> {
    let (x, y) = raw.split_once(',')?;
    Some((x.parse().ok()?, y.parse().ok()?))
}

/// Arena state of one grid.
#[derive(Debug)]
pub struct GridState {
    pub(crate) of: CellCtor,
    pub(crate) live: IndexMap<GridAt, CellId>,
    pub(crate) created: IndexSet<GridAt>,
    pub(crate) deleted: IndexMap<GridAt, CellId>,
}

impl GridState {
    pub(crate) fn new(of: CellCtor) -> Self {
        Self {
            of,
            live: IndexMap::new(),
            created: IndexSet::new(),
            deleted: IndexMap::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Operations
// ----------------------------------------------------------------------------

pub(crate) fn get_or_create(tree: &mut Tree, id: CellId, at: GridAt) -> Option<CellId> {
    if let Some(child) = tree.grid_state(id)?.live.get(&at).copied() {
        return Some(child);
    }
    if let Some(child) = tree.grid_state_mut(id)?.deleted.shift_remove(&at) {
        tree.grid_state_mut(id)?.live.insert(at, child);
        tree.raise_dirty(id);
        tree.notify_ancestors(id);
        return Some(child);
    }
    let of = tree.grid_state(id)?.of.clone();
    let child = of.construct(tree, Some(id));
    {
        let state = tree.grid_state_mut(id)?;
        state.live.insert(at, child);
        state.created.insert(at);
    }
    tree.raise_dirty(id);
    tree.notify_ancestors(id);
    Some(child)
}

pub(crate) fn remove(tree: &mut Tree, id: CellId, at: GridAt) {
    enum Outcome {
        DiscardCreation(CellId),
        Tombstone,
        Absent,
    }
    let outcome = {
        let Some(state) = tree.grid_state_mut(id) else { return };
        if state.created.shift_remove(&at) {
            match state.live.shift_remove(&at) {
                Some(child) => Outcome::DiscardCreation(child),
                None => Outcome::Absent,
            }
        } else if let Some(child) = state.live.shift_remove(&at) {
            state.deleted.insert(at, child);
            Outcome::Tombstone
        } else {
            Outcome::Absent
        }
    };
    match outcome {
        Outcome::DiscardCreation(child) => {
            tree.free_subtree(child);
            tree.raise_dirty(id);
            tree.notify_ancestors(id);
        }
        Outcome::Tombstone => {
            tree.raise_dirty(id);
            tree.notify_ancestors(id);
        }
        Outcome::Absent => {}
    }
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
    let (deleted, live) = {
        let Some(state) = tree.grid_state(id) else { return };
        let deleted: Vec<(GridAt, CellId)> =
            state.deleted.iter().map(|(k, c)| (*k, *c)).collect();
        let live: Vec<(GridAt, CellId, bool)> = state
            .live
            .iter()
            .map(|(k, c)| (*k, *c, state.created.contains(k)))
            .collect();
        (deleted, live)
    };
    let has_changes = !deleted.is_empty()
        || live
            .iter()
            .any(|(_, child, created)| *created || tree.is_dirty(*child));
    if has_changes {
        fwd.key(name);
        fwd.begin_object();
        rev.key(name);
        rev.begin_object();
        for (at, child) in &deleted {
            let rendered = render_at(*at);
            fwd.key(&rendered);
            fwd.write_null();
            rev.key(&rendered);
            tree.dump(*child, rev);
        }
        for (at, child, created) in &live {
            if *created {
                let rendered = render_at(*at);
                fwd.key(&rendered);
                tree.dump(*child, fwd);
                rev.key(&rendered);
                rev.write_null();
                tree.mark_clean_subtree(*child);
            } else if tree.is_dirty(*child) {
                tree.commit(*child, &render_at(*at), fwd, rev);
            }
        }
        fwd.end_object();
        rev.end_object();
        for (_, child) in deleted {
            tree.free_subtree(child);
        }
    }
    if let Some(state) = tree.grid_state_mut(id) {
        state.created.clear();
        state.deleted.clear();
    }
    if let Some(node) = tree.node_mut(id) {
        node.dirty = false;
        node.invalid = false;
    }
}

pub(crate) fn revert(tree: &mut Tree, id: CellId) {
    let (discarded, restored, survivors) = {
        let Some(state) = tree.grid_state(id) else { return };
        let discarded: Vec<(GridAt, CellId)> = state
            .created
            .iter()
            .filter_map(|k| state.live.get(k).map(|c| (*k, *c)))
            .collect();
        let restored: Vec<(GridAt, CellId)> =
            state.deleted.iter().map(|(k, c)| (*k, *c)).collect();
        let survivors: Vec<CellId> = state
            .live
            .iter()
            .filter(|(k, _)| !state.created.contains(*k))
            .map(|(_, c)| *c)
            .collect();
        (discarded, restored, survivors)
    };
    {
        let Some(state) = tree.grid_state_mut(id) else { return };
        for (at, _) in &discarded {
            state.live.shift_remove(at);
        }
        for (at, child) in &restored {
            state.live.insert(*at, *child);
        }
        state.created.clear();
        state.deleted.clear();
    }
    for (_, child) in discarded {
        tree.free_subtree(child);
    }
    for child in survivors.into_iter().chain(restored.into_iter().map(|(_, c)| c)) {
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
    let fields: Vec<(String, serde_json::Value)> = data
        .fields()
        .map(|(k, v)| (k.to_string(), v.raw().clone()))
        .collect();
    for (raw_key, value) in fields {
        let Some(at) = parse_at(&raw_key) else { continue };
        let node = JsonNode::new(&value);
        if node.is_null() {
            let removed = tree
                .grid_state_mut(id)
                .and_then(|s| s.live.shift_remove(&at));
            if let Some(child) = removed {
                tree.free_subtree(child);
            }
            continue;
        }
        let existing = tree.grid_state(id).and_then(|s| s.live.get(&at).copied());
        let child = match existing {
            Some(child) => child,
            None => {
                let Some(of) = tree.grid_state(id).map(|s| s.of.clone()) else {
                    return;
                };
                let child = of.construct(tree, Some(id));
                if let Some(state) = tree.grid_state_mut(id) {
                    state.live.insert(at, child);
                }
                child
            }
        };
        tree.insert(child, &node);
    }
}

pub(crate) fn patch(tree: &mut Tree, id: CellId, data: &JsonNode<'_>) {
    if !data.is_object() {
        return;
    }
    let fields: Vec<(String, serde_json::Value)> = data
        .fields()
        .map(|(k, v)| (k.to_string(), v.raw().clone()))
        .collect();
    for (raw_key, value) in fields {
        let Some(at) = parse_at(&raw_key) else { continue };
        let node = JsonNode::new(&value);
        if node.is_null() {
            remove(tree, id, at);
        } else if let Some(child) = get_or_create(tree, id, at) {
            tree.patch(child, &node);
        }
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Typed handle to a sparse grid of `V` children.
pub struct RxGrid<V> {
    id: CellId,
    _marker: std::marker::PhantomData<fn() -> V>,
}

impl<V> Clone for RxGrid<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for RxGrid<V> {}

impl<V: RxHandle> RxGrid<V> {
    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn new(tree: &mut Tree, parent: Option<CellId>, of: CellCtor) -> Self {
        let id = tree.alloc(CellKind::Grid(GridState::new(of)), parent);
        Self {
            id,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn get_or_create(&self, tree: &mut Tree, x: i32, y: i32) -> V {
        let id = get_or_create(tree, self.id, (x, y))
            .expect("grid handle points at a live grid cell");
        V::wrap(id)
    }

    pub fn lookup(&self, tree: &Tree, x: i32, y: i32) -> Option<V> {
        tree.grid_state(self.id)?
            .live
            .get(&(x, y))
            .copied()
            .map(V::wrap)
    }

    pub fn remove(&self, tree: &mut Tree, x: i32, y: i32) {
        remove(tree, self.id, (x, y));
    }

    pub fn len(&self, tree: &Tree) -> usize {
        tree.grid_state(self.id).map(|s| s.live.len()).unwrap_or(0)
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

impl<V> RxHandle for RxGrid<V> {
    fn wrap(id: CellId) -> Self {
        Self {
            id,
            _marker: std::marker::PhantomData,
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
    use crate::scalar::RxInt32;

    fn commit_pair(tree: &mut Tree, grid: RxGrid<RxInt32>) -> (String, String) {
        let mut fwd = JsonWriter::new();
        let mut rev = JsonWriter::new();
        grid.commit(tree, "g", &mut fwd, &mut rev);
        (fwd.into_string(), rev.into_string())
    }

    #[test]
    fn coordinates_render_as_comma_pairs() {
        assert_eq!(render_at((3, -4)), "3,-4");
        assert_eq!(parse_at("3,-4"), Some((3, -4)));
        assert_eq!(parse_at("3;4"), None);
        assert_eq!(parse_at("3,x"), None);
    }

    #[test]
    fn creation_and_deletion_deltas() {
        let mut tree = Tree::new();
        let grid: RxGrid<RxInt32> = RxGrid::new(&mut tree, None, CellCtor::Int32(0));
        grid.get_or_create(&mut tree, 1, 2).set(&mut tree, 9);

        let (fwd, rev) = commit_pair(&mut tree, grid);
        assert_eq!(fwd, "\"g\":{\"1,2\":9}");
        assert_eq!(rev, "\"g\":{\"1,2\":null}");

        grid.remove(&mut tree, 1, 2);
        let (fwd, rev) = commit_pair(&mut tree, grid);
        assert_eq!(fwd, "\"g\":{\"1,2\":null}");
        assert_eq!(rev, "\"g\":{\"1,2\":9}");
    }

    #[test]
    fn resurrection_applies_to_cells_too() {
        let mut tree = Tree::new();
        let grid: RxGrid<RxInt32> = RxGrid::new(&mut tree, None, CellCtor::Int32(0));
        grid.get_or_create(&mut tree, 0, 0).set(&mut tree, 5);
        commit_pair(&mut tree, grid);

        grid.remove(&mut tree, 0, 0);
        assert_eq!(grid.get_or_create(&mut tree, 0, 0).get(&tree), 5);
        let (fwd, rev) = commit_pair(&mut tree, grid);
        assert!(fwd.is_empty());
        assert!(rev.is_empty());
    }

    #[test]
    fn hydration_skips_bad_coordinates() {
        let mut tree = Tree::new();
        let grid: RxGrid<RxInt32> = RxGrid::new(&mut tree, None, CellCtor::Int32(0));
        tree.insert_json(grid.id(), "{\"0,0\":1,\"bad\":2,\"1,1\":3}")
            .unwrap();
        assert_eq!(grid.len(&tree), 2);
        assert!(!tree.is_dirty(grid.id()));
    }
}
