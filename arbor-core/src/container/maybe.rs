//! Optional-Value Container
//!
//! Wraps zero-or-one child. `prior` tracks the committed child across the
//! transaction so the delta table can distinguish the three cases:
//!
//! | now | before | forward | reverse |
//! |---|---|---|---|
//! | value, no prior | created this txn | full dump | `null` |
//! | value == prior | surviving | child's own commit | child's own commit |
//! | no value, prior | deleted this txn | `null` | prior's full dump |
//!
//! `make()` after a same-transaction `delete()` resurrects the retained
//! prior child. The commit table is only coherent because of that:
//! whenever a value and a prior both exist they are the same cell.

use crate::container::ctor::CellCtor;
use crate::json::{JsonNode, JsonWriter};
use crate::scalar::value::RxHandle;
use crate::tree::{CellId, CellKind, Tree};

/// Arena state of one optional value.
#[derive(Debug)]
pub struct MaybeState {
    pub(crate) of: CellCtor,
    pub(crate) value: Option<CellId>,
    /// The committed child, retained through a same-transaction delete so
    /// the reverse delta can still dump it.
    pub(crate) prior: Option<CellId>,
}

impl MaybeState {
    pub(crate) fn new(of: CellCtor) -> Self {
        Self {
            of,
            value: None,
            prior: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Operations
// ----------------------------------------------------------------------------

pub(crate) fn make(tree: &mut Tree, id: CellId) -> Option<CellId> {
    if let Some(child) = tree.maybe_state(id)?.value {
        return Some(child);
    }
    // Deleted-then-remade in one transaction: restore the prior child.
    if let Some(prior) = tree.maybe_state(id)?.prior {
        tree.maybe_state_mut(id)?.value = Some(prior);
        tree.raise_dirty(id);
        tree.notify_ancestors(id);
        return Some(prior);
    }
    let of = tree.maybe_state(id)?.of.clone();
    let child = of.construct(tree, Some(id));
    tree.maybe_state_mut(id)?.value = Some(child);
    tree.raise_dirty(id);
    tree.notify_ancestors(id);
    Some(child)
}

pub(crate) fn delete(tree: &mut Tree, id: CellId) {
    let (value, prior) = {
        let Some(state) = tree.maybe_state(id) else { return };
        (state.value, state.prior)
    };
    let Some(child) = value else { return };
    if Some(child) == prior {
        // Committed child: retain for the reverse dump.
        if let Some(state) = tree.maybe_state_mut(id) {
            state.value = None;
        }
    } else {
        // Same-transaction creation: discard outright.
        if let Some(state) = tree.maybe_state_mut(id) {
            state.value = None;
        }
        tree.free_subtree(child);
    }
    tree.raise_dirty(id);
    tree.notify_ancestors(id);
}

pub(crate) fn get(tree: &Tree, id: CellId) -> Option<CellId> {
    tree.maybe_state(id)?.value
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
    let (value, prior) = {
        let Some(state) = tree.maybe_state(id) else { return };
        (state.value, state.prior)
    };
    match (value, prior) {
        (Some(child), None) => {
            // Fresh creation: forward dump, reverse null.
            fwd.key(name);
            tree.dump(child, fwd);
            rev.key(name);
            rev.write_null();
            tree.mark_clean_subtree(child);
            if let Some(state) = tree.maybe_state_mut(id) {
                state.prior = Some(child);
            }
        }
        (Some(child), Some(_)) => {
            // Surviving value (resurrection guarantees child == prior).
            if tree.is_dirty(child) {
                tree.commit(child, name, fwd, rev);
            }
        }
        (None, Some(prior_child)) => {
            fwd.key(name);
            fwd.write_null();
            rev.key(name);
            tree.dump(prior_child, rev);
            tree.free_subtree(prior_child);
            if let Some(state) = tree.maybe_state_mut(id) {
                state.prior = None;
            }
        }
        (None, None) => {}
    }
    if let Some(node) = tree.node_mut(id) {
        node.dirty = false;
        node.invalid = false;
    }
}

pub(crate) fn revert(tree: &mut Tree, id: CellId) {
    let (value, prior) = {
        let Some(state) = tree.maybe_state(id) else { return };
        (state.value, state.prior)
    };
    match (value, prior) {
        (Some(child), None) => {
            // Creation vanishes.
            if let Some(state) = tree.maybe_state_mut(id) {
                state.value = None;
            }
            tree.free_subtree(child);
        }
        (Some(child), Some(_)) => {
            tree.revert(child);
        }
        (None, Some(prior_child)) => {
            // Deletion undone.
            if let Some(state) = tree.maybe_state_mut(id) {
                state.value = Some(prior_child);
            }
            tree.revert(prior_child);
        }
        (None, None) => {}
    }
    if let Some(node) = tree.node_mut(id) {
        node.dirty = false;
        node.invalid = false;
    }
    tree.invalidate_subscribers(id);
}

pub(crate) fn insert(tree: &mut Tree, id: CellId, data: &JsonNode<'_>) {
    if data.is_null() {
        let child = {
            let Some(state) = tree.maybe_state_mut(id) else { return };
            let child = state.value.take();
            state.prior = None;
            child
        };
        if let Some(child) = child {
            tree.free_subtree(child);
        }
        return;
    }
    let existing = tree.maybe_state(id).and_then(|s| s.value);
    let child = match existing {
        Some(child) => child,
        None => {
            let Some(of) = tree.maybe_state(id).map(|s| s.of.clone()) else {
                return;
            };
            let child = of.construct(tree, Some(id));
            if let Some(state) = tree.maybe_state_mut(id) {
                state.value = Some(child);
            }
            child
        }
    };
    tree.insert(child, data);
    if let Some(state) = tree.maybe_state_mut(id) {
        state.prior = Some(child);
    }
}

pub(crate) fn patch(tree: &mut Tree, id: CellId, data: &JsonNode<'_>) {
    if data.is_null() {
        delete(tree, id);
    } else if let Some(child) = make(tree, id) {
        tree.patch(child, data);
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Typed handle to an optional `V`.
pub struct RxMaybe<V> {
    id: CellId,
    _marker: std::marker::PhantomData<fn() -> V>,
}

impl<V> Clone for RxMaybe<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for RxMaybe<V> {}

impl<V: RxHandle> RxMaybe<V> {
    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn new(tree: &mut Tree, parent: Option<CellId>, of: CellCtor) -> Self {
        let id = tree.alloc(CellKind::Maybe(MaybeState::new(of)), parent);
        Self {
            id,
            _marker: std::marker::PhantomData,
        }
    }

    /// Create the child on demand (or resurrect a same-transaction
    /// deletion).
    pub fn make(&self, tree: &mut Tree) -> V {
        let id = make(tree, self.id).expect("maybe handle points at a live maybe cell");
        V::wrap(id)
    }

    pub fn get(&self, tree: &Tree) -> Option<V> {
        get(tree, self.id).map(V::wrap)
    }

    pub fn has_value(&self, tree: &Tree) -> bool {
        get(tree, self.id).is_some()
    }

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

impl<V> RxHandle for RxMaybe<V> {
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
    use crate::scalar::RxInt64;

    fn maybe_i64(tree: &mut Tree) -> RxMaybe<RxInt64> {
        RxMaybe::new(tree, None, CellCtor::Int64(0))
    }

    fn commit_pair(tree: &mut Tree, cell: RxMaybe<RxInt64>) -> (String, String) {
        let mut fwd = JsonWriter::new();
        let mut rev = JsonWriter::new();
        cell.commit(tree, "o", &mut fwd, &mut rev);
        (fwd.into_string(), rev.into_string())
    }

    #[test]
    fn creation_dumps_forward_null_reverse() {
        let mut tree = Tree::new();
        let opt = maybe_i64(&mut tree);
        opt.make(&mut tree).set(&mut tree, 5);

        let (fwd, rev) = commit_pair(&mut tree, opt);
        assert_eq!(fwd, "\"o\":\"5\"");
        assert_eq!(rev, "\"o\":null");
    }

    #[test]
    fn surviving_value_delegates_to_child_commit() {
        let mut tree = Tree::new();
        let opt = maybe_i64(&mut tree);
        opt.make(&mut tree).set(&mut tree, 5);
        commit_pair(&mut tree, opt);

        opt.make(&mut tree).set(&mut tree, 6);
        let (fwd, rev) = commit_pair(&mut tree, opt);
        assert_eq!(fwd, "\"o\":\"6\"");
        assert_eq!(rev, "\"o\":\"5\"");
    }

    #[test]
    fn deletion_nulls_forward_dumps_reverse() {
        let mut tree = Tree::new();
        let opt = maybe_i64(&mut tree);
        opt.make(&mut tree).set(&mut tree, 5);
        commit_pair(&mut tree, opt);

        opt.delete(&mut tree);
        assert!(!opt.has_value(&tree));
        let (fwd, rev) = commit_pair(&mut tree, opt);
        assert_eq!(fwd, "\"o\":null");
        assert_eq!(rev, "\"o\":\"5\"");
    }

    #[test]
    fn delete_then_make_resurrects_committed_child() {
        let mut tree = Tree::new();
        let opt = maybe_i64(&mut tree);
        opt.make(&mut tree).set(&mut tree, 5);
        commit_pair(&mut tree, opt);

        opt.delete(&mut tree);
        let back = opt.make(&mut tree);
        assert_eq!(back.get(&tree), 5);

        let (fwd, rev) = commit_pair(&mut tree, opt);
        assert!(fwd.is_empty());
        assert!(rev.is_empty());
    }

    #[test]
    fn create_then_delete_same_transaction_leaves_nothing() {
        let mut tree = Tree::new();
        let opt = maybe_i64(&mut tree);
        opt.make(&mut tree).set(&mut tree, 5);
        opt.delete(&mut tree);

        let (fwd, rev) = commit_pair(&mut tree, opt);
        assert!(fwd.is_empty());
        assert!(rev.is_empty());
    }

    #[test]
    fn revert_undoes_deletion() {
        let mut tree = Tree::new();
        let opt = maybe_i64(&mut tree);
        opt.make(&mut tree).set(&mut tree, 5);
        commit_pair(&mut tree, opt);

        opt.delete(&mut tree);
        opt.revert(&mut tree);
        assert_eq!(opt.get(&tree).unwrap().get(&tree), 5);
        assert!(!tree.is_dirty(opt.id()));
    }

    #[test]
    fn hydration_round_trip() {
        let mut tree = Tree::new();
        let opt = maybe_i64(&mut tree);
        tree.insert_json(opt.id(), "\"12\"").unwrap();
        assert_eq!(opt.get(&tree).unwrap().get(&tree), 12);
        assert!(!tree.is_dirty(opt.id()));

        tree.insert_json(opt.id(), "null").unwrap();
        assert!(!opt.has_value(&tree));
    }
}
