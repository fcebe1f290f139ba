//! Fractionally-Ordered List
//!
//! List positions are real numbers. Appending or prepending extends past
//! the current extreme by a fixed spacing; inserting between neighbors
//! bisects the midpoint. Bisection halves the available gap each time, so
//! when any gap falls below a minimum the list renumbers every entry back
//! to `0, SPACING, 2·SPACING, …` in the existing order.
//!
//! # Redistribution and Deltas
//!
//! Renumbering is semantically a no-op, but positions are wire keys, so
//! delta emission has to account for it: an entry created this
//! transaction simply keeps its created status at the new position, while
//! an already-committed entry whose position changed is recorded as
//! deleted-at-old-position plus created-at-new-position. The reverse
//! delta then restores the old numbering exactly.
//!
//! Wire keys render whole positions as integers (`"40"`), fractional ones
//! as the decimal string (`"45.5"`).

use std::collections::BTreeMap;

use ordered_float::NotNan;
use tracing::debug;

use crate::container::ctor::CellCtor;
use crate::json::{JsonNode, JsonWriter};
use crate::scalar::value::RxHandle;
use crate::tree::{CellId, CellKind, Tree};

/// Gap introduced by append/prepend and by redistribution.
pub const SPACING: f64 = 10.0;

/// Bisection below this gap triggers redistribution.
pub const MIN_GAP: f64 = 1.0 / 256.0;

/// A deleted (or moved-away-from) position retained for one commit cycle.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tombstone {
    pub(crate) cell: CellId,
    /// The same child lives on at a new position; do not free it when the
    /// tombstone commits.
    pub(crate) moved: bool,
}

/// Arena state of one ordered list.
#[derive(Debug)]
pub struct ListState {
    pub(crate) of: CellCtor,
    pub(crate) entries: BTreeMap<NotNan<f64>, CellId>,
    pub(crate) created: std::collections::BTreeSet<NotNan<f64>>,
    pub(crate) deleted: BTreeMap<NotNan<f64>, Tombstone>,
}

impl ListState {
    pub(crate) fn new(of: CellCtor) -> Self {
        Self {
            of,
            entries: BTreeMap::new(),
            created: std::collections::BTreeSet::new(),
            deleted: BTreeMap::new(),
        }
    }
}

pub(crate) fn render_pos(pos: f64) -> String {
    if pos.fract() == 0.0 {
        format!("{}", pos as i64)
    } else {
        format!("{pos}")
    }
}

fn pos(value: f64) -> NotNan<f64> {
    NotNan::new(value).expect("list positions are never NaN")
}

// ----------------------------------------------------------------------------
// Operations
// ----------------------------------------------------------------------------

fn create_at(tree: &mut Tree, id: CellId, at: NotNan<f64>) -> Option<CellId> {
    let of = tree.list_state(id)?.of.clone();
    let child = of.construct(tree, Some(id));
    {
        let state = tree.list_state_mut(id)?;
        state.entries.insert(at, child);
        state.created.insert(at);
    }
    tree.raise_dirty(id);
    tree.notify_ancestors(id);
    Some(child)
}

pub(crate) fn append(tree: &mut Tree, id: CellId) -> Option<(f64, CellId)> {
    let at = match tree.list_state(id)?.entries.keys().next_back() {
        Some(last) => pos(last.into_inner() + SPACING),
        None => pos(0.0),
    };
    Some((at.into_inner(), create_at(tree, id, at)?))
}

pub(crate) fn prepend(tree: &mut Tree, id: CellId) -> Option<(f64, CellId)> {
    let at = match tree.list_state(id)?.entries.keys().next() {
        Some(first) => pos(first.into_inner() - SPACING),
        None => pos(0.0),
    };
    Some((at.into_inner(), create_at(tree, id, at)?))
}

/// Bisect after `anchor`. Falls back to append spacing at the end.
pub(crate) fn insert_after(tree: &mut Tree, id: CellId, anchor: f64) -> Option<(f64, CellId)> {
    let anchor = pos(anchor);
    let state = tree.list_state(id)?;
    if !state.entries.contains_key(&anchor) {
        return None;
    }
    let next = state
        .entries
        .range((
            std::ops::Bound::Excluded(anchor),
            std::ops::Bound::Unbounded,
        ))
        .next()
        .map(|(p, _)| *p);
    let at = match next {
        Some(next) => pos((anchor.into_inner() + next.into_inner()) / 2.0),
        None => pos(anchor.into_inner() + SPACING),
    };
    let child = create_at(tree, id, at)?;
    let at = maybe_redistribute(tree, id, at);
    Some((at, child))
}

/// Bisect before `anchor`. Falls back to prepend spacing at the start.
pub(crate) fn insert_before(tree: &mut Tree, id: CellId, anchor: f64) -> Option<(f64, CellId)> {
    let anchor = pos(anchor);
    let state = tree.list_state(id)?;
    if !state.entries.contains_key(&anchor) {
        return None;
    }
    let prev = state
        .entries
        .range(..anchor)
        .next_back()
        .map(|(p, _)| *p);
    let at = match prev {
        Some(prev) => pos((prev.into_inner() + anchor.into_inner()) / 2.0),
        None => pos(anchor.into_inner() - SPACING),
    };
    let child = create_at(tree, id, at)?;
    let at = maybe_redistribute(tree, id, at);
    Some((at, child))
}

pub(crate) fn remove(tree: &mut Tree, id: CellId, at: f64) {
    let at = pos(at);
    enum Outcome {
        DiscardCreation(CellId),
        Tombstone,
        Absent,
    }
    let outcome = {
        let Some(state) = tree.list_state_mut(id) else { return };
        if state.created.remove(&at) {
            match state.entries.remove(&at) {
                Some(child) => Outcome::DiscardCreation(child),
                None => Outcome::Absent,
            }
        } else if let Some(child) = state.entries.remove(&at) {
            state.deleted.insert(at, Tombstone { cell: child, moved: false });
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

/// Ordered snapshot of positions and children.
pub(crate) fn iterate(tree: &Tree, id: CellId) -> Vec<(f64, CellId)> {
    tree.list_state(id)
        .map(|s| {
            s.entries
                .iter()
                .map(|(p, c)| (p.into_inner(), *c))
                .collect()
        })
        .unwrap_or_default()
}

/// Check the gaps around a fresh insertion; renumber everything when one
/// dropped below the minimum. Returns the entry's (possibly new) position.
fn maybe_redistribute(tree: &mut Tree, id: CellId, at: NotNan<f64>) -> f64 {
    let (cramped, child) = {
        let Some(state) = tree.list_state(id) else {
            return at.into_inner();
        };
        let before = state.entries.range(..at).next_back().map(|(p, _)| *p);
        let after = state
            .entries
            .range((std::ops::Bound::Excluded(at), std::ops::Bound::Unbounded))
            .next()
            .map(|(p, _)| *p);
        let cramped = before
            .map(|p| at.into_inner() - p.into_inner() < MIN_GAP)
            .unwrap_or(false)
            || after
                .map(|p| p.into_inner() - at.into_inner() < MIN_GAP)
                .unwrap_or(false);
        (cramped, state.entries.get(&at).copied())
    };
    if !cramped {
        return at.into_inner();
    }
    redistribute(tree, id);
    // Find where the child landed.
    let Some(child) = child else {
        return at.into_inner();
    };
    tree.list_state(id)
        .and_then(|s| {
            s.entries
                .iter()
                .find(|(_, c)| **c == child)
                .map(|(p, _)| p.into_inner())
        })
        .unwrap_or_else(|| at.into_inner())
}

/// Renumber all entries to `0, SPACING, 2·SPACING, …` in order.
pub(crate) fn redistribute(tree: &mut Tree, id: CellId) {
    let Some(state) = tree.list_state_mut(id) else { return };
    let old: Vec<(NotNan<f64>, CellId)> =
        state.entries.iter().map(|(p, c)| (*p, *c)).collect();
    debug!(entries = old.len(), "redistributing list positions");

    let mut entries = BTreeMap::new();
    let mut created = std::collections::BTreeSet::new();
    for (index, (old_pos, child)) in old.iter().enumerate() {
        let new_pos = pos(index as f64 * SPACING);
        entries.insert(new_pos, *child);
        if state.created.remove(old_pos) {
            // Fresh entries keep created status at their new position.
            created.insert(new_pos);
        } else if *old_pos != new_pos {
            // A committed entry that moved: deleted at the old position,
            // created at the new one, same child on both sides.
            state.deleted.insert(
                *old_pos,
                Tombstone {
                    cell: *child,
                    moved: true,
                },
            );
            created.insert(new_pos);
        }
    }
    state.entries = entries;
    state.created = created;
    tree.raise_dirty(id);
    tree.notify_ancestors(id);
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
        let Some(state) = tree.list_state(id) else { return };
        let deleted: Vec<(f64, Tombstone)> = state
            .deleted
            .iter()
            .map(|(p, t)| (p.into_inner(), *t))
            .collect();
        let live: Vec<(f64, CellId, bool)> = state
            .entries
            .iter()
            .map(|(p, c)| (p.into_inner(), *c, state.created.contains(p)))
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
        for (at, tomb) in &deleted {
            let rendered = render_pos(*at);
            fwd.key(&rendered);
            fwd.write_null();
            rev.key(&rendered);
            tree.dump(tomb.cell, rev);
        }
        for (at, child, created) in &live {
            if *created {
                let rendered = render_pos(*at);
                fwd.key(&rendered);
                tree.dump(*child, fwd);
                rev.key(&rendered);
                rev.write_null();
                tree.mark_clean_subtree(*child);
            } else if tree.is_dirty(*child) {
                tree.commit(*child, &render_pos(*at), fwd, rev);
            }
        }
        fwd.end_object();
        rev.end_object();
        for (_, tomb) in deleted {
            if !tomb.moved {
                tree.free_subtree(tomb.cell);
            }
        }
    }
    if let Some(state) = tree.list_state_mut(id) {
        state.created.clear();
        state.deleted.clear();
    }
    if let Some(node) = tree.node_mut(id) {
        node.dirty = false;
        node.invalid = false;
    }
}

pub(crate) fn revert(tree: &mut Tree, id: CellId) {
    let (discarded, survivors) = {
        let Some(state) = tree.list_state_mut(id) else { return };
        // Creations vanish; moved entries return to their old position
        // via their tombstone, so drop their new slot outright.
        let created: Vec<NotNan<f64>> = state.created.iter().copied().collect();
        let mut discarded: Vec<CellId> = Vec::new();
        for at in created {
            if let Some(child) = state.entries.remove(&at) {
                let moved_back = state.deleted.values().any(|t| t.moved && t.cell == child);
                if !moved_back {
                    discarded.push(child);
                }
            }
        }
        for (at, tomb) in std::mem::take(&mut state.deleted) {
            state.entries.insert(at, tomb.cell);
        }
        state.created.clear();
        let survivors: Vec<CellId> = state.entries.values().copied().collect();
        (discarded, survivors)
    };
    for child in discarded {
        tree.free_subtree(child);
    }
    for child in survivors {
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
        let Some(parsed) = raw_key.parse::<f64>().ok().filter(|p| !p.is_nan()) else {
            continue;
        };
        let at = pos(parsed);
        let node = JsonNode::new(&value);
        if node.is_null() {
            let removed = tree.list_state_mut(id).and_then(|s| s.entries.remove(&at));
            if let Some(child) = removed {
                tree.free_subtree(child);
            }
            continue;
        }
        let existing = tree.list_state(id).and_then(|s| s.entries.get(&at).copied());
        let child = match existing {
            Some(child) => child,
            None => {
                let Some(of) = tree.list_state(id).map(|s| s.of.clone()) else {
                    return;
                };
                let child = of.construct(tree, Some(id));
                if let Some(state) = tree.list_state_mut(id) {
                    state.entries.insert(at, child);
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
        let Some(parsed) = raw_key.parse::<f64>().ok().filter(|p| !p.is_nan()) else {
            continue;
        };
        let node = JsonNode::new(&value);
        if node.is_null() {
            remove(tree, id, parsed);
            continue;
        }
        let at = pos(parsed);
        let existing = tree.list_state(id).and_then(|s| s.entries.get(&at).copied());
        let child = match existing {
            Some(child) => child,
            None => match create_at(tree, id, at) {
                Some(child) => child,
                None => return,
            },
        };
        tree.patch(child, &node);
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Typed handle to an ordered list of `V` children.
pub struct RxList<V> {
    id: CellId,
    _marker: std::marker::PhantomData<fn() -> V>,
}

impl<V> Clone for RxList<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for RxList<V> {}

impl<V: RxHandle> RxList<V> {
    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn new(tree: &mut Tree, parent: Option<CellId>, of: CellCtor) -> Self {
        let id = tree.alloc(CellKind::List(ListState::new(of)), parent);
        Self {
            id,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn append(&self, tree: &mut Tree) -> (f64, V) {
        let (at, child) = append(tree, self.id).expect("list handle points at a live list cell");
        (at, V::wrap(child))
    }

    pub fn prepend(&self, tree: &mut Tree) -> (f64, V) {
        let (at, child) = prepend(tree, self.id).expect("list handle points at a live list cell");
        (at, V::wrap(child))
    }

    /// Insert just after the entry at `anchor`; `None` when the anchor is
    /// not a current position.
    pub fn insert_after(&self, tree: &mut Tree, anchor: f64) -> Option<(f64, V)> {
        insert_after(tree, self.id, anchor).map(|(at, c)| (at, V::wrap(c)))
    }

    pub fn insert_before(&self, tree: &mut Tree, anchor: f64) -> Option<(f64, V)> {
        insert_before(tree, self.id, anchor).map(|(at, c)| (at, V::wrap(c)))
    }

    pub fn remove(&self, tree: &mut Tree, at: f64) {
        remove(tree, self.id, at);
    }

    /// Entries in list order.
    pub fn iterate(&self, tree: &Tree) -> Vec<(f64, V)> {
        iterate(tree, self.id)
            .into_iter()
            .map(|(p, c)| (p, V::wrap(c)))
            .collect()
    }

    pub fn len(&self, tree: &Tree) -> usize {
        tree.list_state(self.id).map(|s| s.entries.len()).unwrap_or(0)
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

impl<V> RxHandle for RxList<V> {
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
