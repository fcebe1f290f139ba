//! Keyed Map Container
//!
//! A map owns children keyed by a domain value (integer or text). Next to
//! the committed collection it keeps two transient sets per transaction:
//!
//! - `created`: keys added since the last checkpoint,
//! - `deleted`: keys removed, with the child retained for one commit cycle
//!   so the reverse delta can still emit its old value.
//!
//! Both are cleared exactly at commit and exactly at revert, with opposite
//! effects: commit promotes creations and frees deletions, revert frees
//! creations and restores deletions.
//!
//! # Resurrection
//!
//! `get_or_create` consults `deleted` before constructing: removing and
//! re-creating a key in the same transaction restores the exact prior
//! child, and the round trip commits as a net no-op (no delta at all).
//!
//! # Per-Key Pub/Sub
//!
//! Readers interested in one key attach there, not to the whole map.
//! Guards attach through the watcher list and receive targeted
//! `changed(key)` events, which they intersect with their captured read
//! set before invalidating their formula.

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::container::ctor::CellCtor;
use crate::formula::guard;
use crate::json::{JsonNode, JsonWriter};
use crate::scalar::value::RxHandle;
use crate::tree::{CellId, CellKind, Tree};

/// Key domain of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKeyKind {
    Int,
    Text,
}

/// A map key: the domain value, not its wire rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKey {
    Int(i64),
    Text(String),
}

impl MapKey {
    /// Wire rendering used as the JSON object key.
    pub fn render(&self) -> String {
        match self {
            MapKey::Int(v) => v.to_string(),
            MapKey::Text(s) => s.clone(),
        }
    }

    /// Parse a wire key back into the domain. A malformed key (e.g. a
    /// non-numeric key for an int map) yields `None` and is skipped.
    pub fn parse(kind: MapKeyKind, raw: &str) -> Option<Self> {
        match kind {
            MapKeyKind::Int => raw.parse().ok().map(MapKey::Int),
            MapKeyKind::Text => Some(MapKey::Text(raw.to_string())),
        }
    }
}

impl From<i64> for MapKey {
    fn from(v: i64) -> Self {
        MapKey::Int(v)
    }
}

impl From<i32> for MapKey {
    fn from(v: i32) -> Self {
        MapKey::Int(v as i64)
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::Text(s.to_string())
    }
}

/// Arena state of one map.
#[derive(Debug)]
pub struct MapState {
    pub(crate) keys: MapKeyKind,
    pub(crate) of: CellCtor,
    pub(crate) live: IndexMap<MapKey, CellId>,
    pub(crate) created: IndexSet<MapKey>,
    pub(crate) deleted: IndexMap<MapKey, CellId>,
    pub(crate) watchers: SmallVec<[CellId; 2]>,
    pub(crate) pubsub: FxHashMap<MapKey, SmallVec<[CellId; 2]>>,
    pub(crate) guard_stack: SmallVec<[CellId; 2]>,
}

impl MapState {
    pub(crate) fn new(keys: MapKeyKind, of: CellCtor) -> Self {
        Self {
            keys,
            of,
            live: IndexMap::new(),
            created: IndexSet::new(),
            deleted: IndexMap::new(),
            watchers: SmallVec::new(),
            pubsub: FxHashMap::default(),
            guard_stack: SmallVec::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Operations
// ----------------------------------------------------------------------------

pub(crate) fn get_or_create(tree: &mut Tree, id: CellId, key: MapKey) -> Option<CellId> {
    if let Some(child) = tree.map_state(id)?.live.get(&key).copied() {
        return Some(child);
    }
    // A same-transaction removal resurrects rather than fabricating.
    if let Some(child) = tree.map_state_mut(id)?.deleted.shift_remove(&key) {
        tree.map_state_mut(id)?.live.insert(key.clone(), child);
        fire_changed(tree, id, &key);
        tree.raise_dirty(id);
        tree.notify_ancestors(id);
        return Some(child);
    }
    let of = tree.map_state(id)?.of.clone();
    let child = of.construct(tree, Some(id));
    {
        let state = tree.map_state_mut(id)?;
        state.live.insert(key.clone(), child);
        state.created.insert(key.clone());
    }
    fire_changed(tree, id, &key);
    tree.raise_dirty(id);
    tree.notify_ancestors(id);
    Some(child)
}

/// Read path: attributes the key to the innermost active guard.
pub(crate) fn lookup(tree: &mut Tree, id: CellId, key: &MapKey) -> Option<CellId> {
    let innermost = tree.map_state(id)?.guard_stack.last().copied();
    if let Some(g) = innermost {
        guard::read_key(tree, g, key);
    }
    tree.map_state(id)?.live.get(key).copied()
}

pub(crate) fn remove(tree: &mut Tree, id: CellId, key: &MapKey) {
    enum Outcome {
        DiscardCreation(CellId),
        Tombstone,
        Absent,
    }
    let outcome = {
        let Some(state) = tree.map_state_mut(id) else { return };
        if state.created.shift_remove(key) {
            match state.live.shift_remove(key) {
                Some(child) => Outcome::DiscardCreation(child),
                None => Outcome::Absent,
            }
        } else if let Some(child) = state.live.shift_remove(key) {
            state.deleted.insert(key.clone(), child);
            Outcome::Tombstone
        } else {
            Outcome::Absent
        }
    };
    match outcome {
        Outcome::DiscardCreation(child) => {
            // Same-transaction creations vanish with no delta footprint.
            tree.free_subtree(child);
            fire_changed(tree, id, key);
            tree.raise_dirty(id);
            tree.notify_ancestors(id);
        }
        Outcome::Tombstone => {
            fire_changed(tree, id, key);
            tree.raise_dirty(id);
            tree.notify_ancestors(id);
        }
        Outcome::Absent => {}
    }
}

/// Read path over everything: captures "all" on the innermost guard.
pub(crate) fn iterate(tree: &mut Tree, id: CellId) -> Vec<(MapKey, CellId)> {
    let Some(state) = tree.map_state(id) else {
        return Vec::new();
    };
    let snapshot: Vec<(MapKey, CellId)> =
        state.live.iter().map(|(k, c)| (k.clone(), *c)).collect();
    if let Some(g) = state.guard_stack.last().copied() {
        guard::read_all(tree, g);
    }
    snapshot
}

pub(crate) fn subscribe_key(tree: &mut Tree, id: CellId, key: MapKey, subscriber: CellId) {
    if let Some(state) = tree.map_state_mut(id) {
        let list = state.pubsub.entry(key).or_default();
        if !list.contains(&subscriber) {
            list.push(subscriber);
        }
    }
}

/// Targeted change event for one key: guards intersect it with their
/// captures; per-key subscribers are invalidated outright. Dead links are
/// pruned in place.
pub(crate) fn fire_changed(tree: &mut Tree, id: CellId, key: &MapKey) {
    let (watchers, subscribers) = {
        let Some(state) = tree.map_state(id) else { return };
        (
            state.watchers.clone(),
            state.pubsub.get(key).cloned().unwrap_or_default(),
        )
    };
    let mut dead_watchers: SmallVec<[CellId; 2]> = SmallVec::new();
    for g in watchers {
        if !guard::on_changed(tree, g, key) {
            dead_watchers.push(g);
        }
    }
    let mut dead_subscribers: SmallVec<[CellId; 2]> = SmallVec::new();
    for s in subscribers {
        if !tree.raise_invalid(s) {
            dead_subscribers.push(s);
        }
    }
    if dead_watchers.is_empty() && dead_subscribers.is_empty() {
        return;
    }
    if let Some(state) = tree.map_state_mut(id) {
        state.watchers.retain(|g| !dead_watchers.contains(g));
        let emptied = match state.pubsub.get_mut(key) {
            Some(list) => {
                list.retain(|s| !dead_subscribers.contains(s));
                list.is_empty()
            }
            None => false,
        };
        if emptied {
            state.pubsub.remove(key);
        }
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
        let Some(state) = tree.map_state(id) else { return };
        let deleted: Vec<(MapKey, CellId)> = state
            .deleted
            .iter()
            .map(|(k, c)| (k.clone(), *c))
            .collect();
        let live: Vec<(MapKey, CellId, bool)> = state
            .live
            .iter()
            .map(|(k, c)| (k.clone(), *c, state.created.contains(k)))
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
        for (key, child) in &deleted {
            let rendered = key.render();
            fwd.key(&rendered);
            fwd.write_null();
            rev.key(&rendered);
            tree.dump(*child, rev);
        }
        for (key, child, created) in &live {
            if *created {
                let rendered = key.render();
                fwd.key(&rendered);
                tree.dump(*child, fwd);
                rev.key(&rendered);
                rev.write_null();
                tree.mark_clean_subtree(*child);
            } else if tree.is_dirty(*child) {
                tree.commit(*child, &key.render(), fwd, rev);
            }
        }
        fwd.end_object();
        rev.end_object();
        for (_, child) in deleted {
            tree.free_subtree(child);
        }
    }
    if let Some(state) = tree.map_state_mut(id) {
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
        let Some(state) = tree.map_state(id) else { return };
        let discarded: Vec<(MapKey, CellId)> = state
            .created
            .iter()
            .filter_map(|k| state.live.get(k).map(|c| (k.clone(), *c)))
            .collect();
        let restored: Vec<(MapKey, CellId)> = state
            .deleted
            .iter()
            .map(|(k, c)| (k.clone(), *c))
            .collect();
        let survivors: Vec<CellId> = state
            .live
            .iter()
            .filter(|(k, _)| !state.created.contains(*k))
            .map(|(_, c)| *c)
            .collect();
        (discarded, restored, survivors)
    };
    {
        let Some(state) = tree.map_state_mut(id) else { return };
        for (key, _) in &discarded {
            state.live.shift_remove(key);
        }
        for (key, child) in &restored {
            state.live.insert(key.clone(), *child);
        }
        state.created.clear();
        state.deleted.clear();
    }
    for (_, child) in discarded {
        tree.free_subtree(child);
    }
    for child in survivors {
        tree.revert(child);
    }
    for (_, child) in restored {
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
    let Some(kind) = tree.map_state(id).map(|s| s.keys) else {
        return;
    };
    let fields: Vec<(String, serde_json::Value)> = data
        .fields()
        .map(|(k, v)| (k.to_string(), v.raw().clone()))
        .collect();
    for (raw_key, value) in fields {
        let Some(key) = MapKey::parse(kind, &raw_key) else {
            continue;
        };
        let node = JsonNode::new(&value);
        if node.is_null() {
            let removed = tree
                .map_state_mut(id)
                .and_then(|s| s.live.shift_remove(&key));
            if let Some(child) = removed {
                tree.free_subtree(child);
            }
            continue;
        }
        let existing = tree.map_state(id).and_then(|s| s.live.get(&key).copied());
        let child = match existing {
            Some(child) => child,
            None => {
                let Some(of) = tree.map_state(id).map(|s| s.of.clone()) else {
                    return;
                };
                let child = of.construct(tree, Some(id));
                if let Some(state) = tree.map_state_mut(id) {
                    state.live.insert(key.clone(), child);
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
    let Some(kind) = tree.map_state(id).map(|s| s.keys) else {
        return;
    };
    let fields: Vec<(String, serde_json::Value)> = data
        .fields()
        .map(|(k, v)| (k.to_string(), v.raw().clone()))
        .collect();
    for (raw_key, value) in fields {
        let Some(key) = MapKey::parse(kind, &raw_key) else {
            continue;
        };
        let node = JsonNode::new(&value);
        if node.is_null() {
            remove(tree, id, &key);
        } else if let Some(child) = get_or_create(tree, id, key) {
            tree.patch(child, &node);
        }
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Typed handle to a map of `V` children.
pub struct RxMap<V> {
    id: CellId,
    _marker: std::marker::PhantomData<fn() -> V>,
}

impl<V> Clone for RxMap<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for RxMap<V> {}

impl<V: RxHandle> RxMap<V> {
    pub fn id(&self) -> CellId {
        self.id
    }

    /// `of` must construct cells `V` can wrap.
    pub fn new(tree: &mut Tree, parent: Option<CellId>, keys: MapKeyKind, of: CellCtor) -> Self {
        let id = tree.alloc(CellKind::Map(MapState::new(keys, of)), parent);
        Self {
            id,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn get_or_create(&self, tree: &mut Tree, key: impl Into<MapKey>) -> V {
        let id = get_or_create(tree, self.id, key.into())
            .expect("map handle points at a live map cell");
        V::wrap(id)
    }

    pub fn lookup(&self, tree: &mut Tree, key: impl Into<MapKey>) -> Option<V> {
        lookup(tree, self.id, &key.into()).map(V::wrap)
    }

    pub fn remove(&self, tree: &mut Tree, key: impl Into<MapKey>) {
        remove(tree, self.id, &key.into());
    }

    pub fn iterate(&self, tree: &mut Tree) -> Vec<(MapKey, V)> {
        iterate(tree, self.id)
            .into_iter()
            .map(|(k, c)| (k, V::wrap(c)))
            .collect()
    }

    pub fn len(&self, tree: &Tree) -> usize {
        tree.map_state(self.id).map(|s| s.live.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, tree: &Tree) -> bool {
        self.len(tree) == 0
    }

    /// Attach a subscriber to one key's change feed.
    pub fn subscribe_key(&self, tree: &mut Tree, key: impl Into<MapKey>, subscriber: CellId) {
        subscribe_key(tree, self.id, key.into(), subscriber);
    }

    pub fn commit(&self, tree: &mut Tree, name: &str, fwd: &mut JsonWriter, rev: &mut JsonWriter) {
        tree.commit(self.id, name, fwd, rev);
    }

    pub fn revert(&self, tree: &mut Tree) {
        tree.revert(self.id);
    }
}

impl<V> RxHandle for RxMap<V> {
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
    use crate::container::ctor::CellCtor;
    use crate::scalar::RxInt64;

    fn int_map(tree: &mut Tree) -> RxMap<RxInt64> {
        RxMap::new(tree, None, MapKeyKind::Int, CellCtor::Int64(0))
    }

    fn commit_pair(tree: &mut Tree, map: RxMap<RxInt64>) -> (String, String) {
        let mut fwd = JsonWriter::new();
        let mut rev = JsonWriter::new();
        map.commit(tree, "m", &mut fwd, &mut rev);
        (fwd.into_string(), rev.into_string())
    }

    #[test]
    fn creation_commits_as_dump_forward_null_reverse() {
        let mut tree = Tree::new();
        let map = int_map(&mut tree);
        map.get_or_create(&mut tree, 42).set(&mut tree, 52);

        let (fwd, rev) = commit_pair(&mut tree, map);
        assert_eq!(fwd, "\"m\":{\"42\":\"52\"}");
        assert_eq!(rev, "\"m\":{\"42\":null}");
    }

    #[test]
    fn deletion_commits_as_null_forward_dump_reverse() {
        let mut tree = Tree::new();
        let map = int_map(&mut tree);
        map.get_or_create(&mut tree, 42).set(&mut tree, 52);
        commit_pair(&mut tree, map);

        map.remove(&mut tree, 42);
        let (fwd, rev) = commit_pair(&mut tree, map);
        assert_eq!(fwd, "\"m\":{\"42\":null}");
        assert_eq!(rev, "\"m\":{\"42\":\"52\"}");
    }

    #[test]
    fn resurrection_restores_the_prior_child() {
        let mut tree = Tree::new();
        let map = int_map(&mut tree);
        map.get_or_create(&mut tree, 42).set(&mut tree, 52);
        commit_pair(&mut tree, map);

        map.remove(&mut tree, 42);
        let back = map.get_or_create(&mut tree, 42);
        assert_eq!(back.get(&tree), 52);

        // The round trip is a net no-op: no delta at all.
        let (fwd, rev) = commit_pair(&mut tree, map);
        assert!(fwd.is_empty());
        assert!(rev.is_empty());
    }

    #[test]
    fn removing_same_transaction_creation_leaves_no_footprint() {
        let mut tree = Tree::new();
        let map = int_map(&mut tree);
        map.get_or_create(&mut tree, 7).set(&mut tree, 1);
        map.remove(&mut tree, 7);

        let (fwd, rev) = commit_pair(&mut tree, map);
        assert!(fwd.is_empty());
        assert!(rev.is_empty());
        assert!(map.lookup(&mut tree, 7).is_none());
    }

    #[test]
    fn surviving_children_commit_paired() {
        let mut tree = Tree::new();
        let map = int_map(&mut tree);
        map.get_or_create(&mut tree, 1).set(&mut tree, 10);
        commit_pair(&mut tree, map);

        map.lookup(&mut tree, 1).unwrap().set(&mut tree, 20);
        let (fwd, rev) = commit_pair(&mut tree, map);
        assert_eq!(fwd, "\"m\":{\"1\":\"20\"}");
        assert_eq!(rev, "\"m\":{\"1\":\"10\"}");
    }

    #[test]
    fn revert_undoes_creation_and_restores_deletion() {
        let mut tree = Tree::new();
        let map = int_map(&mut tree);
        map.get_or_create(&mut tree, 1).set(&mut tree, 10);
        commit_pair(&mut tree, map);

        map.remove(&mut tree, 1);
        map.get_or_create(&mut tree, 2).set(&mut tree, 20);
        map.revert(&mut tree);

        assert_eq!(map.lookup(&mut tree, 1).unwrap().get(&tree), 10);
        assert!(map.lookup(&mut tree, 2).is_none());
        assert!(!tree.is_dirty(map.id()));
    }

    #[test]
    fn bad_keys_are_skipped_during_hydration() {
        let mut tree = Tree::new();
        let map = int_map(&mut tree);
        tree.insert_json(map.id(), "{\"3\":\"30\",\"oops\":\"1\",\"4\":\"40\"}")
            .unwrap();
        assert_eq!(map.len(&tree), 2);
        assert!(!tree.is_dirty(map.id()));
        assert_eq!(map.lookup(&mut tree, 3).unwrap().get(&tree), 30);
    }

    #[test]
    fn per_key_subscribers_fire_only_for_their_key() {
        let mut tree = Tree::new();
        let map = int_map(&mut tree);
        map.get_or_create(&mut tree, 1);
        map.get_or_create(&mut tree, 2);
        commit_pair(&mut tree, map);

        let watcher = RxInt64::new(&mut tree, None, 0);
        map.subscribe_key(&mut tree, 1, watcher.id());

        map.lookup(&mut tree, 2).unwrap().set(&mut tree, 5);
        assert!(!tree.is_invalid(watcher.id()));

        map.lookup(&mut tree, 1).unwrap().set(&mut tree, 5);
        assert!(tree.is_invalid(watcher.id()));
    }
}
