//! The Cell Arena
//!
//! [`Tree`] owns every cell of one document. All graph traffic (dirty
//! bubbling, invalidation fan-out, liveness walks, targeted container
//! events) runs through arena methods keyed by [`CellId`], which is what
//! keeps the cyclic parent/child/guard graph free of ownership cycles.
//!
//! # How Propagation Works
//!
//! A mutation calls `raise_dirty` on its cell:
//!
//! 1. If the cell is already dirty, stop (idempotent guard).
//! 2. Mark dirty; tell the parent container which child changed, so maps
//!    can fire `changed(key)` and tables `primary(pk)` at their guards.
//! 3. Bubble `raise_dirty` to the parent.
//! 4. Fan invalidation out to this cell's subscribers.
//!
//! Fan-out is bounded two ways: `invalid` is a fixed point (a cell already
//! invalid does not re-fan, which terminates cycles), and `notifying`
//! stops a subscriber's synchronous callback from re-entering the same
//! node's fan-out. Subscribers whose `raise_invalid` reports "drop me",
//! including any stale id whose slot was reused, are pruned in place.
//!
//! # Concurrency
//!
//! None. The tree is `&mut`-threaded and cooperative; the surrounding
//! platform serializes all access to one document.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::container::map::MapKey;
use crate::formula::guard;
use crate::scalar::misc::EnumSlot;
use crate::scalar::value::{ScalarSlot, ScalarValue, ValueState};
use crate::tree::cell::{CellId, CellKind, CellNode, Liveness};
use crate::tree::index::IndexHook;

struct Slot {
    generation: u32,
    node: Option<CellNode>,
}

/// The arena of cells for one live document.
pub struct Tree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    cost: i64,
    hooks: FxHashMap<CellId, Box<dyn IndexHook>>,
}

impl Tree {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            cost: 0,
            hooks: FxHashMap::default(),
        }
    }

    // ------------------------------------------------------------------
    // Slots
    // ------------------------------------------------------------------

    /// Allocate a cell, reusing a freed slot when one exists.
    pub fn alloc(&mut self, kind: CellKind, parent: Option<CellId>) -> CellId {
        let node = CellNode::new(kind, parent);
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            CellId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            CellId {
                index,
                generation: 0,
            }
        }
    }

    pub(crate) fn node(&self, id: CellId) -> Option<&CellNode> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    pub(crate) fn node_mut(&mut self, id: CellId) -> Option<&mut CellNode> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    /// True while the id resolves to a live slot.
    pub fn contains(&self, id: CellId) -> bool {
        self.node(id).is_some()
    }

    pub fn parent_of(&self, id: CellId) -> Option<CellId> {
        self.node(id)?.parent
    }

    /// Free a cell and everything it owns. Freeing is idempotent: a stale
    /// id (slot already reused or freed) is ignored.
    pub(crate) fn free_subtree(&mut self, id: CellId) {
        let children: SmallVec<[CellId; 8]> = match self.node(id) {
            None => return,
            Some(node) => match &node.kind {
                CellKind::Scalar(_) | CellKind::Guard(_) | CellKind::Projection(_) => {
                    SmallVec::new()
                }
                CellKind::Maybe(m) => m.value.iter().chain(m.prior.iter()).copied().collect(),
                CellKind::Map(m) => m
                    .live
                    .values()
                    .chain(m.deleted.values())
                    .copied()
                    .collect(),
                CellKind::Grid(g) => g
                    .live
                    .values()
                    .chain(g.deleted.values())
                    .copied()
                    .collect(),
                CellKind::List(l) => l
                    .entries
                    .values()
                    .chain(l.deleted.values().map(|t| &t.cell))
                    .copied()
                    .collect(),
                CellKind::Record(r) => r.fields.iter().map(|(_, c)| *c).collect(),
                CellKind::Table(t) => t
                    .rows
                    .values()
                    .copied()
                    .collect(),
                CellKind::Formula(f) => f.guards.iter().copied().collect(),
            },
        };
        for child in children {
            self.free_subtree(child);
        }
        self.hooks.remove(&id);
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.node.is_some() {
                slot.node = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }

    // ------------------------------------------------------------------
    // Flags and propagation
    // ------------------------------------------------------------------

    pub fn is_dirty(&self, id: CellId) -> bool {
        self.node(id).map(|n| n.dirty).unwrap_or(false)
    }

    pub fn is_invalid(&self, id: CellId) -> bool {
        self.node(id).map(|n| n.invalid).unwrap_or(false)
    }

    /// Add `subscriber` to `target`'s fan-out list.
    pub fn subscribe(&mut self, target: CellId, subscriber: CellId) {
        if let Some(node) = self.node_mut(target) {
            if !node.subscribers.contains(&subscriber) {
                node.subscribers.push(subscriber);
            }
        }
    }

    /// Mark a cell dirty, bubble to the parent, fan out invalidation.
    /// Idempotent: an already-dirty cell does nothing. Targeted container
    /// events are NOT raised here; they come from `notify_ancestors` on
    /// every real mutation, because a second change to an already-dirty
    /// child must still reach guards.
    pub fn raise_dirty(&mut self, id: CellId) {
        let parent = {
            let Some(node) = self.node_mut(id) else { return };
            if node.dirty {
                return;
            }
            node.dirty = true;
            node.parent
        };
        if let Some(parent) = parent {
            self.raise_dirty(parent);
        }
        self.invalidate_subscribers(id);
    }

    /// Fire the targeted change event owed to every enclosing container:
    /// the map above a mutated child fires `changed(key)`, the table above
    /// a mutated row fires `primary(pk)`. Unlike dirtiness this is not
    /// idempotent: guards re-capture per evaluation, so every real
    /// mutation reports.
    pub(crate) fn notify_ancestors(&mut self, id: CellId) {
        let mut child = id;
        let mut parent = self.parent_of(id);
        while let Some(current) = parent {
            self.child_changed(current, child);
            child = current;
            parent = self.parent_of(current);
        }
    }

    /// Tell a subscriber one of its inputs changed.
    ///
    /// Returns the child-link verdict: `false` means "drop me from the
    /// subscriber list". Guarded by `invalid` so cyclic graphs reach a
    /// fixed point instead of recursing forever.
    pub(crate) fn raise_invalid(&mut self, id: CellId) -> bool {
        enum Action {
            Plain,
            Formula,
            Guard(CellId),
            Prune,
            Done,
        }
        let action = {
            let Some(node) = self.node_mut(id) else {
                return false;
            };
            match &mut node.kind {
                CellKind::Projection(p) => {
                    if !p.alive || p.stream_cancelled() {
                        Action::Prune
                    } else {
                        node.dirty = true;
                        Action::Done
                    }
                }
                CellKind::Formula(f) => {
                    if node.invalid {
                        Action::Done
                    } else {
                        node.invalid = true;
                        f.bump_generation();
                        Action::Formula
                    }
                }
                CellKind::Guard(g) => Action::Guard(g.owner),
                _ => {
                    if node.invalid {
                        Action::Done
                    } else {
                        node.invalid = true;
                        Action::Plain
                    }
                }
            }
        };
        match action {
            Action::Prune => false,
            Action::Done => true,
            Action::Guard(owner) => {
                // A guard in a subscriber list relays to its formula.
                self.raise_invalid(owner);
                true
            }
            Action::Plain | Action::Formula => {
                self.invalidate_subscribers(id);
                true
            }
        }
    }

    /// Fan invalidation out to the subscriber snapshot, pruning links
    /// that report themselves gone. Re-entrancy through this node is
    /// blocked by the `notifying` flag.
    pub(crate) fn invalidate_subscribers(&mut self, id: CellId) {
        let subs = {
            let Some(node) = self.node_mut(id) else { return };
            if node.notifying {
                return;
            }
            node.notifying = true;
            node.subscribers.clone()
        };
        let mut dropped: SmallVec<[CellId; 2]> = SmallVec::new();
        for sub in subs {
            if !self.raise_invalid(sub) {
                trace!(?sub, "pruning dead subscriber");
                dropped.push(sub);
            }
        }
        if let Some(node) = self.node_mut(id) {
            if !dropped.is_empty() {
                node.subscribers.retain(|s| !dropped.contains(s));
            }
            node.notifying = false;
        }
    }

    /// Raise invalid up the parent chain, stopping at the first ancestor
    /// that is already invalid.
    pub fn invalidate_up(&mut self, id: CellId) {
        let mut cursor = self.node(id).and_then(|n| n.parent);
        while let Some(current) = cursor {
            let (already, parent) = match self.node(current) {
                Some(node) => (node.invalid, node.parent),
                None => return,
            };
            if already {
                return;
            }
            self.raise_invalid(current);
            cursor = parent;
        }
    }

    /// A cell is alive only while every record on its parent chain is
    /// `Alive` and every projection's stream is still wanted.
    pub fn is_alive(&self, id: CellId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.node(current) else {
                return false;
            };
            match &node.kind {
                CellKind::Record(r) => {
                    if r.liveness != Liveness::Alive {
                        return false;
                    }
                }
                CellKind::Projection(p) => {
                    if !p.alive || p.stream_cancelled() {
                        return false;
                    }
                }
                _ => {}
            }
            cursor = node.parent;
        }
        true
    }

    /// A container child transitioned clean→dirty: fire the targeted
    /// change event the container owes its guards.
    fn child_changed(&mut self, parent: CellId, child: CellId) {
        enum Ev {
            MapKey(MapKey),
            TablePk(i64),
            None,
        }
        let ev = match self.node(parent).map(|n| &n.kind) {
            Some(CellKind::Map(m)) => m
                .live
                .iter()
                .find(|(_, c)| **c == child)
                .map(|(k, _)| Ev::MapKey(k.clone()))
                .unwrap_or(Ev::None),
            Some(CellKind::Table(t)) => t
                .rows
                .iter()
                .find(|(_, c)| **c == child)
                .map(|(pk, _)| Ev::TablePk(*pk))
                .unwrap_or(Ev::None),
            _ => Ev::None,
        };
        match ev {
            Ev::MapKey(key) => crate::container::map::fire_changed(self, parent, &key),
            Ev::TablePk(pk) => crate::container::table::fire_primary(self, parent, pk),
            Ev::None => {}
        }
    }

    /// An indexed column changed inside a table row: fire the old and new
    /// bucket events at the table's guards.
    pub(crate) fn notify_index_change(&mut self, field: CellId, old: i32, new: i32) {
        let Some(record) = self.parent_of(field) else {
            return;
        };
        let Some(table) = self.parent_of(record) else {
            return;
        };
        let field_pos = {
            let Some(rec) = self.record_state(record) else {
                return;
            };
            let Some(pos) = rec.fields.iter().position(|(_, c)| *c == field) else {
                return;
            };
            pos
        };
        let indexed = {
            let Some(rec) = self.record_state(record) else {
                return;
            };
            let name = rec.fields[field_pos].0.clone();
            match self.table_state(table) {
                Some(t) => t.indexed.iter().any(|n| *n == name),
                None => return,
            }
        };
        if indexed {
            crate::container::table::fire_index(self, table, field_pos as u16, old);
            crate::container::table::fire_index(self, table, field_pos as u16, new);
        }
    }

    // ------------------------------------------------------------------
    // Scalar access
    // ------------------------------------------------------------------

    pub(crate) fn scalar_slot(&self, id: CellId) -> Option<&dyn ScalarSlot> {
        match &self.node(id)?.kind {
            CellKind::Scalar(slot) => Some(slot.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn scalar_state<T: ScalarValue>(&self, id: CellId) -> Option<&ValueState<T>> {
        self.scalar_slot(id)?.as_any().downcast_ref()
    }

    pub(crate) fn scalar_state_mut<T: ScalarValue>(
        &mut self,
        id: CellId,
    ) -> Option<&mut ValueState<T>> {
        match &mut self.node_mut(id)?.kind {
            CellKind::Scalar(slot) => slot.as_any_mut().downcast_mut(),
            _ => None,
        }
    }

    pub(crate) fn enum_slot(&self, id: CellId) -> Option<&EnumSlot> {
        self.scalar_slot(id)?.as_any().downcast_ref()
    }

    /// Equality-guarded scalar write: a real change fires the index
    /// trigger pair (outgoing bucket, then incoming), dirties the cell,
    /// and, for indexed table columns, fires bucket events at guards.
    pub(crate) fn scalar_set<T: ScalarValue>(&mut self, id: CellId, next: T) {
        let buckets = {
            let Some(state) = self.scalar_state_mut::<T>(id) else {
                return;
            };
            if *state.value() == next {
                return;
            }
            let old = state.value().index_value();
            let new = next.index_value();
            state.assign(next);
            (old, new)
        };
        if let (Some(old), Some(new)) = buckets {
            if let Some(hook) = self.hooks.get_mut(&id) {
                hook.trigger(old);
                hook.trigger(new);
            }
            self.notify_index_change(id, old, new);
        }
        self.raise_dirty(id);
        self.notify_ancestors(id);
    }

    pub(crate) fn enum_set(&mut self, id: CellId, next: i32) {
        let (old, new) = {
            let Some(node) = self.node_mut(id) else { return };
            let CellKind::Scalar(slot) = &mut node.kind else { return };
            let Some(slot) = slot.as_any_mut().downcast_mut::<EnumSlot>() else {
                return;
            };
            let old = slot.value();
            if old == next {
                return;
            }
            slot.state_mut().assign(next);
            (old, next)
        };
        if let Some(hook) = self.hooks.get_mut(&id) {
            hook.trigger(old);
            hook.trigger(new);
        }
        self.notify_index_change(id, old, new);
        self.raise_dirty(id);
        self.notify_ancestors(id);
    }

    // ------------------------------------------------------------------
    // Index hooks
    // ------------------------------------------------------------------

    /// Attach a secondary-index hook to an indexable cell.
    pub fn attach_index(&mut self, id: CellId, hook: Box<dyn IndexHook>) {
        self.hooks.insert(id, hook);
    }

    pub(crate) fn hook_mut(&mut self, id: CellId) -> Option<&mut Box<dyn IndexHook>> {
        self.hooks.get_mut(&id)
    }

    pub fn detach_index(&mut self, id: CellId) {
        self.hooks.remove(&id);
    }

    // ------------------------------------------------------------------
    // Cost and settle
    // ------------------------------------------------------------------

    /// Report work to the external cost owner.
    pub fn cost(&mut self, amount: i64) {
        self.cost += amount;
    }

    /// Drain accumulated cost.
    pub fn take_cost(&mut self) -> i64 {
        std::mem::take(&mut self.cost)
    }

    /// Opportunistic maintenance pass: expire TTL caches against their
    /// logical clocks and prune per-viewer guard bookkeeping. Nothing here
    /// runs eagerly during mutation.
    pub fn settle(&mut self, active_viewers: &[i64]) {
        let mut expired: Vec<CellId> = Vec::new();
        let mut guards: Vec<CellId> = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(node) = &slot.node else { continue };
            let id = CellId {
                index: index as u32,
                generation: slot.generation,
            };
            match &node.kind {
                CellKind::Formula(f) => {
                    if f.ttl.is_some() && !node.invalid {
                        expired.push(id);
                    }
                }
                CellKind::Guard(_) => guards.push(id),
                _ => {}
            }
        }
        for id in expired {
            let Some((clock, ttl_ms, stamped_at)) = self
                .formula_state(id)
                .and_then(|f| f.ttl.as_ref())
                .map(|t| (t.clock, t.ttl_ms, t.stamped_at))
            else {
                continue;
            };
            let now = self
                .scalar_state::<i64>(clock)
                .map(|s| *s.value())
                .unwrap_or(stamped_at);
            if now - stamped_at > ttl_ms {
                trace!(?id, elapsed = now - stamped_at, "ttl cache expired");
                self.raise_invalid(id);
            }
        }
        for id in guards {
            guard::settle_views(self, id, active_viewers);
        }
    }

    // ------------------------------------------------------------------
    // Kind-state accessors
    // ------------------------------------------------------------------

    pub(crate) fn maybe_state(&self, id: CellId) -> Option<&crate::container::maybe::MaybeState> {
        match &self.node(id)?.kind {
            CellKind::Maybe(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn maybe_state_mut(
        &mut self,
        id: CellId,
    ) -> Option<&mut crate::container::maybe::MaybeState> {
        match &mut self.node_mut(id)?.kind {
            CellKind::Maybe(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn map_state(&self, id: CellId) -> Option<&crate::container::map::MapState> {
        match &self.node(id)?.kind {
            CellKind::Map(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn map_state_mut(
        &mut self,
        id: CellId,
    ) -> Option<&mut crate::container::map::MapState> {
        match &mut self.node_mut(id)?.kind {
            CellKind::Map(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn grid_state(&self, id: CellId) -> Option<&crate::container::grid::GridState> {
        match &self.node(id)?.kind {
            CellKind::Grid(g) => Some(g),
            _ => None,
        }
    }

    pub(crate) fn grid_state_mut(
        &mut self,
        id: CellId,
    ) -> Option<&mut crate::container::grid::GridState> {
        match &mut self.node_mut(id)?.kind {
            CellKind::Grid(g) => Some(g),
            _ => None,
        }
    }

    pub(crate) fn list_state(&self, id: CellId) -> Option<&crate::container::list::ListState> {
        match &self.node(id)?.kind {
            CellKind::List(l) => Some(l),
            _ => None,
        }
    }

    pub(crate) fn list_state_mut(
        &mut self,
        id: CellId,
    ) -> Option<&mut crate::container::list::ListState> {
        match &mut self.node_mut(id)?.kind {
            CellKind::List(l) => Some(l),
            _ => None,
        }
    }

    pub(crate) fn record_state(&self, id: CellId) -> Option<&crate::container::record::RecordState> {
        match &self.node(id)?.kind {
            CellKind::Record(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn record_state_mut(
        &mut self,
        id: CellId,
    ) -> Option<&mut crate::container::record::RecordState> {
        match &mut self.node_mut(id)?.kind {
            CellKind::Record(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn table_state(&self, id: CellId) -> Option<&crate::container::table::TableState> {
        match &self.node(id)?.kind {
            CellKind::Table(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn table_state_mut(
        &mut self,
        id: CellId,
    ) -> Option<&mut crate::container::table::TableState> {
        match &mut self.node_mut(id)?.kind {
            CellKind::Table(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn formula_state(&self, id: CellId) -> Option<&crate::formula::lazy::FormulaState> {
        match &self.node(id)?.kind {
            CellKind::Formula(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn formula_state_mut(
        &mut self,
        id: CellId,
    ) -> Option<&mut crate::formula::lazy::FormulaState> {
        match &mut self.node_mut(id)?.kind {
            CellKind::Formula(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn guard_state(&self, id: CellId) -> Option<&crate::formula::guard::GuardState> {
        match &self.node(id)?.kind {
            CellKind::Guard(g) => Some(g),
            _ => None,
        }
    }

    pub(crate) fn guard_state_mut(
        &mut self,
        id: CellId,
    ) -> Option<&mut crate::formula::guard::GuardState> {
        match &mut self.node_mut(id)?.kind {
            CellKind::Guard(g) => Some(g),
            _ => None,
        }
    }

    pub(crate) fn projection_state_mut(
        &mut self,
        id: CellId,
    ) -> Option<&mut crate::push::projection::ProjectionState> {
        match &mut self.node_mut(id)?.kind {
            CellKind::Projection(p) => Some(p),
            _ => None,
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::{RxBoolean, RxInt32};

    #[test]
    fn alloc_reuses_slots_with_new_generation() {
        let mut tree = Tree::new();
        let a = RxInt32::new(&mut tree, None, 0);
        let stale = a.id();
        tree.free_subtree(stale);
        assert!(!tree.contains(stale));

        let b = RxInt32::new(&mut tree, None, 0);
        assert_eq!(b.id().index, stale.index);
        assert_ne!(b.id().generation, stale.generation);
        assert!(!tree.contains(stale));
        assert!(tree.contains(b.id()));
    }

    #[test]
    fn set_marks_dirty_and_bubbles_to_parent() {
        let mut tree = Tree::new();
        let parent = RxInt32::new(&mut tree, None, 0);
        let child = RxBoolean::new(&mut tree, Some(parent.id()), false);

        child.set(&mut tree, true);
        assert!(tree.is_dirty(child.id()));
        assert!(tree.is_dirty(parent.id()));
    }

    #[test]
    fn equal_set_is_a_no_op() {
        let mut tree = Tree::new();
        let cell = RxBoolean::new(&mut tree, None, true);
        cell.set(&mut tree, true);
        assert!(!tree.is_dirty(cell.id()));
    }

    #[test]
    fn stale_subscribers_are_pruned_during_fanout() {
        let mut tree = Tree::new();
        let source = RxInt32::new(&mut tree, None, 0);
        let watcher = RxInt32::new(&mut tree, None, 0);
        tree.subscribe(source.id(), watcher.id());
        tree.free_subtree(watcher.id());

        source.set(&mut tree, 1);
        let subs = tree.node(source.id()).unwrap().subscribers.clone();
        assert!(subs.is_empty());
    }

    #[test]
    fn invalidation_reaches_a_fixed_point_on_cycles() {
        let mut tree = Tree::new();
        let a = RxInt32::new(&mut tree, None, 0);
        let b = RxInt32::new(&mut tree, None, 0);
        tree.subscribe(a.id(), b.id());
        tree.subscribe(b.id(), a.id());

        // Must terminate despite the subscriber cycle.
        a.set(&mut tree, 1);
        assert!(tree.is_invalid(b.id()));
    }

    #[test]
    fn cost_accumulates_and_drains() {
        let mut tree = Tree::new();
        tree.cost(3);
        tree.cost(4);
        assert_eq!(tree.take_cost(), 7);
        assert_eq!(tree.take_cost(), 0);
    }
}
