//! Read-Capture Guards
//!
//! A guard filters a container's change feed down to what its formula
//! actually read. During evaluation the guard is `Capturing`: container
//! read paths report the key / primary key / index bucket (or a blanket
//! "all") into the active capture set. Afterwards it is `Captured`: a
//! targeted change event fires the owning formula's invalidation only if
//! it intersects the captured set; everything else is suppressed.
//!
//! # Viewers
//!
//! Beyond the root (un-viewed) capture, a guard keeps any number of
//! per-viewer child sets. `reset_view`/`finish_view` bracket a
//! viewer-specific evaluation; a later event that hits only a viewer's
//! set marks that viewer stale without touching the root formula. The
//! settle pass prunes viewer bookkeeping once the tracked population
//! exceeds roughly twice the active one.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::container::map::MapKey;
use crate::tree::{CellId, CellKind, Tree};

/// What one evaluation read.
#[derive(Debug, Clone, Default)]
pub struct CaptureSet {
    pub(crate) all: bool,
    pub(crate) keys: FxHashSet<MapKey>,
    pub(crate) pks: FxHashSet<i64>,
    pub(crate) buckets: FxHashSet<(u16, i32)>,
}

impl CaptureSet {
    fn clear(&mut self) {
        self.all = false;
        self.keys.clear();
        self.pks.clear();
        self.buckets.clear();
    }

    fn hit_key(&self, key: &MapKey) -> bool {
        self.all || self.keys.contains(key)
    }

    fn hit_pk(&self, pk: i64) -> bool {
        self.all || self.pks.contains(&pk)
    }

    fn hit_bucket(&self, field: u16, bucket: i32) -> bool {
        self.all || self.buckets.contains(&(field, bucket))
    }
}

/// Capture lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    Idle,
    Capturing,
    Captured,
}

/// Arena state of one guard.
#[derive(Debug)]
pub struct GuardState {
    /// The formula to invalidate on a hit.
    pub(crate) owner: CellId,
    /// The map or table being watched.
    pub(crate) container: CellId,
    pub(crate) root: CaptureSet,
    pub(crate) views: FxHashMap<i64, CaptureSet>,
    pub(crate) stale_views: FxHashSet<i64>,
    pub(crate) current_view: Option<i64>,
    pub(crate) phase: GuardPhase,
}

impl GuardState {
    fn target_mut(&mut self) -> &mut CaptureSet {
        match self.current_view {
            Some(viewer) => self.views.entry(viewer).or_default(),
            None => &mut self.root,
        }
    }
}

// ----------------------------------------------------------------------------
// Wiring
// ----------------------------------------------------------------------------

/// Create a guard watching `container` on behalf of `owner`, registering
/// it with both sides.
pub(crate) fn attach(tree: &mut Tree, container: CellId, owner: CellId) -> RxGuard {
    let state = GuardState {
        owner,
        container,
        root: CaptureSet::default(),
        views: FxHashMap::default(),
        stale_views: FxHashSet::default(),
        current_view: None,
        phase: GuardPhase::Idle,
    };
    let id = tree.alloc(CellKind::Guard(state), Some(container));
    if let Some(formula) = tree.formula_state_mut(owner) {
        formula.guards.push(id);
    }
    watch(tree, container, id);
    RxGuard { id }
}

fn watch(tree: &mut Tree, container: CellId, guard: CellId) {
    if let Some(map) = tree.map_state_mut(container) {
        if !map.watchers.contains(&guard) {
            map.watchers.push(guard);
        }
    } else if let Some(table) = tree.table_state_mut(container) {
        if !table.watchers.contains(&guard) {
            table.watchers.push(guard);
        }
    }
}

pub(crate) fn begin_capture(tree: &mut Tree, id: CellId) {
    let container = {
        let Some(state) = tree.guard_state_mut(id) else { return };
        state.phase = GuardPhase::Capturing;
        state.target_mut().clear();
        state.container
    };
    // Re-register in case a pruning pass dropped us.
    watch(tree, container, id);
    if let Some(map) = tree.map_state_mut(container) {
        map.guard_stack.push(id);
    } else if let Some(table) = tree.table_state_mut(container) {
        table.guard_stack.push(id);
    }
}

pub(crate) fn end_capture(tree: &mut Tree, id: CellId) {
    let container = match tree.guard_state_mut(id) {
        Some(state) => {
            state.phase = GuardPhase::Captured;
            state.container
        }
        None => return,
    };
    if let Some(map) = tree.map_state_mut(container) {
        if let Some(at) = map.guard_stack.iter().rposition(|g| *g == id) {
            map.guard_stack.remove(at);
        }
    } else if let Some(table) = tree.table_state_mut(container) {
        if let Some(at) = table.guard_stack.iter().rposition(|g| *g == id) {
            table.guard_stack.remove(at);
        }
    }
}

// ----------------------------------------------------------------------------
// Capture reports (called by container read paths)
// ----------------------------------------------------------------------------

pub(crate) fn read_key(tree: &mut Tree, id: CellId, key: &MapKey) {
    if let Some(state) = tree.guard_state_mut(id) {
        if state.phase == GuardPhase::Capturing {
            state.target_mut().keys.insert(key.clone());
        }
    }
}

pub(crate) fn read_pk(tree: &mut Tree, id: CellId, pk: i64) {
    if let Some(state) = tree.guard_state_mut(id) {
        if state.phase == GuardPhase::Capturing {
            state.target_mut().pks.insert(pk);
        }
    }
}

pub(crate) fn read_index(tree: &mut Tree, id: CellId, field: u16, bucket: i32) {
    if let Some(state) = tree.guard_state_mut(id) {
        if state.phase == GuardPhase::Capturing {
            state.target_mut().buckets.insert((field, bucket));
        }
    }
}

pub(crate) fn read_all(tree: &mut Tree, id: CellId) {
    if let Some(state) = tree.guard_state_mut(id) {
        if state.phase == GuardPhase::Capturing {
            state.target_mut().all = true;
        }
    }
}

// ----------------------------------------------------------------------------
// Change events (called by containers)
// ----------------------------------------------------------------------------

enum Hit {
    Root,
    Views(Vec<i64>),
    Miss,
}

fn dispatch(tree: &mut Tree, id: CellId, hit: Hit) -> bool {
    match hit {
        Hit::Root => {
            let owner = match tree.guard_state(id) {
                Some(state) => state.owner,
                None => return false,
            };
            if !tree.contains(owner) {
                return false;
            }
            tree.raise_invalid(owner);
            true
        }
        Hit::Views(viewers) => {
            if let Some(state) = tree.guard_state_mut(id) {
                state.stale_views.extend(viewers);
                true
            } else {
                false
            }
        }
        Hit::Miss => {
            trace!(?id, "guard suppressed an unrelated change");
            true
        }
    }
}

fn classify<F: Fn(&CaptureSet) -> bool>(tree: &Tree, id: CellId, test: F) -> Option<Hit> {
    let state = tree.guard_state(id)?;
    if test(&state.root) {
        return Some(Hit::Root);
    }
    let viewers: Vec<i64> = state
        .views
        .iter()
        .filter_map(|(viewer, set)| if test(set) { Some(*viewer) } else { None })
        .collect();
    if viewers.is_empty() {
        Some(Hit::Miss)
    } else {
        Some(Hit::Views(viewers))
    }
}

/// `changed(key)` event. Returns false when the guard is gone and should
/// be dropped from the watcher list.
pub(crate) fn on_changed(tree: &mut Tree, id: CellId, key: &MapKey) -> bool {
    match classify(tree, id, |set| set.hit_key(key)) {
        Some(hit) => dispatch(tree, id, hit),
        None => false,
    }
}

/// `primary(pk)` event.
pub(crate) fn on_primary(tree: &mut Tree, id: CellId, pk: i64) -> bool {
    match classify(tree, id, |set| set.hit_pk(pk)) {
        Some(hit) => dispatch(tree, id, hit),
        None => false,
    }
}

/// `index(field, bucket)` event.
pub(crate) fn on_index(tree: &mut Tree, id: CellId, field: u16, bucket: i32) -> bool {
    match classify(tree, id, |set| set.hit_bucket(field, bucket)) {
        Some(hit) => dispatch(tree, id, hit),
        None => false,
    }
}

/// Prune viewer bookkeeping once it exceeds roughly twice the active
/// population.
pub(crate) fn settle_views(tree: &mut Tree, id: CellId, active: &[i64]) {
    let Some(state) = tree.guard_state_mut(id) else { return };
    if state.views.len() > active.len().saturating_mul(2) {
        state.views.retain(|viewer, _| active.contains(viewer));
    }
    state.stale_views.retain(|viewer| active.contains(viewer));
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// Handle to a guard, used for per-viewer evaluation bracketing.
#[derive(Debug, Clone, Copy)]
pub struct RxGuard {
    id: CellId,
}

impl RxGuard {
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Begin capturing for one viewer; reads until `finish_view` land in
    /// that viewer's set.
    pub fn reset_view(&self, tree: &mut Tree, viewer: i64) {
        if let Some(state) = tree.guard_state_mut(self.id) {
            state.current_view = Some(viewer);
            state.views.entry(viewer).or_default().clear();
        }
    }

    pub fn finish_view(&self, tree: &mut Tree) {
        if let Some(state) = tree.guard_state_mut(self.id) {
            state.current_view = None;
        }
    }

    /// Did a change hit this viewer's captured set since the last clear?
    pub fn is_view_stale(&self, tree: &Tree, viewer: i64) -> bool {
        tree.guard_state(self.id)
            .map(|s| s.stale_views.contains(&viewer))
            .unwrap_or(false)
    }

    pub fn clear_view_stale(&self, tree: &mut Tree, viewer: i64) {
        if let Some(state) = tree.guard_state_mut(self.id) {
            state.stale_views.remove(&viewer);
        }
    }

    /// Number of viewers currently tracked (drops as settle prunes).
    pub fn tracked_views(&self, tree: &Tree) -> usize {
        tree.guard_state(self.id).map(|s| s.views.len()).unwrap_or(0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
