//! Lazy Formulas
//!
//! A lazy formula caches its computed value until the arena marks it
//! invalid. `get` brackets the compute with start/finish: every guard the
//! formula owns is pushed onto its container's guard stack, so reads made
//! during *this* evaluation are attributed to this formula; nested
//! formulas stack, and the innermost active guard wins.
//!
//! # Generation Numbering
//!
//! Every formula carries an opaque i32 version stamp. It advances by
//! `gen = gen * 65521 + 1` in wrapping arithmetic (65521 is the largest
//! prime below 2^16), exactly once per observed invalidation or settle
//! expiry. The stamp is seeded lazily on first read: walk up the parent
//! chain while the parents are table rows and take the nearest row's
//! primary key; otherwise fall back to the cached value's stable hash;
//! otherwise stay 0 until first use. The arithmetic is a visible contract
//! (clients compare generations across processes), so width and
//! wraparound are not negotiable.

use std::cell::RefCell;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::formula::compute::Computable;
use crate::formula::guard;
use crate::tree::{CellId, CellKind, Tree};

/// TTL bookkeeping for time-cached formulas (see `cached`).
#[derive(Debug, Clone, Copy)]
pub struct Ttl {
    /// A reactive i64 cell holding logical milliseconds.
    pub(crate) clock: CellId,
    pub(crate) ttl_ms: i64,
    pub(crate) stamped_at: i64,
}

/// Arena state of one formula.
#[derive(Debug)]
pub struct FormulaState {
    pub(crate) generation: i32,
    pub(crate) guards: SmallVec<[CellId; 2]>,
    pub(crate) ttl: Option<Ttl>,
}

impl FormulaState {
    pub(crate) fn new() -> Self {
        Self {
            generation: 0,
            guards: SmallVec::new(),
            ttl: None,
        }
    }

    /// One observed invalidation advances the stamp once.
    pub(crate) fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_mul(65521).wrapping_add(1);
    }
}

// ----------------------------------------------------------------------------
// Evaluation bracketing
// ----------------------------------------------------------------------------

pub(crate) fn start(tree: &mut Tree, id: CellId) {
    let guards = tree
        .formula_state(id)
        .map(|f| f.guards.clone())
        .unwrap_or_default();
    for g in guards {
        guard::begin_capture(tree, g);
    }
}

pub(crate) fn finish(tree: &mut Tree, id: CellId) {
    let guards = tree
        .formula_state(id)
        .map(|f| f.guards.clone())
        .unwrap_or_default();
    for g in guards {
        guard::end_capture(tree, g);
    }
    if let Some(node) = tree.node_mut(id) {
        node.invalid = false;
    }
    tree.cost(1);
}

/// Current generation, seeding it on first read.
pub(crate) fn generation(tree: &mut Tree, id: CellId, fallback: Option<i32>) -> i32 {
    let current = tree.formula_state(id).map(|f| f.generation).unwrap_or(0);
    if current != 0 {
        return current;
    }
    let seed = row_pk_seed(tree, id).or(fallback).unwrap_or(0);
    if let Some(state) = tree.formula_state_mut(id) {
        state.generation = seed;
    }
    seed
}

/// Walk up while the parents are table rows; the nearest row's primary
/// key is the seed. The first non-row ancestor terminates the walk.
fn row_pk_seed(tree: &Tree, id: CellId) -> Option<i32> {
    let mut cursor = tree.parent_of(id);
    let mut seed: Option<i32> = None;
    while let Some(current) = cursor {
        match tree.record_state(current) {
            Some(rec) if rec.pk.is_some() => {
                if seed.is_none() {
                    seed = rec.pk.map(|pk| pk as i32);
                }
                cursor = tree.parent_of(current);
            }
            _ => break,
        }
    }
    seed
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

/// A lazily-evaluated, cached formula over the tree.
pub struct RxLazy<T> {
    id: CellId,
    compute: Rc<dyn Fn(&mut Tree) -> T>,
    cache: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for RxLazy<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            compute: Rc::clone(&self.compute),
            cache: Rc::clone(&self.cache),
        }
    }
}

impl<T: Computable> RxLazy<T> {
    pub fn new(
        tree: &mut Tree,
        parent: Option<CellId>,
        compute: impl Fn(&mut Tree) -> T + 'static,
    ) -> Self {
        let id = tree.alloc(CellKind::Formula(FormulaState::new()), parent);
        Self {
            id,
            compute: Rc::new(compute),
            cache: Rc::new(RefCell::new(None)),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// Attach a read-capture guard on a map or table this formula reads.
    pub fn guard(&self, tree: &mut Tree, container: CellId) -> guard::RxGuard {
        guard::attach(tree, container, self.id)
    }

    /// Cached value, recomputing if a transitive input changed.
    pub fn get(&self, tree: &mut Tree) -> T {
        let fresh = !tree.is_invalid(self.id) && self.cache.borrow().is_some();
        if fresh {
            return self
                .cache
                .borrow()
                .as_ref()
                .expect("fresh formula cache holds a value")
                .clone();
        }
        start(tree, self.id);
        let value = (self.compute)(tree);
        finish(tree, self.id);
        *self.cache.borrow_mut() = Some(value.clone());
        value
    }

    /// Opaque version stamp; stable between invalidations.
    pub fn generation(&self, tree: &mut Tree) -> i32 {
        let fallback = self.cache.borrow().as_ref().map(Computable::seed_hash);
        generation(tree, self.id, fallback)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::RxInt64;
    use std::cell::Cell;

    #[test]
    fn computes_once_until_invalidated() {
        let mut tree = Tree::new();
        let a = RxInt64::new(&mut tree, None, 2);
        let b = RxInt64::new(&mut tree, None, 3);
        let runs = Rc::new(Cell::new(0));
        let runs_in = runs.clone();
        let sum = RxLazy::new(&mut tree, None, move |t| {
            runs_in.set(runs_in.get() + 1);
            a.get(t) + b.get(t)
        });
        tree.subscribe(a.id(), sum.id());
        tree.subscribe(b.id(), sum.id());

        assert_eq!(sum.get(&mut tree), 5);
        assert_eq!(sum.get(&mut tree), 5);
        assert_eq!(runs.get(), 1);

        a.set(&mut tree, 10);
        assert_eq!(sum.get(&mut tree), 13);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn generation_is_stable_until_invalidated() {
        let mut tree = Tree::new();
        let a = RxInt64::new(&mut tree, None, 1);
        let f = RxLazy::new(&mut tree, None, move |t| a.get(t));
        tree.subscribe(a.id(), f.id());

        f.get(&mut tree);
        let g0 = f.generation(&mut tree);
        assert_ne!(g0, 0);
        assert_eq!(f.generation(&mut tree), g0);

        // One invalidation advances the stamp exactly once, even if more
        // writes land before the next read.
        a.set(&mut tree, 2);
        let expected = g0.wrapping_mul(65521).wrapping_add(1);
        assert_eq!(f.generation(&mut tree), expected);
        assert_eq!(f.generation(&mut tree), expected);
    }

    #[test]
    fn generation_transform_applies_per_cycle() {
        let mut tree = Tree::new();
        let a = RxInt64::new(&mut tree, None, 1);
        let f = RxLazy::new(&mut tree, None, move |t| a.get(t));
        tree.subscribe(a.id(), f.id());

        f.get(&mut tree);
        let seed = f.generation(&mut tree);
        let cycles = 5;
        for i in 0..cycles {
            a.set(&mut tree, 10 + i);
            f.get(&mut tree);
        }
        let mut expected = seed;
        for _ in 0..cycles {
            expected = expected.wrapping_mul(65521).wrapping_add(1);
        }
        assert_eq!(f.generation(&mut tree), expected);
    }

    #[test]
    fn row_formulas_seed_from_the_nearest_pk() {
        use crate::container::ctor::{CellCtor, RecordSchema};
        use crate::container::table::RxTable;

        let mut tree = Tree::new();
        let schema = RecordSchema::new(vec![("v".to_string(), CellCtor::Int64(0))]);
        let table = RxTable::new(&mut tree, None, schema, Vec::new());
        let row = table.create_with(&mut tree, 77);

        let f = RxLazy::new(&mut tree, Some(row.id()), |_| 0i64);
        assert_eq!(f.generation(&mut tree), 77);
    }

    #[test]
    fn formulas_chain_through_subscriptions() {
        let mut tree = Tree::new();
        let a = RxInt64::new(&mut tree, None, 1);
        let doubled = RxLazy::new(&mut tree, None, move |t| a.get(t) * 2);
        tree.subscribe(a.id(), doubled.id());
        let doubled_in = doubled.clone();
        let quadrupled = RxLazy::new(&mut tree, None, move |t| doubled_in.get(t) * 2);
        tree.subscribe(doubled.id(), quadrupled.id());

        assert_eq!(quadrupled.get(&mut tree), 4);
        a.set(&mut tree, 5);
        assert_eq!(quadrupled.get(&mut tree), 20);
    }
}
