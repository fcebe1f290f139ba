//! Time-Cached Formulas
//!
//! A time-cached formula is a lazy formula whose cache additionally goes
//! stale after a TTL. Elapsed time comes from an injected *reactive clock
//! cell* (an i64 of logical milliseconds the platform advances), never
//! from the wall clock, so replays stay deterministic.
//!
//! Expiry is checked only during `Tree::settle`, never eagerly: reading a
//! time-cached formula between settles returns the cache no matter how
//! old the clock says it is.

use std::cell::RefCell;
use std::rc::Rc;

use crate::formula::compute::Computable;
use crate::formula::lazy::{self, FormulaState, Ttl};
use crate::scalar::RxInt64;
use crate::tree::{CellId, CellKind, Tree};

/// A lazy formula with TTL expiry against a logical clock.
pub struct RxCached<T> {
    id: CellId,
    compute: Rc<dyn Fn(&mut Tree) -> T>,
    cache: Rc<RefCell<Option<T>>>,
    clock: RxInt64,
}

impl<T> Clone for RxCached<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            compute: Rc::clone(&self.compute),
            cache: Rc::clone(&self.cache),
            clock: self.clock,
        }
    }
}

impl<T: Computable> RxCached<T> {
    pub fn new(
        tree: &mut Tree,
        parent: Option<CellId>,
        clock: RxInt64,
        ttl_ms: i64,
        compute: impl Fn(&mut Tree) -> T + 'static,
    ) -> Self {
        let now = clock.get(tree);
        let mut state = FormulaState::new();
        state.ttl = Some(Ttl {
            clock: clock.id(),
            ttl_ms,
            stamped_at: now,
        });
        let id = tree.alloc(CellKind::Formula(state), parent);
        Self {
            id,
            compute: Rc::new(compute),
            cache: Rc::new(RefCell::new(None)),
            clock,
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    /// Cached value; recomputes only when invalidated (by inputs or by a
    /// settle-pass expiry) and re-stamps the TTL at the current clock.
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
        lazy::start(tree, self.id);
        let value = (self.compute)(tree);
        lazy::finish(tree, self.id);
        let now = self.clock.get(tree);
        if let Some(state) = tree.formula_state_mut(self.id) {
            if let Some(ttl) = &mut state.ttl {
                ttl.stamped_at = now;
            }
        }
        *self.cache.borrow_mut() = Some(value.clone());
        value
    }

    pub fn generation(&self, tree: &mut Tree) -> i32 {
        let fallback = self.cache.borrow().as_ref().map(Computable::seed_hash);
        lazy::generation(tree, self.id, fallback)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
