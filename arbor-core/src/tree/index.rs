//! Secondary-Index Hook
//!
//! The core does not store any secondary index; it only promises to tell
//! one about bucket movement. A hook attached to an indexable cell is
//! triggered twice per real value change: first with the outgoing bucket
//! (so the index can remove the cell from it), then with the incoming one
//! (so it can insert). From the index's perspective the move is atomic:
//! no mutation is observable between the two calls.

use crate::tree::{CellId, Tree};

/// External secondary-index trigger.
pub trait IndexHook {
    /// Called twice per change: outgoing bucket, then incoming bucket.
    fn trigger(&mut self, bucket: i32);
}

impl Tree {
    /// Current index bucket of an indexable scalar, if any.
    pub fn index_value_of(&self, id: CellId) -> Option<i32> {
        self.scalar_slot(id)?.index_value()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
