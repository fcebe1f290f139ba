//! The Cell Tree
//!
//! This module owns the arena and the base change-tracking contract:
//! generational cell ids, the dirty/invalid/notifying flags, dirty
//! bubbling with targeted container events, bounded invalidation fan-out,
//! liveness walks, cost accounting, the settle pass, and the
//! commit/revert/dump/insert/patch dispatch.

mod arena;
mod cell;
mod index;
mod io;

pub use arena::Tree;
pub use cell::{CellId, CellKind, Liveness};
pub use index::IndexHook;
