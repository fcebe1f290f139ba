//! Memoization and Guards
//!
//! Derived values over the tree: lazily-cached formulas, TTL-bounded
//! caches against a logical clock, read-capture guards that narrow
//! invalidation to the keys, rows, and index buckets a computation
//! actually touched, and the generation stamps clients use for cheap
//! change detection.

pub mod cached;
pub mod compute;
pub mod guard;
pub mod lazy;

pub use cached::RxCached;
pub use compute::Computable;
pub use guard::RxGuard;
pub use lazy::RxLazy;
