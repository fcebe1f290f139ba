//! Arbor Core
//!
//! This crate is the reactive state engine for server-resident,
//! live-synchronized documents: a tree of mutable cells that knows which
//! values changed since the last checkpoint, commits that change as a
//! paired forward/reverse JSON delta (client push and undo), reverts
//! uncommitted mutation, and notifies dependents with precision finer
//! than "something changed", down to the map key, table primary key, or
//! index bucket a computation actually read.
//!
//! # Architecture
//!
//! - `json`: the read/write capability, a fragment writer for deltas and
//!   a tolerant reader for hydration
//! - `tree`: the cell arena, dirty/invalid propagation, liveness, cost,
//!   settle, and the commit/revert/dump/insert/patch contract
//! - `scalar`: the leaf cell family (booleans through dynamic blobs)
//! - `container`: optional values, keyed maps, grids, ordered lists,
//!   records, tables
//! - `formula`: lazy and TTL-cached memoization, read-capture guards,
//!   generation numbering
//! - `push`: projections that deliver recomputed payloads to external
//!   streams
//!
//! # Example
//!
//! ```rust
//! use arbor_core::json::JsonWriter;
//! use arbor_core::scalar::RxBoolean;
//! use arbor_core::tree::Tree;
//!
//! let mut tree = Tree::new();
//! let flag = RxBoolean::new(&mut tree, None, false);
//!
//! flag.set(&mut tree, true);
//!
//! let mut fwd = JsonWriter::new();
//! let mut rev = JsonWriter::new();
//! flag.commit(&mut tree, "v", &mut fwd, &mut rev);
//! assert_eq!(fwd.as_str(), "\"v\":true");
//! assert_eq!(rev.as_str(), "\"v\":false");
//! ```
//!
//! # Concurrency
//!
//! None inside the core: one document's tree is `&mut`-threaded and
//! cooperative. The surrounding platform serializes access per document;
//! all timing (TTL caches) runs on an externally-advanced logical clock
//! so replay is deterministic.

pub mod json;
pub mod tree;
pub mod scalar;
pub mod container;
pub mod formula;
pub mod push;

pub use container::{
    CellCtor, GridAt, MapKey, MapKeyKind, RecordSchema, RxGrid, RxList, RxMap, RxMaybe, RxRecord,
    RxTable,
};
pub use formula::{Computable, RxCached, RxGuard, RxLazy};
pub use json::{HydrateError, JsonNode, JsonWriter};
pub use push::{ProjectionError, PushStream, RxProjection};
pub use scalar::{
    AssetRef, Complex, FastStr, Matrix2, Matrix3, Principal, RxAsset, RxBoolean, RxComplex,
    RxDate, RxDateTime, RxDouble, RxEnum, RxFastString, RxHandle, RxInt32, RxInt64, RxJson,
    RxMatrix2, RxMatrix3, RxPrincipal, RxString, RxTime, RxValue, RxVector3, ScalarValue,
    Vector3,
};
pub use tree::{CellId, IndexHook, Liveness, Tree};
