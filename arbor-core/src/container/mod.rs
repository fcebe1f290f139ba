//! Composite Containers
//!
//! Cells that own other cells: the optional-value wrapper, the keyed map,
//! the sparse 2D grid, the fractionally-ordered list, records, and
//! tables. All of them share the transaction shape (transient
//! created/deleted bookkeeping beside the committed collection, cleared
//! exactly at commit and exactly at revert) and construct their children
//! through a [`ctor::CellCtor`] capability.

pub mod ctor;
pub mod grid;
pub mod list;
pub mod map;
pub mod maybe;
pub mod record;
pub mod table;

pub use ctor::{CellCtor, RecordSchema};
pub use grid::{GridAt, RxGrid};
pub use list::{RxList, MIN_GAP, SPACING};
pub use map::{MapKey, MapKeyKind, RxMap};
pub use maybe::RxMaybe;
pub use record::RxRecord;
pub use table::RxTable;
