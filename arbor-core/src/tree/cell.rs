//! Cells and Cell Identity
//!
//! Every piece of tracked state lives in one arena slot. Cells reference
//! each other only through [`CellId`]s: the parent back-link, the
//! subscriber list, and every container's children are ids, never owning
//! references. That is what lets parent/child/guard graphs form cycles
//! without leaking or double-freeing anything.
//!
//! # Why Generational Ids
//!
//! Subscriber links play the role of weak references: a container entry
//! can be deleted while a formula still lists it (or is listed by it).
//! A freed slot is reused with a bumped generation, so any stale id
//! resolves to `None` and gets pruned on the next fan-out instead of
//! silently pointing at an unrelated cell.

use smallvec::SmallVec;

use crate::container::grid::GridState;
use crate::container::list::ListState;
use crate::container::map::MapState;
use crate::container::maybe::MaybeState;
use crate::container::record::RecordState;
use crate::container::table::TableState;
use crate::formula::guard::GuardState;
use crate::formula::lazy::FormulaState;
use crate::push::projection::ProjectionState;
use crate::scalar::value::ScalarSlot;

/// Stable handle to one cell in the arena.
///
/// The `generation` disambiguates reuses of the same slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Liveness of a table row.
///
/// `Dying` is entered on delete-intent: the row stays readable until the
/// deletion commits. `Dead` rows are gone for every subscriber-visible
/// purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dying,
    Dead,
}

/// The closed set of cell shapes.
///
/// Scalars share a single boxed slot implementation; containers and the
/// memoization layer each get a tagged variant carrying their state.
pub enum CellKind {
    Scalar(Box<dyn ScalarSlot>),
    Maybe(MaybeState),
    Map(MapState),
    Grid(GridState),
    List(ListState),
    Record(RecordState),
    Table(TableState),
    Formula(FormulaState),
    Guard(GuardState),
    Projection(ProjectionState),
}

impl std::fmt::Debug for CellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CellKind::Scalar(_) => "Scalar",
            CellKind::Maybe(_) => "Maybe",
            CellKind::Map(_) => "Map",
            CellKind::Grid(_) => "Grid",
            CellKind::List(_) => "List",
            CellKind::Record(_) => "Record",
            CellKind::Table(_) => "Table",
            CellKind::Formula(_) => "Formula",
            CellKind::Guard(_) => "Guard",
            CellKind::Projection(_) => "Projection",
        };
        f.write_str(name)
    }
}

/// One arena slot's payload.
#[derive(Debug)]
pub struct CellNode {
    pub(crate) kind: CellKind,

    /// Non-owning back-reference, used only to bubble dirtiness, walk
    /// liveness, and seed generation numbers.
    pub(crate) parent: Option<CellId>,

    /// Ordered list of cells to invalidate when this one changes.
    /// Entries whose `raise_invalid` reports "drop me" are pruned during
    /// fan-out.
    pub(crate) subscribers: SmallVec<[CellId; 2]>,

    /// An uncommitted local mutation exists.
    pub(crate) dirty: bool,

    /// A transitive input changed; cached derived state is stale. Doubles
    /// as the fixed-point guard against cyclic invalidation.
    pub(crate) invalid: bool,

    /// Currently fanning out to subscribers; blocks unbounded synchronous
    /// recursion through this node.
    pub(crate) notifying: bool,
}

impl CellNode {
    pub(crate) fn new(kind: CellKind, parent: Option<CellId>) -> Self {
        Self {
            kind,
            parent,
            subscribers: SmallVec::new(),
            dirty: false,
            invalid: false,
            notifying: false,
        }
    }
}
