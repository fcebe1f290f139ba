//! Child Construction
//!
//! Containers build children on demand. What a container holds is
//! described by a [`CellCtor`]: a closed tag carrying the seed value (for
//! scalars) or the nested shape (for composite children). Construction is
//! a plain match; there are no runtime type tests anywhere.
//!
//! Records are the one eager case: a record allocates every field up
//! front, in schema order, because its delta emission order is the schema
//! order.

use std::rc::Rc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};

use crate::container::grid::GridState;
use crate::container::list::ListState;
use crate::container::map::{MapKeyKind, MapState};
use crate::container::maybe::MaybeState;
use crate::container::record::RecordState;
use crate::container::table::TableState;
use crate::scalar::misc::EnumSlot;
use crate::scalar::value::ValueState;
use crate::scalar::{AssetRef, Complex, FastStr, Matrix2, Matrix3, Principal, Vector3};
use crate::tree::{CellId, CellKind, Tree};

/// Field layout of a record (and of a table's rows).
#[derive(Debug, Clone)]
pub struct RecordSchema {
    pub fields: Vec<(String, CellCtor)>,
}

impl RecordSchema {
    pub fn new(fields: Vec<(String, CellCtor)>) -> Rc<Self> {
        Rc::new(Self { fields })
    }

    pub fn field_position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }
}

/// Constructor capability: what to build when a container needs a child.
#[derive(Debug, Clone)]
pub enum CellCtor {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Text(String),
    FastText(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<FixedOffset>),
    Principal(Principal),
    Complex(Complex),
    Vector3(Vector3),
    Matrix2(Matrix2),
    Matrix3(Matrix3),
    Asset(AssetRef),
    Enum { default: i32, repair: fn(i32) -> i32 },
    Json(serde_json::Value),
    Maybe(Box<CellCtor>),
    Map { keys: MapKeyKind, of: Box<CellCtor> },
    Grid(Box<CellCtor>),
    List(Box<CellCtor>),
    Record(Rc<RecordSchema>),
    Table { schema: Rc<RecordSchema>, indexed: Vec<String> },
}

impl CellCtor {
    /// Allocate a fresh cell of this shape under `parent`.
    pub fn construct(&self, tree: &mut Tree, parent: Option<CellId>) -> CellId {
        match self {
            CellCtor::Boolean(seed) => scalar(tree, parent, *seed),
            CellCtor::Int32(seed) => scalar(tree, parent, *seed),
            CellCtor::Int64(seed) => scalar(tree, parent, *seed),
            CellCtor::Double(seed) => scalar(tree, parent, *seed),
            CellCtor::Text(seed) => scalar(tree, parent, seed.clone()),
            CellCtor::FastText(seed) => scalar(tree, parent, FastStr::new(seed.clone())),
            CellCtor::Date(seed) => scalar(tree, parent, *seed),
            CellCtor::Time(seed) => scalar(tree, parent, *seed),
            CellCtor::DateTime(seed) => scalar(tree, parent, *seed),
            CellCtor::Principal(seed) => scalar(tree, parent, seed.clone()),
            CellCtor::Complex(seed) => scalar(tree, parent, *seed),
            CellCtor::Vector3(seed) => scalar(tree, parent, *seed),
            CellCtor::Matrix2(seed) => scalar(tree, parent, *seed),
            CellCtor::Matrix3(seed) => scalar(tree, parent, *seed),
            CellCtor::Asset(seed) => scalar(tree, parent, seed.clone()),
            CellCtor::Json(seed) => scalar(tree, parent, seed.clone()),
            CellCtor::Enum { default, repair } => tree.alloc(
                CellKind::Scalar(Box::new(EnumSlot::new(*default, *repair))),
                parent,
            ),
            CellCtor::Maybe(of) => {
                tree.alloc(CellKind::Maybe(MaybeState::new((**of).clone())), parent)
            }
            CellCtor::Map { keys, of } => tree.alloc(
                CellKind::Map(MapState::new(*keys, (**of).clone())),
                parent,
            ),
            CellCtor::Grid(of) => {
                tree.alloc(CellKind::Grid(GridState::new((**of).clone())), parent)
            }
            CellCtor::List(of) => {
                tree.alloc(CellKind::List(ListState::new((**of).clone())), parent)
            }
            CellCtor::Record(schema) => construct_record(tree, parent, schema.clone(), None),
            CellCtor::Table { schema, indexed } => tree.alloc(
                CellKind::Table(TableState::new(schema.clone(), indexed.clone())),
                parent,
            ),
        }
    }
}

fn scalar<T: crate::scalar::ScalarValue>(tree: &mut Tree, parent: Option<CellId>, seed: T) -> CellId {
    tree.alloc(CellKind::Scalar(Box::new(ValueState::new(seed))), parent)
}

/// Records allocate all fields eagerly, in schema order. `pk` is set for
/// table rows.
pub(crate) fn construct_record(
    tree: &mut Tree,
    parent: Option<CellId>,
    schema: Rc<RecordSchema>,
    pk: Option<i64>,
) -> CellId {
    let record = tree.alloc(CellKind::Record(RecordState::new(schema.clone(), pk)), parent);
    let mut fields = Vec::with_capacity(schema.fields.len());
    for (name, ctor) in &schema.fields {
        let child = ctor.construct(tree, Some(record));
        fields.push((name.clone(), child));
    }
    if let Some(state) = tree.record_state_mut(record) {
        state.fields = fields;
    }
    record
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::RxHandle;
    use crate::scalar::RxInt64;

    #[test]
    fn scalar_ctor_seeds_value() {
        let mut tree = Tree::new();
        let id = CellCtor::Int64(42).construct(&mut tree, None);
        let cell = <RxInt64 as RxHandle>::wrap(id);
        assert_eq!(cell.get(&tree), 42);
        assert!(!tree.is_dirty(id));
    }

    #[test]
    fn record_ctor_builds_fields_in_schema_order() {
        let mut tree = Tree::new();
        let schema = RecordSchema::new(vec![
            ("a".to_string(), CellCtor::Int32(1)),
            ("b".to_string(), CellCtor::Boolean(false)),
        ]);
        let id = CellCtor::Record(schema).construct(&mut tree, None);
        let state = tree.record_state(id).unwrap();
        let names: Vec<&str> = state.fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
