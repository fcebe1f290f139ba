//! Integration Tests for the Cell Tree
//!
//! Cross-cutting scenarios: whole-document delta emission, revert
//! semantics, guard-filtered invalidation feeding a push projection, and
//! property tests for the fractional list.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;

use arbor_core::{
    CellCtor, JsonWriter, Liveness, MapKeyKind, ProjectionError, PushStream, RecordSchema,
    RxBoolean, RxInt64, RxLazy, RxList, RxMap, RxProjection, RxRecord, RxString, RxTable, Tree,
};

fn commit_cell(tree: &mut Tree, id: arbor_core::CellId, name: &str) -> (String, String) {
    let mut fwd = JsonWriter::new();
    let mut rev = JsonWriter::new();
    tree.commit(id, name, &mut fwd, &mut rev);
    (fwd.into_string(), rev.into_string())
}

#[test]
fn boolean_commit_matches_the_wire_contract() {
    let mut tree = Tree::new();
    let flag = RxBoolean::new(&mut tree, None, false);
    flag.set(&mut tree, true);

    let (fwd, rev) = commit_cell(&mut tree, flag.id(), "v");
    assert_eq!(fwd, "\"v\":true");
    assert_eq!(rev, "\"v\":false");

    let (fwd, rev) = commit_cell(&mut tree, flag.id(), "v2");
    assert!(fwd.is_empty());
    assert!(rev.is_empty());
}

#[test]
fn int64_commit_is_string_encoded() {
    let mut tree = Tree::new();
    let counter = RxInt64::new(&mut tree, None, 42);
    counter.set(&mut tree, 60);

    let (fwd, rev) = commit_cell(&mut tree, counter.id(), "v");
    assert_eq!(fwd, "\"v\":\"60\"");
    assert_eq!(rev, "\"v\":\"42\"");
}

fn doc_schema() -> Rc<RecordSchema> {
    RecordSchema::new(vec![
        ("title".to_string(), CellCtor::Text(String::new())),
        (
            "scores".to_string(),
            CellCtor::Map {
                keys: MapKeyKind::Int,
                of: Box::new(CellCtor::Int64(0)),
            },
        ),
    ])
}

#[test]
fn whole_document_commits_one_nested_delta() {
    let mut tree = Tree::new();
    let doc = RxRecord::new(&mut tree, None, doc_schema());
    let title: RxString = doc.field(&tree, "title").unwrap();
    let scores: RxMap<RxInt64> = doc.field(&tree, "scores").unwrap();

    title.set(&mut tree, "hello".to_string());
    scores.get_or_create(&mut tree, 42).set(&mut tree, 52);

    let (fwd, rev) = commit_cell(&mut tree, doc.id(), "doc");
    assert_eq!(
        fwd,
        "\"doc\":{\"title\":\"hello\",\"scores\":{\"42\":\"52\"}}"
    );
    assert_eq!(rev, "\"doc\":{\"title\":\"\",\"scores\":{\"42\":null}}");

    // Applying the forward delta to a fresh tree reproduces the state.
    let mut other = Tree::new();
    let copy = RxRecord::new(&mut other, None, doc_schema());
    other
        .insert_json(copy.id(), "{\"title\":\"hello\",\"scores\":{\"42\":\"52\"}}")
        .unwrap();
    let copy_scores: RxMap<RxInt64> = copy.field(&other, "scores").unwrap();
    assert_eq!(copy_scores.lookup(&mut other, 42).unwrap().get(&other), 52);
    assert!(!other.is_dirty(copy.id()));
}

#[test]
fn revert_restores_and_reinvalidates_downstream() {
    let mut tree = Tree::new();
    let value = RxInt64::new(&mut tree, None, 7);
    let runs = Rc::new(Cell::new(0));
    let runs_in = runs.clone();
    let derived = RxLazy::new(&mut tree, None, move |t| {
        runs_in.set(runs_in.get() + 1);
        value.get(t) * 2
    });
    tree.subscribe(value.id(), derived.id());

    assert_eq!(derived.get(&mut tree), 14);
    value.set(&mut tree, 9);
    assert_eq!(derived.get(&mut tree), 18);
    assert_eq!(runs.get(), 2);

    // Revert restores the pre-mutation value and still forces downstream
    // to drop cached intermediates, even though nothing changed net.
    value.set(&mut tree, 11);
    tree.revert(value.id());
    assert_eq!(value.get(&tree), 9);
    assert!(!tree.is_dirty(value.id()));
    assert_eq!(derived.get(&mut tree), 18);
    assert_eq!(runs.get(), 3);
}

#[test]
fn map_resurrection_round_trip_is_a_net_no_op() {
    let mut tree = Tree::new();
    let map: RxMap<RxInt64> = RxMap::new(&mut tree, None, MapKeyKind::Int, CellCtor::Int64(0));
    map.get_or_create(&mut tree, 42).set(&mut tree, 52);
    commit_cell(&mut tree, map.id(), "m");

    map.remove(&mut tree, 42);
    let back = map.get_or_create(&mut tree, 42);
    assert_eq!(back.get(&tree), 52);

    let (fwd, rev) = commit_cell(&mut tree, map.id(), "m");
    assert!(fwd.is_empty());
    assert!(rev.is_empty());
}

#[test]
fn table_rows_die_through_the_full_lifecycle() {
    let mut tree = Tree::new();
    let schema = RecordSchema::new(vec![("score".to_string(), CellCtor::Int64(0))]);
    let table = RxTable::new(&mut tree, None, schema, Vec::new());
    let (pk, row) = table.create(&mut tree);
    row.field::<RxInt64>(&tree, "score")
        .unwrap()
        .set(&mut tree, 3);
    commit_cell(&mut tree, table.id(), "t");

    table.delete(&mut tree, pk);
    assert_eq!(
        table.lookup(&mut tree, pk).unwrap().liveness(&tree),
        Liveness::Dying
    );

    let (fwd, rev) = commit_cell(&mut tree, table.id(), "t");
    assert_eq!(fwd, format!("\"t\":{{\"{pk}\":null}}"));
    assert_eq!(rev, format!("\"t\":{{\"{pk}\":{{\"score\":\"3\"}}}}"));
    assert!(table.lookup(&mut tree, pk).is_none());
}

#[derive(Clone, Default)]
struct Sink {
    sent: Rc<RefCell<Vec<String>>>,
    cancelled: Rc<Cell<bool>>,
}

impl PushStream for Sink {
    fn next(&mut self, payload: String) {
        self.sent.borrow_mut().push(payload);
    }

    fn failure(&mut self, _error: ProjectionError) {}

    fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

#[test]
fn guarded_formula_feeds_a_projection() {
    let mut tree = Tree::new();
    let schema = RecordSchema::new(vec![("score".to_string(), CellCtor::Int64(0))]);
    let table = RxTable::new(&mut tree, None, schema, Vec::new());
    let (pk_a, row_a) = table.create(&mut tree);
    let (_pk_b, row_b) = table.create(&mut tree);
    row_a
        .field::<RxInt64>(&tree, "score")
        .unwrap()
        .set(&mut tree, 1);
    row_b
        .field::<RxInt64>(&tree, "score")
        .unwrap()
        .set(&mut tree, 2);
    commit_cell(&mut tree, table.id(), "t");

    // The formula reads only row A, guarded.
    let watched = RxLazy::new(&mut tree, None, move |t| {
        table
            .lookup(t, pk_a)
            .and_then(|row| row.field::<RxInt64>(t, "score"))
            .map(|score| score.get(t))
            .unwrap_or(0)
    });
    watched.guard(&mut tree, table.id());

    let sink = Sink::default();
    let watched_in = watched.clone();
    let projection = RxProjection::new(&mut tree, None, Box::new(sink.clone()), move |t| {
        Ok(format!("{{\"score\":\"{}\"}}", watched_in.get(t)))
    });
    tree.subscribe(watched.id(), projection.id());

    projection.ping(&mut tree);
    assert_eq!(sink.sent.borrow().len(), 1);

    // Row B changes: suppressed by the guard, no delivery.
    row_b
        .field::<RxInt64>(&tree, "score")
        .unwrap()
        .set(&mut tree, 20);
    projection.ping(&mut tree);
    assert_eq!(sink.sent.borrow().len(), 1);

    // Row A changes: the guard fires and the projection delivers.
    row_a
        .field::<RxInt64>(&tree, "score")
        .unwrap()
        .set(&mut tree, 10);
    projection.ping(&mut tree);
    assert_eq!(sink.sent.borrow().len(), 2);
    assert_eq!(sink.sent.borrow().last().unwrap(), "{\"score\":\"10\"}");
}

#[test]
fn cost_accrues_per_recompute() {
    let mut tree = Tree::new();
    let value = RxInt64::new(&mut tree, None, 1);
    let doubled = RxLazy::new(&mut tree, None, move |t| value.get(t) * 2);
    tree.subscribe(value.id(), doubled.id());

    doubled.get(&mut tree);
    assert_eq!(tree.take_cost(), 1);

    doubled.get(&mut tree); // cached
    assert_eq!(tree.take_cost(), 0);

    value.set(&mut tree, 2);
    doubled.get(&mut tree);
    assert_eq!(tree.take_cost(), 1);
}

// ----------------------------------------------------------------------------
// Properties
// ----------------------------------------------------------------------------

proptest! {
    /// Pre-existing entries never change relative order, no matter what
    /// mix of appends and bisections runs (including redistributions).
    #[test]
    fn insertion_sequences_preserve_relative_order(
        choices in proptest::collection::vec(0usize..3, 1..40)
    ) {
        let mut tree = Tree::new();
        let list: RxList<RxInt64> =
            RxList::new(&mut tree, None, CellCtor::Int64(0));

        let mut stamp: i64 = 0;
        let (_, first) = list.append(&mut tree);
        stamp += 1;
        first.set(&mut tree, stamp);

        let mut anchor = 0.0;
        for choice in choices {
            let before: Vec<i64> = list
                .iterate(&tree)
                .iter()
                .map(|(_, c)| c.get(&tree))
                .collect();
            let inserted = match choice {
                0 => Some(list.append(&mut tree)),
                1 => list.insert_after(&mut tree, anchor),
                _ => list.insert_before(&mut tree, anchor),
            };
            if let Some((at, cell)) = inserted {
                anchor = at;
                stamp += 1;
                cell.set(&mut tree, stamp);
            }

            let after: Vec<i64> = list
                .iterate(&tree)
                .iter()
                .map(|(_, c)| c.get(&tree))
                .collect();
            let surviving: Vec<i64> = after
                .iter()
                .copied()
                .filter(|v| before.contains(v))
                .collect();
            prop_assert_eq!(surviving, before);
        }
    }

    /// Keep bisecting the tightest gap: once redistribution runs, every
    /// gap is exactly the spacing constant starting from zero.
    #[test]
    fn redistribution_restores_exact_spacing(extra in 0usize..6) {
        let mut tree = Tree::new();
        let list: RxList<RxInt64> =
            RxList::new(&mut tree, None, CellCtor::Int64(0));
        list.append(&mut tree);
        for _ in 0..extra {
            list.append(&mut tree);
        }

        let mut rounds = 0;
        loop {
            let positions: Vec<f64> =
                list.iterate(&tree).iter().map(|(p, _)| *p).collect();
            let spaced = positions.first() == Some(&0.0)
                && positions
                    .windows(2)
                    .all(|w| (w[1] - w[0] - arbor_core::container::SPACING).abs() < 1e-9);
            if spaced && rounds > 12 {
                break;
            }
            let tightest = positions
                .windows(2)
                .min_by(|a, b| (a[1] - a[0]).partial_cmp(&(b[1] - b[0])).unwrap())
                .map(|w| w[0])
                .unwrap_or(positions[0]);
            list.insert_after(&mut tree, tightest);
            rounds += 1;
            prop_assert!(rounds < 64, "redistribution never restored spacing");
        }
    }

    /// Commit deltas for strings always parse as JSON object bodies.
    #[test]
    fn string_commits_always_parse(text in "\\PC*") {
        let mut tree = Tree::new();
        let cell = RxString::new(&mut tree, None, String::new());
        cell.set(&mut tree, text.clone());

        let mut fwd = JsonWriter::new();
        let mut rev = JsonWriter::new();
        tree.commit(cell.id(), "s", &mut fwd, &mut rev);
        if !fwd.is_empty() {
            let wrapped = format!("{{{}}}", fwd.as_str());
            let parsed: serde_json::Value =
                serde_json::from_str(&wrapped).expect("forward delta parses");
            prop_assert_eq!(parsed["s"].as_str(), Some(text.as_str()));
        }
    }
}
