//! Primitive Scalar Cells
//!
//! Booleans, 32/64-bit integers, and doubles.
//!
//! Wire shapes are part of the client-sync contract: 64-bit integers are
//! JSON strings (so non-64-bit JSON consumers keep precision), 32-bit
//! integers and doubles are JSON numbers, booleans are JSON booleans.
//!
//! Arithmetic ops dirty the cell exactly when the result differs. Adding
//! zero or multiplying by one on the integer types returns before touching
//! the cell at all; no index trigger fires for them.

use crate::json::{JsonNode, JsonWriter};
use crate::scalar::value::{RxValue, ScalarValue};
use crate::tree::Tree;

impl ScalarValue for bool {
    fn write(&self, w: &mut JsonWriter) {
        w.write_bool(*self);
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        node.as_bool()
    }

    fn index_value(&self) -> Option<i32> {
        Some(if *self { 1 } else { 0 })
    }
}

impl ScalarValue for i32 {
    fn write(&self, w: &mut JsonWriter) {
        w.write_i32(*self);
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        node.as_i32()
    }

    fn index_value(&self) -> Option<i32> {
        Some(*self)
    }
}

impl ScalarValue for i64 {
    fn write(&self, w: &mut JsonWriter) {
        w.write_i64(*self);
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        node.as_i64()
    }

    /// Truncates: the index is 32-bit.
    fn index_value(&self) -> Option<i32> {
        Some(*self as i32)
    }
}

impl ScalarValue for f64 {
    fn write(&self, w: &mut JsonWriter) {
        w.write_f64(*self);
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        node.as_f64()
    }
}

impl RxValue<i32> {
    pub fn op_add_to(&self, tree: &mut Tree, delta: i32) {
        if delta == 0 {
            return;
        }
        let next = self.get(tree).wrapping_add(delta);
        self.set(tree, next);
    }

    pub fn op_mult_by(&self, tree: &mut Tree, factor: i32) {
        if factor == 1 {
            return;
        }
        let next = self.get(tree).wrapping_mul(factor);
        self.set(tree, next);
    }

    /// Increment, returning the new value.
    pub fn bump_up_pre(&self, tree: &mut Tree) -> i32 {
        let next = self.get(tree).wrapping_add(1);
        self.set(tree, next);
        next
    }

    /// Increment, returning the old value.
    pub fn bump_up_post(&self, tree: &mut Tree) -> i32 {
        let prior = self.get(tree);
        self.set(tree, prior.wrapping_add(1));
        prior
    }

    /// Decrement, returning the new value.
    pub fn bump_down_pre(&self, tree: &mut Tree) -> i32 {
        let next = self.get(tree).wrapping_sub(1);
        self.set(tree, next);
        next
    }

    /// Decrement, returning the old value.
    pub fn bump_down_post(&self, tree: &mut Tree) -> i32 {
        let prior = self.get(tree);
        self.set(tree, prior.wrapping_sub(1));
        prior
    }
}

impl RxValue<i64> {
    pub fn op_add_to(&self, tree: &mut Tree, delta: i64) {
        if delta == 0 {
            return;
        }
        let next = self.get(tree).wrapping_add(delta);
        self.set(tree, next);
    }

    pub fn op_mult_by(&self, tree: &mut Tree, factor: i64) {
        if factor == 1 {
            return;
        }
        let next = self.get(tree).wrapping_mul(factor);
        self.set(tree, next);
    }

    pub fn bump_up_pre(&self, tree: &mut Tree) -> i64 {
        let next = self.get(tree).wrapping_add(1);
        self.set(tree, next);
        next
    }

    pub fn bump_up_post(&self, tree: &mut Tree) -> i64 {
        let prior = self.get(tree);
        self.set(tree, prior.wrapping_add(1));
        prior
    }

    pub fn bump_down_pre(&self, tree: &mut Tree) -> i64 {
        let next = self.get(tree).wrapping_sub(1);
        self.set(tree, next);
        next
    }

    pub fn bump_down_post(&self, tree: &mut Tree) -> i64 {
        let prior = self.get(tree);
        self.set(tree, prior.wrapping_sub(1));
        prior
    }
}

impl RxValue<f64> {
    pub fn op_add_to(&self, tree: &mut Tree, delta: f64) {
        let next = self.get(tree) + delta;
        self.set(tree, next);
    }

    pub fn op_mult_by(&self, tree: &mut Tree, factor: f64) {
        let next = self.get(tree) * factor;
        self.set(tree, next);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::JsonWriter;
    use crate::scalar::{RxInt32, RxInt64};
    use crate::tree::Tree;

    #[test]
    fn bool_buckets_are_zero_and_one() {
        assert_eq!(false.index_value(), Some(0));
        assert_eq!(true.index_value(), Some(1));
    }

    #[test]
    fn i64_bucket_truncates() {
        let wide: i64 = (1 << 40) | 7;
        assert_eq!(wide.index_value(), Some(7));
    }

    #[test]
    fn i64_wire_shape_is_string() {
        let mut w = JsonWriter::new();
        42i64.write(&mut w);
        assert_eq!(w.as_str(), "\"42\"");
    }

    #[test]
    fn add_zero_is_a_no_op() {
        let mut tree = Tree::new();
        let cell = RxInt64::new(&mut tree, None, 10);
        cell.op_add_to(&mut tree, 0);
        assert!(!tree.is_dirty(cell.id()));
    }

    #[test]
    fn mult_by_one_is_a_no_op() {
        let mut tree = Tree::new();
        let cell = RxInt32::new(&mut tree, None, 10);
        cell.op_mult_by(&mut tree, 1);
        assert!(!tree.is_dirty(cell.id()));
    }

    #[test]
    fn bump_pre_and_post_disagree_on_return_value() {
        let mut tree = Tree::new();
        let cell = RxInt32::new(&mut tree, None, 5);
        assert_eq!(cell.bump_up_pre(&mut tree), 6);
        assert_eq!(cell.bump_up_post(&mut tree), 6);
        assert_eq!(cell.get(&tree), 7);
        assert_eq!(cell.bump_down_pre(&mut tree), 6);
        assert_eq!(cell.bump_down_post(&mut tree), 6);
        assert_eq!(cell.get(&tree), 5);
    }
}
