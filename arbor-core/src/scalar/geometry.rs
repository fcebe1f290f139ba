//! Numeric Composite Cells
//!
//! Complex numbers, 3-vectors, and small square matrices. These are plain
//! value payloads: a whole matrix commits as one field, there is no
//! per-component tracking.
//!
//! Wire shapes: complex is `{"r":…,"i":…}`; a vector is `[x,y,z]`;
//! matrices are row-major nested arrays.

use crate::json::{JsonNode, JsonWriter};
use crate::scalar::value::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex {
    pub r: f64,
    pub i: f64,
}

impl Complex {
    pub fn new(r: f64, i: f64) -> Self {
        Self { r, i }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Row-major 2×2 matrix.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Matrix2(pub [[f64; 2]; 2]);

/// Row-major 3×3 matrix.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Matrix3(pub [[f64; 3]; 3]);

impl Matrix2 {
    pub fn identity() -> Self {
        Self([[1.0, 0.0], [0.0, 1.0]])
    }
}

impl Matrix3 {
    pub fn identity() -> Self {
        Self([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }
}

impl ScalarValue for Complex {
    fn write(&self, w: &mut JsonWriter) {
        w.begin_object();
        w.key("r");
        w.write_f64(self.r);
        w.key("i");
        w.write_f64(self.i);
        w.end_object();
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        Some(Self {
            r: node.get("r")?.as_f64()?,
            i: node.get("i")?.as_f64()?,
        })
    }
}

impl ScalarValue for Vector3 {
    fn write(&self, w: &mut JsonWriter) {
        w.begin_array();
        w.write_f64(self.x);
        w.write_f64(self.y);
        w.write_f64(self.z);
        w.end_array();
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        let mut parts = node.elements();
        let x = parts.next()?.as_f64()?;
        let y = parts.next()?.as_f64()?;
        let z = parts.next()?.as_f64()?;
        Some(Self { x, y, z })
    }
}

fn write_rows<const N: usize>(w: &mut JsonWriter, rows: &[[f64; N]]) {
    w.begin_array();
    for row in rows {
        w.begin_array();
        for cell in row {
            w.write_f64(*cell);
        }
        w.end_array();
    }
    w.end_array();
}

fn read_rows<const N: usize>(node: &JsonNode<'_>) -> Option<Vec<[f64; N]>> {
    let mut rows = Vec::new();
    for row_node in node.elements() {
        let mut row = [0.0; N];
        let mut count = 0;
        for (slot, value) in row.iter_mut().zip(row_node.elements()) {
            *slot = value.as_f64()?;
            count += 1;
        }
        if count != N {
            return None;
        }
        rows.push(row);
    }
    Some(rows)
}

impl ScalarValue for Matrix2 {
    fn write(&self, w: &mut JsonWriter) {
        write_rows(w, &self.0);
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        let rows = read_rows::<2>(node)?;
        let rows: [[f64; 2]; 2] = rows.try_into().ok()?;
        Some(Self(rows))
    }
}

impl ScalarValue for Matrix3 {
    fn write(&self, w: &mut JsonWriter) {
        write_rows(w, &self.0);
    }

    fn read(node: &JsonNode<'_>) -> Option<Self> {
        let rows = read_rows::<3>(node)?;
        let rows: [[f64; 3]; 3] = rows.try_into().ok()?;
        Some(Self(rows))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
