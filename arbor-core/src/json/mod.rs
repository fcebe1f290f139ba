//! JSON Read/Write Capability
//!
//! This module provides the two primitives the cell tree uses to talk to
//! the outside world: an append-only fragment writer for delta and snapshot
//! emission, and a tolerant reader for hydration.
//!
//! The writer produces *fragments*, not documents: a commit on a single
//! field emits `"name":value` with no surrounding braces, because the
//! caller owns the enclosing object. The reader wraps an already-parsed
//! `serde_json::Value` and never fails on unexpected shapes: accessors
//! return `Option` so hydration can skip a bad value and continue.

mod writer;
mod reader;

pub use writer::JsonWriter;
pub use reader::{HydrateError, JsonNode};
