//! JSON Fragment Writer
//!
//! An append-only writer used for delta pairs and full snapshots.
//!
//! # How Separation Works
//!
//! The writer keeps a frame per nesting level recording whether anything
//! has been written at that level yet. `key` inserts the separating comma
//! for every field after the first; value writers insert it for every
//! array element after the first. A value written immediately after its
//! key never re-separates.
//!
//! The root level behaves like an object body: committing two fields into
//! the same writer yields `"a":1,"b":2`, and a writer nothing was emitted
//! into stays empty. Delta consumers rely on both.
//!
//! # Wire Shapes
//!
//! 64-bit integers are written as JSON *strings* so consumers without
//! 64-bit number support cannot silently lose precision. 32-bit integers
//! and doubles are JSON numbers, booleans are JSON booleans. A non-finite
//! double is written as `null`.

use smallvec::SmallVec;

/// Per-level separation state.
#[derive(Debug, Clone, Copy)]
struct Frame {
    wrote: bool,
}

/// An append-only JSON fragment writer.
#[derive(Debug)]
pub struct JsonWriter {
    out: String,
    frames: SmallVec<[Frame; 8]>,
    pending_key: bool,
}

impl JsonWriter {
    /// Create an empty writer positioned at the root level.
    pub fn new() -> Self {
        let mut frames = SmallVec::new();
        frames.push(Frame { wrote: false });
        Self {
            out: String::new(),
            frames,
            pending_key: false,
        }
    }

    /// Everything written so far.
    pub fn as_str(&self) -> &str {
        &self.out
    }

    /// Consume the writer, returning the accumulated fragment.
    pub fn into_string(self) -> String {
        self.out
    }

    /// True if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("writer frame stack underflow")
    }

    /// Comma handling for a value position. A value directly following its
    /// key was already separated by `key`.
    fn separate_value(&mut self) {
        if self.pending_key {
            self.pending_key = false;
            return;
        }
        let frame = self.frame_mut();
        let wrote = frame.wrote;
        frame.wrote = true;
        if wrote {
            self.out.push(',');
        }
    }

    /// Write `"name":`, separating from any previous field at this level.
    pub fn key(&mut self, name: &str) {
        let frame = self.frame_mut();
        let wrote = frame.wrote;
        frame.wrote = true;
        if wrote {
            self.out.push(',');
        }
        self.out.push('"');
        escape_into(&mut self.out, name);
        self.out.push_str("\":");
        self.pending_key = true;
    }

    /// Open an object value.
    pub fn begin_object(&mut self) {
        self.separate_value();
        self.out.push('{');
        self.frames.push(Frame { wrote: false });
    }

    /// Close the innermost object.
    pub fn end_object(&mut self) {
        self.frames.pop();
        self.out.push('}');
    }

    /// Open an array value.
    pub fn begin_array(&mut self) {
        self.separate_value();
        self.out.push('[');
        self.frames.push(Frame { wrote: false });
    }

    /// Close the innermost array.
    pub fn end_array(&mut self) {
        self.frames.pop();
        self.out.push(']');
    }

    pub fn write_null(&mut self) {
        self.separate_value();
        self.out.push_str("null");
    }

    pub fn write_bool(&mut self, value: bool) {
        self.separate_value();
        self.out.push_str(if value { "true" } else { "false" });
    }

    pub fn write_i32(&mut self, value: i32) {
        use std::fmt::Write;
        self.separate_value();
        let _ = write!(self.out, "{value}");
    }

    /// 64-bit integers go out as strings.
    pub fn write_i64(&mut self, value: i64) {
        use std::fmt::Write;
        self.separate_value();
        let _ = write!(self.out, "\"{value}\"");
    }

    pub fn write_f64(&mut self, value: f64) {
        self.separate_value();
        if value.is_finite() {
            // Always a valid JSON number: integral doubles print without
            // an exponent or trailing fraction.
            let mut text = format!("{value}");
            if text == "-0" {
                text = "0".to_string();
            }
            self.out.push_str(&text);
        } else {
            self.out.push_str("null");
        }
    }

    pub fn write_str(&mut self, value: &str) {
        self.separate_value();
        self.out.push('"');
        escape_into(&mut self.out, value);
        self.out.push('"');
    }

    /// Splice a pre-rendered JSON value (e.g. a serialized blob) as-is.
    pub fn write_raw(&mut self, fragment: &str) {
        self.separate_value();
        self.out.push_str(fragment);
    }
}

impl Default for JsonWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON string escaping: quote, backslash, and control characters.
fn escape_into(out: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
