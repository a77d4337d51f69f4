//! Diff engine: turns two texts into a retain/delete/insert edit script.
//!
//! Positions and counts are in Unicode scalar values (Rust `char`s), which is
//! also the unit `LoroText` uses for its default (unicode) indices.
//!
//! Replay semantics of a script against a source text:
//! - `Retain(n)` skips `n` characters unchanged
//! - `Delete(n)` removes `n` characters at the cursor (the cursor stays put)
//! - `Insert(s)` inserts `s` at the cursor and moves past it
//!
//! At a single offset a `Delete` is always emitted before the `Insert`, so a
//! replacement reads `Retain?, Delete, Insert` regardless of the order in which
//! the underlying diff reported the two spans.

use serde::{Deserialize, Serialize};
use similar::{Algorithm, DiffOp, capture_diff_slices_deadline};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Upper bound on time spent searching for a minimal diff. Past the deadline
/// the result is still a correct script, just not necessarily the smallest.
const DIFF_DEADLINE: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("Edit script consumes {consumed} characters but source has only {len}")]
    Inconsistent { consumed: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, DiffError>;

/// A single edit operation.
///
/// Serializes in the shape of a rich-text delta: `{"retain": 2}`,
/// `{"delete": 1}`, `{"insert": "X"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditOp {
    Retain(usize),
    Delete(usize),
    Insert(String),
}

/// Ordered sequence of [`EditOp`]s. Empty means "no change".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EditScript(Vec<EditOp>);

impl EditScript {
    pub fn new(ops: Vec<EditOp>) -> Self {
        Self(ops)
    }

    pub fn ops(&self) -> &[EditOp] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check that the script never reaches past the end of a source text of
    /// `source_len` characters.
    ///
    /// Must pass before any op is applied to a document, so a bad script is
    /// rejected as a whole instead of half-applied.
    pub fn validate(&self, source_len: usize) -> Result<()> {
        let mut consumed = 0usize;
        for op in &self.0 {
            match op {
                EditOp::Retain(n) | EditOp::Delete(n) => {
                    consumed = consumed.saturating_add(*n);
                    if consumed > source_len {
                        return Err(DiffError::Inconsistent {
                            consumed,
                            len: source_len,
                        });
                    }
                }
                EditOp::Insert(_) => {}
            }
        }
        Ok(())
    }

    /// Replay the script against `source` and return the resulting text.
    ///
    /// Characters past the last retained/deleted position are kept as-is.
    pub fn apply(&self, source: &str) -> Result<String> {
        let chars: Vec<char> = source.chars().collect();
        self.validate(chars.len())?;

        let mut out = String::with_capacity(source.len());
        let mut cursor = 0;
        for op in &self.0 {
            match op {
                EditOp::Retain(n) => {
                    out.extend(&chars[cursor..cursor + n]);
                    cursor += n;
                }
                EditOp::Delete(n) => cursor += n,
                EditOp::Insert(text) => out.push_str(text),
            }
        }
        out.extend(&chars[cursor..]);
        Ok(out)
    }
}

impl From<Vec<EditOp>> for EditScript {
    fn from(ops: Vec<EditOp>) -> Self {
        Self(ops)
    }
}

impl IntoIterator for EditScript {
    type Item = EditOp;
    type IntoIter = std::vec::IntoIter<EditOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a EditScript {
    type Item = &'a EditOp;
    type IntoIter = std::slice::Iter<'a, EditOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Compute the edit script that turns `before` into `after`.
///
/// Uses a character-level Myers diff. Identical inputs give an empty script.
pub fn compute_edit_script(before: &str, after: &str) -> EditScript {
    if before == after {
        return EditScript::default();
    }

    let old: Vec<char> = before.chars().collect();
    let new: Vec<char> = after.chars().collect();
    let deadline = Instant::now() + DIFF_DEADLINE;

    let mut builder = ScriptBuilder::default();
    for op in capture_diff_slices_deadline(Algorithm::Myers, &old, &new, Some(deadline)) {
        match op {
            DiffOp::Equal { len, .. } => builder.retain(len),
            DiffOp::Delete { old_len, .. } => builder.delete(old_len),
            DiffOp::Insert {
                new_index, new_len, ..
            } => builder.insert(&new[new_index..new_index + new_len]),
            DiffOp::Replace {
                old_len,
                new_index,
                new_len,
                ..
            } => {
                builder.delete(old_len);
                builder.insert(&new[new_index..new_index + new_len]);
            }
        }
    }
    builder.finish()
}

/// Coalesces diff spans into ops.
///
/// Deletes and inserts between two unchanged runs are buffered and flushed
/// together, delete first.
#[derive(Default)]
struct ScriptBuilder {
    ops: Vec<EditOp>,
    retain: usize,
    delete: usize,
    insert: String,
}

impl ScriptBuilder {
    fn retain(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.flush_edit();
        self.retain += n;
    }

    fn delete(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.flush_retain();
        self.delete += n;
    }

    fn insert(&mut self, chars: &[char]) {
        if chars.is_empty() {
            return;
        }
        self.flush_retain();
        self.insert.extend(chars);
    }

    fn flush_retain(&mut self) {
        if self.retain > 0 {
            self.ops.push(EditOp::Retain(self.retain));
            self.retain = 0;
        }
    }

    fn flush_edit(&mut self) {
        if self.delete > 0 {
            self.ops.push(EditOp::Delete(self.delete));
            self.delete = 0;
        }
        if !self.insert.is_empty() {
            self.ops.push(EditOp::Insert(std::mem::take(&mut self.insert)));
        }
    }

    fn finish(mut self) -> EditScript {
        self.flush_edit();
        // A trailing unchanged run only matters once something changed.
        if !self.ops.is_empty() {
            self.flush_retain();
        }
        EditScript(self.ops)
    }
}
