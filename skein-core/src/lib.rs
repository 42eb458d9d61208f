//! Core editor-state primitives: an immutable document representation,
//! change sets describing edits to it, and sets of tagged ranges that
//! track positions across those edits.
//!
//! - [`Text`] is the document: a balanced, structure-sharing tree of
//!   lines with cheap cloning and O(log n) position and line lookup.
//! - [`ChangeSet`] (and its text-less form [`ChangeDesc`]) is a
//!   run-length description of an edit. Change sets compose, invert, map
//!   positions, and rebase over each other, which is enough to build
//!   undo histories and collaborative editing on top.
//! - [`RangeSet`] holds tagged ranges (decorations, diagnostics, marks)
//!   over the document, supports mapping them through changes, and can
//!   efficiently compare configurations and enumerate spans for
//!   rendering.
//!
//! All values are immutable after construction; operations that "change"
//! them return new values sharing as much structure as possible, so they
//! can be freely shared across threads.

pub mod change;
pub mod column;
pub mod graphemes;
pub mod rangeset;
pub mod text;

pub use change::{ChangeDesc, ChangeSet, ChangeSpec, MapMode, Touched};
pub use rangeset::{
    Range, RangeComparator, RangeIter, RangeSet, RangeSetBuilder, RangeSetUpdate, RangeValue,
    SpanIterator,
};
pub use text::{Line, LinesIter, PartialIter, Text, TextIter};

use thiserror::Error;

/// Error produced when decoding the JSON form of a core value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JsonError {
    #[error("invalid JSON representation of a document")]
    Document,
    #[error("invalid JSON representation of a change description")]
    ChangeDesc,
    #[error("invalid JSON representation of a change set")]
    ChangeSet,
}
