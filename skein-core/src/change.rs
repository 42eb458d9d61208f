//! Change sets: compact, composable descriptions of document edits.
//!
//! A [`ChangeDesc`] encodes an edit as a run-length sequence of sections
//! over the old document. Each section is a `(len, ins)` pair: `ins == -1`
//! keeps `len` units unchanged, `ins == 0` deletes them, and `ins > 0`
//! replaces them with `ins` units of new content. A [`ChangeSet`] adds the
//! actual inserted [`Text`] per section, which makes it applicable and
//! invertible.
//!
//! Change sets support composition (sequencing two edits into one),
//! position mapping, and rebasing one edit over another ([`ChangeSet::map`]),
//! which gives the operational-transformation identity: for changes `a`
//! and `b` starting in the same document,
//! `a.compose(&b.map(a.desc(), false))` and
//! `b.compose(&a.map(b.desc(), true))` produce the same document.

use once_cell::sync::Lazy;
use regex::Regex;
use smartstring::alias::String as SmartString;
use std::fmt;

use crate::text::Text;
use crate::JsonError;

/// How a position is mapped through the deleted/replaced regions of a
/// change set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Map the position to a valid new position, even when its context
    /// was deleted.
    Simple,
    /// Return `None` when the character *at* the position was deleted.
    TrackDel,
    /// Return `None` when the character before the position was deleted.
    TrackBefore,
    /// Return `None` when the character after the position was deleted.
    TrackAfter,
}

/// The result of [`ChangeDesc::touches_range`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touched {
    /// No replaced section intersects the range.
    No,
    /// Some replaced section intersects the range.
    Yes,
    /// A single replaced section strictly contains the range.
    Cover,
}

static DEFAULT_SPLIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\r\n?|\n").expect("valid line break pattern")
});

/// A description of a document change, without the inserted text. Stores
/// only section lengths, so it is cheap to keep around (for example in an
/// undo history, or to replay position mapping).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDesc {
    sections: Vec<i32>,
}

impl ChangeDesc {
    fn new(sections: Vec<i32>) -> ChangeDesc {
        ChangeDesc { sections }
    }

    /// Build a description directly from `(len, ins)` section pairs laid
    /// out flat. Mostly useful for tests and deserialization; the pairs
    /// are not re-validated.
    pub fn create(sections: Vec<i32>) -> ChangeDesc {
        ChangeDesc::new(sections)
    }

    /// The length of the document before the change.
    pub fn len(&self) -> usize {
        let mut result = 0i32;
        let mut i = 0;
        while i < self.sections.len() {
            result += self.sections[i];
            i += 2;
        }
        result as usize
    }

    /// The length of the document after the change.
    pub fn len_after(&self) -> usize {
        let mut result = 0i32;
        let mut i = 0;
        while i < self.sections.len() {
            let ins = self.sections[i + 1];
            result += if ins < 0 { self.sections[i] } else { ins };
            i += 2;
        }
        result as usize
    }

    /// `true` when there are no actual changes in this description.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() || self.sections.len() == 2 && self.sections[1] < 0
    }

    /// Call `f(pos_a, pos_b, len)` for every unchanged section, with the
    /// section's position in the old and new document.
    pub fn iter_gaps(&self, mut f: impl FnMut(usize, usize, usize)) {
        let (mut pos_a, mut pos_b) = (0i32, 0i32);
        let mut i = 0;
        while i < self.sections.len() {
            let len = self.sections[i];
            let ins = self.sections[i + 1];
            i += 2;
            if ins < 0 {
                f(pos_a as usize, pos_b as usize, len as usize);
                pos_b += len;
            } else {
                pos_b += ins;
            }
            pos_a += len;
        }
    }

    /// Call `f(from_a, to_a, from_b, to_b)` for every changed range.
    /// Adjacent replacements are merged unless `individual` is set (they
    /// are kept as separate sections internally because position mapping
    /// treats them as individual changes).
    pub fn iter_changed_ranges(
        &self,
        individual: bool,
        mut f: impl FnMut(usize, usize, usize, usize),
    ) {
        iter_changes(&self.sections, &[], individual, &mut |from_a, to_a, from_b, to_b, _| {
            f(from_a, to_a, from_b, to_b)
        });
    }

    /// The description of the inverse change.
    pub fn inverted_desc(&self) -> ChangeDesc {
        let mut sections = Vec::with_capacity(self.sections.len());
        let mut i = 0;
        while i < self.sections.len() {
            let len = self.sections[i];
            let ins = self.sections[i + 1];
            i += 2;
            if ins < 0 {
                sections.push(len);
                sections.push(ins);
            } else {
                sections.push(ins);
                sections.push(len);
            }
        }
        ChangeDesc::new(sections)
    }

    /// Compute the combined effect of applying this change followed by
    /// `other`.
    ///
    /// # Panics
    ///
    /// Panics when `other` does not start in the document this change
    /// produces.
    pub fn compose_desc(&self, other: &ChangeDesc) -> ChangeDesc {
        if self.is_empty() {
            other.clone()
        } else if other.is_empty() {
            self.clone()
        } else {
            let (sections, _) = compose_sets(self.view(), other.view(), false);
            ChangeDesc::new(sections)
        }
    }

    /// Map this description over `other`, which is assumed to start in
    /// the same document, producing a description applicable to the
    /// document `other` creates. `before` orders this change before
    /// `other` where the two insert at the same position.
    pub fn map_desc(&self, other: &ChangeDesc, before: bool) -> ChangeDesc {
        if other.is_empty() {
            self.clone()
        } else {
            let (sections, _) = map_set(self.view(), other.view(), before, false);
            ChangeDesc::new(sections)
        }
    }

    /// Map a position through this change, with `assoc` deciding which
    /// side of an insertion at exactly that position it lands on
    /// (negative: before, the default behavior; positive or zero: after).
    ///
    /// # Panics
    ///
    /// Panics when `pos` is beyond the length of the old document.
    pub fn map_pos(&self, pos: usize, assoc: i32) -> usize {
        match self.map_pos_mode(pos, assoc, MapMode::Simple) {
            Some(mapped) => mapped,
            // Simple mapping always produces a position.
            None => unreachable!(),
        }
    }

    /// Map a position, returning `None` when the given [`MapMode`]
    /// considers it deleted.
    ///
    /// # Panics
    ///
    /// Panics when `pos` is beyond the length of the old document.
    pub fn map_pos_mode(&self, pos: usize, assoc: i32, mode: MapMode) -> Option<usize> {
        let pos = pos as i32;
        let (mut pos_a, mut pos_b) = (0i32, 0i32);
        let mut i = 0;
        while i < self.sections.len() {
            let len = self.sections[i];
            let ins = self.sections[i + 1];
            i += 2;
            let end_a = pos_a + len;
            if ins < 0 {
                if end_a > pos {
                    return Some((pos_b + (pos - pos_a)) as usize);
                }
                pos_b += len;
            } else {
                if mode != MapMode::Simple
                    && end_a >= pos
                    && (mode == MapMode::TrackDel && pos_a < pos && end_a > pos
                        || mode == MapMode::TrackBefore && pos_a < pos
                        || mode == MapMode::TrackAfter && end_a > pos)
                {
                    return None;
                }
                if end_a > pos || end_a == pos && assoc < 0 && len == 0 {
                    return Some(if pos == pos_a || assoc < 0 {
                        pos_b as usize
                    } else {
                        (pos_b + ins) as usize
                    });
                }
                pos_b += ins;
            }
            pos_a = end_a;
        }
        if pos > pos_a {
            panic!("position {pos} is out of range for change set of length {pos_a}");
        }
        Some(pos_b as usize)
    }

    /// Check whether any replaced section touches the range `[from, to]`,
    /// and whether one strictly contains it.
    pub fn touches_range(&self, from: usize, to: usize) -> Touched {
        let (from, to) = (from as i32, to as i32);
        let mut pos = 0i32;
        let mut i = 0;
        while i < self.sections.len() && pos <= to {
            let len = self.sections[i];
            let ins = self.sections[i + 1];
            i += 2;
            let end = pos + len;
            if ins >= 0 && pos <= to && end >= from {
                return if pos < from && end > to {
                    Touched::Cover
                } else {
                    Touched::Yes
                };
            }
            pos = end;
        }
        Touched::No
    }

    /// The JSON form: the flat `[len, ins, len, ins, …]` array.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.sections
                .iter()
                .map(|&n| serde_json::Value::from(n))
                .collect(),
        )
    }

    /// Decode a description from its JSON form.
    pub fn from_json(json: &serde_json::Value) -> Result<ChangeDesc, JsonError> {
        let serde_json::Value::Array(parts) = json else {
            return Err(JsonError::ChangeDesc);
        };
        if parts.len() % 2 != 0 {
            return Err(JsonError::ChangeDesc);
        }
        let mut sections = Vec::with_capacity(parts.len());
        for part in parts {
            let Some(n) = part.as_i64() else {
                return Err(JsonError::ChangeDesc);
            };
            sections.push(n as i32);
        }
        Ok(ChangeDesc::new(sections))
    }

    fn view(&self) -> SetView<'_> {
        SetView {
            sections: &self.sections,
            inserted: &[],
        }
    }
}

impl fmt::Display for ChangeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut i = 0;
        while i < self.sections.len() {
            let len = self.sections[i];
            let ins = self.sections[i + 1];
            i += 2;
            if i > 2 {
                f.write_str(" ")?;
            }
            if ins >= 0 {
                write!(f, "{len}:{ins}")?;
            } else {
                write!(f, "{len}")?;
            }
        }
        Ok(())
    }
}

/// A change set holds a [`ChangeDesc`] along with the inserted text per
/// replaced section, making it applicable to a document and invertible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    desc: ChangeDesc,
    inserted: Vec<Text>,
}

/// Input to [`ChangeSet::of`]. Usually built through the `From`
/// conversions: `(from, to)` deletes a range, `(from, to, "text")`
/// replaces one, and a whole [`ChangeSet`] is composed in.
#[derive(Debug, Clone)]
pub enum ChangeSpec {
    /// Replace `from..to` with `insert`, split into lines on the line
    /// separator given to [`ChangeSet::of_sep`] (or `\r\n?|\n`).
    Change {
        from: usize,
        to: usize,
        insert: Option<SmartString>,
    },
    /// Replace `from..to` with an already built document fragment.
    ChangeText {
        from: usize,
        to: usize,
        insert: Text,
    },
    /// Compose an existing change set into the result.
    Set(ChangeSet),
    /// A nested batch of specs.
    Many(Vec<ChangeSpec>),
}

impl ChangeSpec {
    /// Insert `text` at `pos`.
    pub fn insert(pos: usize, text: impl Into<SmartString>) -> ChangeSpec {
        ChangeSpec::Change {
            from: pos,
            to: pos,
            insert: Some(text.into()),
        }
    }

    /// Delete the range `from..to`.
    pub fn delete(from: usize, to: usize) -> ChangeSpec {
        ChangeSpec::Change {
            from,
            to,
            insert: None,
        }
    }

    /// Replace the range `from..to` with `text`.
    pub fn replace(from: usize, to: usize, text: impl Into<SmartString>) -> ChangeSpec {
        ChangeSpec::Change {
            from,
            to,
            insert: Some(text.into()),
        }
    }
}

impl From<(usize, usize)> for ChangeSpec {
    fn from((from, to): (usize, usize)) -> ChangeSpec {
        ChangeSpec::delete(from, to)
    }
}

impl From<(usize, usize, &str)> for ChangeSpec {
    fn from((from, to, insert): (usize, usize, &str)) -> ChangeSpec {
        ChangeSpec::replace(from, to, insert)
    }
}

impl From<(usize, usize, String)> for ChangeSpec {
    fn from((from, to, insert): (usize, usize, String)) -> ChangeSpec {
        ChangeSpec::replace(from, to, insert)
    }
}

impl From<(usize, usize, Text)> for ChangeSpec {
    fn from((from, to, insert): (usize, usize, Text)) -> ChangeSpec {
        ChangeSpec::ChangeText { from, to, insert }
    }
}

impl From<ChangeSet> for ChangeSpec {
    fn from(set: ChangeSet) -> ChangeSpec {
        ChangeSpec::Set(set)
    }
}

impl From<Vec<ChangeSpec>> for ChangeSpec {
    fn from(list: Vec<ChangeSpec>) -> ChangeSpec {
        ChangeSpec::Many(list)
    }
}

impl ChangeSet {
    fn create(sections: Vec<i32>, inserted: Vec<Text>) -> ChangeSet {
        ChangeSet {
            desc: ChangeDesc::new(sections),
            inserted,
        }
    }

    /// The change set that leaves a document of the given length alone.
    pub fn empty(length: usize) -> ChangeSet {
        let sections = if length > 0 {
            vec![length as i32, -1]
        } else {
            vec![]
        };
        ChangeSet::create(sections, Vec::new())
    }

    /// Build a change set from a batch of change specs and the length of
    /// the current document. Sub-changes may be given out of order; each
    /// out-of-order batch is normalized by composing partial sets, so the
    /// result does not depend on input order. The behavior of
    /// *overlapping* changes within one batch is not defined.
    ///
    /// # Panics
    ///
    /// Panics when a spec's range is decreasing or out of bounds, or when
    /// a composed-in change set does not match `length`.
    pub fn of<I>(changes: I, length: usize) -> ChangeSet
    where
        I: IntoIterator,
        I::Item: Into<ChangeSpec>,
    {
        ChangeSet::of_sep(changes, length, None)
    }

    /// Like [`of`](Self::of), splitting inserted strings on the given
    /// line separator instead of `\r\n?|\n`.
    pub fn of_sep<I>(changes: I, length: usize, line_sep: Option<&str>) -> ChangeSet
    where
        I: IntoIterator,
        I::Item: Into<ChangeSpec>,
    {
        let mut builder = OfBuilder {
            sections: Vec::new(),
            inserted: Vec::new(),
            pos: 0,
            total: None,
            length: length as i32,
            line_sep,
        };
        for spec in changes {
            builder.process(spec.into());
        }
        let force = builder.total.is_none();
        builder.flush(force);
        match builder.total {
            Some(total) => total,
            // A forced flush always produces a set.
            None => unreachable!(),
        }
    }

    /// The length of the document this change set applies to.
    pub fn len(&self) -> usize {
        self.desc.len()
    }

    /// The length of the document this change set produces.
    pub fn len_after(&self) -> usize {
        self.desc.len_after()
    }

    /// `true` when the set makes no changes.
    pub fn is_empty(&self) -> bool {
        self.desc.is_empty()
    }

    /// The description of this change set, without the inserted text.
    pub fn desc(&self) -> &ChangeDesc {
        &self.desc
    }

    /// See [`ChangeDesc::iter_gaps`].
    pub fn iter_gaps(&self, f: impl FnMut(usize, usize, usize)) {
        self.desc.iter_gaps(f)
    }

    /// See [`ChangeDesc::iter_changed_ranges`].
    pub fn iter_changed_ranges(&self, individual: bool, f: impl FnMut(usize, usize, usize, usize)) {
        self.desc.iter_changed_ranges(individual, f)
    }

    /// Call `f(from_a, to_a, from_b, to_b, inserted)` for every change,
    /// with positions in the old and new document and the replacement
    /// text. Adjacent replacements are merged unless `individual` is set.
    pub fn iter_changes(
        &self,
        individual: bool,
        mut f: impl FnMut(usize, usize, usize, usize, &Text),
    ) {
        iter_changes(&self.desc.sections, &self.inserted, individual, &mut f);
    }

    /// See [`ChangeDesc::map_pos`].
    pub fn map_pos(&self, pos: usize, assoc: i32) -> usize {
        self.desc.map_pos(pos, assoc)
    }

    /// See [`ChangeDesc::map_pos_mode`].
    pub fn map_pos_mode(&self, pos: usize, assoc: i32, mode: MapMode) -> Option<usize> {
        self.desc.map_pos_mode(pos, assoc, mode)
    }

    /// See [`ChangeDesc::touches_range`].
    pub fn touches_range(&self, from: usize, to: usize) -> Touched {
        self.desc.touches_range(from, to)
    }

    /// Apply the changes to a document, returning the new document.
    ///
    /// # Panics
    ///
    /// Panics when the document's length doesn't match [`len`](Self::len).
    pub fn apply(&self, doc: &Text) -> Text {
        if self.len() != doc.len() {
            panic!("applying change set to a document with the wrong length");
        }
        let mut result = doc.clone();
        iter_changes(
            &self.desc.sections,
            &self.inserted,
            false,
            &mut |from_a, to_a, from_b, _to_b, text| {
                result = result.replace(from_b, from_b + (to_a - from_a), text);
            },
        );
        result
    }

    /// Produce the change set that undoes these changes when applied to
    /// the document they produced. `doc` must be the document the changes
    /// start in; the deleted text is captured from it.
    pub fn invert(&self, doc: &Text) -> ChangeSet {
        let mut sections = self.desc.sections.clone();
        let mut inserted = Vec::new();
        let mut pos = 0i32;
        let mut i = 0;
        while i < sections.len() {
            let len = sections[i];
            let ins = sections[i + 1];
            if ins >= 0 {
                sections[i] = ins;
                sections[i + 1] = len;
                let index = i >> 1;
                while inserted.len() < index {
                    inserted.push(Text::empty());
                }
                inserted.push(if len > 0 {
                    doc.slice(pos as usize, (pos + len) as usize)
                } else {
                    Text::empty()
                });
            }
            pos += len;
            i += 2;
        }
        ChangeSet::create(sections, inserted)
    }

    /// Combine two subsequent change sets into one, so that applying the
    /// result equals applying this set and then `other`.
    ///
    /// # Panics
    ///
    /// Panics when `other` does not start in the document this set
    /// produces.
    pub fn compose(&self, other: &ChangeSet) -> ChangeSet {
        if self.is_empty() {
            other.clone()
        } else if other.is_empty() {
            self.clone()
        } else {
            let (sections, inserted) = compose_sets(self.view(), other.view(), true);
            ChangeSet::create(sections, inserted)
        }
    }

    /// Rebase this change set over `other`, which starts in the same
    /// document, producing a set that applies to the document `other`
    /// produces. With `before` set, insertions of this set at positions
    /// where `other` also inserts come out in front.
    pub fn map(&self, other: &ChangeDesc, before: bool) -> ChangeSet {
        if other.is_empty() {
            self.clone()
        } else {
            let (sections, inserted) = map_set(self.view(), other.view(), before, true);
            ChangeSet::create(sections, inserted)
        }
    }

    /// See [`ChangeDesc::map_desc`].
    pub fn map_desc(&self, other: &ChangeDesc, before: bool) -> ChangeDesc {
        self.desc.map_desc(other, before)
    }

    /// See [`ChangeDesc::inverted_desc`].
    pub fn inverted_desc(&self) -> ChangeDesc {
        self.desc.inverted_desc()
    }

    /// See [`ChangeDesc::compose_desc`].
    pub fn compose_desc(&self, other: &ChangeDesc) -> ChangeDesc {
        self.desc.compose_desc(other)
    }

    /// Split the set around the given sorted `[from, to, from, to, …]`
    /// position ranges (in the old document): the returned change set
    /// holds the changes that fall outside them, the returned description
    /// records the suppressed sections.
    pub fn filter(&self, ranges: &[usize]) -> (ChangeSet, ChangeDesc) {
        let mut result_sections = Vec::new();
        let mut result_inserted = Vec::new();
        let mut filtered_sections = Vec::new();
        let mut iter = SectionIter::new(self.view());
        let mut i = 0;
        let mut pos = 0i32;
        'done: loop {
            let next = if i == ranges.len() {
                FAR
            } else {
                let r = ranges[i] as i32;
                i += 1;
                r
            };
            while pos < next || pos == next && iter.len == 0 {
                if iter.done() {
                    break 'done;
                }
                let len = iter.len.min(next - pos);
                add_section(&mut filtered_sections, len, -1, false);
                let ins = if iter.ins == -1 {
                    -1
                } else if iter.off == 0 {
                    iter.ins
                } else {
                    0
                };
                add_section(&mut result_sections, len, ins, false);
                if ins > 0 {
                    add_insert(&mut result_inserted, &result_sections, iter.text());
                }
                iter.forward(len);
                pos += len;
            }
            let end = if i == ranges.len() {
                FAR
            } else {
                let r = ranges[i] as i32;
                i += 1;
                r
            };
            while pos < end {
                if iter.done() {
                    break 'done;
                }
                let len = iter.len.min(end - pos);
                let ins = if iter.ins == -1 {
                    -1
                } else if iter.off == 0 {
                    iter.ins
                } else {
                    0
                };
                add_section(&mut result_sections, len, -1, false);
                add_section(&mut filtered_sections, len, ins, false);
                iter.forward(len);
                pos += len;
            }
        }
        (
            ChangeSet::create(result_sections, result_inserted),
            ChangeDesc::new(filtered_sections),
        )
    }

    /// The JSON form: per section either a plain length (unchanged), a
    /// one-element array `[len]` (deletion), or `[len, line, line, …]`
    /// (replacement).
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        let mut parts = Vec::new();
        let mut i = 0;
        while i < self.desc.sections.len() {
            let len = self.desc.sections[i];
            let ins = self.desc.sections[i + 1];
            if ins < 0 {
                parts.push(Value::from(len));
            } else if ins == 0 {
                parts.push(Value::Array(vec![Value::from(len)]));
            } else {
                let mut entry = vec![Value::from(len)];
                let Value::Array(lines) = self.inserted[i >> 1].to_json() else {
                    // Text::to_json always produces an array.
                    unreachable!()
                };
                entry.extend(lines);
                parts.push(Value::Array(entry));
            }
            i += 2;
        }
        Value::Array(parts)
    }

    /// Decode a change set from its JSON form.
    pub fn from_json(json: &serde_json::Value) -> Result<ChangeSet, JsonError> {
        use serde_json::Value;
        let Value::Array(parts) = json else {
            return Err(JsonError::ChangeSet);
        };
        let mut sections = Vec::new();
        let mut inserted = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            match part {
                Value::Number(_) => {
                    let Some(len) = part.as_i64() else {
                        return Err(JsonError::ChangeSet);
                    };
                    sections.push(len as i32);
                    sections.push(-1);
                }
                Value::Array(entry) => {
                    let Some(len) = entry.first().and_then(Value::as_i64) else {
                        return Err(JsonError::ChangeSet);
                    };
                    if entry.iter().skip(1).any(|e| !e.is_string()) {
                        return Err(JsonError::ChangeSet);
                    }
                    if entry.len() == 1 {
                        sections.push(len as i32);
                        sections.push(0);
                    } else {
                        let lines: Vec<SmartString> = entry
                            .iter()
                            .skip(1)
                            .filter_map(Value::as_str)
                            .map(SmartString::from)
                            .collect();
                        let text = Text::of(lines);
                        while inserted.len() < i {
                            inserted.push(Text::empty());
                        }
                        sections.push(len as i32);
                        sections.push(text.len() as i32);
                        inserted.push(text);
                    }
                }
                _ => return Err(JsonError::ChangeSet),
            }
        }
        Ok(ChangeSet::create(sections, inserted))
    }

    fn view(&self) -> SetView<'_> {
        SetView {
            sections: &self.desc.sections,
            inserted: &self.inserted,
        }
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.desc, f)
    }
}

const FAR: i32 = 1_000_000_000;

struct OfBuilder<'a> {
    sections: Vec<i32>,
    inserted: Vec<Text>,
    pos: i32,
    total: Option<ChangeSet>,
    length: i32,
    line_sep: Option<&'a str>,
}

impl OfBuilder<'_> {
    fn flush(&mut self, force: bool) {
        if !force && self.sections.is_empty() {
            return;
        }
        if self.pos < self.length {
            add_section(&mut self.sections, self.length - self.pos, -1, false);
        }
        let set = ChangeSet::create(
            std::mem::take(&mut self.sections),
            std::mem::take(&mut self.inserted),
        );
        self.total = Some(match self.total.take() {
            None => set,
            Some(total) => total.compose(&set.map(total.desc(), false)),
        });
        self.pos = 0;
    }

    fn process(&mut self, spec: ChangeSpec) {
        match spec {
            ChangeSpec::Many(list) => {
                for sub in list {
                    self.process(sub);
                }
            }
            ChangeSpec::Set(set) => {
                if set.len() != self.length as usize {
                    panic!(
                        "mismatched change set length (got {}, expected {})",
                        set.len(),
                        self.length
                    );
                }
                self.flush(false);
                self.total = Some(match self.total.take() {
                    None => set,
                    Some(total) => total.compose(&set.map(total.desc(), false)),
                });
            }
            ChangeSpec::Change { from, to, insert } => {
                let text = match insert {
                    None => Text::empty(),
                    Some(s) => split_insert(&s, self.line_sep),
                };
                self.change(from, to, text);
            }
            ChangeSpec::ChangeText { from, to, insert } => self.change(from, to, insert),
        }
    }

    fn change(&mut self, from: usize, to: usize, insert: Text) {
        if from > to || to > self.length as usize {
            panic!(
                "invalid change range {from} to {to} (in doc of length {})",
                self.length
            );
        }
        let ins_len = insert.len() as i32;
        let (from, to) = (from as i32, to as i32);
        if from == to && ins_len == 0 {
            return;
        }
        if from < self.pos {
            log::trace!("out-of-order change batch at {from}, normalizing by composition");
            self.flush(false);
        }
        if self.pos < from {
            add_section(&mut self.sections, from - self.pos, -1, false);
        }
        add_section(&mut self.sections, to - from, ins_len, false);
        add_insert(&mut self.inserted, &self.sections, insert);
        self.pos = to;
    }
}

fn split_insert(s: &str, line_sep: Option<&str>) -> Text {
    match line_sep {
        Some(sep) => Text::of(s.split(sep).map(SmartString::from)),
        None => Text::of(DEFAULT_SPLIT.split(s).map(SmartString::from)),
    }
}

/// Canonicalizing push of a section onto a section list: no-op sections
/// are dropped, runs of equal-kind sections merge, and pure insertions
/// attach to a preceding empty-length section. `force_join` merges
/// unconditionally (used while composing pieces of one original change).
fn add_section(sections: &mut Vec<i32>, len: i32, ins: i32, force_join: bool) {
    if len == 0 && ins <= 0 {
        return;
    }
    if sections.len() >= 2 {
        let last = sections.len() - 2;
        if ins <= 0 && ins == sections[last + 1] {
            sections[last] += len;
            return;
        }
        if len == 0 && sections[last] == 0 {
            sections[last + 1] += ins;
            return;
        }
        if force_join {
            sections[last] += len;
            sections[last + 1] += ins;
            return;
        }
    }
    sections.push(len);
    sections.push(ins);
}

/// Record inserted text for the most recent section, appending onto it
/// when the section was merged.
fn add_insert(values: &mut Vec<Text>, sections: &[i32], value: Text) {
    if value.len() == 0 {
        return;
    }
    let index = (sections.len() - 2) >> 1;
    if index < values.len() {
        let last = values.len() - 1;
        values[last] = values[last].append(&value);
    } else {
        while values.len() < index {
            values.push(Text::empty());
        }
        values.push(value);
    }
}

fn iter_changes(
    sections: &[i32],
    inserted: &[Text],
    individual: bool,
    f: &mut impl FnMut(usize, usize, usize, usize, &Text),
) {
    let (mut pos_a, mut pos_b) = (0i32, 0i32);
    let mut i = 0;
    while i < sections.len() {
        let mut len = sections[i];
        let mut ins = sections[i + 1];
        i += 2;
        if ins < 0 {
            pos_a += len;
            pos_b += len;
        } else {
            let (mut end_a, mut end_b) = (pos_a, pos_b);
            let mut text = Text::empty();
            loop {
                end_a += len;
                end_b += ins;
                if ins > 0 {
                    if let Some(t) = inserted.get((i - 2) >> 1) {
                        text = text.append(t);
                    }
                }
                if individual || i == sections.len() || sections[i + 1] < 0 {
                    break;
                }
                len = sections[i];
                ins = sections[i + 1];
                i += 2;
            }
            f(
                pos_a as usize,
                end_a as usize,
                pos_b as usize,
                end_b as usize,
                &text,
            );
            pos_a = end_a;
            pos_b = end_b;
        }
    }
}

#[derive(Clone, Copy)]
struct SetView<'a> {
    sections: &'a [i32],
    inserted: &'a [Text],
}

/// Walks the sections of a change set, allowing a consumer to advance
/// through a section piecewise. `forward` moves in old-document lengths,
/// `forward2` in "effective" lengths where a replacement counts for its
/// inserted length.
struct SectionIter<'a> {
    view: SetView<'a>,
    i: usize,
    len: i32,
    ins: i32,
    off: i32,
}

impl<'a> SectionIter<'a> {
    fn new(view: SetView<'a>) -> SectionIter<'a> {
        let mut iter = SectionIter {
            view,
            i: 0,
            len: 0,
            ins: -2,
            off: 0,
        };
        iter.next_section();
        iter
    }

    fn next_section(&mut self) {
        if self.i < self.view.sections.len() {
            self.len = self.view.sections[self.i];
            self.ins = self.view.sections[self.i + 1];
            self.i += 2;
        } else {
            self.len = 0;
            self.ins = -2;
        }
        self.off = 0;
    }

    fn done(&self) -> bool {
        self.ins == -2
    }

    /// The remaining length of the section in effective coordinates.
    fn len2(&self) -> i32 {
        if self.ins < 0 {
            self.len
        } else {
            self.ins
        }
    }

    fn text(&self) -> Text {
        let index = (self.i - 2) >> 1;
        match self.view.inserted.get(index) {
            Some(text) => text.clone(),
            None => Text::empty(),
        }
    }

    fn text_bit(&self, len: i32) -> Text {
        let index = (self.i - 2) >> 1;
        match self.view.inserted.get(index) {
            Some(text) => text.slice(self.off as usize, (self.off + len) as usize),
            None => Text::empty(),
        }
    }

    fn forward(&mut self, len: i32) {
        if len == self.len {
            self.next_section();
        } else {
            self.len -= len;
            self.off += len;
        }
    }

    fn forward2(&mut self, len: i32) {
        if self.ins == -1 {
            self.forward(len);
        } else if len == self.ins {
            self.next_section();
        } else {
            self.ins -= len;
            self.off += len;
        }
    }
}

fn compose_sets(a: SetView<'_>, b: SetView<'_>, mk_set: bool) -> (Vec<i32>, Vec<Text>) {
    let mut sections = Vec::new();
    let mut insert = Vec::new();
    let mut a = SectionIter::new(a);
    let mut b = SectionIter::new(b);
    let mut open = false;
    loop {
        if a.done() && b.done() {
            break;
        } else if a.ins == 0 {
            // Deletion in A.
            let len = a.len;
            add_section(&mut sections, len, 0, open);
            a.forward(len);
        } else if b.len == 0 && !b.done() {
            // Insertion in B.
            add_section(&mut sections, 0, b.ins, open);
            if mk_set {
                add_insert(&mut insert, &sections, b.text());
            }
            let ins = b.ins;
            b.forward2(ins);
        } else if a.done() || b.done() {
            panic!("mismatched change set lengths");
        } else {
            let len = a.len2().min(b.len);
            if a.ins == -1 {
                let ins_b = if b.ins == -1 {
                    -1
                } else if b.off > 0 {
                    0
                } else {
                    b.ins
                };
                add_section(&mut sections, len, ins_b, open);
                if mk_set && ins_b > 0 {
                    add_insert(&mut insert, &sections, b.text());
                }
            } else if b.ins == -1 {
                add_section(
                    &mut sections,
                    if a.off > 0 { 0 } else { a.len },
                    len,
                    open,
                );
                if mk_set {
                    add_insert(&mut insert, &sections, a.text_bit(len));
                }
            } else {
                add_section(
                    &mut sections,
                    if a.off > 0 { 0 } else { a.len },
                    if b.off > 0 { 0 } else { b.ins },
                    open,
                );
                if mk_set && b.off == 0 {
                    add_insert(&mut insert, &sections, b.text());
                }
            }
            open = a.ins > len || b.ins >= 0 && b.len > len;
            a.forward2(len);
            b.forward(len);
        }
    }
    (sections, insert)
}

fn map_set(a: SetView<'_>, b: SetView<'_>, before: bool, mk_set: bool) -> (Vec<i32>, Vec<Text>) {
    let mut sections = Vec::new();
    let mut insert = Vec::new();
    let mut a = SectionIter::new(a);
    let mut b = SectionIter::new(b);
    // Tracks, for a change in A processed piecewise, whether its inserted
    // content has been emitted, by remembering the section index.
    let mut inserted: isize = -1;
    loop {
        if a.done() && b.len > 0 || b.done() && a.len > 0 {
            panic!("mismatched change set lengths");
        } else if a.ins == -1 && b.ins == -1 {
            // Move across a range skipped by both.
            let len = a.len.min(b.len);
            add_section(&mut sections, len, -1, false);
            a.forward(len);
            b.forward(len);
        } else if b.ins >= 0
            && (a.ins < 0
                || inserted == a.i as isize
                || a.off == 0 && (b.len < a.len || b.len == a.len && !before))
        {
            // A change in B comes first (ordered by position, length,
            // then the `before` flag). Skip its inserted span and emit
            // the insertions of any changes in A that it covers.
            let mut len = b.len;
            add_section(&mut sections, b.ins, -1, false);
            while len > 0 {
                let piece = a.len.min(len);
                if a.ins >= 0 && inserted < a.i as isize && a.len <= piece {
                    add_section(&mut sections, 0, a.ins, false);
                    if mk_set {
                        add_insert(&mut insert, &sections, a.text());
                    }
                    inserted = a.i as isize;
                }
                a.forward(piece);
                len -= piece;
            }
            b.next_section();
        } else if a.ins >= 0 {
            // A change in A, possibly shortened by deletions in B.
            let mut len = 0;
            let mut left = a.len;
            while left > 0 {
                if b.ins == -1 {
                    let piece = left.min(b.len);
                    len += piece;
                    left -= piece;
                    b.forward(piece);
                } else if b.ins == 0 && b.len < left {
                    left -= b.len;
                    b.next_section();
                } else {
                    break;
                }
            }
            add_section(
                &mut sections,
                len,
                if inserted < a.i as isize { a.ins } else { 0 },
                false,
            );
            if mk_set && inserted < a.i as isize {
                add_insert(&mut insert, &sections, a.text());
            }
            inserted = a.i as isize;
            let fwd = a.len - left;
            a.forward(fwd);
        } else if a.done() && b.done() {
            break;
        } else {
            panic!("mismatched change set lengths");
        }
    }
    (sections, insert)
}
