//! The document model: an immutable tree of lines.
//!
//! A [`Text`] stores its content as line strings, with line breaks implied
//! between adjacent lines, never before the first or after the last. Leaves
//! hold up to 32 lines, interior nodes up to 32 children, so position and
//! line lookups are O(log n). All update operations return a new `Text`
//! that shares as much of the old tree as possible; a clone is an `Arc`
//! bump.
//!
//! Positions and lengths count UTF-16 code units, which keeps offsets
//! directly exchangeable with LSP-style protocols and the serialized forms
//! in [`to_json`](Text::to_json). Line numbers are 1-based, positions
//! 0-based. The empty document is a single empty line.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use once_cell::sync::Lazy;
use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smartstring::alias::String as SmartString;

use crate::JsonError;

mod cursor;

pub use cursor::{LinesIter, PartialIter, TextIter};

/// Target branching factor of the tree: maximum lines per leaf and
/// children per interior node.
const BRANCH: usize = 32;
const BRANCH_SHIFT: u32 = 5;

/// Length of `s` in UTF-16 code units.
pub(crate) fn str_len(s: &str) -> usize {
    str_indices::utf16::count(s)
}

/// Byte offset for the UTF-16 offset `idx` into `s`. Offsets interior to a
/// surrogate pair round down to the scalar boundary.
pub(crate) fn str_pos(s: &str, idx: usize) -> usize {
    str_indices::utf16::to_byte_idx(s, idx)
}

/// Slice `s` between UTF-16 offsets.
pub(crate) fn str_slice(s: &str, from: usize, to: usize) -> &str {
    &s[str_pos(s, from)..str_pos(s, to)]
}

bitflags! {
    /// Which sides of a decomposed span are interior to a splice, i.e.
    /// must be merged with the neighboring part instead of standing on a
    /// line boundary of their own.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Open: u8 {
        const FROM = 1;
        const TO = 2;
    }
}

#[derive(Debug)]
enum Node {
    Leaf(Leaf),
    Branch(Branch),
}

#[derive(Debug)]
struct Leaf {
    /// The lines in this leaf. A line break is implied between adjacent
    /// entries, so a leaf of n lines covers `sum(len) + n - 1` units.
    text: Vec<SmartString>,
    length: usize,
}

#[derive(Debug)]
struct Branch {
    children: Vec<Text>,
    length: usize,
    lines: usize,
}

/// An immutable document. Cheap to clone; all "mutating" operations
/// return a new value sharing structure with the old one.
#[derive(Debug, Clone)]
pub struct Text {
    node: Arc<Node>,
}

static EMPTY: Lazy<Text> = Lazy::new(|| Text::leaf(vec![SmartString::new()], 0));

/// Total length of a run of lines, implied breaks included.
fn text_length(lines: &[SmartString]) -> usize {
    lines.iter().map(|l| str_len(l)).sum::<usize>() + lines.len() - 1
}

/// Append the content of `lines` between positions `from` and `to` onto
/// `target`. The first touched line is joined onto the last entry of
/// `target` (which must be non-empty); later lines are pushed as their own
/// entries.
fn append_text(lines: &[SmartString], target: &mut Vec<SmartString>, from: usize, to: usize) {
    let mut pos = 0;
    let mut first = true;
    for line in lines {
        if pos > to {
            break;
        }
        let end = pos + str_len(line);
        if end >= from {
            let mut piece: &str = line;
            if end > to {
                piece = &piece[..str_pos(piece, to - pos)];
            }
            if pos < from {
                piece = &piece[str_pos(piece, from - pos)..];
            }
            if first {
                self::last_mut(target).push_str(piece);
                first = false;
            } else {
                target.push(piece.into());
            }
        }
        pos = end + 1;
    }
}

fn last_mut(target: &mut Vec<SmartString>) -> &mut SmartString {
    match target.last_mut() {
        Some(last) => last,
        // append_text is only called with a seeded target
        None => unreachable!("append target must hold at least one line"),
    }
}

/// The lines covering `[from, to)` of `lines`, starting from a fresh
/// empty first line.
fn slice_lines(lines: &[SmartString], from: usize, to: usize) -> Vec<SmartString> {
    let mut target = vec![SmartString::new()];
    append_text(lines, &mut target, from, to);
    target
}

/// Chop a long run of lines into leaves of at most [`BRANCH`] lines each.
fn split_lines<I: IntoIterator<Item = SmartString>>(lines: I, target: &mut Vec<Text>) {
    let mut part = Vec::new();
    let mut len = 0;
    for line in lines {
        len += str_len(&line) + 1;
        part.push(line);
        if part.len() == BRANCH {
            target.push(Text::leaf(std::mem::take(&mut part), len - 1));
            len = 0;
        }
    }
    if len > 0 {
        target.push(Text::leaf(part, len - 1));
    }
}

impl Text {
    fn leaf(text: Vec<SmartString>, length: usize) -> Text {
        debug_assert!(!text.is_empty() && text.len() <= BRANCH);
        Text {
            node: Arc::new(Node::Leaf(Leaf { text, length })),
        }
    }

    fn branch(children: Vec<Text>, length: usize) -> Text {
        let lines = children.iter().map(|c| c.len_lines()).sum();
        Text {
            node: Arc::new(Node::Branch(Branch {
                children,
                length,
                lines,
            })),
        }
    }

    /// The empty document: zero length, a single empty line. This is a
    /// process-wide singleton; cloning it is free.
    pub fn empty() -> Text {
        EMPTY.clone()
    }

    /// Build a document from an array of lines. The line breaks between
    /// them are implied; the strings themselves must not contain `\n`.
    ///
    /// # Panics
    ///
    /// Panics when `lines` is empty; a document always has at least one
    /// line.
    pub fn of<I>(lines: I) -> Text
    where
        I: IntoIterator,
        I::Item: Into<SmartString>,
    {
        let text: Vec<SmartString> = lines.into_iter().map(Into::into).collect();
        if text.is_empty() {
            panic!("a document must have at least one line");
        }
        if text.len() == 1 && text[0].is_empty() {
            return Text::empty();
        }
        if text.len() <= BRANCH {
            let length = text_length(&text);
            return Text::leaf(text, length);
        }
        let mut leaves = Vec::new();
        split_lines(text, &mut leaves);
        let length = leaves.iter().map(|l| l.len() + 1).sum::<usize>() - 1;
        node_from(leaves, length)
    }

    /// The length of the document, in code units.
    pub fn len(&self) -> usize {
        match &*self.node {
            Node::Leaf(leaf) => leaf.length,
            Node::Branch(branch) => branch.length,
        }
    }

    /// `true` when the document holds no text (a single empty line).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of lines in the document, which is always at least 1.
    pub fn len_lines(&self) -> usize {
        match &*self.node {
            Node::Leaf(leaf) => leaf.text.len(),
            Node::Branch(branch) => branch.lines,
        }
    }

    /// The line around the given position.
    ///
    /// # Panics
    ///
    /// Panics when `pos` is greater than the document length.
    pub fn line_at(&self, pos: usize) -> Line<'_> {
        if pos > self.len() {
            panic!("invalid position {pos} in document of length {}", self.len());
        }
        self.line_inner(pos, false, 1, 0)
    }

    /// Retrieve line number `n`, counting from 1.
    ///
    /// # Panics
    ///
    /// Panics when `n` is zero or greater than [`len_lines`](Self::len_lines).
    pub fn line(&self, n: usize) -> Line<'_> {
        if n < 1 || n > self.len_lines() {
            panic!("invalid line number {n} in {}-line document", self.len_lines());
        }
        self.line_inner(n, true, 1, 0)
    }

    fn line_inner(&self, target: usize, is_line: bool, line: usize, offset: usize) -> Line<'_> {
        let mut line = line;
        let mut offset = offset;
        match &*self.node {
            Node::Leaf(leaf) => {
                for string in &leaf.text {
                    let end = offset + str_len(string);
                    if (if is_line { line } else { end }) >= target {
                        return Line {
                            from: offset,
                            to: end,
                            number: line,
                            text: string,
                        };
                    }
                    offset = end + 1;
                    line += 1;
                }
                unreachable!("line lookup target out of node range")
            }
            Node::Branch(branch) => {
                for child in &branch.children {
                    let end = offset + child.len();
                    if (if is_line { line + child.len_lines() - 1 } else { end }) >= target {
                        return child.line_inner(target, is_line, line, offset);
                    }
                    offset = end + 1;
                    line += child.len_lines();
                }
                unreachable!("line lookup target out of node range")
            }
        }
    }

    /// Replace the range `from..to` with the given text, returning the
    /// new document.
    ///
    /// # Panics
    ///
    /// Panics when the range is decreasing or reaches beyond the end of
    /// the document.
    pub fn replace(&self, from: usize, to: usize, text: &Text) -> Text {
        if from > to || to > self.len() {
            panic!(
                "invalid change range {from} to {to} in document of length {}",
                self.len()
            );
        }
        let mut parts = Vec::new();
        self.decompose(0, from as isize, &mut parts, Open::TO);
        if text.len() > 0 {
            text.decompose(0, text.len() as isize, &mut parts, Open::FROM | Open::TO);
        }
        self.decompose(to as isize, self.len() as isize, &mut parts, Open::FROM);
        node_from(parts, self.len() - (to - from) + text.len())
    }

    /// Append another document to this one.
    pub fn append(&self, other: &Text) -> Text {
        self.replace(self.len(), self.len(), other)
    }

    /// Retrieve the part of the document between the given positions, as
    /// a new document.
    ///
    /// # Panics
    ///
    /// Panics when the range is decreasing or out of bounds.
    pub fn slice(&self, from: usize, to: usize) -> Text {
        if from > to || to > self.len() {
            panic!(
                "invalid slice range {from} to {to} in document of length {}",
                self.len()
            );
        }
        let mut parts = Vec::new();
        self.decompose(from as isize, to as isize, &mut parts, Open::empty());
        node_from(parts, to - from)
    }

    /// The text between the given positions as a string, with line breaks
    /// rendered as `"\n"`.
    pub fn slice_string(&self, from: usize, to: usize) -> String {
        self.slice_string_sep(from, to, "\n")
    }

    /// Like [`slice_string`](Self::slice_string), with an explicit line
    /// separator.
    pub fn slice_string_sep(&self, from: usize, to: usize, line_sep: &str) -> String {
        let mut result = String::new();
        let mut cursor = cursor::RawCursor::new(self, 1);
        let mut skip = from;
        let mut pos = from;
        loop {
            cursor.next(skip);
            skip = 0;
            if cursor.done || pos >= to {
                break;
            }
            let len = if cursor.line_break { 1 } else { str_len(cursor.value) };
            let take = len.min(to - pos);
            if cursor.line_break {
                result.push_str(line_sep);
            } else {
                result.push_str(str_slice(cursor.value, 0, take));
            }
            pos += take;
            if take < len {
                break;
            }
        }
        result
    }

    /// Structural equality: `true` when the two documents hold the same
    /// text. Shared subtrees are skipped by reference, so comparing a
    /// document against a lightly edited version of itself is cheap.
    pub fn eq(&self, other: &Text) -> bool {
        if Arc::ptr_eq(&self.node, &other.node) {
            return true;
        }
        if self.len() != other.len() || self.len_lines() != other.len_lines() {
            return false;
        }
        let start = self.scan_identical(other, true);
        let end = self.len() - self.scan_identical(other, false);
        let mut a = cursor::RawCursor::new(self, 1);
        let mut b = cursor::RawCursor::new(other, 1);
        let mut skip = start;
        let mut pos = start;
        loop {
            a.next(skip);
            b.next(skip);
            skip = 0;
            if a.line_break != b.line_break || a.done != b.done || a.value != b.value {
                return false;
            }
            pos += if a.line_break { 1 } else { str_len(a.value) };
            if a.done || pos >= end {
                return true;
            }
        }
    }

    /// The number of code units shared at one end of two documents, in
    /// whole shared subtrees.
    fn scan_identical(&self, other: &Text, forward: bool) -> usize {
        let (Node::Branch(a), Node::Branch(b)) = (&*self.node, &*other.node) else {
            return 0;
        };
        let mut length = 0;
        let n = a.children.len().min(b.children.len());
        for i in 0..n {
            let (ca, cb) = if forward {
                (&a.children[i], &b.children[i])
            } else {
                (
                    &a.children[a.children.len() - 1 - i],
                    &b.children[b.children.len() - 1 - i],
                )
            };
            if !Arc::ptr_eq(&ca.node, &cb.node) {
                return length + ca.scan_identical(cb, forward);
            }
            length += ca.len() + 1;
        }
        length
    }

    /// Append nodes covering `[from, to)` of this tree onto `target`.
    /// The open flags mark sides that are interior to a splice: an open
    /// edge leaf is merged into the neighboring entry of `target` rather
    /// than pushed on its own, which is what lets `replace` share
    /// everything outside the changed lines.
    fn decompose(&self, from: isize, to: isize, target: &mut Vec<Text>, open: Open) {
        match &*self.node {
            Node::Leaf(leaf) => {
                let text = if from <= 0 && to >= leaf.length as isize {
                    self.clone()
                } else {
                    let f = from.max(0) as usize;
                    let t = (to.min(leaf.length as isize)).max(0) as usize;
                    let sliced = slice_lines(&leaf.text, f, t);
                    let length = t - f;
                    Text::leaf(sliced, length)
                };
                if open.contains(Open::FROM) {
                    let prev = target.pop().expect("open decompose onto empty target");
                    let Node::Leaf(prev_leaf) = &*prev.node else {
                        unreachable!("open edge must border a leaf");
                    };
                    let Node::Leaf(text_leaf) = &*text.node else {
                        unreachable!();
                    };
                    let mut joined = prev_leaf.text.clone();
                    append_text(&text_leaf.text, &mut joined, 0, text.len());
                    if joined.len() <= BRANCH {
                        let length = prev.len() + text.len();
                        target.push(Text::leaf(joined, length));
                    } else {
                        let mid = joined.len() >> 1;
                        let right: Vec<SmartString> = joined.split_off(mid);
                        let left_len = text_length(&joined);
                        let right_len = text_length(&right);
                        target.push(Text::leaf(joined, left_len));
                        target.push(Text::leaf(right, right_len));
                    }
                } else {
                    target.push(text);
                }
            }
            Node::Branch(branch) => {
                let mut pos = 0isize;
                for child in &branch.children {
                    if pos > to {
                        break;
                    }
                    let end = pos + child.len() as isize;
                    if from <= end && to >= pos {
                        let mut child_open = Open::empty();
                        if pos <= from {
                            child_open |= open & Open::FROM;
                        }
                        if end >= to {
                            child_open |= open & Open::TO;
                        }
                        if pos >= from && end <= to && child_open.is_empty() {
                            target.push(child.clone());
                        } else {
                            child.decompose(from - pos, to - pos, target, child_open);
                        }
                    }
                    pos = end + 1;
                }
            }
        }
    }

    /// Copy this document's lines into `target`.
    fn flatten_into(&self, target: &mut Vec<SmartString>) {
        match &*self.node {
            Node::Leaf(leaf) => target.extend(leaf.text.iter().cloned()),
            Node::Branch(branch) => {
                for child in &branch.children {
                    child.flatten_into(target);
                }
            }
        }
    }

    /// All lines of the document as owned strings, the inverse of
    /// [`Text::of`].
    pub fn to_lines(&self) -> Vec<String> {
        let mut flat = Vec::new();
        self.flatten_into(&mut flat);
        flat.into_iter().map(String::from).collect()
    }

    fn try_for_each_line<E>(&self, f: &mut impl FnMut(&str) -> Result<(), E>) -> Result<(), E> {
        match &*self.node {
            Node::Leaf(leaf) => {
                for line in &leaf.text {
                    f(line)?;
                }
                Ok(())
            }
            Node::Branch(branch) => {
                for child in &branch.children {
                    child.try_for_each_line(f)?;
                }
                Ok(())
            }
        }
    }

    /// Iterate over the content, yielding line chunks alternated with
    /// `"\n"` separators.
    pub fn iter(&self) -> TextIter<'_> {
        TextIter::new(self, 1)
    }

    /// Iterate over the content from the end of the document backwards.
    pub fn iter_rev(&self) -> TextIter<'_> {
        TextIter::new(self, -1)
    }

    /// Iterate over a range of the content. When `from > to`, iteration
    /// happens in reverse, yielding the content between `to` and `from`
    /// back to front.
    pub fn iter_range(&self, from: usize, to: usize) -> PartialIter<'_> {
        PartialIter::new(self, from, to)
    }

    /// Iterate over whole lines, yielding one string per line (empty
    /// strings for empty lines). Line breaks are not included.
    pub fn iter_lines(&self) -> LinesIter<'_> {
        LinesIter::whole(self)
    }

    /// Iterate over the lines numbered `from` (inclusive, 1-based) up to
    /// `to` (exclusive).
    pub fn iter_lines_range(&self, from: usize, to: usize) -> LinesIter<'_> {
        let start = self.line(from).from;
        let end = if to > self.len_lines() {
            self.len()
        } else if to <= 1 {
            0
        } else {
            self.line(to - 1).to
        };
        LinesIter::partial(self, start, start.max(end))
    }

    /// The JSON form of the document: an array of line strings.
    pub fn to_json(&self) -> serde_json::Value {
        let mut lines = Vec::with_capacity(self.len_lines());
        let mut push = |line: &str| -> Result<(), ()> {
            lines.push(serde_json::Value::String(line.to_owned()));
            Ok(())
        };
        let _ = self.try_for_each_line(&mut push);
        serde_json::Value::Array(lines)
    }

    /// Decode a document from its JSON form.
    pub fn from_json(json: &serde_json::Value) -> Result<Text, JsonError> {
        let serde_json::Value::Array(lines) = json else {
            return Err(JsonError::Document);
        };
        if lines.is_empty() {
            return Err(JsonError::Document);
        }
        let mut text: Vec<SmartString> = Vec::with_capacity(lines.len());
        for line in lines {
            let serde_json::Value::String(line) = line else {
                return Err(JsonError::Document);
            };
            text.push(line.as_str().into());
        }
        Ok(Text::of(text))
    }

    fn node(&self) -> &Node {
        &self.node
    }
}

/// Rebuild a run of nodes into a balanced tree. Child nodes are reused
/// whole where their size allows; small neighbors are concatenated, big
/// branches redistributed, keeping every interior node between half and
/// twice the target chunk size.
fn node_from(children: Vec<Text>, length: usize) -> Text {
    let lines: usize = children.iter().map(|c| c.len_lines()).sum();
    if lines < BRANCH {
        let mut flat = Vec::new();
        for child in &children {
            child.flatten_into(&mut flat);
        }
        return Text::leaf(flat, length);
    }
    let chunk = BRANCH.max(lines >> BRANCH_SHIFT);
    let max_chunk = chunk << 1;
    let min_chunk = chunk >> 1;
    let mut chunker = Chunker {
        chunk,
        max_chunk,
        min_chunk,
        chunked: Vec::new(),
        current: Vec::new(),
        current_lines: 0,
        current_len: 0,
    };
    for child in children {
        chunker.add(child);
    }
    chunker.flush();
    if chunker.chunked.len() == 1 {
        chunker.chunked.pop().expect("non-empty chunk list")
    } else {
        Text::branch(chunker.chunked, length)
    }
}

struct Chunker {
    chunk: usize,
    max_chunk: usize,
    min_chunk: usize,
    chunked: Vec<Text>,
    current: Vec<Text>,
    current_lines: usize,
    /// Length of `current` counted as `len + 1` per entry, so the real
    /// covered length is `current_len - 1`.
    current_len: usize,
}

impl Chunker {
    fn add(&mut self, child: Text) {
        let child_lines = child.len_lines();
        if child_lines > self.max_chunk {
            if let Node::Branch(branch) = child.node() {
                for node in branch.children.clone() {
                    self.add(node);
                }
                return;
            }
        }
        if child_lines > self.min_chunk && (self.current_lines > self.min_chunk || self.current_lines == 0)
        {
            self.flush();
            self.chunked.push(child);
        } else if let Some(merged) = self.try_merge_leaf(&child) {
            self.current_lines += child_lines;
            self.current_len += child.len() + 1;
            *self.current.last_mut().expect("merge with previous leaf") = merged;
        } else {
            if self.current_lines + child_lines > self.chunk {
                self.flush();
            }
            self.current_lines += child_lines;
            self.current_len += child.len() + 1;
            self.current.push(child);
        }
    }

    /// When both the incoming child and the last collected node are small
    /// leaves, concatenate them into one leaf.
    fn try_merge_leaf(&self, child: &Text) -> Option<Text> {
        if self.current_lines == 0 {
            return None;
        }
        let Node::Leaf(child_leaf) = child.node() else {
            return None;
        };
        let last = self.current.last()?;
        let Node::Leaf(last_leaf) = last.node() else {
            return None;
        };
        if child_leaf.text.len() + last_leaf.text.len() > BRANCH {
            return None;
        }
        let mut text = last_leaf.text.clone();
        text.extend(child_leaf.text.iter().cloned());
        let length = last.len() + 1 + child.len();
        Some(Text::leaf(text, length))
    }

    fn flush(&mut self) {
        if self.current_lines == 0 {
            return;
        }
        let node = if self.current.len() == 1 {
            self.current.pop().expect("single current node")
        } else {
            node_from(std::mem::take(&mut self.current), self.current_len - 1)
        };
        self.chunked.push(node);
        self.current.clear();
        self.current_len = 0;
        self.current_lines = 0;
    }
}

/// A line of the document, produced on demand by line lookup. `text` is
/// borrowed from the document and holds the line's content without its
/// break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    /// The position of the start of the line.
    pub from: usize,
    /// The position at the end of the line, before its break.
    pub to: usize,
    /// The 1-based line number.
    pub number: usize,
    /// The content of the line.
    pub text: &'a str,
}

impl Line<'_> {
    /// The length of the line, in code units.
    pub fn len(&self) -> usize {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Self) -> bool {
        Text::eq(self, other)
    }
}

impl Eq for Text {}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        self.try_for_each_line(&mut |line| {
            if !first {
                f.write_str("\n")?;
            }
            first = false;
            f.write_str(line)
        })
    }
}

impl Serialize for Text {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len_lines()))?;
        self.try_for_each_line(&mut |line| seq.serialize_element(line))?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Text {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let lines = Vec::<String>::deserialize(deserializer)?;
        if lines.is_empty() {
            return Err(D::Error::custom("a document must have at least one line"));
        }
        Ok(Text::of(lines))
    }
}

#[cfg(test)]
mod tests;
