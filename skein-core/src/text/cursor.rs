//! Cursors over the document tree.
//!
//! The raw cursor walks the tree with an explicit stack. Each stack entry
//! pairs a node with an offset into it, shifted left one bit; the low bit
//! records whether the next step crosses the implicit line break between
//! two siblings or enters the next sibling itself. Cursors are finite and
//! cannot be restarted once exhausted.

use super::{str_len, str_slice, Node, Text};

fn node_size(node: &Node) -> usize {
    match node {
        Node::Leaf(leaf) => leaf.text.len(),
        Node::Branch(branch) => branch.children.len(),
    }
}

pub(super) struct RawCursor<'a> {
    pub(super) dir: i32,
    nodes: Vec<&'a Node>,
    offsets: Vec<usize>,
    pub(super) value: &'a str,
    pub(super) line_break: bool,
    pub(super) done: bool,
}

impl<'a> RawCursor<'a> {
    pub(super) fn new(text: &'a Text, dir: i32) -> RawCursor<'a> {
        let root: &Node = &text.node;
        RawCursor {
            dir,
            nodes: vec![root],
            offsets: vec![if dir > 0 { 1 } else { node_size(root) << 1 }],
            value: "",
            line_break: false,
            done: false,
        }
    }

    /// Advance past `skip` code units and load the next line chunk or
    /// break into `value`.
    pub(super) fn next(&mut self, skip: usize) {
        self.next_inner(skip, self.dir);
    }

    fn next_inner(&mut self, mut skip: usize, dir: i32) {
        self.done = false;
        self.line_break = false;
        loop {
            let last = self.nodes.len() - 1;
            let top = self.nodes[last];
            let offset_value = self.offsets[last];
            let offset = offset_value >> 1;
            let size = node_size(top);
            if offset == if dir > 0 { size } else { 0 } {
                if last == 0 {
                    self.done = true;
                    self.value = "";
                    return;
                }
                if dir > 0 {
                    self.offsets[last - 1] += 1;
                }
                self.nodes.pop();
                self.offsets.pop();
            } else if (offset_value & 1) == if dir > 0 { 0 } else { 1 } {
                // The next step is the break between two siblings.
                if dir > 0 {
                    self.offsets[last] += 1;
                } else {
                    self.offsets[last] -= 1;
                }
                if skip == 0 {
                    self.line_break = true;
                    self.value = "\n";
                    return;
                }
                skip -= 1;
            } else {
                match top {
                    Node::Leaf(leaf) => {
                        let next: &'a str = &leaf.text[if dir < 0 { offset - 1 } else { offset }];
                        if dir > 0 {
                            self.offsets[last] += 1;
                        } else {
                            self.offsets[last] -= 1;
                        }
                        let len = str_len(next);
                        if len > skip {
                            self.value = if skip == 0 {
                                next
                            } else if dir > 0 {
                                str_slice(next, skip, len)
                            } else {
                                str_slice(next, 0, len - skip)
                            };
                            return;
                        }
                        skip -= len;
                    }
                    Node::Branch(branch) => {
                        let next = &branch.children[if dir < 0 { offset - 1 } else { offset }];
                        if skip > next.len() {
                            skip -= next.len();
                            if dir > 0 {
                                self.offsets[last] += 1;
                            } else {
                                self.offsets[last] -= 1;
                            }
                        } else {
                            if dir < 0 {
                                self.offsets[last] -= 1;
                            }
                            let child: &'a Node = &next.node;
                            self.nodes.push(child);
                            self.offsets
                                .push(if dir > 0 { 1 } else { node_size(child) << 1 });
                        }
                    }
                }
            }
        }
    }
}

/// Iterator over the whole document, yielding line chunks alternated with
/// `"\n"` breaks. Produced by [`Text::iter`] and [`Text::iter_rev`].
pub struct TextIter<'a> {
    raw: RawCursor<'a>,
}

impl<'a> TextIter<'a> {
    pub(super) fn new(text: &'a Text, dir: i32) -> TextIter<'a> {
        TextIter {
            raw: RawCursor::new(text, dir),
        }
    }

    /// Whether the most recently yielded item was a line break.
    pub fn line_break(&self) -> bool {
        self.raw.line_break
    }
}

impl<'a> Iterator for TextIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        self.raw.next(0);
        if self.raw.done {
            None
        } else {
            Some(self.raw.value)
        }
    }
}

/// Iterator over a sub-range of the document, yielding line chunks and
/// `"\n"` breaks clipped to the range. Produced by [`Text::iter_range`];
/// runs backwards when the range was given in decreasing order.
pub struct PartialIter<'a> {
    cursor: RawCursor<'a>,
    pos: usize,
    from: usize,
    to: usize,
    pub(super) value: &'a str,
    pub(super) done: bool,
}

impl<'a> PartialIter<'a> {
    pub(super) fn new(text: &'a Text, start: usize, end: usize) -> PartialIter<'a> {
        let dir = if start > end { -1 } else { 1 };
        PartialIter {
            cursor: RawCursor::new(text, dir),
            pos: if start > end { text.len() } else { 0 },
            from: start.min(end),
            to: start.max(end),
            value: "",
            done: false,
        }
    }

    pub(super) fn advance(&mut self) {
        let dir = self.cursor.dir;
        if if dir < 0 { self.pos <= self.from } else { self.pos >= self.to } {
            self.value = "";
            self.done = true;
            return;
        }
        // Fast-forward over the part of the document outside the range.
        let mut skip = if dir < 0 {
            self.pos.saturating_sub(self.to)
        } else {
            self.from.saturating_sub(self.pos)
        };
        let mut limit = if dir < 0 {
            self.pos - self.from
        } else {
            self.to - self.pos
        };
        if skip > limit {
            skip = limit;
        }
        limit -= skip;
        self.cursor.next(skip);
        let value = self.cursor.value;
        let len = if self.cursor.line_break { 1 } else { str_len(value) };
        if dir < 0 {
            self.pos -= len + skip;
        } else {
            self.pos += len + skip;
        }
        self.value = if len <= limit {
            value
        } else if dir < 0 {
            str_slice(value, len - limit, len)
        } else {
            str_slice(value, 0, limit)
        };
        self.done = self.value.is_empty();
    }

    /// Whether the most recently yielded item was a line break.
    pub fn line_break(&self) -> bool {
        self.cursor.line_break && !self.value.is_empty()
    }
}

impl<'a> Iterator for PartialIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.done {
            return None;
        }
        self.advance();
        if self.done {
            None
        } else {
            Some(self.value)
        }
    }
}

enum LineSource<'a> {
    Whole(RawCursor<'a>),
    Part(PartialIter<'a>),
}

impl<'a> LineSource<'a> {
    fn step(&mut self) -> (bool, bool, &'a str) {
        match self {
            LineSource::Whole(raw) => {
                raw.next(0);
                (raw.done, raw.line_break, raw.value)
            }
            LineSource::Part(part) => {
                part.advance();
                (part.done, part.line_break(), part.value)
            }
        }
    }
}

/// Iterator over whole lines, one string per line, without breaks. Empty
/// lines come out as empty strings. Produced by [`Text::iter_lines`] and
/// [`Text::iter_lines_range`].
pub struct LinesIter<'a> {
    inner: LineSource<'a>,
    after_break: bool,
    done: bool,
}

impl<'a> LinesIter<'a> {
    pub(super) fn whole(text: &'a Text) -> LinesIter<'a> {
        LinesIter {
            inner: LineSource::Whole(RawCursor::new(text, 1)),
            after_break: true,
            done: false,
        }
    }

    pub(super) fn partial(text: &'a Text, from: usize, to: usize) -> LinesIter<'a> {
        LinesIter {
            inner: LineSource::Part(PartialIter::new(text, from, to)),
            after_break: true,
            done: false,
        }
    }
}

impl<'a> Iterator for LinesIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.done {
            return None;
        }
        loop {
            let (done, line_break, value) = self.inner.step();
            if done && self.after_break {
                // The line after the final break, or the only line of an
                // empty document.
                self.after_break = false;
                return Some("");
            } else if done {
                self.done = true;
                return None;
            } else if line_break {
                if self.after_break {
                    return Some("");
                }
                self.after_break = true;
            } else {
                self.after_break = false;
                return Some(value);
            }
        }
    }
}
