//! Cursors over range set layers.
//!
//! A [`LayerCursor`] walks the chunks of a single layer in order, skipping
//! chunks known to be shared with the other side of a comparison, chunks
//! before the target position, and chunks without big-enough points when a
//! minimum point size is set. A [`HeapCursor`] merges several layer
//! cursors through a min-heap keyed by `(from, start_side, rank, to,
//! end_side)`. A [`SpanCursor`] turns the merged range stream into a
//! stream of spans and points, tracking which non-point ranges are active
//! at the current position.

use std::cmp::Ordering;

use smallvec::SmallVec;

use super::{chunk_key, cmp2, RangeSet, RangeValue, SharedChunks, FAR, FAR_SIDE};

pub(super) struct LayerCursor<'a, V: RangeValue> {
    layer: &'a RangeSet<V>,
    skip: Option<&'a SharedChunks>,
    min_point: isize,
    pub(super) rank: usize,
    pub(super) from: usize,
    pub(super) to: usize,
    pub(super) value: Option<&'a V>,
    pub(super) chunk_index: usize,
    pub(super) range_index: usize,
}

impl<'a, V: RangeValue> LayerCursor<'a, V> {
    pub(super) fn new(
        layer: &'a RangeSet<V>,
        skip: Option<&'a SharedChunks>,
        min_point: isize,
        rank: usize,
    ) -> LayerCursor<'a, V> {
        LayerCursor {
            layer,
            skip,
            min_point,
            rank,
            from: FAR,
            to: FAR,
            value: None,
            chunk_index: 0,
            range_index: 0,
        }
    }

    pub(super) fn start_side(&self) -> i32 {
        self.value.map_or(0, |v| v.start_side())
    }

    pub(super) fn end_side(&self) -> i32 {
        self.value.map_or(0, |v| v.end_side())
    }

    pub(super) fn goto(&mut self, pos: usize, side: i32) {
        self.chunk_index = 0;
        self.range_index = 0;
        self.goto_inner(pos, side, false);
    }

    fn goto_inner(&mut self, pos: usize, side: i32, mut forward: bool) {
        while self.chunk_index < self.layer.chunks.len() {
            let next = &self.layer.chunks[self.chunk_index];
            let skipped = self
                .skip
                .is_some_and(|skip| skip.contains(&chunk_key(next)))
                || self.layer.chunk_end(self.chunk_index) < pos
                || next.max_point < self.min_point;
            if !skipped {
                break;
            }
            self.chunk_index += 1;
            forward = false;
        }
        if self.chunk_index < self.layer.chunks.len() {
            let range_index = self.layer.chunks[self.chunk_index].find_index(
                pos as isize - self.layer.chunk_pos[self.chunk_index] as isize,
                side,
                true,
                0,
            );
            if !forward || self.range_index < range_index {
                self.set_range_index(range_index);
            }
        }
        self.next();
    }

    pub(super) fn forward(&mut self, pos: usize, side: i32) {
        if cmp2(self.to as isize, self.end_side(), pos as isize, side) == Ordering::Less {
            self.goto_inner(pos, side, true);
        }
    }

    pub(super) fn next(&mut self) {
        loop {
            if self.chunk_index == self.layer.chunks.len() {
                self.from = FAR;
                self.to = FAR;
                self.value = None;
                return;
            }
            let chunk_pos = self.layer.chunk_pos[self.chunk_index];
            let chunk = &self.layer.chunks[self.chunk_index];
            self.from = chunk_pos + chunk.from[self.range_index];
            self.to = chunk_pos + chunk.to[self.range_index];
            self.value = Some(&chunk.value[self.range_index]);
            self.set_range_index(self.range_index + 1);
            let keep = self.min_point < 0
                || self.value.is_some_and(|v| v.is_point())
                    && (self.to - self.from) as isize >= self.min_point;
            if keep {
                return;
            }
        }
    }

    fn set_range_index(&mut self, index: usize) {
        if index == self.layer.chunks[self.chunk_index].value.len() {
            self.chunk_index += 1;
            if let Some(skip) = self.skip {
                while self.chunk_index < self.layer.chunks.len()
                    && skip.contains(&chunk_key(&self.layer.chunks[self.chunk_index]))
                {
                    self.chunk_index += 1;
                }
            }
            self.range_index = 0;
        } else {
            self.range_index = index;
        }
    }

    pub(super) fn next_chunk(&mut self) {
        self.chunk_index += 1;
        self.range_index = 0;
        self.next();
    }

    fn sort_key(&self) -> (usize, i32, usize, usize, i32) {
        (
            self.from,
            self.start_side(),
            self.rank,
            self.to,
            self.end_side(),
        )
    }
}

pub(super) struct HeapCursor<'a, V: RangeValue> {
    heap: Vec<LayerCursor<'a, V>>,
    pub(super) from: usize,
    pub(super) to: usize,
    pub(super) value: Option<&'a V>,
    pub(super) rank: usize,
}

impl<'a, V: RangeValue> HeapCursor<'a, V> {
    pub(super) fn new(
        sets: &[&'a RangeSet<V>],
        skip: Option<&'a SharedChunks>,
        min_point: isize,
    ) -> HeapCursor<'a, V> {
        let mut heap = Vec::new();
        for (rank, set) in sets.iter().enumerate() {
            let mut layer = Some(*set);
            while let Some(cur) = layer {
                if cur.is_empty() {
                    break;
                }
                if cur.max_point >= min_point {
                    heap.push(LayerCursor::new(cur, skip, min_point, rank));
                }
                layer = cur.next_layer.as_deref();
            }
        }
        HeapCursor {
            heap,
            from: FAR,
            to: FAR,
            value: None,
            rank: 0,
        }
    }

    pub(super) fn start_side(&self) -> i32 {
        self.value.map_or(0, |v| v.start_side())
    }

    pub(super) fn goto(&mut self, pos: usize, side: i32) {
        for cur in &mut self.heap {
            cur.goto(pos, side);
        }
        heapify(&mut self.heap);
        self.next();
    }

    pub(super) fn forward(&mut self, pos: usize, side: i32) {
        for cur in &mut self.heap {
            cur.forward(pos, side);
        }
        heapify(&mut self.heap);
        let end_side = self.value.map_or(0, |v| v.end_side());
        if cmp2(self.to as isize, end_side, pos as isize, side) == Ordering::Less {
            self.next();
        }
    }

    pub(super) fn next(&mut self) {
        if self.heap.is_empty() {
            self.from = FAR;
            self.to = FAR;
            self.value = None;
            self.rank = 0;
        } else {
            let (from, to, value, rank) = {
                let top = &self.heap[0];
                (top.from, top.to, top.value, top.rank)
            };
            self.from = from;
            self.to = to;
            self.value = value;
            self.rank = rank;
            if value.is_some() {
                self.heap[0].next();
            }
            heap_bubble(&mut self.heap, 0);
        }
    }
}

fn heapify<V: RangeValue>(heap: &mut [LayerCursor<'_, V>]) {
    for i in (0..heap.len() / 2).rev() {
        heap_bubble(heap, i);
    }
}

fn heap_bubble<V: RangeValue>(heap: &mut [LayerCursor<'_, V>], mut index: usize) {
    loop {
        let mut child = (index << 1) + 1;
        if child >= heap.len() {
            break;
        }
        if child + 1 < heap.len() && heap[child].sort_key() >= heap[child + 1].sort_key() {
            child += 1;
        }
        if heap[index].sort_key() < heap[child].sort_key() {
            break;
        }
        heap.swap(index, child);
        index = child;
    }
}

type Active<'a, V> = SmallVec<[&'a V; 4]>;

pub(super) struct SpanCursor<'a, V: RangeValue> {
    cursor: HeapCursor<'a, V>,
    pub(super) active: Active<'a, V>,
    active_to: SmallVec<[usize; 4]>,
    active_rank: SmallVec<[usize; 4]>,
    min_active: isize,
    pub(super) point: Option<&'a V>,
    pub(super) point_from: usize,
    pub(super) point_rank: usize,
    pub(super) to: usize,
    pub(super) end_side: i32,
    /// Number of ranges already open at the position iteration started
    /// from; -1 before the first step computes it.
    pub(super) open_start: isize,
}

impl<'a, V: RangeValue> SpanCursor<'a, V> {
    pub(super) fn new(
        sets: &[&'a RangeSet<V>],
        skip: Option<&'a SharedChunks>,
        min_point: isize,
    ) -> SpanCursor<'a, V> {
        SpanCursor {
            cursor: HeapCursor::new(sets, skip, min_point),
            active: SmallVec::new(),
            active_to: SmallVec::new(),
            active_rank: SmallVec::new(),
            min_active: -1,
            point: None,
            point_from: 0,
            point_rank: 0,
            to: 0,
            end_side: 0,
            open_start: -1,
        }
    }

    pub(super) fn goto(&mut self, pos: usize, side: i32) {
        self.cursor.goto(pos, side);
        self.active.clear();
        self.active_to.clear();
        self.active_rank.clear();
        self.min_active = -1;
        self.point = None;
        self.to = pos;
        self.end_side = side;
        self.open_start = -1;
        self.next();
    }

    fn forward(&mut self, pos: usize, side: i32) {
        while self.min_active > -1 {
            let a = self.min_active as usize;
            if cmp2(
                self.active_to[a] as isize,
                self.active[a].end_side(),
                pos as isize,
                side,
            ) == Ordering::Less
            {
                self.remove_active(a);
            } else {
                break;
            }
        }
        self.cursor.forward(pos, side);
    }

    fn remove_active(&mut self, index: usize) {
        self.active.remove(index);
        self.active_to.remove(index);
        self.active_rank.remove(index);
        self.min_active = find_min_index(&self.active, &self.active_to);
    }

    fn add_active(&mut self, track_open: &mut Option<Vec<usize>>) {
        let value = self.cursor.value.expect("adding active from live cursor");
        let to = self.cursor.to;
        let rank = self.cursor.rank;
        let mut i = 0;
        // Actives are kept sorted by rank, then end position.
        while i < self.active_rank.len() && (rank, to) > (self.active_rank[i], self.active_to[i]) {
            i += 1;
        }
        self.active.insert(i, value);
        self.active_to.insert(i, to);
        self.active_rank.insert(i, rank);
        if let Some(open) = track_open {
            open.insert(i, self.cursor.from);
        }
        self.min_active = find_min_index(&self.active, &self.active_to);
    }

    /// Advance to the next span boundary. Afterwards, when `point` is
    /// set the region up to `to` is a point; otherwise it is covered by
    /// the values in `active`.
    pub(super) fn next(&mut self) {
        let from = self.to;
        let was_point = self.point.is_some();
        self.point = None;
        let mut track_open: Option<Vec<usize>> = if self.open_start < 0 {
            Some(Vec::new())
        } else {
            None
        };
        loop {
            let a = self.min_active;
            let active_ends_first = a > -1 && {
                let ai = a as usize;
                cmp2(
                    self.active_to[ai] as isize,
                    self.active[ai].end_side(),
                    self.cursor.from as isize,
                    self.cursor.start_side(),
                ) == Ordering::Less
            };
            if active_ends_first {
                let ai = a as usize;
                if self.active_to[ai] > from {
                    self.to = self.active_to[ai];
                    self.end_side = self.active[ai].end_side();
                    break;
                }
                self.remove_active(ai);
                if let Some(open) = &mut track_open {
                    open.remove(ai);
                }
            } else if self.cursor.value.is_none() {
                self.to = FAR;
                self.end_side = FAR_SIDE;
                break;
            } else if self.cursor.from > from {
                self.to = self.cursor.from;
                self.end_side = self.cursor.start_side();
                break;
            } else {
                let next_val = self.cursor.value.expect("checked non-empty");
                if !next_val.is_point() {
                    self.add_active(&mut track_open);
                    self.cursor.next();
                } else if was_point
                    && self.cursor.to == self.to
                    && next_val.end_side() == self.end_side
                {
                    // A non-empty point ending exactly at the end of the
                    // previous point is dropped.
                    self.cursor.next();
                } else {
                    self.point = Some(next_val);
                    self.point_from = self.cursor.from;
                    self.point_rank = self.cursor.rank;
                    self.to = self.cursor.to;
                    self.end_side = next_val.end_side();
                    self.cursor.next();
                    let (to, side) = (self.to, self.end_side);
                    self.forward(to, side);
                    break;
                }
            }
        }
        if let Some(open) = track_open {
            self.open_start = 0;
            for i in (0..open.len()).rev() {
                if open[i] < from {
                    self.open_start += 1;
                } else {
                    break;
                }
            }
        }
    }

    /// The active ranges a point does not shadow: those with at least its
    /// rank that reach past its end.
    pub(super) fn active_for_point(&self, to: usize) -> Active<'a, V> {
        let mut active: Active<'a, V> = SmallVec::new();
        if self.active.is_empty() {
            return active;
        }
        let point_end_side = self.point.map_or(0, |p| p.end_side());
        for i in (0..self.active.len()).rev() {
            if self.active_rank[i] < self.point_rank {
                break;
            }
            if self.active_to[i] > to
                || self.active_to[i] == to && self.active[i].end_side() >= point_end_side
            {
                active.push(self.active[i]);
            }
        }
        active.reverse();
        active
    }

    /// How many active ranges extend past `to`.
    pub(super) fn open_end(&self, to: usize) -> usize {
        let mut open = 0;
        for i in (0..self.active_to.len()).rev() {
            if self.active_to[i] > to {
                open += 1;
            } else {
                break;
            }
        }
        open
    }
}

fn find_min_index<V: RangeValue>(values: &[&V], tos: &[usize]) -> isize {
    let mut found: isize = -1;
    let mut found_pos = FAR;
    for i in 0..tos.len() {
        let less = tos[i] < found_pos
            || tos[i] == found_pos
                && found >= 0
                && values[i].end_side() < values[found as usize].end_side();
        if less {
            found = i as isize;
            found_pos = tos[i];
        }
    }
    found
}
