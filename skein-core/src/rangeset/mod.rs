//! Sets of tagged ranges over a document.
//!
//! A [`RangeSet`] stores [`Range`]s, `(from, to, value)` triples, sorted
//! by `(from, start_side)`, in chunks of up to 250 ranges with positions
//! relative to the chunk start. Ranges that cannot be appended in order
//! (because they start before the end of a previous range sorted after
//! them) spill into a next *layer*, itself a range set; iteration merges
//! the layers back together. Sets are immutable: [`update`](RangeSet::update)
//! and [`map`](RangeSet::map) return new sets reusing unchanged chunks by
//! reference, which also makes whole-set comparison cheap
//! ([`compare`](RangeSet::compare) skips chunks shared between both sides).
//!
//! The values attached to ranges implement [`RangeValue`], which fixes
//! their bias at range endpoints, their behavior under position mapping,
//! and whether they are *point* ranges. Points are meaningful when empty
//! and shadow other ranges they overlap during span iteration.

use std::cmp::Ordering;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::change::{ChangeDesc, MapMode, Touched};

mod cursor;

use cursor::{HeapCursor, LayerCursor, SpanCursor};

pub(crate) const FAR: usize = 1_000_000_000;
pub(crate) const FAR_SIDE: i32 = 1_000_000_000;

/// Number of ranges after which a chunk is closed.
const CHUNK_SIZE: usize = 250;

/// The set of chunks shared between two collections of sets, keyed by
/// allocation identity.
pub(crate) type SharedChunks = HashSet<*const ()>;

/// A value that can be attached to ranges in a [`RangeSet`]. The provided
/// methods fix the value's behavior at range endpoints; structural
/// comparison between values is plain equality.
pub trait RangeValue: Clone + PartialEq {
    /// The bias of the range's start. Among ranges starting at the same
    /// position, those with a lower start side sort first, and an
    /// insertion at the position ends up inside ranges whose start side
    /// is negative.
    fn start_side(&self) -> i32 {
        0
    }

    /// The bias of the range's end.
    fn end_side(&self) -> i32 {
        0
    }

    /// How the position of an empty range maps through deletions.
    fn map_mode(&self) -> MapMode {
        MapMode::TrackDel
    }

    /// Point ranges are meaningful when empty, are atomic, and shadow
    /// the non-point ranges they overlap during span iteration.
    fn is_point(&self) -> bool {
        false
    }

    /// Build a [`Range`] with this value.
    fn range(self, from: usize, to: usize) -> Range<Self>
    where
        Self: Sized,
    {
        Range {
            from,
            to,
            value: self,
        }
    }
}

/// A tagged range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range<V> {
    pub from: usize,
    pub to: usize,
    pub value: V,
}

fn cmp_range<V: RangeValue>(a: &Range<V>, b: &Range<V>) -> Ordering {
    (a.from, a.value.start_side()).cmp(&(b.from, b.value.start_side()))
}

fn cmp2(a_pos: isize, a_side: i32, b_pos: isize, b_side: i32) -> Ordering {
    a_pos.cmp(&b_pos).then(a_side.cmp(&b_side))
}

/// Up to [`CHUNK_SIZE`] ranges in parallel arrays, positions relative to
/// the chunk start.
#[derive(Debug)]
pub(crate) struct Chunk<V> {
    from: Vec<usize>,
    to: Vec<usize>,
    value: Vec<V>,
    /// The largest `to - from` among point values in this chunk, or -1.
    max_point: isize,
}

impl<V: RangeValue> Chunk<V> {
    fn len(&self) -> usize {
        self.to.last().copied().unwrap_or(0)
    }

    /// Binary search for the index of `pos`/`side`, comparing against
    /// range ends when `end` is set and starts otherwise, with the
    /// matching side as tiebreak.
    fn find_index(&self, pos: isize, side: i32, end: bool, start_at: usize) -> usize {
        let arr = if end { &self.to } else { &self.from };
        let (mut lo, mut hi) = (start_at, arr.len());
        loop {
            if lo == hi {
                return lo;
            }
            let mid = (lo + hi) >> 1;
            let mid_side = if end {
                self.value[mid].end_side()
            } else {
                self.value[mid].start_side()
            };
            let ge = cmp2(arr[mid] as isize, mid_side, pos, side) != Ordering::Less;
            if mid == lo {
                return if ge { lo } else { hi };
            }
            if ge {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
    }

    fn between(
        &self,
        offset: usize,
        from: isize,
        to: isize,
        f: &mut dyn FnMut(usize, usize, &V) -> bool,
    ) -> bool {
        let start = self.find_index(from, -FAR_SIDE, true, 0);
        let end = (self.find_index(to, FAR_SIDE, false, 0) + 1).min(self.value.len());
        for i in start..end {
            if !f(self.from[i] + offset, self.to[i] + offset, &self.value[i]) {
                return false;
            }
        }
        true
    }

    /// Map every range in this chunk through a change. Returns the new
    /// chunk (or `None` when no range survives) and its new start
    /// position.
    fn map(&self, offset: usize, changes: &ChangeDesc) -> (Option<Chunk<V>>, usize) {
        let mut value = Vec::new();
        let mut from = Vec::new();
        let mut to = Vec::new();
        let mut new_pos: isize = -1;
        let mut max_point: isize = -1;
        for i in 0..self.value.len() {
            let val = &self.value[i];
            let cur_from = self.from[i] + offset;
            let cur_to = self.to[i] + offset;
            let (new_from, new_to);
            if cur_from == cur_to {
                let Some(mapped) = changes.map_pos_mode(cur_from, val.start_side(), val.map_mode())
                else {
                    continue;
                };
                new_from = mapped;
                if val.start_side() != val.end_side() {
                    let end = changes.map_pos(cur_from, val.end_side());
                    if end < new_from {
                        continue;
                    }
                    new_to = end;
                } else {
                    new_to = mapped;
                }
            } else {
                new_from = changes.map_pos(cur_from, val.start_side());
                new_to = changes.map_pos(cur_to, val.end_side());
                if new_from > new_to
                    || new_from == new_to && val.start_side() > 0 && val.end_side() <= 0
                {
                    continue;
                }
            }
            if new_to < new_from || new_to == new_from && val.end_side() < val.start_side() {
                continue;
            }
            if new_pos < 0 {
                new_pos = new_from as isize;
            }
            if val.is_point() {
                max_point = max_point.max((new_to - new_from) as isize);
            }
            value.push(val.clone());
            from.push(new_from - new_pos as usize);
            to.push(new_to - new_pos as usize);
        }
        if value.is_empty() {
            (None, 0)
        } else {
            (
                Some(Chunk {
                    from,
                    to,
                    value,
                    max_point,
                }),
                new_pos as usize,
            )
        }
    }
}

fn chunk_key<V>(chunk: &Arc<Chunk<V>>) -> *const () {
    Arc::as_ptr(chunk) as *const ()
}

/// An immutable, layered collection of tagged ranges.
#[derive(Debug, Clone)]
pub struct RangeSet<V: RangeValue> {
    chunk_pos: Vec<usize>,
    chunks: Vec<Arc<Chunk<V>>>,
    /// Ranges that could not be stored in order in this layer. `None`
    /// terminates the chain.
    next_layer: Option<Arc<RangeSet<V>>>,
    max_point: isize,
}

/// The specification for [`RangeSet::update`]. Build one with struct
/// update syntax over [`Default`].
pub struct RangeSetUpdate<'a, V: RangeValue> {
    /// Ranges to add, sorted by `(from, start_side)` unless `sort` is set.
    pub add: Vec<Range<V>>,
    pub sort: bool,
    /// When given, existing ranges overlapping `filter_from..=filter_to`
    /// are kept only when this returns `true`.
    #[allow(clippy::type_complexity)]
    pub filter: Option<Box<dyn FnMut(usize, usize, &V) -> bool + 'a>>,
    pub filter_from: usize,
    /// Defaults to the length covered by the set.
    pub filter_to: Option<usize>,
}

impl<V: RangeValue> Default for RangeSetUpdate<'_, V> {
    fn default() -> Self {
        RangeSetUpdate {
            add: Vec::new(),
            sort: false,
            filter: None,
            filter_from: 0,
            filter_to: None,
        }
    }
}

impl<V: RangeValue> RangeSet<V> {
    /// The empty set.
    pub fn empty() -> RangeSet<V> {
        RangeSet {
            chunk_pos: Vec::new(),
            chunks: Vec::new(),
            next_layer: None,
            max_point: -1,
        }
    }

    /// Build a set from the given ranges. Unless `sort` is set, they must
    /// already be sorted by `(from, start_side)`.
    pub fn of(ranges: Vec<Range<V>>, sort: bool) -> RangeSet<V> {
        let mut ranges = ranges;
        if sort {
            ranges.sort_by(cmp_range);
        }
        let mut builder = RangeSetBuilder::new();
        for range in ranges {
            builder.add(range.from, range.to, range.value);
        }
        builder.finish()
    }

    /// Stack several sets into one by chaining their layers. The first
    /// set's ranges win ties during iteration of the result.
    pub fn join(sets: &[RangeSet<V>]) -> RangeSet<V> {
        let Some(last) = sets.last() else {
            return RangeSet::empty();
        };
        let mut result = last.clone();
        for set in sets[..sets.len() - 1].iter().rev() {
            let mut layer = Some(set);
            while let Some(cur) = layer {
                if cur.is_empty() {
                    break;
                }
                let prev = std::mem::replace(&mut result, RangeSet::empty());
                let max_point = cur.max_point.max(prev.max_point);
                result = RangeSet {
                    chunk_pos: cur.chunk_pos.clone(),
                    chunks: cur.chunks.clone(),
                    next_layer: if prev.is_empty() {
                        None
                    } else {
                        Some(Arc::new(prev))
                    },
                    max_point,
                };
                layer = cur.next_layer.as_deref();
            }
        }
        result
    }

    /// `true` when the set holds no ranges.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.next_layer.is_none()
    }

    /// The number of ranges in the set, across all layers.
    pub fn size(&self) -> usize {
        let mut size = self.next_layer.as_ref().map_or(0, |layer| layer.size());
        for chunk in &self.chunks {
            size += chunk.value.len();
        }
        size
    }

    /// The largest position covered by a range in the set.
    pub fn len(&self) -> usize {
        let own = if self.chunks.is_empty() {
            0
        } else {
            self.chunk_end(self.chunks.len() - 1)
        };
        own.max(self.next_layer.as_ref().map_or(0, |layer| layer.len()))
    }

    fn chunk_end(&self, index: usize) -> usize {
        self.chunk_pos[index] + self.chunks[index].len()
    }

    /// Update the set: filter existing ranges, add new ones. Chunks that
    /// the filter cannot touch and that no added range interleaves with
    /// are reused by reference.
    pub fn update(&self, update: RangeSetUpdate<'_, V>) -> RangeSet<V> {
        let RangeSetUpdate {
            mut add,
            sort,
            mut filter,
            filter_from,
            filter_to,
        } = update;
        let filter_to = filter_to.unwrap_or_else(|| self.len());
        if add.is_empty() && filter.is_none() {
            return self.clone();
        }
        if sort {
            add.sort_by(cmp_range);
        }
        if self.is_empty() {
            return if add.is_empty() {
                self.clone()
            } else {
                RangeSet::of(add, false)
            };
        }
        let mut cur = LayerCursor::new(self, None, -1, 0);
        cur.goto(0, -FAR_SIDE);
        let mut i = 0;
        let mut spill: Vec<Range<V>> = Vec::new();
        let mut builder = RangeSetBuilder::new();
        while cur.value.is_some() || i < add.len() {
            let add_first = i < add.len()
                && cmp2(
                    cur.from as isize,
                    cur.start_side(),
                    add[i].from as isize,
                    add[i].value.start_side(),
                ) != Ordering::Less;
            if add_first {
                let range = add[i].clone();
                i += 1;
                if !builder.add_inner(range.from, range.to, range.value.clone()) {
                    spill.push(range);
                }
            } else if cur.range_index == 1
                && cur.chunk_index < self.chunks.len()
                && (i == add.len() || self.chunk_end(cur.chunk_index) < add[i].from)
                && (filter.is_none()
                    || filter_from > self.chunk_end(cur.chunk_index)
                    || filter_to < self.chunk_pos[cur.chunk_index])
                && builder.add_chunk(self.chunk_pos[cur.chunk_index], &self.chunks[cur.chunk_index])
            {
                cur.next_chunk();
            } else {
                let keep = match &mut filter {
                    None => true,
                    Some(f) => {
                        filter_from > cur.to
                            || filter_to < cur.from
                            || f(cur.from, cur.to, cur.value.expect("live cursor"))
                    }
                };
                if keep {
                    let value = cur.value.expect("live cursor").clone();
                    if !builder.add_inner(cur.from, cur.to, value.clone()) {
                        spill.push(Range {
                            from: cur.from,
                            to: cur.to,
                            value,
                        });
                    }
                }
                cur.next();
            }
        }
        let next = if self.next_layer.is_none() && spill.is_empty() {
            RangeSet::empty()
        } else {
            let deeper = self
                .next_layer
                .as_deref()
                .cloned()
                .unwrap_or_else(RangeSet::empty);
            deeper.update(RangeSetUpdate {
                add: spill,
                sort: false,
                filter,
                filter_from,
                filter_to: Some(filter_to),
            })
        };
        builder.finish_inner(next)
    }

    /// Map the positions of all ranges through a change. Chunks not
    /// touched by the change are reused with only their position
    /// adjusted; chunks covered whole by a single replacement are
    /// dropped; the rest are rebuilt range by range, dropping ranges
    /// whose mapping collapses them.
    pub fn map(&self, changes: &ChangeDesc) -> RangeSet<V> {
        if changes.is_empty() || self.is_empty() {
            return self.clone();
        }
        let mut chunks = Vec::new();
        let mut chunk_pos = Vec::new();
        let mut max_point: isize = -1;
        for i in 0..self.chunks.len() {
            let start = self.chunk_pos[i];
            let chunk = &self.chunks[i];
            match changes.touches_range(start, start + chunk.len()) {
                Touched::No => {
                    max_point = max_point.max(chunk.max_point);
                    chunks.push(chunk.clone());
                    chunk_pos.push(changes.map_pos(start, -1));
                }
                Touched::Yes => {
                    let (mapped, pos) = chunk.map(start, changes);
                    if let Some(mapped) = mapped {
                        max_point = max_point.max(mapped.max_point);
                        chunks.push(Arc::new(mapped));
                        chunk_pos.push(pos);
                    }
                }
                Touched::Cover => {}
            }
        }
        let next = self
            .next_layer
            .as_ref()
            .map(|layer| layer.map(changes))
            .filter(|layer| !layer.is_empty());
        if chunks.is_empty() {
            next.unwrap_or_else(RangeSet::empty)
        } else {
            RangeSet {
                chunk_pos,
                chunks,
                next_layer: next.map(Arc::new),
                max_point,
            }
        }
    }

    /// Call `f` for every range touching `[from, to]`, in no particular
    /// order. Returning `false` from the callback stops iteration.
    pub fn between(&self, from: usize, to: usize, mut f: impl FnMut(usize, usize, &V) -> bool) {
        self.between_inner(from, to, &mut f);
    }

    fn between_inner(
        &self,
        from: usize,
        to: usize,
        f: &mut dyn FnMut(usize, usize, &V) -> bool,
    ) -> bool {
        for i in 0..self.chunks.len() {
            let start = self.chunk_pos[i];
            let chunk = &self.chunks[i];
            if to >= start
                && from <= start + chunk.len()
                && !chunk.between(
                    start,
                    from as isize - start as isize,
                    to as isize - start as isize,
                    f,
                )
            {
                return false;
            }
        }
        match &self.next_layer {
            Some(layer) => layer.between_inner(from, to, f),
            None => true,
        }
    }

    /// Iterate the set's ranges in `(from, start_side)` order, starting
    /// at `from`, with all layers merged.
    pub fn iter(&self, from: usize) -> RangeIter<'_, V> {
        RangeIter::new(std::slice::from_ref(self), from)
    }

    /// Iterate several sets at once, merged in order. Ties go to the set
    /// that comes first in `sets`.
    pub fn iter_sets(sets: &[RangeSet<V>], from: usize) -> RangeIter<'_, V> {
        RangeIter::new(sets, from)
    }

    /// Compare two groups of sets over the unchanged regions of
    /// `text_diff`, reporting differing spans and points to `comparator`.
    /// With `min_point_size` zero or greater, only point ranges of at
    /// least that size are considered.
    pub fn compare<C: RangeComparator<V>>(
        old_sets: &[RangeSet<V>],
        new_sets: &[RangeSet<V>],
        text_diff: &ChangeDesc,
        comparator: &mut C,
        min_point_size: isize,
    ) {
        let relevant = |set: &&RangeSet<V>| {
            set.max_point > 0 || !set.is_empty() && set.max_point >= min_point_size
        };
        let a: Vec<&RangeSet<V>> = old_sets.iter().filter(relevant).collect();
        let b: Vec<&RangeSet<V>> = new_sets.iter().filter(relevant).collect();
        let shared = find_shared_chunks(&a, &b, Some(text_diff));
        let mut side_a = SpanCursor::new(&a, Some(&shared), min_point_size);
        let mut side_b = SpanCursor::new(&b, Some(&shared), min_point_size);
        text_diff.iter_gaps(|from_a, from_b, len| {
            compare_sides(&mut side_a, from_a, &mut side_b, from_b, len, comparator)
        });
        if text_diff.is_empty() && text_diff.len() == 0 {
            compare_sides(&mut side_a, 0, &mut side_b, 0, 0, comparator);
        }
    }

    /// Structural equality of two groups of sets over `[from, to]`.
    pub fn eq_sets(
        old_sets: &[RangeSet<V>],
        new_sets: &[RangeSet<V>],
        from: usize,
        to: usize,
    ) -> bool {
        let a: Vec<&RangeSet<V>> = old_sets
            .iter()
            .filter(|s| !s.is_empty() && !new_sets.iter().any(|o| same_set(s, o)))
            .collect();
        let b: Vec<&RangeSet<V>> = new_sets
            .iter()
            .filter(|s| !s.is_empty() && !old_sets.iter().any(|o| same_set(s, o)))
            .collect();
        if a.len() != b.len() {
            return false;
        }
        if a.is_empty() {
            return true;
        }
        let shared = find_shared_chunks(&a, &b, None);
        let mut side_a = SpanCursor::new(&a, Some(&shared), -1);
        let mut side_b = SpanCursor::new(&b, Some(&shared), -1);
        side_a.goto(from, -FAR_SIDE);
        side_b.goto(from, -FAR_SIDE);
        loop {
            if side_a.to != side_b.to
                || !same_values(&side_a.active, &side_b.active)
                || side_a.point.is_some()
                    && (side_b.point.is_none() || side_a.point != side_b.point)
            {
                return false;
            }
            if side_a.to > to {
                return true;
            }
            side_a.next();
            side_b.next();
        }
    }

    /// Enumerate the content of the given sets between `from` and `to`
    /// as a sequence of spans (regions covered by a set of active
    /// non-point values) and points. Returns the number of ranges open
    /// at the end position.
    pub fn spans<S: SpanIterator<V>>(
        sets: &[RangeSet<V>],
        from: usize,
        to: usize,
        iterator: &mut S,
        min_point_size: isize,
    ) -> usize {
        let refs: Vec<&RangeSet<V>> = sets.iter().collect();
        let mut cursor = SpanCursor::new(&refs, None, min_point_size);
        cursor.goto(from, -FAR_SIDE);
        let mut pos = from;
        let mut open_ranges = cursor.open_start.max(0) as usize;
        loop {
            let cur_to = cursor.to.min(to);
            if let Some(point) = cursor.point {
                let active = cursor.active_for_point(cursor.to);
                let open_count = if cursor.point_from < from {
                    active.len() + 1
                } else {
                    open_ranges.min(active.len())
                };
                iterator.point(pos, cur_to, point, &active, open_count, cursor.point_rank);
                open_ranges = cursor.open_end(cur_to).min(active.len());
            } else if cur_to > pos {
                iterator.span(pos, cur_to, &cursor.active, open_ranges);
                open_ranges = cursor.open_end(cur_to);
            }
            if cursor.to > to {
                return open_ranges + if cursor.point.is_some() { 1 } else { 0 };
            }
            pos = cursor.to;
            cursor.next();
        }
    }
}

/// Ordered iterator over the ranges of one or more sets. Yields
/// `(from, to, &value)` tuples sorted by `(from, start_side)`, with set
/// order as tiebreak.
pub struct RangeIter<'a, V: RangeValue> {
    cursor: HeapCursor<'a, V>,
}

impl<'a, V: RangeValue> RangeIter<'a, V> {
    fn new(sets: &'a [RangeSet<V>], from: usize) -> RangeIter<'a, V> {
        let refs: Vec<&'a RangeSet<V>> = sets.iter().collect();
        let mut cursor = HeapCursor::new(&refs, None, -1);
        cursor.goto(from, -FAR_SIDE);
        RangeIter { cursor }
    }
}

impl<'a, V: RangeValue> Iterator for RangeIter<'a, V> {
    type Item = (usize, usize, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let value = self.cursor.value?;
        let item = (self.cursor.from, self.cursor.to, value);
        self.cursor.next();
        Some(item)
    }
}

/// Callbacks for [`RangeSet::compare`].
pub trait RangeComparator<V: RangeValue> {
    /// The regions `from..to` of the old and new configuration are
    /// covered by different sets of active ranges.
    fn compare_range(&mut self, from: usize, to: usize, active_a: &[&V], active_b: &[&V]);

    /// A point differs between the old and new configuration.
    fn compare_point(&mut self, from: usize, to: usize, point_a: Option<&V>, point_b: Option<&V>);

    /// A boundary exists at `pos` in one configuration but not the other.
    fn bound_change(&mut self, _pos: usize) {}
}

/// Callbacks for [`RangeSet::spans`].
pub trait SpanIterator<V: RangeValue> {
    /// A span covered by the given set of active ranges. `open_start` of
    /// them were already open when the span started.
    fn span(&mut self, from: usize, to: usize, active: &[&V], open_start: usize);

    /// A point range, clipped to the iterated region. `open_start` equals
    /// `active.len() + 1` exactly when the point itself starts before the
    /// region.
    fn point(
        &mut self,
        from: usize,
        to: usize,
        value: &V,
        active: &[&V],
        open_start: usize,
        rank: usize,
    );
}

pub(crate) fn same_values<V: RangeValue>(a: &[&V], b: &[&V]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| std::ptr::eq(*x as *const V, *y as *const V) || x == y)
}

/// Identity-level equality: both sets hold the same chunks by reference.
fn same_set<V: RangeValue>(a: &RangeSet<V>, b: &RangeSet<V>) -> bool {
    if a.is_empty() && b.is_empty() {
        return true;
    }
    a.chunk_pos == b.chunk_pos
        && a.chunks.len() == b.chunks.len()
        && a.chunks
            .iter()
            .zip(&b.chunks)
            .all(|(x, y)| Arc::ptr_eq(x, y))
        && match (&a.next_layer, &b.next_layer) {
            (None, None) => true,
            (Some(x), Some(y)) => Arc::ptr_eq(x, y) || same_set(x, y),
            _ => false,
        }
}

/// Find chunks that occur, by reference, in both groups of sets, at
/// positions the document diff maps onto each other, and that contain no
/// points (points need per-boundary comparison). Cursors on both sides
/// skip these chunks whole.
fn find_shared_chunks<V: RangeValue>(
    a: &[&RangeSet<V>],
    b: &[&RangeSet<V>],
    text_diff: Option<&ChangeDesc>,
) -> SharedChunks {
    let mut in_a: HashMap<*const (), usize> = HashMap::new();
    for set in a {
        for i in 0..set.chunks.len() {
            if set.chunks[i].max_point <= 0 {
                in_a.insert(chunk_key(&set.chunks[i]), set.chunk_pos[i]);
            }
        }
    }
    let mut shared = SharedChunks::default();
    for set in b {
        for i in 0..set.chunks.len() {
            let key = chunk_key(&set.chunks[i]);
            if let Some(&known) = in_a.get(&key) {
                let mapped = match text_diff {
                    Some(diff) => diff.map_pos(known, -1),
                    None => known,
                };
                let touched = match text_diff {
                    Some(diff) => {
                        diff.touches_range(known, known + set.chunks[i].len()) != Touched::No
                    }
                    None => false,
                };
                if mapped == set.chunk_pos[i] && !touched {
                    shared.insert(key);
                }
            }
        }
    }
    shared
}

fn compare_sides<V: RangeValue, C: RangeComparator<V>>(
    a: &mut SpanCursor<'_, V>,
    start_a: usize,
    b: &mut SpanCursor<'_, V>,
    start_b: usize,
    length: usize,
    comparator: &mut C,
) {
    a.goto(start_a, -FAR_SIDE);
    b.goto(start_b, -FAR_SIDE);
    let end_b = start_b + length;
    let mut pos = start_b;
    let d_pos = start_b as isize - start_a as isize;
    loop {
        let a_to = a.to as isize + d_pos;
        let d_end = a_to - b.to as isize;
        let diff = if d_end != 0 {
            d_end
        } else {
            (a.end_side - b.end_side) as isize
        };
        let end = if diff < 0 { a_to.max(0) as usize } else { b.to };
        let clip_end = end.min(end_b);
        if a.point.is_some() || b.point.is_some() {
            let unchanged = match (a.point, b.point) {
                (Some(pa), Some(pb)) => {
                    (std::ptr::eq(pa as *const V, pb as *const V) || pa == pb)
                        && same_values(&a.active_for_point(a.to), &b.active_for_point(b.to))
                }
                _ => false,
            };
            if !unchanged {
                comparator.compare_point(pos, clip_end, a.point, b.point);
            }
        } else if clip_end > pos && !same_values(&a.active, &b.active) {
            comparator.compare_range(pos, clip_end, &a.active, &b.active);
        }
        if end > end_b {
            break;
        }
        if d_end != 0 || a.open_end(clip_end) != b.open_end(clip_end) {
            comparator.bound_change(end);
        }
        pos = end;
        if diff <= 0 {
            a.next();
        }
        if diff >= 0 {
            b.next();
        }
    }
}

/// Incrementally build a sorted range set. Ranges must be added in
/// `(from, start_side)` order; ranges that sort correctly but cannot be
/// appended to the current layer (they start before the previous range's
/// end) recurse into a builder for the next layer. The builder is
/// consumed by [`finish`](Self::finish).
pub struct RangeSetBuilder<V: RangeValue> {
    chunks: Vec<Arc<Chunk<V>>>,
    chunk_pos: Vec<usize>,
    chunk_start: isize,
    last: Option<V>,
    last_from: isize,
    last_to: isize,
    from: Vec<usize>,
    to: Vec<usize>,
    value: Vec<V>,
    max_point: isize,
    set_max_point: isize,
    next_layer: Option<Box<RangeSetBuilder<V>>>,
}

impl<V: RangeValue> Default for RangeSetBuilder<V> {
    fn default() -> Self {
        RangeSetBuilder::new()
    }
}

impl<V: RangeValue> RangeSetBuilder<V> {
    pub fn new() -> RangeSetBuilder<V> {
        RangeSetBuilder {
            chunks: Vec::new(),
            chunk_pos: Vec::new(),
            chunk_start: -1,
            last: None,
            last_from: -(FAR as isize),
            last_to: -(FAR as isize),
            from: Vec::new(),
            to: Vec::new(),
            value: Vec::new(),
            max_point: -1,
            set_max_point: -1,
            next_layer: None,
        }
    }

    /// Add a range.
    ///
    /// # Panics
    ///
    /// Panics when the range sorts before a previously added one.
    pub fn add(&mut self, from: usize, to: usize, value: V) {
        if !self.add_inner(from, to, value.clone()) {
            self.next_layer
                .get_or_insert_with(|| Box::new(RangeSetBuilder::new()))
                .add(from, to, value);
        }
    }

    fn finish_chunk(&mut self) {
        if self.from.is_empty() {
            return;
        }
        self.set_max_point = self.set_max_point.max(self.max_point);
        self.chunks.push(Arc::new(Chunk {
            from: std::mem::take(&mut self.from),
            to: std::mem::take(&mut self.to),
            value: std::mem::take(&mut self.value),
            max_point: self.max_point,
        }));
        self.chunk_pos.push(self.chunk_start as usize);
        self.chunk_start = -1;
        self.max_point = -1;
    }

    /// Try to append a range to this layer; `false` means it must spill
    /// to the next one.
    fn add_inner(&mut self, from: usize, to: usize, value: V) -> bool {
        let last_end_side = self.last.as_ref().map_or(0, |v| v.end_side());
        let last_start_side = self.last.as_ref().map_or(0, |v| v.start_side());
        let diff = cmp2(from as isize, value.start_side(), self.last_to, last_end_side);
        if diff != Ordering::Greater
            && cmp2(
                from as isize,
                value.start_side(),
                self.last_from,
                last_start_side,
            ) == Ordering::Less
        {
            panic!("ranges must be added sorted by `from` position and `start_side`");
        }
        if diff == Ordering::Less {
            return false;
        }
        if self.from.len() == CHUNK_SIZE {
            self.finish_chunk();
        }
        if self.chunk_start < 0 {
            self.chunk_start = from as isize;
        }
        self.from.push(from - self.chunk_start as usize);
        self.to.push(to - self.chunk_start as usize);
        self.last_from = from as isize;
        self.last_to = to as isize;
        if value.is_point() {
            self.max_point = self.max_point.max((to - from) as isize);
        }
        self.value.push(value.clone());
        self.last = Some(value);
        true
    }

    /// Try to append a whole chunk by reference.
    fn add_chunk(&mut self, from: usize, chunk: &Arc<Chunk<V>>) -> bool {
        let last_end_side = self.last.as_ref().map_or(0, |v| v.end_side());
        if cmp2(
            from as isize,
            chunk.value[0].start_side(),
            self.last_to,
            last_end_side,
        ) == Ordering::Less
        {
            return false;
        }
        self.finish_chunk();
        self.set_max_point = self.set_max_point.max(chunk.max_point);
        self.chunks.push(chunk.clone());
        self.chunk_pos.push(from);
        let last = chunk.value.len() - 1;
        self.last = Some(chunk.value[last].clone());
        self.last_from = (chunk.from[last] + from) as isize;
        self.last_to = (chunk.to[last] + from) as isize;
        true
    }

    /// Finish the set, consuming the builder.
    pub fn finish(self) -> RangeSet<V> {
        self.finish_inner(RangeSet::empty())
    }

    fn finish_inner(mut self, next: RangeSet<V>) -> RangeSet<V> {
        self.finish_chunk();
        if self.chunks.is_empty() {
            return next;
        }
        let deeper = match self.next_layer.take() {
            Some(builder) => builder.finish_inner(next),
            None => next,
        };
        RangeSet {
            chunk_pos: self.chunk_pos,
            chunks: self.chunks,
            next_layer: if deeper.is_empty() {
                None
            } else {
                Some(Arc::new(deeper))
            },
            max_point: self.set_max_point,
        }
    }
}

#[cfg(test)]
mod tests;
