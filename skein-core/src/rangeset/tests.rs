use super::*;
use crate::change::ChangeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Mark {
    name: &'static str,
    start_side: i32,
    end_side: i32,
    point: bool,
}

impl RangeValue for Mark {
    fn start_side(&self) -> i32 {
        self.start_side
    }

    fn end_side(&self) -> i32 {
        self.end_side
    }

    fn is_point(&self) -> bool {
        self.point
    }
}

fn mark(name: &'static str) -> Mark {
    Mark {
        name,
        start_side: 0,
        end_side: 0,
        point: false,
    }
}

fn point(name: &'static str) -> Mark {
    Mark {
        name,
        start_side: 0,
        end_side: 0,
        point: true,
    }
}

fn names(active: &[&Mark]) -> String {
    active
        .iter()
        .map(|m| m.name)
        .collect::<Vec<_>>()
        .join(",")
}

#[test]
fn of_and_iter_in_order() {
    let set = RangeSet::of(
        vec![mark("a").range(0, 5), mark("b").range(10, 15)],
        false,
    );
    assert_eq!(set.size(), 2);
    let got: Vec<(usize, usize, &'static str)> =
        set.iter(0).map(|(f, t, v)| (f, t, v.name)).collect();
    assert_eq!(got, [(0, 5, "a"), (10, 15, "b")]);
}

#[test]
fn map_shifts_ranges_past_a_deletion() {
    let set = RangeSet::of(
        vec![mark("a").range(0, 5), mark("b").range(10, 15)],
        false,
    );
    let changes = ChangeSet::of([(2, 3, "")], 20);
    let mapped = set.map(changes.desc());
    let got: Vec<(usize, usize, &'static str)> =
        mapped.iter(0).map(|(f, t, v)| (f, t, v.name)).collect();
    assert_eq!(got, [(0, 4, "a"), (9, 14, "b")]);
}

#[test]
fn map_reuses_untouched_chunks() {
    let ranges: Vec<Range<Mark>> = (0..600).map(|i| mark("m").range(i * 10, i * 10 + 4)).collect();
    let set = RangeSet::of(ranges, false);
    assert!(set.chunks.len() > 1);
    // An edit at the very end leaves earlier chunks untouched.
    let changes = ChangeSet::of([(5995, 5999, "!")], 6000);
    let mapped = set.map(changes.desc());
    assert!(Arc::ptr_eq(&set.chunks[0], &mapped.chunks[0]));
    assert_eq!(set.chunk_pos[0], mapped.chunk_pos[0]);
    assert_eq!(mapped.size(), set.size());
}

#[test]
fn map_drops_chunk_covered_by_replacement() {
    let set = RangeSet::of(vec![mark("a").range(5, 8)], false);
    let changes = ChangeSet::of([(2, 12, "xx")], 20);
    assert_eq!(set.map(changes.desc()).size(), 0);
}

#[test]
fn map_drops_deleted_points() {
    let set = RangeSet::of(
        vec![mark("wide").range(0, 9), point("p").range(4, 4)],
        false,
    );
    let changes = ChangeSet::of([(3, 5)], 10);
    let mapped = set.map(changes.desc());
    let got: Vec<(usize, usize, &'static str)> =
        mapped.iter(0).map(|(f, t, v)| (f, t, v.name)).collect();
    assert_eq!(got, [(0, 7, "wide")]);
}

#[test]
fn builder_spills_nested_ranges_to_next_layer() {
    let mut builder = RangeSetBuilder::new();
    builder.add(0, 10, mark("outer"));
    builder.add(2, 3, mark("inner"));
    let set = builder.finish();
    assert_eq!(set.size(), 2);
    assert!(set.next_layer.is_some());
    let got: Vec<(usize, usize, &'static str)> =
        set.iter(0).map(|(f, t, v)| (f, t, v.name)).collect();
    assert_eq!(got, [(0, 10, "outer"), (2, 3, "inner")]);
}

#[test]
#[should_panic(expected = "sorted by `from` position")]
fn builder_rejects_unsorted_input() {
    let mut builder = RangeSetBuilder::new();
    builder.add(5, 6, mark("a"));
    builder.add(1, 2, mark("b"));
}

#[test]
fn iter_starts_at_position() {
    let set = RangeSet::of(
        vec![
            mark("a").range(0, 2),
            mark("b").range(4, 6),
            mark("c").range(8, 9),
        ],
        false,
    );
    let got: Vec<&'static str> = set.iter(5).map(|(_, _, v)| v.name).collect();
    assert_eq!(got, ["b", "c"]);
}

#[test]
fn iter_sets_merges_by_rank() {
    let a = RangeSet::of(vec![mark("a").range(2, 3)], false);
    let b = RangeSet::of(vec![mark("b").range(2, 3), mark("b2").range(5, 6)], false);
    let got: Vec<&'static str> = RangeSet::iter_sets(&[a, b], 0)
        .map(|(_, _, v)| v.name)
        .collect();
    // Ties go to the earlier set.
    assert_eq!(got, ["a", "b", "b2"]);
}

#[test]
fn between_visits_touching_ranges() {
    let set = RangeSet::of(
        vec![
            mark("a").range(0, 2),
            mark("b").range(4, 6),
            mark("c").range(8, 9),
        ],
        false,
    );
    let mut seen = Vec::new();
    set.between(3, 8, |f, t, v| {
        seen.push((f, t, v.name));
        true
    });
    seen.sort();
    assert_eq!(seen, [(4, 6, "b"), (8, 9, "c")]);

    let mut count = 0;
    set.between(0, 9, |_, _, _| {
        count += 1;
        false
    });
    assert_eq!(count, 1);
}

#[test]
fn sort_flag_orders_input() {
    let sorted = RangeSet::of(
        vec![mark("b").range(4, 5), mark("a").range(0, 1)],
        true,
    );
    let got: Vec<&'static str> = sorted.iter(0).map(|(_, _, v)| v.name).collect();
    assert_eq!(got, ["a", "b"]);
}

#[test]
fn update_with_empty_spec_returns_same_set() {
    let set = RangeSet::of(vec![mark("a").range(0, 5)], false);
    let updated = set.update(RangeSetUpdate::default());
    assert!(Arc::ptr_eq(&set.chunks[0], &updated.chunks[0]));
}

#[test]
fn update_filters_and_adds() {
    let set = RangeSet::of(
        vec![mark("a").range(0, 2), mark("b").range(4, 6)],
        false,
    );
    let updated = set.update(RangeSetUpdate {
        add: vec![mark("c").range(8, 9)],
        filter: Some(Box::new(|_, _, v: &Mark| v.name != "a")),
        ..Default::default()
    });
    let got: Vec<&'static str> = updated.iter(0).map(|(_, _, v)| v.name).collect();
    assert_eq!(got, ["b", "c"]);
}

#[test]
fn update_filter_window_limits_filtering() {
    let set = RangeSet::of(
        vec![mark("a").range(0, 1), mark("b").range(5, 6)],
        false,
    );
    let updated = set.update(RangeSetUpdate {
        filter: Some(Box::new(|_, _, _: &Mark| false)),
        filter_from: 4,
        filter_to: Some(10),
        ..Default::default()
    });
    let got: Vec<&'static str> = updated.iter(0).map(|(_, _, v)| v.name).collect();
    // "a" lies outside the filtered window and is kept without asking.
    assert_eq!(got, ["a"]);
}

#[test]
fn update_reuses_chunks_before_additions() {
    let ranges: Vec<Range<Mark>> = (0..600).map(|i| mark("m").range(i * 10, i * 10 + 4)).collect();
    let set = RangeSet::of(ranges, false);
    let updated = set.update(RangeSetUpdate {
        add: vec![mark("late").range(7000, 7001)],
        ..Default::default()
    });
    assert!(Arc::ptr_eq(&set.chunks[0], &updated.chunks[0]));
    assert_eq!(updated.size(), set.size() + 1);
}

#[test]
fn filtering_out_a_point_empties_the_set() {
    let set = RangeSet::of(vec![point("p").range(3, 3)], false);
    let updated = set.update(RangeSetUpdate {
        filter: Some(Box::new(|_, _, _: &Mark| false)),
        ..Default::default()
    });
    assert_eq!(updated.size(), 0);
    assert!(updated.is_empty());
}

#[test]
fn chunks_close_at_capacity() {
    let ranges: Vec<Range<Mark>> = (0..251).map(|i| mark("m").range(i, i + 1)).collect();
    let set = RangeSet::of(ranges, false);
    assert_eq!(set.chunks.len(), 2);
    assert_eq!(set.size(), 251);
}

#[derive(Default)]
struct SpanLog {
    events: Vec<String>,
}

impl SpanIterator<Mark> for SpanLog {
    fn span(&mut self, from: usize, to: usize, active: &[&Mark], open_start: usize) {
        self.events
            .push(format!("span {from}-{to} [{}] open {open_start}", names(active)));
    }

    fn point(
        &mut self,
        from: usize,
        to: usize,
        value: &Mark,
        active: &[&Mark],
        open_start: usize,
        _rank: usize,
    ) {
        self.events.push(format!(
            "point {from}-{to} {} [{}] open {open_start}",
            value.name,
            names(active)
        ));
    }
}

#[test]
fn spans_enumerates_covered_regions() {
    let set = RangeSet::of(vec![mark("m").range(2, 5)], false);
    let mut log = SpanLog::default();
    RangeSet::spans(&[set], 0, 7, &mut log, -1);
    assert_eq!(
        log.events,
        [
            "span 0-2 [] open 0",
            "span 2-5 [m] open 0",
            "span 5-7 [] open 0"
        ]
    );
}

#[test]
fn spans_reports_points_with_shadowed_actives() {
    let set = RangeSet::of(
        vec![mark("m").range(0, 10), point("p").range(3, 6)],
        false,
    );
    let mut log = SpanLog::default();
    let open = RangeSet::spans(&[set], 0, 10, &mut log, -1);
    assert_eq!(
        log.events,
        [
            "span 0-3 [m] open 0",
            "point 3-6 p [m] open 1",
            "span 6-10 [m] open 1"
        ]
    );
    assert_eq!(open, 0);
}

#[test]
fn spans_clips_points_continued_in() {
    let set = RangeSet::of(vec![point("p").range(2, 8)], false);
    let mut log = SpanLog::default();
    RangeSet::spans(&[set.clone()], 4, 6, &mut log, -1);
    // The point started before the iterated region: open is active+1.
    assert_eq!(log.events, ["point 4-6 p [] open 1"]);

    let mut whole = SpanLog::default();
    let open = RangeSet::spans(&[set], 0, 6, &mut whole, -1);
    assert_eq!(whole.events, ["span 0-2 [] open 0", "point 2-6 p [] open 0"]);
    assert_eq!(open, 1);
}

#[test]
fn spans_min_point_size_skips_small_points() {
    let set = RangeSet::of(
        vec![point("small").range(1, 2), point("big").range(4, 9)],
        false,
    );
    let mut log = SpanLog::default();
    RangeSet::spans(&[set], 0, 10, &mut log, 3);
    assert_eq!(
        log.events,
        [
            "span 0-4 [] open 0",
            "point 4-9 big [] open 0",
            "span 9-10 [] open 0"
        ]
    );
}

#[derive(Default)]
struct CompareLog {
    ranges: Vec<(usize, usize)>,
    points: Vec<(usize, usize)>,
    bounds: Vec<usize>,
}

impl RangeComparator<Mark> for CompareLog {
    fn compare_range(&mut self, from: usize, to: usize, _a: &[&Mark], _b: &[&Mark]) {
        self.ranges.push((from, to));
    }

    fn compare_point(
        &mut self,
        from: usize,
        to: usize,
        _a: Option<&Mark>,
        _b: Option<&Mark>,
    ) {
        self.points.push((from, to));
    }

    fn bound_change(&mut self, pos: usize) {
        self.bounds.push(pos);
    }
}

#[test]
fn compare_reports_changed_regions() {
    let old = RangeSet::of(vec![mark("a").range(2, 5)], false);
    let new = RangeSet::of(vec![mark("a").range(2, 7)], false);
    let mut log = CompareLog::default();
    RangeSet::compare(
        &[old.clone()],
        &[new.clone()],
        &ChangeSet::empty(10).desc().clone(),
        &mut log,
        -1,
    );
    assert_eq!(log.ranges, [(5, 7)]);
    assert!(log.points.is_empty());
    assert!(!RangeSet::eq_sets(&[old], &[new], 0, 10));
}

#[test]
fn compare_reports_changed_points() {
    let old = RangeSet::of(vec![point("p").range(3, 3)], false);
    let new: RangeSet<Mark> = RangeSet::empty();
    let mut log = CompareLog::default();
    RangeSet::compare(
        &[old],
        &[new],
        &ChangeSet::empty(10).desc().clone(),
        &mut log,
        -1,
    );
    assert!(!log.points.is_empty());
}

#[test]
fn eq_sets_accepts_identical_structure() {
    let set = RangeSet::of(
        vec![mark("a").range(0, 2), mark("b").range(4, 6)],
        false,
    );
    assert!(RangeSet::eq_sets(&[set.clone()], &[set.clone()], 0, 10));
    let rebuilt = RangeSet::of(
        vec![mark("a").range(0, 2), mark("b").range(4, 6)],
        false,
    );
    assert!(RangeSet::eq_sets(&[set.clone()], &[rebuilt], 0, 10));
    let moved = RangeSet::of(
        vec![mark("a").range(0, 2), mark("b").range(4, 7)],
        false,
    );
    assert!(!RangeSet::eq_sets(&[set], &[moved], 0, 10));
}

#[test]
fn join_stacks_sets() {
    let a = RangeSet::of(vec![mark("a").range(0, 1)], false);
    let b = RangeSet::of(vec![mark("b").range(0, 1)], false);
    let joined = RangeSet::join(&[a, b]);
    assert_eq!(joined.size(), 2);
    let got: Vec<&'static str> = joined.iter(0).map(|(_, _, v)| v.name).collect();
    assert_eq!(got, ["a", "b"]);
}

#[test]
fn side_bias_orders_ranges_at_same_position() {
    let before = Mark {
        name: "before",
        start_side: -1,
        end_side: -1,
        point: false,
    };
    let after = Mark {
        name: "after",
        start_side: 1,
        end_side: 1,
        point: false,
    };
    let set = RangeSet::of(
        vec![before.range(3, 4), after.range(3, 4)],
        false,
    );
    let got: Vec<&'static str> = set.iter(0).map(|(_, _, v)| v.name).collect();
    assert_eq!(got, ["before", "after"]);
}

#[test]
fn empty_range_with_positive_sides_collapses_on_mapping() {
    // A non-point range that ends up empty with start side > 0 and end
    // side <= 0 is dropped.
    let v = Mark {
        name: "v",
        start_side: 1,
        end_side: 0,
        point: false,
    };
    let set = RangeSet::of(vec![v.range(3, 5)], false);
    let changes = ChangeSet::of([(3, 5)], 10);
    assert_eq!(set.map(changes.desc()).size(), 0);
}

mod properties {
    use super::*;

    fn build_ranges(seed: &[(u8, u8, u8)]) -> Vec<Range<Mark>> {
        seed.iter()
            .map(|&(from, len, kind)| {
                let from = from as usize;
                let to = from + (len as usize % 9);
                match kind % 3 {
                    0 => mark("m").range(from, to),
                    1 => point("p").range(from, to),
                    _ => Mark {
                        name: "s",
                        start_side: (kind as i32 % 5) - 2,
                        end_side: (kind as i32 % 7) - 3,
                        point: false,
                    }
                    .range(from, to),
                }
            })
            .collect()
    }

    fn is_sorted(set: &RangeSet<Mark>) -> bool {
        let mut last: Option<(usize, i32)> = None;
        for (from, _to, value) in set.iter(0) {
            let key = (from, value.start_side());
            if let Some(prev) = last {
                if key < prev {
                    return false;
                }
            }
            last = Some(key);
        }
        true
    }

    quickcheck::quickcheck! {
        fn of_iterates_sorted(seed: Vec<(u8, u8, u8)>) -> bool {
            let set = RangeSet::of(build_ranges(&seed), true);
            set.size() == seed.len() && is_sorted(&set)
        }

        fn mapping_preserves_order(seed: Vec<(u8, u8, u8)>, del_from: u8, del_len: u8) -> bool {
            let set = RangeSet::of(build_ranges(&seed), true);
            let len = 300usize;
            let from = del_from as usize % len;
            let to = (from + del_len as usize % 10).min(len);
            let changes = ChangeSet::of([(from, to, "xy")], len);
            is_sorted(&set.map(changes.desc()))
        }

        fn update_keeps_all_when_filter_accepts(seed: Vec<(u8, u8, u8)>) -> bool {
            let set = RangeSet::of(build_ranges(&seed), true);
            let updated = set.update(RangeSetUpdate {
                filter: Some(Box::new(|_, _, _: &Mark| true)),
                ..Default::default()
            });
            updated.size() == set.size() && is_sorted(&updated)
        }
    }
}
