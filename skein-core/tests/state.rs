//! End-to-end tests of the document / change / range-set data flow: build
//! a change set against the current document, apply it, and carry range
//! sets across via mapping.

use skein_core::{
    ChangeSet, ChangeSpec, RangeComparator, RangeSet, RangeSetUpdate, RangeValue, Text,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Highlight(&'static str);

impl RangeValue for Highlight {}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Breakpoint;

impl RangeValue for Breakpoint {
    fn is_point(&self) -> bool {
        true
    }
}

#[test]
fn edit_cycle_keeps_highlights_aligned() {
    let doc = Text::of(["fn main() {", "    todo!()", "}"]);
    // Highlight the `todo!` call on line 2.
    let line = doc.line(2);
    let highlights = RangeSet::of(
        vec![Highlight("macro").range(line.from + 4, line.from + 9)],
        false,
    );

    // Insert a line above it.
    let changes = ChangeSet::of(
        [ChangeSpec::insert(doc.line(2).from, "    println!(\"hi\");\n")],
        doc.len(),
    );
    let new_doc = changes.apply(&doc);
    assert_eq!(
        new_doc.to_string(),
        "fn main() {\n    println!(\"hi\");\n    todo!()\n}"
    );

    let mapped = highlights.map(changes.desc());
    let (from, to, value) = mapped.iter(0).next().expect("highlight survives");
    assert_eq!(value, &Highlight("macro"));
    assert_eq!(new_doc.slice_string(from, to), "todo!");
}

#[test]
fn undo_restores_document_and_ranges() {
    let doc = Text::of(["alpha", "beta", "gamma"]);
    let set = RangeSet::of(vec![Highlight("word").range(6, 10)], false);

    let changes = ChangeSet::of([(0, 5, "delta")], doc.len());
    let inverted = changes.invert(&doc);
    let edited = changes.apply(&doc);
    assert_eq!(inverted.apply(&edited), doc);

    let there = set.map(changes.desc());
    let back = there.map(inverted.desc());
    let ranges: Vec<(usize, usize)> = back.iter(0).map(|(f, t, _)| (f, t)).collect();
    assert_eq!(ranges, [(6, 10)]);
}

#[test]
fn breakpoints_track_their_line_through_edits() {
    let doc = Text::of(["one", "two", "three"]);
    let set = RangeSet::of(vec![Breakpoint.range(4, 4)], false);

    // Typing on the first line moves the breakpoint.
    let typing = ChangeSet::of([ChangeSpec::insert(3, "!")], doc.len());
    let moved = set.map(typing.desc());
    assert_eq!(moved.iter(0).next().map(|(f, t, _)| (f, t)), Some((5, 5)));

    // Deleting the line it sits on drops it.
    let delete_line = ChangeSet::of([(3, 8)], doc.len());
    assert_eq!(set.map(delete_line.desc()).size(), 0);
}

struct DiffLog(Vec<(usize, usize)>);

impl RangeComparator<Highlight> for DiffLog {
    fn compare_range(&mut self, from: usize, to: usize, _: &[&Highlight], _: &[&Highlight]) {
        self.0.push((from, to));
    }

    fn compare_point(
        &mut self,
        _from: usize,
        _to: usize,
        _a: Option<&Highlight>,
        _b: Option<&Highlight>,
    ) {
    }
}

#[test]
fn reconfigured_highlights_report_their_difference() {
    let doc = Text::of(["let x = 1;"]);
    let old = RangeSet::of(vec![Highlight("kw").range(0, 3)], false);
    let new = old.update(RangeSetUpdate {
        add: vec![Highlight("num").range(8, 9)],
        ..Default::default()
    });

    let unchanged = ChangeSet::empty(doc.len());
    let mut log = DiffLog(Vec::new());
    RangeSet::compare(
        &[old.clone()],
        &[new.clone()],
        unchanged.desc(),
        &mut log,
        -1,
    );
    assert_eq!(log.0, [(8, 9)]);
    assert!(!RangeSet::eq_sets(&[old.clone()], &[new], 0, doc.len()));
    assert!(RangeSet::eq_sets(&[old.clone()], &[old], 0, doc.len()));
}

#[test]
fn json_round_trips_compose() {
    let doc = Text::of(["hello world"]);
    let changes = ChangeSet::of([(6, 11, "editor")], doc.len());

    let doc2 = Text::from_json(&doc.to_json()).expect("document json");
    let changes2 = ChangeSet::from_json(&changes.to_json()).expect("changes json");
    assert_eq!(changes2.apply(&doc2).to_string(), "hello editor");
}
