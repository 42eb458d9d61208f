use super::*;

fn doc(lines: &[&str]) -> Text {
    Text::of(lines.iter().copied())
}

/// A document big enough to force several tree levels.
fn big_doc() -> (Text, Vec<String>) {
    let lines: Vec<String> = (0..2000).map(|i| format!("line number {i}")).collect();
    (Text::of(lines.clone()), lines)
}

#[test]
fn length_and_lines() {
    let d = doc(&["one", "two", "three"]);
    assert_eq!(d.len(), 3 + 1 + 3 + 1 + 5);
    assert_eq!(d.len_lines(), 3);

    let (big, lines) = big_doc();
    let expect: usize = lines.iter().map(|l| l.len() + 1).sum::<usize>() - 1;
    assert_eq!(big.len(), expect);
    assert_eq!(big.len_lines(), 2000);
}

#[test]
fn empty_document_is_one_empty_line() {
    let empty = Text::empty();
    assert_eq!(empty.len(), 0);
    assert_eq!(empty.len_lines(), 1);
    assert_eq!(empty.to_string(), "");
    assert_eq!(doc(&[""]), empty);
}

#[test]
#[should_panic(expected = "at least one line")]
fn of_rejects_empty_input() {
    Text::of(Vec::<String>::new());
}

#[test]
fn to_string_joins_lines() {
    assert_eq!(doc(&["a", "b", "c"]).to_string(), "a\nb\nc");
    assert_eq!(doc(&["", "", ""]).to_string(), "\n\n");
}

#[test]
fn replace_in_single_line() {
    let d = doc(&["hello world"]).replace(6, 11, &doc(&["editor"]));
    assert_eq!(d.to_string(), "hello editor");
}

#[test]
fn replace_across_lines() {
    let d = doc(&["one", "two", "three"]);
    assert_eq!(d.replace(2, 9, &doc(&["-"])).to_string(), "on-hree");
    assert_eq!(
        d.replace(3, 3, &doc(&["", ""])).to_string(),
        "one\n\ntwo\nthree"
    );
    assert_eq!(d.replace(0, d.len(), &Text::empty()), Text::empty());
}

#[test]
fn replace_keeps_line_structure() {
    let d = doc(&["one", "two"]).replace(3, 4, &doc(&[" and "]));
    assert_eq!(d.len_lines(), 1);
    assert_eq!(d.to_string(), "one and two");
}

#[test]
fn replace_composes() {
    let d = doc(&["one two three"]);
    let insert = doc(&["2"]);
    let direct = d.replace(4, 7, &insert);
    let via_delete = d.replace(4, 7, &Text::empty()).replace(4, 4, &insert);
    assert_eq!(direct, via_delete);
}

#[test]
fn replace_shares_structure() {
    let (big, _) = big_doc();
    let edited = big.replace(10, 11, &doc(&["x"]));
    // Identical prefix and suffix trees make equality scans cheap; the
    // contents still differ at the edit.
    assert_eq!(edited.len(), big.len());
    assert!(!edited.eq(&big));
    assert_eq!(edited.slice(100, 200), big.slice(100, 200));
}

#[test]
#[should_panic(expected = "invalid change range")]
fn replace_rejects_reversed_range() {
    doc(&["abc"]).replace(2, 1, &Text::empty());
}

#[test]
fn slice_and_append() {
    let d = doc(&["one", "two", "three"]);
    assert_eq!(d.slice(0, d.len()), d);
    assert_eq!(d.slice(2, 9).to_string(), "e\ntwo\nt");
    assert_eq!(d.slice(3, 4).to_string(), "\n");
    assert_eq!(d.slice(4, 4).len(), 0);
    assert_eq!(
        doc(&["ab"]).append(&doc(&["cd", "ef"])).to_string(),
        "abcd\nef"
    );
}

#[test]
fn slice_lengths() {
    let (big, _) = big_doc();
    for (a, b) in [(0, 0), (0, 17), (1000, 10_000), (big.len() - 5, big.len())] {
        assert_eq!(big.slice(a, b).len(), b - a);
    }
}

#[test]
fn slice_string_ranges() {
    let d = doc(&["one", "two", "three"]);
    assert_eq!(d.slice_string(0, d.len()), "one\ntwo\nthree");
    assert_eq!(d.slice_string(2, 9), "e\ntwo\nt");
    assert_eq!(d.slice_string_sep(0, 7, "|"), "one|two");
    assert_eq!(d.slice_string(3, 3), "");
}

#[test]
fn line_lookup() {
    let d = doc(&["one", "two", "three"]);
    let line = d.line(2);
    assert_eq!((line.from, line.to, line.number, line.text), (4, 7, 2, "two"));
    assert_eq!(d.line_at(0).number, 1);
    assert_eq!(d.line_at(3).number, 1);
    assert_eq!(d.line_at(4).number, 2);
    assert_eq!(d.line_at(d.len()).number, 3);
}

#[test]
fn line_lookup_covers_positions() {
    let (big, lines) = big_doc();
    let mut prev_number = 0;
    for pos in (0..=big.len()).step_by(379) {
        let line = big.line_at(pos);
        assert!(line.from <= pos && pos <= line.to);
        assert_eq!(line.to - line.from, line.text.len());
        assert!(line.number >= prev_number);
        assert_eq!(line.text, lines[line.number - 1]);
        prev_number = line.number;
    }
    for n in (1..=2000).step_by(131) {
        assert_eq!(big.line(n).number, n);
        assert_eq!(big.line(n).text, lines[n - 1]);
    }
}

#[test]
#[should_panic(expected = "invalid position")]
fn line_at_out_of_range() {
    doc(&["abc"]).line_at(4);
}

#[test]
#[should_panic(expected = "invalid line number")]
fn line_out_of_range() {
    doc(&["abc"]).line(2);
}

#[test]
fn equality_ignores_tree_shape() {
    let lines: Vec<String> = (0..200).map(|i| format!("l{i}")).collect();
    let a = Text::of(lines.clone());
    // Build the same content through repeated appends, producing a
    // different tree.
    let mut b = Text::of([lines[0].as_str()]);
    for line in &lines[1..] {
        b = b.append(&Text::of(["", line.as_str()]));
    }
    assert_eq!(a.len(), b.len());
    assert!(a.eq(&b));
    assert!(!a.eq(&a.replace(5, 6, &doc(&["*"]))));
}

#[test]
fn iter_alternates_chunks_and_breaks() {
    let d = doc(&["one", "two"]);
    let parts: Vec<&str> = d.iter().collect();
    assert_eq!(parts, ["one", "\n", "two"]);
    let back: Vec<&str> = d.iter_rev().collect();
    assert_eq!(back, ["two", "\n", "one"]);
}

#[test]
fn iter_range_clips_and_reverses() {
    let d = doc(&["one", "two", "three"]);
    let parts: Vec<&str> = d.iter_range(2, 9).collect();
    assert_eq!(parts.concat(), "e\ntwo\nt");
    // Reverse iteration yields the chunks back to front, each chunk in
    // document order.
    let rev: Vec<&str> = d.iter_range(9, 2).collect();
    assert_eq!(rev, ["t", "\n", "two", "\n", "e"]);
    assert_eq!(d.iter_range(4, 4).count(), 0);
}

#[test]
fn iter_lines_yields_every_line() {
    let d = doc(&["one", "", "three"]);
    let lines: Vec<&str> = d.iter_lines().collect();
    assert_eq!(lines, ["one", "", "three"]);

    let empty_text = Text::empty();
    let empty_lines: Vec<&str> = empty_text.iter_lines().collect();
    assert_eq!(empty_lines, [""]);

    let trailing_doc = doc(&["a", ""]);
    let trailing: Vec<&str> = trailing_doc.iter_lines().collect();
    assert_eq!(trailing, ["a", ""]);
}

#[test]
fn iter_lines_range_windows() {
    let d = doc(&["one", "two", "three", "four"]);
    let lines: Vec<&str> = d.iter_lines_range(2, 4).collect();
    assert_eq!(lines, ["two", "three"]);
    let tail: Vec<&str> = d.iter_lines_range(4, 5).collect();
    assert_eq!(tail, ["four"]);
}

#[test]
fn iter_lines_on_big_doc() {
    let (big, lines) = big_doc();
    assert_eq!(big.iter_lines().count(), 2000);
    for (got, want) in big.iter_lines().zip(&lines) {
        assert_eq!(got, want);
    }
}

#[test]
fn utf16_lengths() {
    // "😀" is one astral character: two UTF-16 units.
    let d = doc(&["a\u{1F600}b"]);
    assert_eq!(d.len(), 4);
    assert_eq!(d.slice(1, 3).to_string(), "\u{1F600}");
    assert_eq!(d.replace(1, 3, &doc(&["x"])).to_string(), "axb");
}

#[test]
fn json_round_trip() {
    let d = doc(&["one", "", "three"]);
    let json = d.to_json();
    assert_eq!(json, serde_json::json!(["one", "", "three"]));
    assert_eq!(Text::from_json(&json).expect("valid"), d);

    assert_eq!(
        Text::from_json(&serde_json::json!([])),
        Err(crate::JsonError::Document)
    );
    assert_eq!(
        Text::from_json(&serde_json::json!("nope")),
        Err(crate::JsonError::Document)
    );
}

#[test]
fn serde_round_trip() {
    let d = doc(&["one", "two"]);
    let encoded = serde_json::to_string(&d).expect("serialize");
    assert_eq!(encoded, r#"["one","two"]"#);
    let decoded: Text = serde_json::from_str(&encoded).expect("deserialize");
    assert_eq!(decoded, d);
}

#[test]
fn leaf_boundary_sizes() {
    // Exactly at and around the leaf capacity.
    for n in [31, 32, 33, 64, 65] {
        let lines: Vec<String> = (0..n).map(|i| format!("{i}")).collect();
        let d = Text::of(lines.clone());
        assert_eq!(d.len_lines(), n);
        assert_eq!(d.to_lines(), lines);
    }
}

mod properties {
    use super::*;

    fn clean_lines(lines: Vec<String>) -> Vec<String> {
        let mut lines: Vec<String> = lines
            .into_iter()
            .map(|l| l.replace(['\n', '\r'], ""))
            .collect();
        if lines.is_empty() {
            lines.push(String::new());
        }
        lines
    }

    quickcheck::quickcheck! {
        fn lines_round_trip(lines: Vec<String>) -> bool {
            let lines = clean_lines(lines);
            Text::of(lines.clone()).to_lines() == lines
        }

        fn length_matches_content(lines: Vec<String>) -> bool {
            let lines = clean_lines(lines);
            let d = Text::of(lines.clone());
            d.len() == d.to_string().encode_utf16().count()
                && d.len_lines() == lines.len()
        }

        fn slice_round_trip(lines: Vec<String>, a: usize, b: usize) -> bool {
            let d = Text::of(clean_lines(lines));
            let (a, b) = (a % (d.len() + 1), b % (d.len() + 1));
            let (a, b) = (a.min(b), a.max(b));
            let sliced = d.slice(a, b);
            sliced.len() == b - a && d.slice(0, d.len()).eq(&d)
                && d.replace(a, b, &sliced).eq(&d)
        }

        fn line_at_contains(lines: Vec<String>, pos: usize) -> bool {
            let d = Text::of(clean_lines(lines));
            let pos = pos % (d.len() + 1);
            let line = d.line_at(pos);
            line.from <= pos && pos <= line.to
                && line.to - line.from == line.text.encode_utf16().count()
        }
    }
}
