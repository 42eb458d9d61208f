//! Tab-aware column arithmetic on single lines.

use crate::graphemes::cluster_break;
use crate::text::{str_len, str_pos};

/// Count the visual column at position `to` in the line, taking tab stops
/// into account. Extending clusters count as part of their base
/// character's column.
pub fn count_column(line: &str, tab_size: usize, to: usize) -> usize {
    let mut n = 0;
    let mut i = 0;
    while i < to {
        if char_at(line, i) == Some('\t') {
            n += tab_size - (n % tab_size);
            i += 1;
        } else {
            n += 1;
            i = cluster_break(line, i, true);
        }
    }
    n
}

/// Find the position in the line corresponding to the given visual
/// column, clamped to the end of the line when the column lies beyond it.
pub fn find_column(line: &str, col: usize, tab_size: usize) -> usize {
    let len = str_len(line);
    let mut i = 0;
    let mut n = 0;
    loop {
        if n >= col {
            return i;
        }
        if i == len {
            return len;
        }
        n += if char_at(line, i) == Some('\t') {
            tab_size - (n % tab_size)
        } else {
            1
        };
        i = if char_at(line, i) == Some('\t') {
            i + 1
        } else {
            cluster_break(line, i, true)
        };
    }
}

fn char_at(line: &str, pos: usize) -> Option<char> {
    line[str_pos(line, pos)..].chars().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tabs_advance_to_stops() {
        assert_eq!(count_column("\tx", 4, 2), 5);
        assert_eq!(count_column("a\tb", 4, 3), 5);
        assert_eq!(count_column("ab", 4, 2), 2);
    }

    #[test]
    fn find_inverts_count() {
        for line in ["\tx", "a\tbc", "abc", "a\t\tb"] {
            for pos in 0..=str_len(line) {
                let col = count_column(line, 4, pos);
                assert_eq!(find_column(line, col, 4), pos, "line {line:?} pos {pos}");
            }
        }
    }

    #[test]
    fn clamps_past_end() {
        assert_eq!(find_column("ab", 10, 4), 2);
    }
}
