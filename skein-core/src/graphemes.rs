//! Grapheme-cluster boundaries, delegated to the Unicode segmentation
//! tables. Positions here, as everywhere in this crate, count UTF-16 code
//! units within the given line.

use unicode_segmentation::GraphemeCursor;

use crate::text::{str_len, str_pos};

fn byte_to_pos(s: &str, byte: usize) -> usize {
    str_indices::utf16::from_byte_idx(s, byte)
}

/// Find the next grapheme-cluster break in `text` after (`forward`) or
/// before the given position. Returns the position unchanged when there
/// is no further break in that direction.
pub fn cluster_break(text: &str, pos: usize, forward: bool) -> usize {
    let byte = str_pos(text, pos);
    let mut cursor = GraphemeCursor::new(byte, text.len(), true);
    let next = if forward {
        cursor.next_boundary(text, 0)
    } else {
        cursor.prev_boundary(text, 0)
    };
    match next {
        Ok(Some(boundary)) => byte_to_pos(text, boundary),
        // Already at the end (or start) of the string.
        _ => pos,
    }
}

/// Whether the given position sits on a grapheme-cluster boundary.
pub fn is_cluster_break(text: &str, pos: usize) -> bool {
    if pos == 0 || pos >= str_len(text) {
        return true;
    }
    let byte = str_pos(text, pos);
    // A position inside a surrogate pair rounds down, so it only maps to
    // the position's own boundary when the position was exact.
    if byte_to_pos(text, byte) != pos {
        return false;
    }
    GraphemeCursor::new(byte, text.len(), true)
        .is_boundary(text, 0)
        .unwrap_or(true)
}

/// The character starting at the given position, if any.
pub fn code_point_at(text: &str, pos: usize) -> Option<char> {
    text[str_pos(text, pos)..].chars().next()
}

/// The number of code units taken up by a character: 2 for astral
/// characters, 1 otherwise.
pub fn code_point_size(ch: char) -> usize {
    ch.len_utf16()
}
