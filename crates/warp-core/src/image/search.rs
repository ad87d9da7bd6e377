//! Slice-level search primitives used by [`super::BinaryImage`].

use memchr::memmem;

/// First occurrence of `needle` in `hay`, optionally requiring NUL bounds.
pub(crate) fn find_text(
    hay: &[u8],
    needle: &[u8],
    case_sensitive: bool,
    null_bounded: bool,
) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }

    let mut from = 0;
    while from < hay.len() {
        let pos = from + find_bytes(&hay[from..], needle, case_sensitive)?;
        if !null_bounded || is_null_bounded(hay, pos, needle.len()) {
            return Some(pos);
        }
        from = pos + 1;
    }
    None
}

fn find_bytes(hay: &[u8], needle: &[u8], case_sensitive: bool) -> Option<usize> {
    if case_sensitive {
        memmem::find(hay, needle)
    } else {
        hay.windows(needle.len())
            .position(|window| window.eq_ignore_ascii_case(needle))
    }
}

fn is_null_bounded(hay: &[u8], pos: usize, len: usize) -> bool {
    let before = pos == 0 || hay[pos - 1] == 0;
    let after = hay.get(pos + len) == Some(&0);
    before && after
}

/// First offset where every `(value, mask)` pair matches.
pub(crate) fn find_masked(hay: &[u8], compiled: &[(u8, u8)]) -> Option<usize> {
    if compiled.is_empty() || hay.len() < compiled.len() {
        return None;
    }

    let last = hay.len() - compiled.len();
    let matches_at = |i: usize| {
        compiled
            .iter()
            .enumerate()
            .all(|(j, &(value, mask))| hay[i + j] & mask == value)
    };

    match compiled[0] {
        (first, 0xFF) => {
            let mut from = 0;
            while from <= last {
                let i = from + memchr::memchr(first, &hay[from..=last])?;
                if matches_at(i) {
                    return Some(i);
                }
                from = i + 1;
            }
            None
        }
        _ => (0..=last).find(|&i| matches_at(i)),
    }
}
