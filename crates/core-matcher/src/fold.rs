//! Case folding that preserves byte offsets into the original string.

/// Lowercase `s`, returning the folded string plus a map from each folded
/// byte offset back to the originating byte offset in `s`. The map carries
/// one extra entry for the end offset, so any `[start, end)` range found in
/// the folded string translates to a valid range in the original.
///
/// Folding can change byte lengths (e.g. `İ` lowercases to two scalars), so
/// searching the folded text and slicing the original with the same offsets
/// would split characters; the map keeps highlight spans on character
/// boundaries of the original.
pub(crate) fn fold_with_map(s: &str) -> (String, Vec<usize>) {
    let mut folded = String::with_capacity(s.len());
    let mut map = Vec::with_capacity(s.len() + 1);
    for (offset, ch) in s.char_indices() {
        for lower in ch.to_lowercase() {
            let start = folded.len();
            folded.push(lower);
            for _ in start..folded.len() {
                map.push(offset);
            }
        }
    }
    map.push(s.len());
    (folded, map)
}

/// Translate a `[start, end)` range in the folded string back to the
/// original. The end maps to the end of the last character touched.
pub(crate) fn unfold_range(map: &[usize], s: &str, start: usize, end: usize) -> (usize, usize) {
    let orig_start = map[start.min(map.len() - 1)];
    let orig_end = if end >= map.len() - 1 {
        s.len()
    } else {
        // `map[end]` is the first byte past the matched characters unless the
        // match ended mid-fold of one original character; either way the
        // mapped offset starts the next original character.
        let mapped = map[end];
        if mapped == map[end.saturating_sub(1)] {
            next_char_boundary(s, mapped)
        } else {
            mapped
        }
    };
    (orig_start, orig_end)
}

fn next_char_boundary(s: &str, from: usize) -> usize {
    let mut idx = from + 1;
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx.min(s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_fold_is_identity_mapped() {
        let (folded, map) = fold_with_map("AbC");
        assert_eq!(folded, "abc");
        assert_eq!(map, vec![0, 1, 2, 3]);
    }

    #[test]
    fn find_in_folded_maps_back() {
        let s = "Hello World";
        let (folded, map) = fold_with_map(s);
        let start = folded.find("world").unwrap();
        let (a, b) = unfold_range(&map, s, start, start + "world".len());
        assert_eq!(&s[a..b], "World");
    }

    #[test]
    fn multibyte_offsets_stay_on_boundaries() {
        let s = "αΒγ ABC";
        let (folded, map) = fold_with_map(s);
        let start = folded.find("βγ").unwrap();
        let (a, b) = unfold_range(&map, s, start, start + "βγ".len());
        assert!(s.is_char_boundary(a) && s.is_char_boundary(b));
        assert_eq!(&s[a..b], "Βγ");
    }

    #[test]
    fn expanding_fold_keeps_valid_ranges() {
        // 'İ' folds to "i\u{307}" (three bytes from two).
        let s = "İstanbul";
        let (folded, map) = fold_with_map(s);
        let start = folded.find("i\u{307}stan").unwrap();
        let (a, b) = unfold_range(&map, s, start, start + "i\u{307}stan".len());
        assert!(s.is_char_boundary(a) && s.is_char_boundary(b));
        assert_eq!(a, 0);
        assert_eq!(&s[a..b], "İstan");
    }
}
