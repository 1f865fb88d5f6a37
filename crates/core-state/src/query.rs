//! The query under edit.

use unicode_segmentation::UnicodeSegmentation;

/// Query text plus a caret. The caret is a byte offset that always sits on
/// a grapheme boundary; movement and deletion operate on extended grapheme
/// clusters so combining sequences never tear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    buf: String,
    caret: usize,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Caret position as a byte offset into `as_str()`.
    pub fn caret(&self) -> usize {
        self.caret
    }

    /// Replace the whole query, placing the caret at the end.
    pub fn set(&mut self, text: &str) {
        self.buf.clear();
        self.buf.push_str(text);
        self.caret = self.buf.len();
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.caret = 0;
    }

    pub fn insert(&mut self, text: &str) {
        self.buf.insert_str(self.caret, text);
        self.caret += text.len();
    }

    pub fn insert_char(&mut self, ch: char) {
        self.buf.insert(self.caret, ch);
        self.caret += ch.len_utf8();
    }

    fn prev_boundary(&self) -> Option<usize> {
        self.buf[..self.caret]
            .grapheme_indices(true)
            .last()
            .map(|(idx, _)| idx)
    }

    fn next_boundary(&self) -> Option<usize> {
        self.buf[self.caret..]
            .graphemes(true)
            .next()
            .map(|g| self.caret + g.len())
    }

    /// Delete the grapheme before the caret. Returns whether anything
    /// changed.
    pub fn delete_backward(&mut self) -> bool {
        match self.prev_boundary() {
            Some(start) => {
                self.buf.replace_range(start..self.caret, "");
                self.caret = start;
                true
            }
            None => false,
        }
    }

    /// Delete the grapheme under the caret.
    pub fn delete_forward(&mut self) -> bool {
        match self.next_boundary() {
            Some(end) => {
                self.buf.replace_range(self.caret..end, "");
                true
            }
            None => false,
        }
    }

    /// Delete from the start of the previous word to the caret.
    pub fn delete_backward_word(&mut self) -> bool {
        if self.caret == 0 {
            return false;
        }
        let head = &self.buf[..self.caret];
        let start = head
            .unicode_word_indices()
            .last()
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        self.buf.replace_range(start..self.caret, "");
        self.caret = start;
        true
    }

    /// Delete everything before the caret.
    pub fn kill_to_start(&mut self) -> bool {
        if self.caret == 0 {
            return false;
        }
        self.buf.replace_range(..self.caret, "");
        self.caret = 0;
        true
    }

    /// Delete everything at and after the caret.
    pub fn kill_to_end(&mut self) -> bool {
        if self.caret >= self.buf.len() {
            return false;
        }
        self.buf.truncate(self.caret);
        true
    }

    pub fn move_left(&mut self) -> bool {
        match self.prev_boundary() {
            Some(idx) => {
                self.caret = idx;
                true
            }
            None => false,
        }
    }

    pub fn move_right(&mut self) -> bool {
        match self.next_boundary() {
            Some(idx) => {
                self.caret = idx;
                true
            }
            None => false,
        }
    }

    pub fn move_home(&mut self) -> bool {
        let moved = self.caret != 0;
        self.caret = 0;
        moved
    }

    pub fn move_end(&mut self) -> bool {
        let moved = self.caret != self.buf.len();
        self.caret = self.buf.len();
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_advances_caret() {
        let mut q = Query::new();
        q.insert_char('a');
        q.insert_char('b');
        assert_eq!(q.as_str(), "ab");
        assert_eq!(q.caret(), 2);
    }

    #[test]
    fn insert_at_caret_position() {
        let mut q = Query::new();
        q.set("ac");
        q.move_left();
        q.insert_char('b');
        assert_eq!(q.as_str(), "abc");
        assert_eq!(q.caret(), 2);
    }

    #[test]
    fn delete_backward_removes_grapheme() {
        let mut q = Query::new();
        q.set("ae\u{301}"); // 'a' + 'é' as combining sequence
        assert!(q.delete_backward());
        assert_eq!(q.as_str(), "a");
        assert!(q.delete_backward());
        assert!(q.is_empty());
        assert!(!q.delete_backward());
    }

    #[test]
    fn delete_forward_under_caret() {
        let mut q = Query::new();
        q.set("abc");
        q.move_home();
        assert!(q.delete_forward());
        assert_eq!(q.as_str(), "bc");
        assert_eq!(q.caret(), 0);
    }

    #[test]
    fn kill_to_start_and_end() {
        let mut q = Query::new();
        q.set("hello world");
        q.move_home();
        for _ in 0..5 {
            q.move_right();
        }
        assert!(q.kill_to_start());
        assert_eq!(q.as_str(), " world");
        assert!(q.kill_to_end());
        assert_eq!(q.as_str(), "");
    }

    #[test]
    fn delete_backward_word() {
        let mut q = Query::new();
        q.set("foo bar");
        assert!(q.delete_backward_word());
        assert_eq!(q.as_str(), "foo ");
        assert!(q.delete_backward_word());
        assert_eq!(q.as_str(), "");
        assert!(!q.delete_backward_word());
    }

    #[test]
    fn movement_clamps_at_edges() {
        let mut q = Query::new();
        q.set("xy");
        assert!(!q.move_right());
        assert!(q.move_left());
        assert!(q.move_left());
        assert!(!q.move_left());
        assert!(q.move_end());
        assert_eq!(q.caret(), 2);
    }

    #[test]
    fn set_resets_caret_to_end() {
        let mut q = Query::new();
        q.set("abc");
        q.move_home();
        q.set("de");
        assert_eq!(q.caret(), 2);
    }
}
