//! Subsequence ("fuzzy") matcher.

use std::sync::Arc;

use core_line::Span;

use crate::{CompiledQuery, LineMatch, Matcher, MatcherError, SpanQuery};

/// Matches when the query's characters occur in order anywhere in the line.
/// Smart-case: an all-lowercase query folds the line per character. Runs of
/// adjacent matched characters merge into a single highlight span.
pub struct FuzzyMatcher;

impl FuzzyMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for FuzzyMatcher {
    fn name(&self) -> &str {
        "Fuzzy"
    }

    fn query(&self, query: &str) -> Result<Arc<dyn CompiledQuery>, MatcherError> {
        let sensitive = query.chars().any(|c| c.is_uppercase());
        let chars: Vec<char> = query.chars().filter(|c| !c.is_whitespace()).collect();
        Ok(Arc::new(SpanQuery::new(FuzzyQuery { chars, sensitive })))
    }
}

struct FuzzyQuery {
    chars: Vec<char>,
    sensitive: bool,
}

impl FuzzyQuery {
    fn chars_equal(&self, want: char, have: char) -> bool {
        if self.sensitive {
            want == have
        } else {
            have.to_lowercase().eq(want.to_lowercase())
        }
    }
}

impl LineMatch for FuzzyQuery {
    fn spans(&self, display: &str) -> Option<Vec<Span>> {
        if self.chars.is_empty() {
            return None;
        }
        let mut spans = Vec::with_capacity(self.chars.len());
        let mut wanted = self.chars.iter();
        let mut want = *wanted.next()?;
        for (offset, have) in display.char_indices() {
            if self.chars_equal(want, have) {
                spans.push(Span::new(offset, offset + have.len_utf8()));
                match wanted.next() {
                    Some(next) => want = *next,
                    None => return Some(spans),
                }
            }
        }
        None
    }
}
