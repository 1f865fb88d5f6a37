//! Regular-expression matcher.

use std::sync::Arc;

use regex::Regex;

use core_line::Span;

use crate::{CompiledQuery, LineMatch, Matcher, MatcherError, SpanQuery};

/// Each whitespace-separated term of the query is compiled with a
/// case-insensitive default (a pattern can restore sensitivity with
/// `(?-i)`); a line matches when every term matches, and the first match of
/// each term is highlighted. Compilation errors surface before a pipeline
/// is built.
pub struct RegexpMatcher;

impl RegexpMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RegexpMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher for RegexpMatcher {
    fn name(&self) -> &str {
        "Regexp"
    }

    fn query(&self, query: &str) -> Result<Arc<dyn CompiledQuery>, MatcherError> {
        let regexes = query
            .split_whitespace()
            .map(|term| Regex::new(&format!("(?i){term}")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(SpanQuery::new(RegexpQuery { regexes })))
    }
}

struct RegexpQuery {
    regexes: Vec<Regex>,
}

impl LineMatch for RegexpQuery {
    fn spans(&self, display: &str) -> Option<Vec<Span>> {
        if self.regexes.is_empty() {
            return None;
        }
        let mut spans = Vec::with_capacity(self.regexes.len());
        for re in &self.regexes {
            let m = re.find(display)?;
            // A regex may legitimately match the empty string; keep the
            // line but let span normalization drop the zero-width range.
            spans.push(Span::new(m.start(), m.end()));
        }
        Some(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_hub::CancelToken;
    use core_line::Line;

    fn apply(query: &str, inputs: &[&str]) -> Vec<String> {
        let compiled = RegexpMatcher::new().query(query).unwrap();
        let batch: Vec<_> = inputs
            .iter()
            .enumerate()
            .map(|(i, text)| Arc::new(Line::new(i as u64 + 1, text, false, false)))
            .collect();
        compiled
            .apply_collect(&CancelToken::new(), &batch)
            .iter()
            .map(|l| l.display().to_owned())
            .collect()
    }

    #[test]
    fn matches_by_pattern() {
        assert_eq!(
            apply("^ba.$", &["foo", "bar", "baz", "bazz"]),
            vec!["bar", "baz"]
        );
    }

    #[test]
    fn single_letter_pattern_ignores_case() {
        assert_eq!(
            apply(
                "a",
                &[
                    "Alice", "Bob", "Charlie", "David", "Eve", "Frank", "George", "Hugh"
                ]
            ),
            vec!["Alice", "Charlie", "David", "Frank"]
        );
    }

    #[test]
    fn sensitivity_can_be_restored_inline() {
        assert_eq!(apply("(?-i)A", &["Alice", "apple"]), vec!["Alice"]);
    }

    #[test]
    fn every_term_must_match() {
        assert_eq!(
            apply("^f [0-9]$", &["foo 1", "f 1", "f x"]),
            vec!["f 1"]
        );
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        assert!(matches!(
            RegexpMatcher::new().query("(unclosed"),
            Err(MatcherError::InvalidPattern(_))
        ));
    }

    #[test]
    fn match_location_is_highlighted() {
        let compiled = RegexpMatcher::new().query("w.rld").unwrap();
        let line = Arc::new(Line::new(1, "hello world", false, false));
        let matched = compiled.apply_collect(&CancelToken::new(), &[line]);
        assert_eq!(matched[0].spans().unwrap(), &[Span::new(6, 11)]);
    }
}
