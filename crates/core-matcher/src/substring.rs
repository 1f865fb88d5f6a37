//! Plain substring matchers: IgnoreCase, CaseSensitive, SmartCase.

use std::sync::Arc;

use core_line::Span;

use crate::fold::{fold_with_map, unfold_range};
use crate::{CompiledQuery, LineMatch, Matcher, MatcherError, SpanQuery};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMode {
    Sensitive,
    Insensitive,
    /// Sensitive iff the query contains an uppercase character.
    Smart,
}

pub struct SubstringMatcher {
    name: &'static str,
    mode: CaseMode,
}

impl SubstringMatcher {
    pub fn ignore_case() -> Self {
        Self {
            name: "IgnoreCase",
            mode: CaseMode::Insensitive,
        }
    }

    pub fn case_sensitive() -> Self {
        Self {
            name: "CaseSensitive",
            mode: CaseMode::Sensitive,
        }
    }

    pub fn smart_case() -> Self {
        Self {
            name: "SmartCase",
            mode: CaseMode::Smart,
        }
    }
}

impl Matcher for SubstringMatcher {
    fn name(&self) -> &str {
        self.name
    }

    fn query(&self, query: &str) -> Result<Arc<dyn CompiledQuery>, MatcherError> {
        let sensitive = match self.mode {
            CaseMode::Sensitive => true,
            CaseMode::Insensitive => false,
            CaseMode::Smart => query.chars().any(|c| c.is_uppercase()),
        };
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| {
                if sensitive {
                    t.to_owned()
                } else {
                    t.to_lowercase()
                }
            })
            .collect();
        Ok(Arc::new(SpanQuery::new(SubstringQuery { terms, sensitive })))
    }
}

struct SubstringQuery {
    terms: Vec<String>,
    sensitive: bool,
}

impl LineMatch for SubstringQuery {
    /// Every term must occur; the first occurrence of each becomes a span.
    fn spans(&self, display: &str) -> Option<Vec<Span>> {
        if self.terms.is_empty() {
            return None;
        }
        let mut spans = Vec::with_capacity(self.terms.len());
        if self.sensitive {
            for term in &self.terms {
                let start = display.find(term.as_str())?;
                spans.push(Span::new(start, start + term.len()));
            }
        } else {
            let (folded, map) = fold_with_map(display);
            for term in &self.terms {
                let start = folded.find(term.as_str())?;
                let (a, b) = unfold_range(&map, display, start, start + term.len());
                spans.push(Span::new(a, b));
            }
        }
        Some(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_hub::CancelToken;
    use core_line::Line;

    fn matched_displays(matcher: &dyn Matcher, query: &str, inputs: &[&str]) -> Vec<String> {
        let compiled = matcher.query(query).unwrap();
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
    fn ignore_case_matches_any_case() {
        let m = SubstringMatcher::ignore_case();
        assert_eq!(
            matched_displays(&m, "ba", &["foo", "bar", "baz", "BAttle"]),
            vec!["bar", "baz", "BAttle"]
        );
    }

    #[test]
    fn case_sensitive_requires_exact_case() {
        let m = SubstringMatcher::case_sensitive();
        assert_eq!(
            matched_displays(&m, "Bar", &["bar", "Bar", "BAR"]),
            vec!["Bar"]
        );
    }

    #[test]
    fn smart_case_is_insensitive_for_lowercase_queries() {
        let m = SubstringMatcher::smart_case();
        assert_eq!(
            matched_displays(&m, "bar", &["bar", "Bar", "BAR"]),
            vec!["bar", "Bar", "BAR"]
        );
        assert_eq!(matched_displays(&m, "Bar", &["bar", "Bar", "BAR"]), vec![
            "Bar"
        ]);
    }

    #[test]
    fn all_terms_must_match() {
        let m = SubstringMatcher::ignore_case();
        assert_eq!(
            matched_displays(&m, "foo bar", &["foo baz", "bar foo", "bar"]),
            vec!["bar foo"]
        );
    }

    #[test]
    fn empty_query_matches_nothing() {
        let m = SubstringMatcher::ignore_case();
        assert!(matched_displays(&m, "   ", &["a", "b"]).is_empty());
    }

    #[test]
    fn spans_cover_the_matched_bytes() {
        let m = SubstringMatcher::ignore_case();
        let compiled = m.query("wor").unwrap();
        let line = Arc::new(Line::new(1, "Hello World", false, false));
        let matched = compiled.apply_collect(&CancelToken::new(), &[line]);
        let spans = matched[0].spans().unwrap();
        assert_eq!(spans, &[Span::new(6, 9)]);
        assert_eq!(&matched[0].display()[6..9], "Wor");
    }
}
