//! Matching algorithms behind the filter pipeline.
//!
//! A [`Matcher`] compiles a query string into a [`CompiledQuery`], the
//! per-query state the filter stage applies to batches of lines. Matched
//! lines are copies annotated with highlight spans; the originals stay
//! untouched in their source buffer.
//!
//! Built-ins: `IgnoreCase`, `CaseSensitive`, `SmartCase` (sensitive iff the
//! query contains an uppercase character), `Regexp` (each whitespace
//! separated term compiled as-is), `Fuzzy` (subsequence), and external
//! commands fed the display lines on stdin.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::Sender;
use thiserror::Error;

use core_hub::CancelToken;
use core_line::{Line, Span};
use core_source::LineEvent;

mod external;
mod fold;
mod fuzzy;
mod regexp;
mod substring;

pub use external::ExternalMatcher;
pub use fuzzy::FuzzyMatcher;
pub use regexp::RegexpMatcher;
pub use substring::{CaseMode, SubstringMatcher};

#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("unknown matcher: {0}")]
    Unknown(String),
}

/// One matching algorithm.
pub trait Matcher: Send + Sync {
    fn name(&self) -> &str;

    /// Preferred batch size, or 0 to use the stage default.
    fn buf_size(&self) -> usize {
        0
    }

    /// Whether batches may be applied concurrently across workers.
    fn supports_parallel(&self) -> bool {
        true
    }

    /// Compile per-query state. A bad pattern surfaces here, before any
    /// pipeline is built.
    fn query(&self, query: &str) -> Result<Arc<dyn CompiledQuery>, MatcherError>;
}

/// Per-query state applied to line batches.
pub trait CompiledQuery: Send + Sync {
    /// Match a batch, returning the matched lines (annotated with spans) in
    /// input order. This is the preferred, direct-collect form.
    fn apply_collect(&self, token: &CancelToken, batch: &[Arc<Line>]) -> Vec<Arc<Line>>;

    /// Stream matched lines into `out`. Layered on `apply_collect`.
    fn apply(&self, token: &CancelToken, batch: &[Arc<Line>], out: &Sender<LineEvent>) {
        for line in self.apply_collect(token, batch) {
            if out.send(LineEvent::Line(line)).is_err() {
                return;
            }
        }
    }
}

/// Per-line span matching, shared by every built-in except the external
/// command matcher.
pub(crate) trait LineMatch: Send + Sync {
    fn spans(&self, display: &str) -> Option<Vec<Span>>;
}

pub(crate) struct SpanQuery<M: LineMatch> {
    inner: M,
}

impl<M: LineMatch> SpanQuery<M> {
    pub(crate) fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<M: LineMatch> CompiledQuery for SpanQuery<M> {
    fn apply_collect(&self, token: &CancelToken, batch: &[Arc<Line>]) -> Vec<Arc<Line>> {
        let mut out = Vec::new();
        for line in batch {
            if token.is_cancelled() {
                break;
            }
            if let Some(spans) = self.inner.spans(line.display()) {
                out.push(Arc::new(line.with_spans(spans)));
            }
        }
        out
    }
}

/// The rotation set the session works with: a non-empty list of matchers and
/// the index of the current one.
pub struct MatcherSet {
    matchers: Vec<Arc<dyn Matcher>>,
    current: AtomicUsize,
}

impl MatcherSet {
    /// The built-in line-up, starting on `IgnoreCase`.
    pub fn builtin() -> Self {
        Self::new(vec![
            Arc::new(SubstringMatcher::ignore_case()),
            Arc::new(SubstringMatcher::case_sensitive()),
            Arc::new(SubstringMatcher::smart_case()),
            Arc::new(RegexpMatcher::new()),
            Arc::new(FuzzyMatcher::new()),
        ])
    }

    pub fn new(matchers: Vec<Arc<dyn Matcher>>) -> Self {
        assert!(!matchers.is_empty(), "matcher set must not be empty");
        Self {
            matchers,
            current: AtomicUsize::new(0),
        }
    }

    pub fn push(&mut self, matcher: Arc<dyn Matcher>) {
        self.matchers.push(matcher);
    }

    pub fn current(&self) -> Arc<dyn Matcher> {
        let idx = self.current.load(Ordering::SeqCst) % self.matchers.len();
        Arc::clone(&self.matchers[idx])
    }

    /// Advance to the next matcher and return it.
    pub fn rotate(&self) -> Arc<dyn Matcher> {
        let idx = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        Arc::clone(&self.matchers[idx % self.matchers.len()])
    }

    pub fn select(&self, name: &str) -> Result<(), MatcherError> {
        match self.matchers.iter().position(|m| m.name() == name) {
            Some(idx) => {
                self.current.store(idx, Ordering::SeqCst);
                Ok(())
            }
            None => Err(MatcherError::Unknown(name.to_owned())),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.matchers.iter().map(|m| m.name().to_owned()).collect()
    }
}
