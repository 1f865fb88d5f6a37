//! Shared session state read by the view and mutated by the input loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use core_hub::PagingRequest;
use core_line::Line;
use core_source::LineBuffer;
use core_state::{Location, Query, RangeStart, Selection};

/// The view-model: current buffer, query, location, selection and the
/// matcher label. Locks are leaf-level; no lock is held across a channel
/// operation.
pub struct ViewModel {
    buffer: Mutex<Arc<dyn LineBuffer>>,
    query: Mutex<Query>,
    location: Mutex<Location>,
    selection: Mutex<Selection>,
    range_start: Mutex<RangeStart>,
    matcher_name: Mutex<String>,
    jump_armed: AtomicBool,
}

impl ViewModel {
    pub fn new(initial: Arc<dyn LineBuffer>, matcher_name: impl Into<String>) -> Self {
        Self {
            buffer: Mutex::new(initial),
            query: Mutex::new(Query::new()),
            location: Mutex::new(Location::new()),
            selection: Mutex::new(Selection::new()),
            range_start: Mutex::new(RangeStart::default()),
            matcher_name: Mutex::new(matcher_name.into()),
            jump_armed: AtomicBool::new(false),
        }
    }

    /// Swap in the buffer the view renders from. Installed atomically: the
    /// old buffer stays readable by whoever still holds it.
    pub fn install_buffer(&self, buffer: Arc<dyn LineBuffer>) {
        let total = buffer.size();
        *self.buffer.lock().expect("view buffer poisoned") = buffer;
        self.location
            .lock()
            .expect("view location poisoned")
            .set_total(total);
    }

    pub fn current_buffer(&self) -> Arc<dyn LineBuffer> {
        Arc::clone(&self.buffer.lock().expect("view buffer poisoned"))
    }

    pub fn query(&self) -> MutexGuard<'_, Query> {
        self.query.lock().expect("view query poisoned")
    }

    pub fn location(&self) -> MutexGuard<'_, Location> {
        self.location.lock().expect("view location poisoned")
    }

    pub fn selection(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().expect("view selection poisoned")
    }

    pub fn range_start(&self) -> MutexGuard<'_, RangeStart> {
        self.range_start.lock().expect("view range poisoned")
    }

    pub fn matcher_name(&self) -> String {
        self.matcher_name
            .lock()
            .expect("view matcher poisoned")
            .clone()
    }

    pub fn set_matcher_name(&self, name: impl Into<String>) {
        *self.matcher_name.lock().expect("view matcher poisoned") = name.into();
    }

    pub fn jump_armed(&self) -> bool {
        self.jump_armed.load(Ordering::SeqCst)
    }

    pub fn set_jump_armed(&self, armed: bool) {
        self.jump_armed.store(armed, Ordering::SeqCst);
    }

    pub fn line_under_cursor(&self) -> Option<Arc<Line>> {
        let cursor = self.location().cursor();
        self.current_buffer().line_at(cursor).ok()
    }

    /// Apply a movement request, extending the selection when a range
    /// anchor is pinned. Returns whether anything moved.
    pub fn apply_paging(&self, request: PagingRequest) -> bool {
        let moved = {
            let mut location = self.location();
            // The buffer may have grown since the last draw.
            location.set_total(self.buffer.lock().expect("view buffer poisoned").size());
            match request {
                PagingRequest::Up => location.move_up(),
                PagingRequest::Down => location.move_down(),
                PagingRequest::PageUp => location.page_up(),
                PagingRequest::PageDown => location.page_down(),
                PagingRequest::First => location.to_first(),
                PagingRequest::Last => location.to_last(),
                PagingRequest::JumpTo(row) => location.jump_to_visible(row),
            }
        };
        if moved {
            self.extend_range_selection();
        }
        moved
    }

    /// While a range anchor is pinned, every line between the anchor and
    /// the cursor belongs to the selection.
    fn extend_range_selection(&self) {
        let Some(anchor) = self.range_start().value() else {
            return;
        };
        let cursor = self.location().cursor();
        let (lo, hi) = if anchor <= cursor {
            (anchor, cursor)
        } else {
            (cursor, anchor)
        };
        let buffer = self.current_buffer();
        let mut selection = self.selection();
        for idx in lo..=hi {
            if let Ok(line) = buffer.line_at(idx) {
                selection.add(line);
            }
        }
    }
}
