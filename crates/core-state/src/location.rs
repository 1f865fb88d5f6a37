//! Cursor and page location within the current view.

/// Tracks the cursor index, the first visible line, and the page geometry
/// against the size of the currently installed buffer. All movement clamps;
/// the caller only has to publish `set_total` when the buffer changes and
/// `set_per_page` on resize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    cursor: usize,
    offset: usize,
    per_page: usize,
    total: usize,
}

impl Location {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Index of the first visible line.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// 1-based page number of the current window.
    pub fn page(&self) -> usize {
        if self.per_page == 0 {
            return 1;
        }
        self.offset / self.per_page + 1
    }

    pub fn max_page(&self) -> usize {
        if self.per_page == 0 || self.total == 0 {
            return 1;
        }
        self.total.div_ceil(self.per_page)
    }

    pub fn set_per_page(&mut self, per_page: usize) {
        self.per_page = per_page;
        self.scroll_into_view();
    }

    /// Publish the size of the installed buffer, clamping cursor and window.
    pub fn set_total(&mut self, total: usize) {
        self.total = total;
        if self.cursor >= total {
            self.cursor = total.saturating_sub(1);
        }
        self.scroll_into_view();
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.total.saturating_sub(1));
        self.scroll_into_view();
    }

    pub fn move_up(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.scroll_into_view();
        true
    }

    pub fn move_down(&mut self) -> bool {
        if self.cursor + 1 >= self.total {
            return false;
        }
        self.cursor += 1;
        self.scroll_into_view();
        true
    }

    pub fn page_up(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor = self.cursor.saturating_sub(self.per_page.max(1));
        self.offset = self.offset.saturating_sub(self.per_page.max(1));
        self.scroll_into_view();
        true
    }

    pub fn page_down(&mut self) -> bool {
        if self.total == 0 || self.cursor + 1 >= self.total {
            return false;
        }
        let step = self.per_page.max(1);
        self.cursor = (self.cursor + step).min(self.total - 1);
        self.offset = (self.offset + step).min(self.total.saturating_sub(1));
        self.scroll_into_view();
        true
    }

    pub fn to_first(&mut self) -> bool {
        let moved = self.cursor != 0;
        self.cursor = 0;
        self.offset = 0;
        moved
    }

    pub fn to_last(&mut self) -> bool {
        if self.total == 0 {
            return false;
        }
        let moved = self.cursor != self.total - 1;
        self.cursor = self.total - 1;
        self.scroll_into_view();
        moved
    }

    /// Move the cursor to the n-th visible row.
    pub fn jump_to_visible(&mut self, row: usize) -> bool {
        if self.total == 0 || self.per_page == 0 || row >= self.per_page {
            return false;
        }
        let target = self.offset + row;
        if target >= self.total {
            return false;
        }
        self.cursor = target;
        true
    }

    fn scroll_into_view(&mut self) {
        if self.per_page == 0 {
            return;
        }
        if self.cursor < self.offset {
            self.offset = self.cursor;
        } else if self.cursor >= self.offset + self.per_page {
            self.offset = self.cursor + 1 - self.per_page;
        }
        if self.offset >= self.total {
            self.offset = self.total.saturating_sub(1);
        }
    }
}
