//! The view loop: renders the prompt, the visible window of the current
//! buffer with match highlighting, and the status line; reacts to draw,
//! status and paging payloads from the hub.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, select};
use tracing::trace;
use unicode_width::UnicodeWidthStr;

use core_config::Layout;
use core_hub::{CancelToken, DrawOptions, Hub};
use core_keymap::JumpMap;
use core_source::LineBuffer;
use core_terminal::{CellStyle, Screen};

use crate::model::ViewModel;
use crate::styles::Styles;

/// Poll granularity for observing cancellation while idle.
const IDLE_POLL: Duration = Duration::from_millis(100);

pub struct View {
    screen: Arc<dyn Screen>,
    hub: Arc<Hub>,
    model: Arc<ViewModel>,
    styles: Styles,
    layout: Layout,
    prompt: String,
    selection_prefix: String,
    jump: JumpMap,
    show_jump_prefix: bool,
}

impl View {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        screen: Arc<dyn Screen>,
        hub: Arc<Hub>,
        model: Arc<ViewModel>,
        styles: Styles,
        layout: Layout,
        prompt: impl Into<String>,
        selection_prefix: impl Into<String>,
        jump: JumpMap,
        show_jump_prefix: bool,
    ) -> Self {
        Self {
            screen,
            hub,
            model,
            styles,
            layout,
            prompt: prompt.into(),
            selection_prefix: selection_prefix.into(),
            jump,
            show_jump_prefix,
        }
    }

    /// Serve draw/status/paging payloads until cancellation. The status
    /// clear timer lives here so it dies with the loop.
    pub fn run_loop(&self, token: &CancelToken) {
        let draw_rx = self.hub.draw_rx();
        let status_rx = self.hub.status_rx();
        let paging_rx = self.hub.paging_rx();
        let never = crossbeam_channel::never::<Instant>();
        let mut clear_rx: Option<Receiver<Instant>> = None;
        let mut status = String::new();

        self.draw_with_status(&DrawOptions::default(), &status);
        loop {
            if token.is_cancelled() {
                return;
            }
            // Cloned so the arm below may replace or drop the timer while
            // the select borrows only this handle.
            let clear_arm = clear_rx.clone().unwrap_or_else(|| never.clone());
            select! {
                recv(draw_rx) -> payload => match payload {
                    Ok(payload) => {
                        self.draw_with_status(payload.data(), &status);
                        payload.done();
                    }
                    Err(_) => return,
                },
                recv(status_rx) -> payload => match payload {
                    Ok(payload) => {
                        let request = payload.data();
                        status = request.message.clone();
                        clear_rx = request.clear_after.map(crossbeam_channel::after);
                        self.draw_status_line(&status);
                        let _ = self.screen.flush();
                        payload.done();
                    }
                    Err(_) => return,
                },
                recv(paging_rx) -> payload => match payload {
                    Ok(payload) => {
                        if self.model.apply_paging(*payload.data()) {
                            self.draw_with_status(&DrawOptions::default(), &status);
                        }
                        payload.done();
                    }
                    Err(_) => return,
                },
                recv(clear_arm) -> _ => {
                    status.clear();
                    clear_rx = None;
                    self.draw_status_line(&status);
                    let _ = self.screen.flush();
                },
                default(IDLE_POLL) => {}
            }
        }
    }

    /// One full repaint.
    pub fn draw(&self, opts: &DrawOptions) {
        self.draw_with_status(opts, "");
    }

    fn draw_with_status(&self, opts: &DrawOptions, status: &str) {
        let (w, h) = self.screen.size();
        if opts.prompt_only {
            self.draw_prompt(w, h);
            let _ = self.screen.flush();
            return;
        }
        trace!(target: "view", running = opts.running_query, "draw");
        let per_page = Self::per_page(h);
        {
            let mut location = self.model.location();
            location.set_per_page(per_page);
        }
        self.model.install_buffer(self.model.current_buffer());
        let (offset, cursor) = {
            let location = self.model.location();
            (location.offset(), location.cursor())
        };
        let buffer = self.model.current_buffer();
        let jump_armed = self.model.jump_armed();
        for row in 0..per_page {
            let y = self.row_y(row, h);
            self.draw_line_row(y, w, row, offset + row, buffer.as_ref(), cursor, jump_armed);
        }
        self.draw_status_line_sized(status, w, h);
        self.draw_prompt(w, h);
        let _ = self.screen.flush();
    }

    fn per_page(h: u16) -> usize {
        (h.saturating_sub(2) as usize).max(1)
    }

    fn row_y(&self, row: usize, h: u16) -> u16 {
        match self.layout {
            Layout::TopDown => 1 + row as u16,
            Layout::BottomUp => h.saturating_sub(2).saturating_sub(row as u16),
        }
    }

    fn prompt_y(&self, h: u16) -> u16 {
        match self.layout {
            Layout::TopDown => 0,
            Layout::BottomUp => h.saturating_sub(1),
        }
    }

    fn status_y(&self, h: u16) -> u16 {
        match self.layout {
            Layout::TopDown => h.saturating_sub(1),
            Layout::BottomUp => 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_line_row(
        &self,
        y: u16,
        w: u16,
        row: usize,
        index: usize,
        buffer: &dyn LineBuffer,
        cursor: usize,
        jump_armed: bool,
    ) {
        let cols = w as usize;
        let Ok(line) = buffer.line_at(index) else {
            self.pad(0, y, cols, &self.styles.basic);
            return;
        };
        let selected = self.model.selection().has(line.id());
        let base = if index == cursor {
            self.styles.cursor
        } else if selected {
            self.styles.selected
        } else {
            self.styles.basic
        };

        let mut x = 0usize;
        if jump_armed && self.show_jump_prefix {
            let hint: String = match self.jump.hint(row) {
                Some(ch) => format!("{ch} "),
                None => "  ".into(),
            };
            x = self.put_segment(x, y, cols, &hint, &base.overlay(&self.styles.matched));
        }
        if !self.selection_prefix.is_empty() {
            let marker = if selected {
                format!("{} ", self.selection_prefix)
            } else {
                " ".repeat(UnicodeWidthStr::width(self.selection_prefix.as_str()) + 1)
            };
            x = self.put_segment(x, y, cols, &marker, &base);
        }

        let display = line.display();
        let matched = base.overlay(&self.styles.matched);
        let mut pos = 0usize;
        for span in line.spans().unwrap_or(&[]) {
            if x >= cols || span.start >= display.len() {
                break;
            }
            x = self.put_segment(x, y, cols, &display[pos..span.start], &base);
            let end = span.end.min(display.len());
            x = self.put_segment(x, y, cols, &display[span.start..end], &matched);
            pos = end;
        }
        if pos < display.len() {
            x = self.put_segment(x, y, cols, &display[pos..], &base);
        }
        self.pad(x, y, cols, &base);
    }

    /// Print `text` clipped to the remaining columns; returns the new x.
    fn put_segment(&self, x: usize, y: u16, cols: usize, text: &str, style: &CellStyle) -> usize {
        if text.is_empty() || x >= cols {
            return x;
        }
        let fitted = fit_width(text, cols - x);
        if fitted.is_empty() {
            return x;
        }
        x + self.screen.print(x as u16, y, fitted, style)
    }

    fn pad(&self, x: usize, y: u16, cols: usize, style: &CellStyle) {
        if x < cols {
            self.screen.print(x as u16, y, &" ".repeat(cols - x), style);
        }
    }

    fn draw_status_line(&self, message: &str) {
        let (w, h) = self.screen.size();
        self.draw_status_line_sized(message, w, h);
    }

    fn draw_status_line_sized(&self, message: &str, w: u16, h: u16) {
        let y = self.status_y(h);
        let cols = w as usize;
        let right = {
            let location = self.model.location();
            format!(
                "{} [{}/{}] ({})",
                self.model.matcher_name(),
                location.page(),
                location.max_page(),
                location.total(),
            )
        };
        let mut x = self.put_segment(0, y, cols, message, &self.styles.basic);
        let right_width = UnicodeWidthStr::width(right.as_str());
        let right_x = cols.saturating_sub(right_width);
        if right_x > x {
            self.pad(x, y, right_x, &self.styles.basic);
            x = right_x;
        }
        let bold = CellStyle {
            bold: true,
            ..CellStyle::default()
        };
        self.put_segment(x, y, cols, &right, &self.styles.basic.overlay(&bold));
    }

    fn draw_prompt(&self, w: u16, h: u16) {
        let y = self.prompt_y(h);
        let cols = w as usize;
        let head = format!("{} ", self.prompt);
        let (text, caret) = {
            let query = self.model.query();
            (query.as_str().to_owned(), query.caret())
        };
        let mut x = self.put_segment(0, y, cols, &head, &self.styles.basic);
        x = self.put_segment(x, y, cols, &text, &self.styles.query);
        self.pad(x, y, cols, &self.styles.basic);

        let caret_x =
            UnicodeWidthStr::width(head.as_str()) + UnicodeWidthStr::width(&text[..caret]);
        self.screen
            .show_cursor(caret_x.min(cols.saturating_sub(1)) as u16, y);
    }
}

/// Longest prefix of `text` that fits `cols` display columns.
fn fit_width(text: &str, cols: usize) -> &str {
    let mut width = 0usize;
    for (idx, ch) in text.char_indices() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width > cols {
            return &text[..idx];
        }
        width += ch_width;
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_hub::{PagingRequest, StatusRequest};
    use core_line::{IdGen, Line};
    use core_matcher::Matcher;
    use core_source::{LineEvent, MemoryBuffer};
    use core_terminal::TestScreen;
    use std::thread;

    const NAMES: &[&str] = &[
        "Alice", "Bob", "Charlie", "David", "Eve", "Frank", "George", "Hugh",
    ];

    fn buffer_of(texts: &[Arc<Line>]) -> Arc<MemoryBuffer> {
        let buffer = Arc::new(MemoryBuffer::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        for line in texts {
            tx.send(LineEvent::Line(Arc::clone(line))).unwrap();
        }
        tx.send(LineEvent::EndMark).unwrap();
        buffer.accept(&CancelToken::new(), &rx);
        buffer
    }

    fn lines_of(texts: &[&str]) -> Vec<Arc<Line>> {
        let idgen = IdGen::new();
        texts
            .iter()
            .map(|t| Arc::new(Line::new(idgen.next_id(), t, false, false)))
            .collect()
    }

    struct Fixture {
        screen: Arc<TestScreen>,
        model: Arc<ViewModel>,
        view: View,
    }

    fn fixture(texts: &[&str], width: u16, height: u16, layout: Layout) -> Fixture {
        let screen = Arc::new(TestScreen::new(width, height));
        let hub = Arc::new(Hub::new(core_hub::DEFAULT_CAPACITY));
        let model = Arc::new(ViewModel::new(buffer_of(&lines_of(texts)), "IgnoreCase"));
        let view = View::new(
            Arc::clone(&screen) as Arc<dyn Screen>,
            hub,
            Arc::clone(&model),
            Styles::default(),
            layout,
            "QUERY>",
            "",
            JumpMap::default(),
            true,
        );
        Fixture {
            screen,
            model,
            view,
        }
    }

    #[test]
    fn top_down_draws_prompt_lines_and_status() {
        let f = fixture(NAMES, 30, 6, Layout::TopDown);
        f.view.draw(&DrawOptions::default());
        assert!(f.screen.row_text(0).starts_with("QUERY>"));
        assert_eq!(f.screen.row_text(1), "Alice");
        assert_eq!(f.screen.row_text(4), "David");
        assert!(f.screen.row_text(5).contains("IgnoreCase [1/2] (8)"));
    }

    #[test]
    fn second_page_shows_the_rest() {
        // Eight names, four rows per page: page 2 is Eve..Hugh.
        let f = fixture(NAMES, 30, 6, Layout::TopDown);
        f.view.draw(&DrawOptions::default());
        assert!(f.model.apply_paging(PagingRequest::PageDown));
        f.view.draw(&DrawOptions::default());
        assert_eq!(f.screen.row_text(1), "Eve");
        assert_eq!(f.screen.row_text(2), "Frank");
        assert_eq!(f.screen.row_text(3), "George");
        assert_eq!(f.screen.row_text(4), "Hugh");
        assert!(f.screen.row_text(5).contains("[2/2]"));
    }

    #[test]
    fn regexp_matches_paged_two_per_page() {
        // Names matching /a/ are Charlie, David, Frank; two per page puts
        // David and Frank on page 2.
        let matcher = core_matcher::RegexpMatcher::new();
        let compiled = matcher.query("a").unwrap();
        let matched = compiled.apply_collect(&CancelToken::new(), &lines_of(NAMES));
        let f = fixture(&[], 30, 4, Layout::TopDown);
        f.model.install_buffer(buffer_of(&matched));
        f.view.draw(&DrawOptions::default());
        assert!(f.model.apply_paging(PagingRequest::PageDown));
        f.view.draw(&DrawOptions::default());
        assert_eq!(f.screen.row_text(1), "David");
        assert_eq!(f.screen.row_text(2), "Frank");
    }

    #[test]
    fn bottom_up_inverts_rows() {
        let f = fixture(&["one", "two", "three"], 30, 6, Layout::BottomUp);
        f.view.draw(&DrawOptions::default());
        assert!(f.screen.row_text(5).starts_with("QUERY>"));
        assert_eq!(f.screen.row_text(4), "one");
        assert_eq!(f.screen.row_text(3), "two");
        assert_eq!(f.screen.row_text(2), "three");
        assert!(f.screen.row_text(0).contains("IgnoreCase"));
    }

    #[test]
    fn caret_sits_after_the_query() {
        let f = fixture(&["x"], 30, 6, Layout::TopDown);
        f.model.query().set("abc");
        f.view.draw(&DrawOptions::default());
        // "QUERY> " is 7 columns, the query 3 more.
        assert_eq!(f.screen.cursor(), Some((10, 0)));
        assert!(f.screen.row_text(0).starts_with("QUERY> abc"));
    }

    #[test]
    fn long_lines_are_clipped_not_wrapped() {
        let f = fixture(&["0123456789abcdefghij-overflow"], 10, 4, Layout::TopDown);
        f.view.draw(&DrawOptions::default());
        assert_eq!(f.screen.row_text(1), "0123456789");
        assert_eq!(f.screen.row_text(2), "");
    }

    #[test]
    fn jump_hints_prefix_visible_rows() {
        let f = fixture(&["one", "two"], 30, 6, Layout::TopDown);
        f.model.set_jump_armed(true);
        f.view.draw(&DrawOptions::default());
        assert_eq!(f.screen.row_text(1), "a one");
        assert_eq!(f.screen.row_text(2), "s two");
    }

    #[test]
    fn selection_prefix_marks_selected_lines() {
        let screen = Arc::new(TestScreen::new(30, 6));
        let hub = Arc::new(Hub::new(core_hub::DEFAULT_CAPACITY));
        let lines = lines_of(&["one", "two"]);
        let model = Arc::new(ViewModel::new(buffer_of(&lines), "IgnoreCase"));
        model.selection().add(Arc::clone(&lines[1]));
        let view = View::new(
            Arc::clone(&screen) as Arc<dyn Screen>,
            hub,
            Arc::clone(&model),
            Styles::default(),
            Layout::TopDown,
            "QUERY>",
            ">",
            JumpMap::default(),
            false,
        );
        view.draw(&DrawOptions::default());
        assert_eq!(screen.row_text(1), "  one");
        assert_eq!(screen.row_text(2), "> two");
    }

    #[test]
    fn run_loop_serves_draw_and_status_payloads() {
        let screen = Arc::new(TestScreen::new(30, 6));
        let hub = Arc::new(Hub::new(core_hub::DEFAULT_CAPACITY));
        let model = Arc::new(ViewModel::new(buffer_of(&lines_of(&["hello"])), "Fuzzy"));
        let view = View::new(
            Arc::clone(&screen) as Arc<dyn Screen>,
            Arc::clone(&hub),
            model,
            Styles::default(),
            Layout::TopDown,
            "QUERY>",
            "",
            JumpMap::default(),
            false,
        );
        let token = CancelToken::new();
        let loop_token = token.clone();
        let handle = thread::spawn(move || view.run_loop(&loop_token));

        hub.batch(|h| {
            h.send_status(&token, StatusRequest::message("Running query..."))
                .unwrap();
            h.send_draw(&token, DrawOptions::running()).unwrap();
        });
        assert!(screen.row_text(5).contains("Running query..."));
        assert_eq!(screen.row_text(1), "hello");

        token.cancel();
        handle.join().unwrap();
    }
}
