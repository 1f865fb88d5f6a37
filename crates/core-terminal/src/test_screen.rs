//! In-memory screen used by tests and headless runs.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, unbounded};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::event::Event;
use crate::{CellStyle, Screen};

/// Fixed-size character grid. Styles are accepted and dropped; the tests
/// assert on text placement, not attributes.
pub struct TestScreen {
    size: Mutex<(u16, u16)>,
    grid: Mutex<Vec<Vec<char>>>,
    cursor: Mutex<Option<(u16, u16)>>,
    initialized: AtomicBool,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
}

impl TestScreen {
    pub fn new(width: u16, height: u16) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            size: Mutex::new((width, height)),
            grid: Mutex::new(vec![vec![' '; width as usize]; height as usize]),
            cursor: Mutex::new(None),
            initialized: AtomicBool::new(false),
            events_tx,
            events_rx,
        }
    }

    /// The text of row `y`, right-trimmed.
    pub fn row_text(&self, y: u16) -> String {
        let grid = self.grid.lock().expect("test screen poisoned");
        let row: String = grid
            .get(y as usize)
            .map(|row| row.iter().collect())
            .unwrap_or_default();
        row.trim_end().to_owned()
    }

    pub fn rows(&self) -> Vec<String> {
        let (_, height) = *self.size.lock().expect("test screen poisoned");
        (0..height).map(|y| self.row_text(y)).collect()
    }

    pub fn cursor(&self) -> Option<(u16, u16)> {
        *self.cursor.lock().expect("test screen poisoned")
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn resize(&self, width: u16, height: u16) {
        *self.size.lock().expect("test screen poisoned") = (width, height);
        *self.grid.lock().expect("test screen poisoned") =
            vec![vec![' '; width as usize]; height as usize];
        let _ = self.events_tx.send(Event::Resize(width, height));
    }
}

impl Default for TestScreen {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl Screen for TestScreen {
    fn init(&self) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        *self.size.lock().expect("test screen poisoned")
    }

    fn print(&self, x: u16, y: u16, text: &str, _style: &CellStyle) -> usize {
        let mut grid = self.grid.lock().expect("test screen poisoned");
        if let Some(row) = grid.get_mut(y as usize) {
            let mut col = x as usize;
            for ch in text.chars() {
                let width = UnicodeWidthChar::width(ch).unwrap_or(0).max(1);
                if col >= row.len() {
                    break;
                }
                row[col] = ch;
                // Wide characters blank their continuation cell.
                for extra in 1..width {
                    if col + extra < row.len() {
                        row[col + extra] = ' ';
                    }
                }
                col += width;
            }
        }
        UnicodeWidthStr::width(text)
    }

    fn set_cell(&self, x: u16, y: u16, ch: char, style: &CellStyle) {
        let mut tmp = [0u8; 4];
        self.print(x, y, ch.encode_utf8(&mut tmp), style);
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let (width, height) = self.size();
        *self.grid.lock().expect("test screen poisoned") =
            vec![vec![' '; width as usize]; height as usize];
        Ok(())
    }

    fn show_cursor(&self, x: u16, y: u16) {
        *self.cursor.lock().expect("test screen poisoned") = Some((x, y));
    }

    fn events(&self) -> Receiver<Event> {
        self.events_rx.clone()
    }

    fn send_event(&self, event: Event) {
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Key, KeyCode};

    #[test]
    fn print_places_text() {
        let screen = TestScreen::new(20, 4);
        screen.print(2, 1, "hello", &CellStyle::default());
        assert_eq!(screen.row_text(1), "  hello");
    }

    #[test]
    fn later_prints_overwrite() {
        let screen = TestScreen::new(20, 2);
        screen.print(0, 0, "aaaaaa", &CellStyle::default());
        screen.print(0, 0, "bb", &CellStyle::default());
        assert_eq!(screen.row_text(0), "bbaaaa");
    }

    #[test]
    fn send_event_reaches_the_receiver() {
        let screen = TestScreen::new(10, 2);
        screen.send_event(Event::Key(Key::plain(KeyCode::Enter)));
        assert_eq!(
            screen.events().recv().unwrap(),
            Event::Key(Key::plain(KeyCode::Enter))
        );
    }

    #[test]
    fn sync_clears_the_grid() {
        let screen = TestScreen::new(10, 2);
        screen.print(0, 0, "junk", &CellStyle::default());
        screen.sync().unwrap();
        assert_eq!(screen.row_text(0), "");
    }
}
