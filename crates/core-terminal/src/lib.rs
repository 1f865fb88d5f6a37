//! Terminal backend abstraction: the `Screen` capability, its crossterm
//! implementation, and an in-memory screen for tests.
//!
//! The screen owns raw mode and the alternate screen; [`ScreenGuard`]
//! restores the terminal even when the caller early-returns or panics.
//! Input arrives through a channel of [`Event`]s fed by a poll thread (or by
//! [`Screen::send_event`] in tests), so the input loop can `select!` over
//! terminal events like any other channel.

use anyhow::Result;
use crossbeam_channel::Receiver;

mod crossterm_screen;
mod event;
pub mod style;
mod test_screen;

pub use crossterm_screen::CrosstermScreen;
pub use event::{Event, Key, KeyCode, Mods};
pub use style::CellStyle;
pub use test_screen::TestScreen;

pub trait Screen: Send + Sync {
    /// Enter raw mode / the alternate screen and start delivering events.
    fn init(&self) -> Result<()>;

    /// Restore the terminal. Idempotent.
    fn close(&self) -> Result<()>;

    /// Current (columns, rows).
    fn size(&self) -> (u16, u16);

    /// Write `text` at `(x, y)` with `style`, returning the display width
    /// consumed. Content past the right edge is the caller's problem; rows
    /// are overwritten, not merged.
    fn print(&self, x: u16, y: u16, text: &str, style: &CellStyle) -> usize;

    /// Place a single character cell.
    fn set_cell(&self, x: u16, y: u16, ch: char, style: &CellStyle);

    /// Make everything printed since the last flush visible.
    fn flush(&self) -> Result<()>;

    /// Full repaint: drop whatever the terminal shows and start clean.
    fn sync(&self) -> Result<()>;

    /// Move the visible cursor (the query caret).
    fn show_cursor(&self, x: u16, y: u16);

    /// The event stream consumed by the input loop.
    fn events(&self) -> Receiver<Event>;

    /// Inject an event as if the terminal produced it. Test hook, also used
    /// to wake the input loop on shutdown.
    fn send_event(&self, event: Event);
}

/// RAII guard pairing `init` with `close`.
pub struct ScreenGuard<'a> {
    screen: &'a dyn Screen,
}

impl<'a> ScreenGuard<'a> {
    pub fn new(screen: &'a dyn Screen) -> Result<Self> {
        screen.init()?;
        Ok(Self { screen })
    }
}

impl Drop for ScreenGuard<'_> {
    fn drop(&mut self) {
        let _ = self.screen.close();
    }
}
