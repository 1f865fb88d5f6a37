//! Crossterm-backed screen.

use std::io::{self, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, unbounded};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{self, KeyEventKind};
use crossterm::style::PrintStyledContent;
use crossterm::terminal::{
    Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode,
    enable_raw_mode,
};
use crossterm::{execute, queue};
use tracing::warn;
use unicode_width::UnicodeWidthStr;

use core_hub::CancelToken;

use crate::event::{Event, Key, KeyCode, Mods};
use crate::{CellStyle, Screen};

/// Poll granularity of the input thread; bounds shutdown latency.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct CrosstermScreen {
    out: Mutex<io::Stdout>,
    entered: AtomicBool,
    poll_started: AtomicBool,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    token: CancelToken,
}

impl CrosstermScreen {
    pub fn new(token: CancelToken) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            out: Mutex::new(io::stdout()),
            entered: AtomicBool::new(false),
            poll_started: AtomicBool::new(false),
            events_tx,
            events_rx,
            token,
        }
    }
}

impl Screen for CrosstermScreen {
    fn init(&self) -> Result<()> {
        if !self.entered.swap(true, Ordering::SeqCst) {
            enable_raw_mode()?;
            let mut out = self.out.lock().expect("screen stdout poisoned");
            execute!(out, EnterAlternateScreen, Hide)?;
        }
        if !self.poll_started.swap(true, Ordering::SeqCst) {
            let tx = self.events_tx.clone();
            let token = self.token.clone();
            thread::spawn(move || poll_loop(tx, token));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.entered.swap(false, Ordering::SeqCst) {
            let mut out = self.out.lock().expect("screen stdout poisoned");
            execute!(out, LeaveAlternateScreen, Show)?;
            disable_raw_mode()?;
        }
        Ok(())
    }

    fn size(&self) -> (u16, u16) {
        crossterm::terminal::size().unwrap_or((80, 24))
    }

    fn print(&self, x: u16, y: u16, text: &str, style: &CellStyle) -> usize {
        let mut out = self.out.lock().expect("screen stdout poisoned");
        if let Err(err) = queue!(
            out,
            MoveTo(x, y),
            PrintStyledContent(style.content_style().apply(text))
        ) {
            warn!(target: "screen", error = %err, "print_failed");
        }
        UnicodeWidthStr::width(text)
    }

    fn set_cell(&self, x: u16, y: u16, ch: char, style: &CellStyle) {
        let mut tmp = [0u8; 4];
        self.print(x, y, ch.encode_utf8(&mut tmp), style);
    }

    fn flush(&self) -> Result<()> {
        self.out
            .lock()
            .expect("screen stdout poisoned")
            .flush()
            .map_err(Into::into)
    }

    fn sync(&self) -> Result<()> {
        {
            let mut out = self.out.lock().expect("screen stdout poisoned");
            queue!(out, Clear(ClearType::All))?;
        }
        self.flush()
    }

    fn show_cursor(&self, x: u16, y: u16) {
        let mut out = self.out.lock().expect("screen stdout poisoned");
        if let Err(err) = queue!(out, MoveTo(x, y), Show) {
            warn!(target: "screen", error = %err, "show_cursor_failed");
        }
    }

    fn events(&self) -> Receiver<Event> {
        self.events_rx.clone()
    }

    fn send_event(&self, event: Event) {
        let _ = self.events_tx.send(event);
    }
}

impl Drop for CrosstermScreen {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn poll_loop(tx: Sender<Event>, token: CancelToken) {
    loop {
        if token.is_cancelled() {
            return;
        }
        match event::poll(POLL_INTERVAL) {
            Ok(false) => {}
            Ok(true) => match event::read() {
                Ok(event::Event::Key(key)) if key.kind != KeyEventKind::Release => {
                    if let Some(key) = map_key(key) {
                        if tx.send(Event::Key(key)).is_err() {
                            return;
                        }
                    }
                }
                Ok(event::Event::Resize(w, h)) => {
                    if tx.send(Event::Resize(w, h)).is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    let _ = tx.send(Event::Error(err.to_string()));
                    return;
                }
            },
            Err(err) => {
                let _ = tx.send(Event::Error(err.to_string()));
                return;
            }
        }
    }
}

fn map_key(key: event::KeyEvent) -> Option<Key> {
    let code = match key.code {
        event::KeyCode::Char(ch) => KeyCode::Char(ch),
        event::KeyCode::Enter => KeyCode::Enter,
        event::KeyCode::Esc => KeyCode::Esc,
        event::KeyCode::Backspace => KeyCode::Backspace,
        event::KeyCode::Tab => KeyCode::Tab,
        event::KeyCode::BackTab => KeyCode::Tab,
        event::KeyCode::Up => KeyCode::Up,
        event::KeyCode::Down => KeyCode::Down,
        event::KeyCode::Left => KeyCode::Left,
        event::KeyCode::Right => KeyCode::Right,
        event::KeyCode::Home => KeyCode::Home,
        event::KeyCode::End => KeyCode::End,
        event::KeyCode::PageUp => KeyCode::PageUp,
        event::KeyCode::PageDown => KeyCode::PageDown,
        event::KeyCode::Delete => KeyCode::Delete,
        event::KeyCode::Insert => KeyCode::Insert,
        event::KeyCode::F(n) => KeyCode::F(n),
        _ => return None,
    };
    let mut mods = Mods::empty();
    if key.modifiers.contains(event::KeyModifiers::CONTROL) {
        mods |= Mods::CTRL;
    }
    if key.modifiers.contains(event::KeyModifiers::ALT) {
        mods |= Mods::ALT;
    }
    if key.modifiers.contains(event::KeyModifiers::SHIFT) {
        mods |= Mods::SHIFT;
    }
    Some(Key::new(code, mods))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_plain_and_chorded_keys() {
        let plain = event::KeyEvent::new(event::KeyCode::Char('a'), event::KeyModifiers::NONE);
        assert_eq!(map_key(plain), Some(Key::plain(KeyCode::Char('a'))));

        let chord = event::KeyEvent::new(event::KeyCode::Char('c'), event::KeyModifiers::CONTROL);
        assert_eq!(map_key(chord), Some(Key::ctrl('c')));

        let media = event::KeyEvent::new(
            event::KeyCode::CapsLock,
            event::KeyModifiers::NONE,
        );
        assert_eq!(map_key(media), None);
    }
}
