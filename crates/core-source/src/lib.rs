//! Streaming input buffer and the pipeline line protocol.
//!
//! [`Source`] reads lines lazily from a possibly infinite reader, appends
//! them under a writer lock, and can be replayed from the beginning for each
//! query via [`LineProducer::produce`]. Two one-shot latches expose its
//! lifecycle: `ready` fires on the first appended line, `setup_done` when the
//! reader is exhausted. `ready` fires before `setup_done`; both at most once.
//!
//! The pipeline protocol is [`LineEvent`]: a stream of `Line` events closed
//! by a single `EndMark`. End-of-stream is distinct from cancellation, which
//! travels out-of-band through a [`CancelToken`].
//!
//! Lock discipline: locks are never held across a channel operation. Replay
//! snapshots a range under the read lock, drops the lock, then sends.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select};
use thiserror::Error;
use tracing::{debug, trace};

use core_hub::{CancelToken, DrawOptions, Hub, Latch, StatusRequest};
use core_line::{IdGen, Line};

mod memory;
pub use memory::MemoryBuffer;

/// Redraw tick emitted while the scanner is still ingesting.
const SCAN_DRAW_INTERVAL: Duration = Duration::from_millis(100);
/// Replay back-off when the scanner has not produced new lines yet.
const REPLAY_IDLE: Duration = Duration::from_millis(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("line {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("no input to filter")]
    NoInput,
    #[error("cancelled while waiting for input")]
    Cancelled,
}

/// One element of a pipeline channel.
#[derive(Debug, Clone)]
pub enum LineEvent {
    Line(Arc<Line>),
    /// No more data will follow. Distinct from cancellation.
    EndMark,
}

impl LineEvent {
    pub fn is_end_mark(&self) -> bool {
        matches!(self, LineEvent::EndMark)
    }
}

/// Random access over an ordered line store. Implemented by [`Source`] and
/// [`MemoryBuffer`]; the view renders whichever one is currently installed.
pub trait LineBuffer: Send + Sync {
    fn line_at(&self, index: usize) -> Result<Arc<Line>, BufferError>;
    fn size(&self) -> usize;
}

/// A producer feeds one pipeline run: every current line, then the end-mark.
pub trait LineProducer: Send + Sync {
    fn produce(&self, token: &CancelToken, out: &Sender<LineEvent>);
}

pub struct Source {
    name: String,
    reader: Mutex<Option<Box<dyn BufRead + Send>>>,
    is_infinite: bool,
    idgen: Arc<IdGen>,
    capacity: usize,
    enable_sep: bool,
    enable_ansi: bool,
    lines: RwLock<Vec<Arc<Line>>>,
    ready: Latch,
    setup_done: Latch,
    setup_started: AtomicBool,
}

impl Source {
    /// Construct without reading. `capacity` of zero means unbounded.
    pub fn new(
        name: impl Into<String>,
        reader: Box<dyn BufRead + Send>,
        is_infinite: bool,
        idgen: Arc<IdGen>,
        capacity: usize,
        enable_sep: bool,
        enable_ansi: bool,
    ) -> Self {
        Self {
            name: name.into(),
            reader: Mutex::new(Some(reader)),
            is_infinite,
            idgen,
            capacity,
            enable_sep,
            enable_ansi,
            lines: RwLock::new(Vec::new()),
            ready: Latch::new(),
            setup_done: Latch::new(),
            setup_started: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for tty-like readers whose EOF will not arrive promptly.
    pub fn is_infinite(&self) -> bool {
        self.is_infinite
    }

    pub fn ready(&self) -> &Latch {
        &self.ready
    }

    pub fn setup_done(&self) -> &Latch {
        &self.setup_done
    }

    /// Begin reading. Idempotent; only the first call does anything.
    ///
    /// Spawns a scanner thread pushing decoded lines through a rendezvous
    /// channel and an ingest thread that assigns ids, appends under the
    /// writer lock, fires `ready` on the first append, and requests a redraw
    /// every 100 ms while scanning. When the scan ends it fires `setup_done`
    /// and sends a status clear. Scanner read errors end the scan silently.
    pub fn setup(self: &Arc<Self>, token: &CancelToken, hub: &Arc<Hub>) {
        if self.setup_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(reader) = self.reader.lock().expect("source reader poisoned").take() else {
            self.setup_done.fire();
            return;
        };

        let (scan_tx, scan_rx) = crossbeam_channel::bounded::<String>(0);
        let scan_token = token.clone();
        let name = self.name.clone();
        thread::spawn(move || {
            scan(reader, scan_tx, scan_token, &name);
            // The reader is dropped (and thereby closed) when the scan ends.
        });

        let this = Arc::clone(self);
        let token = token.clone();
        let hub = Arc::clone(hub);
        thread::spawn(move || {
            let tick = crossbeam_channel::tick(SCAN_DRAW_INTERVAL);
            loop {
                select! {
                    recv(scan_rx) -> msg => match msg {
                        Ok(raw) => {
                            let line = Arc::new(Line::new(
                                this.idgen.next_id(),
                                &raw,
                                this.enable_sep,
                                this.enable_ansi,
                            ));
                            this.append(line);
                            if this.ready.fire() {
                                debug!(target: "source", name = %this.name, "ready");
                            }
                        }
                        Err(_) => break,
                    },
                    recv(tick) -> _ => {
                        if token.is_cancelled() {
                            break;
                        }
                        hub.post_draw(DrawOptions::default());
                    }
                }
            }
            this.setup_done.fire();
            let _ = hub.send_status(&token, StatusRequest::clear());
            debug!(target: "source", name = %this.name, lines = this.size(), "setup_done");
        });
    }

    /// Append one line under the writer lock. On overflow the oldest
    /// `len - capacity` lines are discarded into a freshly allocated vector
    /// so evicted lines do not keep the old backing storage alive.
    pub fn append(&self, line: Arc<Line>) {
        let mut lines = self.lines.write().expect("source lines poisoned");
        lines.push(line);
        if self.capacity > 0 && lines.len() > self.capacity {
            let diff = lines.len() - self.capacity;
            let mut fresh = Vec::with_capacity(self.capacity);
            fresh.extend(lines[diff..].iter().cloned());
            *lines = fresh;
        }
    }

    /// Block until the first line is available. Fails with `NoInput` when
    /// the reader closed without producing anything, or `Cancelled` when the
    /// session ends first (a signal can arrive while a silent tty is still
    /// open).
    pub fn wait_ready(&self, token: &CancelToken) -> Result<(), SourceError> {
        loop {
            if self.ready.is_fired() {
                return Ok(());
            }
            if self.setup_done.is_fired() {
                if self.size() == 0 {
                    return Err(SourceError::NoInput);
                }
                return Ok(());
            }
            if token.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            thread::sleep(REPLAY_IDLE);
        }
    }

    fn snapshot_from(&self, start: usize) -> (Vec<Arc<Line>>, usize) {
        let lines = self.lines.read().expect("source lines poisoned");
        let start = start.min(lines.len());
        (lines[start..].to_vec(), lines.len())
    }
}

impl LineBuffer for Source {
    fn line_at(&self, index: usize) -> Result<Arc<Line>, BufferError> {
        let lines = self.lines.read().expect("source lines poisoned");
        lines
            .get(index)
            .cloned()
            .ok_or(BufferError::OutOfRange {
                index,
                len: lines.len(),
            })
    }

    fn size(&self) -> usize {
        self.lines.read().expect("source lines poisoned").len()
    }
}

impl LineProducer for Source {
    /// Replay current contents into `out`, then send the end-mark.
    ///
    /// When the scan already finished this is a single linear replay.
    /// Otherwise the replay chases the scanner: send `[prev, size())`,
    /// publish the new cursor, back off 1 ms when no new data arrived, and
    /// exit once `setup_done` has fired with nothing left to send.
    fn produce(&self, token: &CancelToken, out: &Sender<LineEvent>) {
        if self.setup_done.is_fired() {
            let (snapshot, _) = self.snapshot_from(0);
            for line in snapshot {
                if token.is_cancelled() || out.send(LineEvent::Line(line)).is_err() {
                    return;
                }
            }
        } else {
            let mut prev = 0usize;
            loop {
                if token.is_cancelled() {
                    return;
                }
                let (chunk, len) = self.snapshot_from(prev);
                if chunk.is_empty() {
                    // Capacity eviction may shrink the store below our
                    // cursor; clamp so the exit condition stays reachable.
                    prev = prev.min(len);
                    if self.setup_done.is_fired() && self.size() == prev {
                        break;
                    }
                    thread::sleep(REPLAY_IDLE);
                    continue;
                }
                prev = len;
                for line in chunk {
                    if token.is_cancelled() || out.send(LineEvent::Line(line)).is_err() {
                        return;
                    }
                }
            }
        }
        let _ = out.send(LineEvent::EndMark);
    }
}

fn scan(
    mut reader: Box<dyn BufRead + Send>,
    tx: Sender<String>,
    token: CancelToken,
    name: &str,
) {
    let mut buf = String::new();
    loop {
        if token.is_cancelled() {
            return;
        }
        buf.clear();
        match reader.read_line(&mut buf) {
            Ok(0) => return,
            Ok(_) => {
                if buf.ends_with('\n') {
                    buf.pop();
                    if buf.ends_with('\r') {
                        buf.pop();
                    }
                }
                if tx.send(buf.clone()).is_err() {
                    return;
                }
            }
            Err(err) => {
                // Read errors are best-effort: log and end the scan.
                trace!(target: "source", name = %name, error = %err, "scan_error");
                return;
            }
        }
    }
}

/// Drain a pipeline channel until its end-mark, collecting the lines.
pub fn collect_events(rx: &Receiver<LineEvent>) -> Vec<Arc<Line>> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.recv() {
        match ev {
            LineEvent::Line(line) => out.push(line),
            LineEvent::EndMark => break,
        }
    }
    out
}
