//! In-memory destination buffer for one query cycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use core_hub::{CancelToken, Latch};
use core_line::Line;

use crate::{BufferError, LineBuffer, LineEvent, LineProducer};

/// How often a blocked accept re-checks its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Accumulates the lines of one pipeline run. The buffer outlives the run:
/// the last completed one stays installed as the current view until a later
/// query replaces it, and it doubles as the replay source for incremental
/// refinement.
pub struct MemoryBuffer {
    lines: Mutex<Vec<Arc<Line>>>,
    done: Latch,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            done: Latch::new(),
        }
    }

    /// Fires when the producing channel delivered its end-mark or the run
    /// was cancelled.
    pub fn done(&self) -> &Latch {
        &self.done
    }

    /// Consume `rx` until the end-mark, cancellation, or a disconnected
    /// producer. Appends under this buffer's own lock; the lock is never
    /// held across a channel operation.
    pub fn accept(&self, token: &CancelToken, rx: &Receiver<LineEvent>) {
        loop {
            match rx.recv_timeout(CANCEL_POLL) {
                Ok(LineEvent::Line(line)) => {
                    self.lines.lock().expect("buffer lines poisoned").push(line);
                }
                Ok(LineEvent::EndMark) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if token.is_cancelled() {
                        break;
                    }
                }
            }
        }
        self.done.fire();
    }

    pub fn snapshot(&self) -> Vec<Arc<Line>> {
        self.lines.lock().expect("buffer lines poisoned").clone()
    }

    #[cfg(test)]
    pub(crate) fn push(&self, line: Arc<Line>) {
        self.lines.lock().expect("buffer lines poisoned").push(line);
    }
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer for MemoryBuffer {
    fn line_at(&self, index: usize) -> Result<Arc<Line>, BufferError> {
        let lines = self.lines.lock().expect("buffer lines poisoned");
        lines.get(index).cloned().ok_or(BufferError::OutOfRange {
            index,
            len: lines.len(),
        })
    }

    fn size(&self) -> usize {
        self.lines.lock().expect("buffer lines poisoned").len()
    }
}

impl LineProducer for MemoryBuffer {
    /// Replay a snapshot of the accumulated lines, then the end-mark. Used
    /// when a refined query filters the previous result set instead of the
    /// full source.
    fn produce(&self, token: &CancelToken, out: &Sender<LineEvent>) {
        for line in self.snapshot() {
            if token.is_cancelled() || out.send(LineEvent::Line(line)).is_err() {
                return;
            }
        }
        let _ = out.send(LineEvent::EndMark);
    }
}
