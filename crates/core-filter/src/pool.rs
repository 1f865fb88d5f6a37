//! Shared free-list for batch buffers.

use std::sync::{Arc, Mutex};

use core_line::Line;

/// Recycles the line vectors the stage flushes through its workers, so a
/// busy typing session does not reallocate a batch per flush. Released
/// buffers are cleared before they are handed out again.
pub struct BufferPool {
    free: Mutex<Vec<Vec<Arc<Line>>>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn get(&self) -> Vec<Arc<Line>> {
        self.free
            .lock()
            .expect("buffer pool poisoned")
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.capacity))
    }

    pub fn put(&self, mut buf: Vec<Arc<Line>>) {
        buf.clear();
        self.free.lock().expect("buffer pool poisoned").push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_recycled_empty() {
        let pool = BufferPool::new(8);
        let mut buf = pool.get();
        buf.push(Arc::new(Line::new(1, "x", false, false)));
        pool.put(buf);
        let again = pool.get();
        assert!(again.is_empty());
        assert!(again.capacity() >= 1);
    }

    #[test]
    fn fresh_buffers_use_the_configured_capacity() {
        let pool = BufferPool::new(32);
        assert!(pool.get().capacity() >= 32);
    }
}
