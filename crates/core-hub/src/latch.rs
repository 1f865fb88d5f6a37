//! One-shot signals (`ready`, `setup_done`, buffer completion).

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A latch fires at most once and stays fired. Waiters are released on the
/// first `fire`; later calls are no-ops.
#[derive(Debug)]
pub struct Latch {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            fired: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Fire the latch. Returns true only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        let mut fired = self.fired.lock().expect("latch poisoned");
        if *fired {
            return false;
        }
        *fired = true;
        self.cond.notify_all();
        true
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.lock().expect("latch poisoned")
    }

    /// Block until the latch fires.
    pub fn wait(&self) {
        let mut fired = self.fired.lock().expect("latch poisoned");
        while !*fired {
            fired = self.cond.wait(fired).expect("latch poisoned");
        }
    }

    /// Block until the latch fires or `timeout` elapses. Returns whether the
    /// latch has fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let fired = self.fired.lock().expect("latch poisoned");
        if *fired {
            return true;
        }
        let (fired, _res) = self
            .cond
            .wait_timeout_while(fired, timeout, |fired| !*fired)
            .expect("latch poisoned");
        *fired
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}
