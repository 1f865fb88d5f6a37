//! Debounces keystroke bursts into hub query sends.
//!
//! While a timer is pending further calls coalesce into no-ops; the timer
//! reads the query at fire time, so the send carries whatever the burst
//! settled on. Infinite sources skip the debounce entirely: their filter
//! runs are already incremental against a still-growing buffer.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select};
use tracing::trace;

use crate::app::App;

/// Follow-up scheduled after an immediate send on an infinite source.
const NEXT_FN_DELAY: Duration = Duration::from_secs(1);

pub type NextFn = Box<dyn FnOnce(&App) + Send>;

pub struct QueryExec {
    delay: Duration,
    timer: Mutex<Option<Sender<()>>>,
}

impl QueryExec {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timer: Mutex::new(None),
        }
    }

    /// Route the current query to the hub. Returns false only when the
    /// source has produced nothing yet.
    pub fn exec_query(&self, app: &Arc<App>, next: Option<NextFn>) -> bool {
        if !app.source.ready().is_fired() {
            trace!(target: "query", "exec_before_ready");
            return false;
        }

        let query = app.model.query().as_str().to_owned();
        if query.trim().is_empty() {
            app.reset_view_to_source();
            app.hub.batch(|hub| {
                let _ = hub.send_draw(app.token(), core_hub::DrawOptions::default());
            });
            if let Some(next) = next {
                next(app);
            }
            return true;
        }

        if app.source.is_infinite() {
            let _ = app.hub.send_query(app.token(), query);
            if let Some(next) = next {
                let app = Arc::clone(app);
                thread::spawn(move || {
                    thread::sleep(NEXT_FN_DELAY);
                    if !app.token().is_cancelled() {
                        next(&app);
                    }
                });
            }
            return true;
        }

        if self.delay.is_zero() {
            app.hub.batch(|hub| {
                let _ = hub.send_query(app.token(), query);
            });
            if let Some(next) = next {
                next(app);
            }
            return true;
        }

        let mut pending = self.timer.lock().expect("query timer poisoned");
        if pending.is_some() {
            // Coalesce: the armed timer will pick up the latest query.
            return true;
        }
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        *pending = Some(cancel_tx);
        drop(pending);

        let delay = self.delay;
        let app = Arc::clone(app);
        thread::spawn(move || {
            select! {
                recv(crossbeam_channel::after(delay)) -> _ => {
                    app.query_exec.clear_timer();
                    if app.token().is_cancelled() {
                        return;
                    }
                    let query = app.model.query().as_str().to_owned();
                    if query.trim().is_empty() {
                        app.reset_view_to_source();
                        let _ = app.hub.send_draw(app.token(), core_hub::DrawOptions::default());
                    } else {
                        let _ = app.hub.send_query(app.token(), query);
                    }
                    if let Some(next) = next {
                        next(&app);
                    }
                }
                recv(cancel_rx) -> _ => {
                    // Cancelled (or the exec state was torn down).
                }
            }
        });
        true
    }

    fn clear_timer(&self) {
        self.timer.lock().expect("query timer poisoned").take();
    }

    /// Cancel a pending debounce timer; called on shutdown so no send
    /// fires after teardown.
    pub fn stop_timer(&self) {
        if let Some(cancel) = self.timer.lock().expect("query timer poisoned").take() {
            let _ = cancel.send(());
        }
    }
}
