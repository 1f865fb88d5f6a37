//! The filter loop: one pipeline per query payload, with supersession.
//!
//! Each payload derives a child cancel token, cancels the previous run, and
//! spawns the work: build a pipeline from either the full source or the
//! previous result buffer (prefix refinement under an unchanged matcher),
//! install the new destination as the current view at pipeline start, drive
//! a redraw every 50 ms while the run is live, and on uncancelled
//! completion update the refinement memo and send the final draw.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, trace};

use core_filter::{FilterStage, Pipeline};
use core_hub::{CancelToken, DrawOptions, StatusRequest};
use core_source::{LineBuffer, MemoryBuffer};

use crate::app::App;

/// Poll granularity for observing cancellation while idle.
const IDLE_POLL: Duration = Duration::from_millis(100);
/// Redraw cadence while a pipeline is running.
const RUNNING_DRAW_INTERVAL: Duration = Duration::from_millis(50);
/// How long a matcher error stays on the status line.
const ERROR_STATUS_TTL: Duration = Duration::from_secs(2);

pub fn run(app: &Arc<App>, token: &CancelToken) {
    let query_rx = app.hub.query_rx();
    loop {
        if token.is_cancelled() {
            return;
        }
        match query_rx.recv_timeout(IDLE_POLL) {
            Ok(payload) => {
                let query = payload.data().clone();
                payload.done();
                supersede(app, token, query);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Cancel the previous work context, store the new one, and spawn the run.
fn supersede(app: &Arc<App>, token: &CancelToken, query: String) {
    let work = token.child();
    {
        let mut slot = app.work_cancel.lock().expect("work cancel poisoned");
        if let Some(previous) = slot.replace(work.clone()) {
            previous.cancel();
        }
    }
    let _ = app
        .hub
        .send_status(token, StatusRequest::message("Running query..."));

    let app = Arc::clone(app);
    thread::spawn(move || work_run(&app, &work, &query));
}

fn work_run(app: &Arc<App>, work: &CancelToken, query: &str) {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        app.reset_view_to_source();
        let _ = app.hub.send_status(work, StatusRequest::clear());
        let _ = app.hub.send_draw(work, DrawOptions::default());
        return;
    }

    let matcher = app.matchers.current();
    let compiled = match matcher.query(trimmed) {
        Ok(compiled) => compiled,
        Err(err) => {
            trace!(target: "filter", error = %err, "bad_query");
            let _ = app.hub.send_status(
                work,
                StatusRequest::transient(err.to_string(), ERROR_STATUS_TTL),
            );
            return;
        }
    };

    let (producer, incremental) = app.select_source(trimmed, matcher.name());
    debug!(target: "filter", query = trimmed, matcher = matcher.name(), incremental, "run");

    let destination = Arc::new(MemoryBuffer::new());
    let stage = FilterStage::new(
        matcher.as_ref(),
        compiled,
        0,
        Arc::clone(&app.pool),
    );
    let pipeline = Arc::new(Pipeline::new(
        producer,
        stage,
        Arc::clone(&destination),
        work.clone(),
    ));

    // The new destination becomes the view immediately; the superseded one
    // stays readable by whoever still holds it.
    app.model
        .install_buffer(Arc::clone(&destination) as Arc<dyn LineBuffer>);

    let runner = {
        let pipeline = Arc::clone(&pipeline);
        thread::spawn(move || pipeline.run())
    };
    while !pipeline.done().wait_timeout(RUNNING_DRAW_INTERVAL) {
        if work.is_cancelled() {
            break;
        }
        app.hub.post_draw(DrawOptions::running());
    }
    let _ = runner.join();

    if !work.is_cancelled() {
        app.update_memo(trimmed, matcher.name(), destination);
        let _ = app.hub.send_status(work, StatusRequest::clear());
        let _ = app.hub.send_draw(work, DrawOptions::default());
    }
}
