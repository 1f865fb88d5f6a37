//! The input loop: terminal events → keymap resolution → state mutation.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tracing::trace;

use core_hub::{CancelToken, PagingRequest};
use core_keymap::{Action, Lookup};
use core_terminal::{Event, Key};

use crate::app::App;
use crate::error::AppError;

/// Poll granularity for observing cancellation while idle.
const IDLE_POLL: Duration = Duration::from_millis(100);

pub fn run(app: &Arc<App>, token: &CancelToken) {
    let events = app.screen.events();
    let mut pending: Vec<Key> = Vec::new();
    loop {
        if token.is_cancelled() {
            return;
        }
        match events.recv_timeout(IDLE_POLL) {
            Ok(Event::Key(key)) => handle_key(app, &mut pending, key),
            Ok(Event::Resize(w, h)) => {
                trace!(target: "input", w, h, "resize");
                let _ = app.screen.sync();
                app.redraw();
            }
            Ok(Event::Error(err)) => {
                app.exit(Some(AppError::Screen(err)));
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn handle_key(app: &Arc<App>, pending: &mut Vec<Key>, key: Key) {
    // An armed jump consumes exactly one key.
    if app.model.jump_armed() {
        app.model.set_jump_armed(false);
        if let Some(row) = key.as_rune().and_then(|ch| app.jump.row(ch)) {
            let _ = app
                .hub
                .send_paging(app.token(), PagingRequest::JumpTo(row));
        } else {
            app.redraw();
        }
        return;
    }

    pending.push(key);
    match app.keymap.lookup(pending) {
        Lookup::Pending => {}
        Lookup::Matched(action) => {
            pending.clear();
            trace!(target: "input", ?action, "dispatch");
            dispatch(app, action);
        }
        Lookup::Unmapped => {
            let keys = mem::take(pending);
            // A lone printable key types into the query; anything else is
            // dropped along with whatever prefix it broke.
            if let [key] = keys.as_slice() {
                if let Some(ch) = key.as_rune() {
                    app.model.query().insert_char(ch);
                    app.query_exec.exec_query(app, None);
                    app.redraw_prompt();
                }
            }
        }
    }
}

fn dispatch(app: &Arc<App>, action: Action) {
    match action {
        Action::Noop => {}
        Action::Finish => app.exit(None),
        Action::Cancel => app.exit(Some(AppError::UserCancelled {
            error_status: app.options.cancel_is_error,
        })),
        Action::RefreshScreen => {
            let _ = app.screen.sync();
            app.redraw();
        }

        Action::SelectUp => paging(app, PagingRequest::Up),
        Action::SelectDown => paging(app, PagingRequest::Down),
        Action::ScrollPageUp => paging(app, PagingRequest::PageUp),
        Action::ScrollPageDown => paging(app, PagingRequest::PageDown),
        Action::ScrollFirst => paging(app, PagingRequest::First),
        Action::ScrollLast => paging(app, PagingRequest::Last),

        Action::ToggleSelection => {
            toggle_current(app);
            app.redraw();
        }
        Action::ToggleSelectionAndSelectNext => {
            toggle_current(app);
            paging(app, PagingRequest::Down);
        }
        Action::ToggleRangeMode => {
            let armed = app.model.range_start().is_valid();
            if armed {
                app.model.range_start().reset();
            } else {
                let cursor = app.model.location().cursor();
                app.model.range_start().set(cursor);
                // The anchored line itself belongs to the range.
                toggle_current(app);
            }
            app.redraw();
        }

        Action::RotateMatcher => {
            let matcher = app.matchers.rotate();
            app.model.set_matcher_name(matcher.name());
            app.query_exec.exec_query(app, None);
            app.redraw();
        }
        Action::ToggleSingleKeyJump => {
            app.model.set_jump_armed(true);
            app.redraw();
        }

        Action::BeginningOfLine => caret(app, |app| app.model.query().move_home()),
        Action::EndOfLine => caret(app, |app| app.model.query().move_end()),
        Action::ForwardChar => caret(app, |app| app.model.query().move_right()),
        Action::BackwardChar => caret(app, |app| app.model.query().move_left()),

        Action::DeleteBackwardChar => edit(app, |app| app.model.query().delete_backward()),
        Action::DeleteForwardChar => edit(app, |app| app.model.query().delete_forward()),
        Action::DeleteBackwardWord => edit(app, |app| app.model.query().delete_backward_word()),
        Action::KillBeginningOfLine => edit(app, |app| app.model.query().kill_to_start()),
        Action::KillEndOfLine => edit(app, |app| app.model.query().kill_to_end()),
        Action::DeleteAll => edit(app, |app| {
            let mut query = app.model.query();
            let had_text = !query.is_empty();
            query.clear();
            had_text
        }),
    }
}

fn paging(app: &Arc<App>, request: PagingRequest) {
    let _ = app.hub.send_paging(app.token(), request);
}

fn toggle_current(app: &Arc<App>) {
    if let Some(line) = app.model.line_under_cursor() {
        app.model.selection().toggle(line);
    }
}

/// Caret-only movement: redraw just the prompt.
fn caret(app: &Arc<App>, op: impl FnOnce(&Arc<App>) -> bool) {
    if op(app) {
        app.redraw_prompt();
    }
}

/// Query-content edit: re-run the filter when anything changed.
fn edit(app: &Arc<App>, op: impl FnOnce(&Arc<App>) -> bool) {
    if op(app) {
        app.query_exec.exec_query(app, None);
        app.redraw_prompt();
    }
}
