//! Signal handling: SIGINT / SIGTERM end the session through the normal
//! exit path so the terminal is restored and timers are stopped.

use std::sync::Arc;
use std::thread;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{info, warn};

use crate::app::App;
use crate::error::AppError;

pub fn spawn(app: &Arc<App>) {
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            warn!(target: "sig", error = %err, "signal_handler_unavailable");
            return;
        }
    };
    let app = Arc::clone(app);
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(target: "sig", signal = sig, "signal_received");
            app.exit(Some(AppError::SignalReceived(sig)));
        }
    });
}
