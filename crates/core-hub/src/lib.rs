//! Bounded, typed message channels connecting the Input, Filter, View and
//! Signal loops.
//!
//! The hub owns four channels (query, draw, status, paging), each carrying a
//! typed payload; there are no dynamic payloads and no runtime type switches.
//! Sends respect the caller's [`CancelToken`] so a loop blocked on a full
//! channel still observes shutdown.
//!
//! Batch mode: inside [`Hub::batch`] every send attaches a reply channel and
//! blocks until the receiver acknowledges with [`Payload::done`]. Batch
//! regions are serialised under a hub-wide mutex and the synchronous flag is
//! restored on exit. Outside a batch, sends are fire-and-forget and the
//! payload carries no reply channel.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use thiserror::Error;
use tracing::trace;

pub mod cancel;
pub mod latch;

pub use cancel::CancelToken;
pub use latch::Latch;

/// Default bound for every hub channel.
pub const DEFAULT_CAPACITY: usize = 5;

/// How often a blocked send or reply wait re-checks its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("hub send cancelled")]
    Cancelled,
    #[error("hub channel closed")]
    Closed,
}

/// One element of a hub channel. Receivers read `data` and must call
/// [`Payload::done`] when a reply channel is attached; dropping the payload
/// unblocks the sender as well, so a crashing receiver cannot wedge a batch.
#[derive(Debug)]
pub struct Payload<T> {
    data: T,
    reply: Option<Sender<()>>,
}

impl<T> Payload<T> {
    fn fire_and_forget(data: T) -> Self {
        Self { data, reply: None }
    }

    fn with_reply(data: T) -> (Self, Receiver<()>) {
        let (tx, rx) = bounded(1);
        (
            Self {
                data,
                reply: Some(tx),
            },
            rx,
        )
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    /// Acknowledge a synchronous send. No-op for fire-and-forget payloads.
    pub fn done(&self) {
        if let Some(reply) = &self.reply {
            let _ = reply.send(());
        }
    }
}

/// Options attached to a draw request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawOptions {
    /// A query is still being filtered; the view shows its running marker.
    pub running_query: bool,
    /// Redraw only the prompt line.
    pub prompt_only: bool,
}

impl DrawOptions {
    pub fn running() -> Self {
        Self {
            running_query: true,
            ..Self::default()
        }
    }

    pub fn prompt_only() -> Self {
        Self {
            prompt_only: true,
            ..Self::default()
        }
    }
}

/// A status-line update. An empty message clears the line; `clear_after`
/// schedules an automatic clear once the delay elapses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusRequest {
    pub message: String,
    pub clear_after: Option<Duration>,
}

impl StatusRequest {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            clear_after: None,
        }
    }

    pub fn transient(message: impl Into<String>, clear_after: Duration) -> Self {
        Self {
            message: message.into(),
            clear_after: Some(clear_after),
        }
    }

    pub fn clear() -> Self {
        Self::default()
    }
}

/// Cursor and page movement requests, routed from the input loop to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingRequest {
    Up,
    Down,
    PageUp,
    PageDown,
    First,
    Last,
    /// Move the cursor to the n-th visible row (single-key jump).
    JumpTo(usize),
}

pub struct Hub {
    batch_mu: Mutex<()>,
    is_sync: AtomicBool,
    query_tx: Sender<Payload<String>>,
    query_rx: Receiver<Payload<String>>,
    draw_tx: Sender<Payload<DrawOptions>>,
    draw_rx: Receiver<Payload<DrawOptions>>,
    status_tx: Sender<Payload<StatusRequest>>,
    status_rx: Receiver<Payload<StatusRequest>>,
    paging_tx: Sender<Payload<PagingRequest>>,
    paging_rx: Receiver<Payload<PagingRequest>>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (query_tx, query_rx) = bounded(capacity);
        let (draw_tx, draw_rx) = bounded(capacity);
        let (status_tx, status_rx) = bounded(capacity);
        let (paging_tx, paging_rx) = bounded(capacity);
        Self {
            batch_mu: Mutex::new(()),
            is_sync: AtomicBool::new(false),
            query_tx,
            query_rx,
            draw_tx,
            draw_rx,
            status_tx,
            status_rx,
            paging_tx,
            paging_rx,
        }
    }

    pub fn send_query(&self, token: &CancelToken, query: String) -> Result<(), HubError> {
        trace!(target: "hub", query = %query, "send_query");
        self.dispatch(token, &self.query_tx, query)
    }

    pub fn send_draw(&self, token: &CancelToken, opts: DrawOptions) -> Result<(), HubError> {
        self.dispatch(token, &self.draw_tx, opts)
    }

    /// Best-effort draw request used by periodic tickers. A full channel
    /// means a redraw is already pending, so the frame is dropped rather
    /// than blocking the ticker. Returns whether the request was enqueued.
    pub fn post_draw(&self, opts: DrawOptions) -> bool {
        self.draw_tx
            .try_send(Payload::fire_and_forget(opts))
            .is_ok()
    }

    pub fn send_status(&self, token: &CancelToken, req: StatusRequest) -> Result<(), HubError> {
        self.dispatch(token, &self.status_tx, req)
    }

    pub fn send_paging(&self, token: &CancelToken, req: PagingRequest) -> Result<(), HubError> {
        self.dispatch(token, &self.paging_tx, req)
    }

    pub fn query_rx(&self) -> Receiver<Payload<String>> {
        self.query_rx.clone()
    }

    pub fn draw_rx(&self) -> Receiver<Payload<DrawOptions>> {
        self.draw_rx.clone()
    }

    pub fn status_rx(&self) -> Receiver<Payload<StatusRequest>> {
        self.status_rx.clone()
    }

    pub fn paging_rx(&self) -> Receiver<Payload<PagingRequest>> {
        self.paging_rx.clone()
    }

    /// Run `f` as a batch region: serialised against other batches, with
    /// every send inside `f` waiting for its receiver's acknowledgement.
    /// The previous synchronous flag is restored when `f` returns.
    pub fn batch<F: FnOnce(&Hub)>(&self, f: F) {
        let _guard = self.batch_mu.lock().expect("hub batch mutex poisoned");
        let prev = self.is_sync.swap(true, Ordering::SeqCst);
        f(self);
        self.is_sync.store(prev, Ordering::SeqCst);
    }

    fn dispatch<T>(
        &self,
        token: &CancelToken,
        tx: &Sender<Payload<T>>,
        data: T,
    ) -> Result<(), HubError> {
        if self.is_sync.load(Ordering::SeqCst) {
            let (payload, reply_rx) = Payload::with_reply(data);
            self.send_with_cancel(token, tx, payload)?;
            // Wait for the receiver's done() (or its drop of the payload),
            // still honouring cancellation.
            loop {
                match reply_rx.recv_timeout(CANCEL_POLL) {
                    Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                        return Ok(());
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        if token.is_cancelled() {
                            return Err(HubError::Cancelled);
                        }
                    }
                }
            }
        } else {
            self.send_with_cancel(token, tx, Payload::fire_and_forget(data))
        }
    }

    fn send_with_cancel<T>(
        &self,
        token: &CancelToken,
        tx: &Sender<Payload<T>>,
        payload: Payload<T>,
    ) -> Result<(), HubError> {
        let mut payload = payload;
        loop {
            match tx.send_timeout(payload, CANCEL_POLL) {
                Ok(()) => return Ok(()),
                Err(crossbeam_channel::SendTimeoutError::Timeout(p)) => {
                    if token.is_cancelled() {
                        return Err(HubError::Cancelled);
                    }
                    payload = p;
                }
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                    return Err(HubError::Closed);
                }
            }
        }
    }
}
