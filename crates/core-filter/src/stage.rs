//! The filter stage: batching, serial and parallel application.
//!
//! Incoming lines accumulate into a batch that is flushed when it reaches
//! the stage's buffer size, every 50 ms, and on the end-mark. On the serial
//! path a single flusher applies each batch in flush order. On the parallel
//! path every flushed batch carries a sequence number; a worker pool applies
//! batches concurrently and a merger reorders results so matched lines reach
//! the destination in the same order their source chunks were dispatched.
//!
//! On cancellation workers return their batch to the free-list and drop out;
//! the merger emits whatever in-order prefix it holds.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, tick};
use tracing::trace;

use core_hub::CancelToken;
use core_line::Line;
use core_matcher::{CompiledQuery, Matcher};
use core_source::LineEvent;

use crate::pool::BufferPool;

/// Fallback batch size when neither the matcher nor the configuration asks
/// for more.
pub const DEFAULT_BUF_SIZE: usize = 1000;
/// Partial batches are flushed on this cadence so slow trickles still filter.
const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

struct SeqChunk {
    seq: u64,
    lines: Vec<Arc<Line>>,
}

struct SeqResult {
    seq: u64,
    matched: Vec<Arc<Line>>,
}

pub struct FilterStage {
    compiled: Arc<dyn CompiledQuery>,
    buf_size: usize,
    workers: usize,
    parallel: bool,
    pool: Arc<BufferPool>,
}

impl FilterStage {
    /// Resolve batching parameters from the matcher and the configuration.
    /// The batch size is the largest of the matcher's preference, the
    /// configured size, and the default.
    pub fn new(
        matcher: &dyn Matcher,
        compiled: Arc<dyn CompiledQuery>,
        config_buf_size: usize,
        pool: Arc<BufferPool>,
    ) -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            compiled,
            buf_size: matcher
                .buf_size()
                .max(config_buf_size)
                .max(DEFAULT_BUF_SIZE),
            workers,
            parallel: matcher.supports_parallel() && workers > 1,
            pool,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_buf_size(mut self, buf_size: usize) -> Self {
        self.buf_size = buf_size;
        self
    }

    /// Consume `rx` until its end-mark (or cancellation) and write matched
    /// lines plus a closing end-mark to `tx`.
    pub fn accept(&self, token: &CancelToken, rx: Receiver<LineEvent>, tx: Sender<LineEvent>) {
        if self.parallel {
            self.accept_parallel(token, rx, tx);
        } else {
            self.accept_serial(token, rx, tx);
        }
    }

    fn accept_serial(&self, token: &CancelToken, rx: Receiver<LineEvent>, tx: Sender<LineEvent>) {
        let (chunk_tx, chunk_rx) = bounded::<Vec<Arc<Line>>>(1);

        let flusher = {
            let compiled = Arc::clone(&self.compiled);
            let pool = Arc::clone(&self.pool);
            let token = token.clone();
            thread::spawn(move || {
                while let Ok(chunk) = chunk_rx.recv() {
                    if !token.is_cancelled() {
                        compiled.apply(&token, &chunk, &tx);
                    }
                    pool.put(chunk);
                }
                let _ = tx.send(LineEvent::EndMark);
            })
        };

        self.batch_loop(token, rx, |chunk| chunk_tx.send(chunk).is_ok());
        drop(chunk_tx);
        let _ = flusher.join();
    }

    fn accept_parallel(&self, token: &CancelToken, rx: Receiver<LineEvent>, tx: Sender<LineEvent>) {
        let (work_tx, work_rx) = bounded::<SeqChunk>(self.workers);
        let (result_tx, result_rx) = bounded::<SeqResult>(self.workers * 2);

        let mut workers = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let compiled = Arc::clone(&self.compiled);
            let pool = Arc::clone(&self.pool);
            let token = token.clone();
            workers.push(thread::spawn(move || {
                while let Ok(chunk) = work_rx.recv() {
                    if token.is_cancelled() {
                        pool.put(chunk.lines);
                        continue;
                    }
                    let matched = compiled.apply_collect(&token, &chunk.lines);
                    pool.put(chunk.lines);
                    if result_tx
                        .send(SeqResult {
                            seq: chunk.seq,
                            matched,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            }));
        }
        // The merger observes worker completion through channel disconnect.
        drop(result_tx);

        let merger = thread::spawn(move || merge_in_order(result_rx, tx));

        let mut seq = 0u64;
        self.batch_loop(token, rx, |lines| {
            let chunk = SeqChunk { seq, lines };
            seq += 1;
            work_tx.send(chunk).is_ok()
        });
        drop(work_tx);

        for worker in workers {
            let _ = worker.join();
        }
        let _ = merger.join();
    }

    /// Shared accumulation loop. `flush` dispatches one full batch; a false
    /// return means the downstream is gone and accumulation stops.
    fn batch_loop<F>(&self, token: &CancelToken, rx: Receiver<LineEvent>, mut flush: F)
    where
        F: FnMut(Vec<Arc<Line>>) -> bool,
    {
        let flush_tick = tick(FLUSH_INTERVAL);
        let mut buf = self.pool.get();
        loop {
            select! {
                recv(rx) -> ev => match ev {
                    Ok(LineEvent::Line(line)) => {
                        buf.push(line);
                        if buf.len() >= self.buf_size {
                            let full = mem::replace(&mut buf, self.pool.get());
                            if !flush(full) {
                                break;
                            }
                        }
                    }
                    Ok(LineEvent::EndMark) | Err(_) => break,
                },
                recv(flush_tick) -> _ => {
                    if token.is_cancelled() {
                        break;
                    }
                    if !buf.is_empty() {
                        let full = mem::replace(&mut buf, self.pool.get());
                        if !flush(full) {
                            break;
                        }
                    }
                }
            }
        }

        let rest = mem::take(&mut buf);
        if !rest.is_empty() && !token.is_cancelled() {
            trace!(target: "filter", len = rest.len(), "final_flush");
            if !flush(rest) {
                return;
            }
        } else {
            self.pool.put(rest);
        }
    }
}

/// Drain `{seq, matched}` results, forwarding matched lines downstream in
/// sequence order. Whatever contiguous prefix remains after the workers
/// disconnect is flushed, then the end-mark closes the stream.
fn merge_in_order(result_rx: Receiver<SeqResult>, tx: Sender<LineEvent>) {
    let mut pending: BTreeMap<u64, Vec<Arc<Line>>> = BTreeMap::new();
    let mut next_seq = 0u64;

    let mut forward = |pending: &mut BTreeMap<u64, Vec<Arc<Line>>>, next_seq: &mut u64| -> bool {
        while let Some(matched) = pending.remove(next_seq) {
            for line in matched {
                if tx.send(LineEvent::Line(line)).is_err() {
                    return false;
                }
            }
            *next_seq += 1;
        }
        true
    };

    while let Ok(result) = result_rx.recv() {
        pending.insert(result.seq, result.matched);
        if !forward(&mut pending, &mut next_seq) {
            return;
        }
    }
    if !forward(&mut pending, &mut next_seq) {
        return;
    }
    let _ = tx.send(LineEvent::EndMark);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_matcher::SubstringMatcher;

    fn batch_lines(count: usize) -> Vec<Arc<Line>> {
        (0..count)
            .map(|i| Arc::new(Line::new(i as u64 + 1, &format!("line-{i:05}"), false, false)))
            .collect()
    }

    fn feed(lines: Vec<Arc<Line>>) -> Receiver<LineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        for line in lines {
            tx.send(LineEvent::Line(line)).unwrap();
        }
        tx.send(LineEvent::EndMark).unwrap();
        rx
    }

    fn run_stage(stage: &FilterStage, rx: Receiver<LineEvent>) -> Vec<Arc<Line>> {
        let (tx, out_rx) = crossbeam_channel::unbounded();
        stage.accept(&CancelToken::new(), rx, tx);
        core_source::collect_events(&out_rx)
    }

    fn new_stage(query: &str) -> FilterStage {
        let matcher = SubstringMatcher::ignore_case();
        let compiled = matcher.query(query).unwrap();
        FilterStage::new(&matcher, compiled, 0, Arc::new(BufferPool::new(64)))
    }

    #[test]
    fn serial_path_filters_and_closes() {
        let matcher = SubstringMatcher::ignore_case();
        let compiled = matcher.query("ba").unwrap();
        let mut stage =
            FilterStage::new(&matcher, compiled, 0, Arc::new(BufferPool::new(64)));
        stage.parallel = false;

        let lines = vec![
            Arc::new(Line::new(1, "foo", false, false)),
            Arc::new(Line::new(2, "bar", false, false)),
            Arc::new(Line::new(3, "baz", false, false)),
        ];
        let matched = run_stage(&stage, feed(lines));
        let displays: Vec<_> = matched.iter().map(|l| l.display()).collect();
        assert_eq!(displays, vec!["bar", "baz"]);
    }

    #[test]
    fn parallel_path_preserves_source_order() {
        // Force many small chunks across the worker pool; ids must come out
        // strictly increasing even though workers finish out of order.
        let stage = new_stage("line").with_buf_size(64);
        assert!(stage.parallel || num_cpus::get() == 1);

        let matched = run_stage(&stage, feed(batch_lines(5000)));
        assert_eq!(matched.len(), 5000);
        let mut prev = 0;
        for line in &matched {
            assert!(line.id() > prev, "out of order id {}", line.id());
            prev = line.id();
        }
    }

    #[test]
    fn parallel_path_matches_serial_results() {
        let serial = {
            let mut stage = new_stage("7").with_buf_size(128);
            stage.parallel = false;
            run_stage(&stage, feed(batch_lines(3000)))
        };
        let parallel = run_stage(&new_stage("7").with_buf_size(128), feed(batch_lines(3000)));
        let ids = |lines: &[Arc<Line>]| lines.iter().map(|l| l.id()).collect::<Vec<_>>();
        assert_eq!(ids(&serial), ids(&parallel));
    }

    #[test]
    fn timed_flush_emits_partial_batches() {
        let stage = new_stage("x");
        let (in_tx, in_rx) = crossbeam_channel::unbounded();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        let token = CancelToken::new();

        let runner = {
            let token = token.clone();
            thread::spawn(move || stage.accept(&token, in_rx, out_tx))
        };
        in_tx
            .send(LineEvent::Line(Arc::new(Line::new(1, "x-ray", false, false))))
            .unwrap();

        // Well under the batch size, so only the 50 ms tick can flush it.
        let ev = out_rx
            .recv_timeout(Duration::from_millis(500))
            .expect("timed flush did not arrive");
        match ev {
            LineEvent::Line(line) => assert_eq!(line.display(), "x-ray"),
            LineEvent::EndMark => panic!("unexpected end-mark"),
        }

        in_tx.send(LineEvent::EndMark).unwrap();
        runner.join().unwrap();
        assert!(matches!(out_rx.recv().unwrap(), LineEvent::EndMark));
    }

    #[test]
    fn cancelled_stage_stops_and_workers_release_buffers() {
        let stage = new_stage("line").with_buf_size(32);
        let (in_tx, in_rx) = crossbeam_channel::unbounded();
        let (out_tx, out_rx) = crossbeam_channel::bounded(0);
        let token = CancelToken::new();

        for line in batch_lines(1000) {
            in_tx.send(LineEvent::Line(line)).unwrap();
        }
        token.cancel();
        // The downstream is gone, as it is once a cancelled destination
        // stops reading; the stage must still return.
        drop(out_rx);
        stage.accept(&token, in_rx, out_tx);
    }

    #[test]
    fn merger_flushes_in_order_prefix_on_disconnect() {
        let (res_tx, res_rx) = crossbeam_channel::unbounded();
        let (tx, rx) = crossbeam_channel::unbounded();
        let line = |id: u64| Arc::new(Line::new(id, "l", false, false));
        // seq 1 missing: only seq 0 may be forwarded.
        res_tx
            .send(SeqResult {
                seq: 0,
                matched: vec![line(1)],
            })
            .unwrap();
        res_tx
            .send(SeqResult {
                seq: 2,
                matched: vec![line(3)],
            })
            .unwrap();
        drop(res_tx);
        merge_in_order(res_rx, tx);
        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], LineEvent::Line(l) if l.id() == 1));
        assert!(events[1].is_end_mark());
    }
}
