//! External-command matcher.
//!
//! The command is spawned once per batch with `$QUERY` occurrences in its
//! argument list replaced by the current query. The batch's display lines
//! are written to its stdin, one per line; lines the command echoes back on
//! stdout are kept, in the command's output order. Lines the command
//! rewrites (no longer matching any input display) are dropped.
//!
//! Cancellation is honoured while the child runs: a superseded query kills
//! the process instead of waiting for it to finish on its own.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use tracing::warn;

use core_hub::CancelToken;
use core_line::Line;

use crate::{CompiledQuery, Matcher, MatcherError};

/// Batch size used when the command does not care; keeps each spawn cheap
/// while amortising process startup over a useful amount of input.
const DEFAULT_EXTERNAL_BUF_SIZE: usize = 100;
/// How often a running command is checked against its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(10);

pub struct ExternalMatcher {
    name: String,
    argv: Vec<String>,
    buf_size: usize,
}

impl ExternalMatcher {
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            name: name.into(),
            argv,
            buf_size: DEFAULT_EXTERNAL_BUF_SIZE,
        }
    }

    pub fn with_buf_size(mut self, buf_size: usize) -> Self {
        if buf_size > 0 {
            self.buf_size = buf_size;
        }
        self
    }
}

impl Matcher for ExternalMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn buf_size(&self) -> usize {
        self.buf_size
    }

    /// One process per batch is expensive enough without competing spawns.
    fn supports_parallel(&self) -> bool {
        false
    }

    fn query(&self, query: &str) -> Result<Arc<dyn CompiledQuery>, MatcherError> {
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| arg.replace("$QUERY", query))
            .collect();
        Ok(Arc::new(ExternalQuery {
            name: self.name.clone(),
            argv,
        }))
    }
}

struct ExternalQuery {
    name: String,
    argv: Vec<String>,
}

impl CompiledQuery for ExternalQuery {
    fn apply_collect(&self, token: &CancelToken, batch: &[Arc<Line>]) -> Vec<Arc<Line>> {
        if token.is_cancelled() || batch.is_empty() || self.argv.is_empty() {
            return Vec::new();
        }
        match self.run(token, batch) {
            Ok(matched) => matched,
            Err(err) => {
                warn!(target: "matcher", name = %self.name, error = %err, "external_command_failed");
                Vec::new()
            }
        }
    }
}

impl ExternalQuery {
    fn run(&self, token: &CancelToken, batch: &[Arc<Line>]) -> std::io::Result<Vec<Arc<Line>>> {
        let mut child = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        // Feed stdin from a separate thread so a command that interleaves
        // reading and writing cannot deadlock against us.
        let mut stdin = child.stdin.take().expect("child stdin was piped");
        let payload: String = batch
            .iter()
            .map(|l| format!("{}\n", l.display()))
            .collect();
        let writer = thread::spawn(move || {
            let _ = stdin.write_all(payload.as_bytes());
        });

        // Echoes arrive through a channel so this thread never blocks on the
        // pipe and can watch the token; killing the child closes the pipe
        // and lets the reader exit.
        let stdout = child.stdout.take().expect("child stdout was piped");
        let (echo_tx, echo_rx) = crossbeam_channel::unbounded::<String>();
        let reader = thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if echo_tx.send(line).is_err() {
                    break;
                }
            }
        });

        // Index display text to input lines; duplicates resolve in input
        // order, one echo consuming one line.
        let mut by_display: HashMap<&str, VecDeque<&Arc<Line>>> = HashMap::new();
        for line in batch {
            by_display.entry(line.display()).or_default().push_back(line);
        }

        let mut matched = Vec::new();
        let mut cancelled = false;
        loop {
            match echo_rx.recv_timeout(CANCEL_POLL) {
                Ok(echoed) => {
                    if let Some(queue) = by_display.get_mut(echoed.as_str()) {
                        if let Some(line) = queue.pop_front() {
                            matched.push(Arc::new((**line).clone()));
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if token.is_cancelled() {
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        if cancelled {
            // Superseded: the command's output no longer matters.
            let _ = child.kill();
            let _ = child.wait();
        } else {
            // Stdout closed; reap the child, still honouring a late cancel
            // in case it lingers after closing its pipe.
            loop {
                if child.try_wait()?.is_some() {
                    break;
                }
                if token.is_cancelled() {
                    let _ = child.kill();
                    let _ = child.wait();
                    break;
                }
                thread::sleep(CANCEL_POLL);
            }
        }
        let _ = writer.join();
        let _ = reader.join();

        if cancelled {
            return Ok(Vec::new());
        }
        Ok(matched)
    }
}
