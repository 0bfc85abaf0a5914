//! Subprocess supervision for sync jobs.
//!
//! `ProcessSupervisor` owns spawn, output streaming, waiting and killing, so
//! the executor's timeout and retry logic can run against a fake in tests.

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use turbo_core::TargetId;
use turbo_engine::process::stop_child;

/// How long to keep collecting output after the process is gone
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Longer output lines are cut; the remainder up to the newline is dropped
const MAX_LINE_BYTES: u64 = 8 * 1024;

/// Everything needed to run one subprocess
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,

    /// Target the output lines are attributed to
    pub target_id: TargetId,

    /// Wall-clock budget for this run
    pub timeout: Duration,

    /// Time between the graceful stop and the force kill
    pub kill_grace: Duration,

    /// Output lines retained for the status feed
    pub tail_lines: usize,

    /// Cancelled on shutdown
    pub cancel: CancellationToken,
}

/// How the subprocess ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited normally with a code
    Exited(i32),
    /// Terminated by a signal it did not handle
    Signaled,
    /// Ran past its timeout and was stopped
    TimedOut,
    /// Stopped because the job was cancelled
    Cancelled,
}

/// Result of one supervised run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub exit: ProcessExit,

    /// Last `tail_lines` lines of combined stdout/stderr
    pub tail: Vec<String>,
}

/// Runs a subprocess to completion
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// `Err` only when the process could not be started
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessReport>;
}

/// Supervisor backed by `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct TokioSupervisor;

impl TokioSupervisor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSupervisor for TokioSupervisor {
    async fn run(&self, spec: ProcessSpec) -> Result<ProcessReport> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Terminal Ctrl-C goes to us; we stop the job ourselves
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| SyncError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        debug!(target_id = %spec.target_id, pid = ?child.id(), "Sync process started");

        let tail = Arc::new(Mutex::new(OutputTail::new(spec.tail_lines)));
        let (line_tx, line_rx) = mpsc::channel::<String>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);
        let collector = tokio::spawn(collect_lines(
            line_rx,
            Arc::clone(&tail),
            spec.target_id.clone(),
        ));

        enum Waited {
            Exited(std::io::Result<ExitStatus>),
            TimedOut,
            Cancelled,
        }

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            () = tokio::time::sleep(spec.timeout) => Waited::TimedOut,
            () = spec.cancel.cancelled() => Waited::Cancelled,
        };

        let exit = match waited {
            Waited::Exited(status) => exit_from_status(status?),
            Waited::TimedOut => {
                warn!(
                    target_id = %spec.target_id,
                    "Sync process exceeded {:?}, stopping",
                    spec.timeout
                );
                stop_child(&mut child, spec.kill_grace).await?;
                ProcessExit::TimedOut
            }
            Waited::Cancelled => {
                debug!(target_id = %spec.target_id, "Sync process cancelled, stopping");
                stop_child(&mut child, spec.kill_grace).await?;
                ProcessExit::Cancelled
            }
        };

        // Grandchildren may hold the pipes open; don't wait on them forever
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, collector).await.is_err() {
            debug!(target_id = %spec.target_id, "Output still open after exit, not waiting");
        }

        let tail = tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lines();

        Ok(ProcessReport { exit, tail })
    }
}

fn exit_from_status(status: ExitStatus) -> ProcessExit {
    match status.code() {
        Some(code) => ProcessExit::Exited(code),
        None => ProcessExit::Signaled,
    }
}

/// Bounded ring of the most recent output lines
#[derive(Debug)]
struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match read_capped_line(&mut reader, &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Stopped reading process output: {}", e);
                break;
            }
        }
    }
}

async fn read_capped_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES)
        .read_until(b'\n', buf)
        .await?;
    if read as u64 == MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
        skip_past_newline(reader).await?;
    }
    Ok(read)
}

async fn skip_past_newline<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

async fn collect_lines(
    mut rx: mpsc::Receiver<String>,
    tail: Arc<Mutex<OutputTail>>,
    target_id: TargetId,
) {
    while let Some(line) = rx.recv().await {
        debug!(target_id = %target_id, "{}", line);
        tail.lock().unwrap_or_else(PoisonError::into_inner).push(line);
    }
}
