//! Ingestion pipeline: one reader task feeding a bounded queue consumed by a
//! pool of decode workers that write into the shard table.

pub mod decode;
pub mod stats;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregate::quarter::resolve_quarter;
use crate::aggregate::shard::ShardTable;

use self::decode::{decode_row, DecodeError};
use self::stats::{IngestStats, IngestSummary};

/// Default number of raw lines buffered between the reader and workers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Lifecycle of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// Source open, reader scanning.
    Reading,
    /// Source exhausted and queue closed, workers finishing.
    Draining,
    Done,
    Failed,
}

impl PipelineState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that end a pipeline run. Row-level failures never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("source {} unavailable", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ingestion worker failed: {reason}")]
    WorkerFailed { reason: String },

    #[error("ingestion cancelled")]
    Cancelled,

    #[error("pipeline cannot start from state {state}")]
    InvalidState { state: PipelineState },
}

/// Pipeline tuning and timestamp interpretation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of decode workers (at least one is always started).
    pub worker_count: usize,
    /// Capacity of the reader-to-worker queue.
    pub queue_capacity: usize,
    /// Added to every timestamp before its quarter is resolved.
    pub interval: Duration,
    /// Fixed offset the source timestamps are read in.
    pub utc_offset: FixedOffset,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            interval: Duration::from_secs(15 * 60),
            utc_offset: FixedOffset::east_opt(3600).expect("one hour is a valid UTC offset"),
        }
    }
}

/// A rejected row handed to the [`RejectHandler`].
#[derive(Debug)]
pub struct Rejection<'a> {
    /// 1-based line number in the source, header included.
    pub line: u64,
    pub raw: &'a str,
    pub error: &'a DecodeError,
}

/// Callback for rows that fail to decode.
pub type RejectHandler = Arc<dyn Fn(&Rejection<'_>) + Send + Sync>;

/// Default rejection sink: one warning per rejected row.
pub fn log_rejection(rejection: &Rejection<'_>) {
    warn!(
        line = rejection.line,
        kind = rejection.error.kind().as_str(),
        row = rejection.raw,
        error = %rejection.error,
        "rejected row",
    );
}

/// One raw source line, line terminator stripped. Not yet checked for UTF-8.
struct SourceLine {
    number: u64,
    bytes: Vec<u8>,
}

/// Why the reader stopped scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadExit {
    /// End of input, or a read error that ended the scan.
    Exhausted,
    Cancelled,
    QueueClosed,
}

enum Task {
    Reader(ReadExit),
    Worker,
}

/// Reads a delimited source and applies every valid row to a [`ShardTable`].
pub struct Pipeline {
    cfg: PipelineConfig,
    table: Arc<ShardTable>,
    stats: Arc<IngestStats>,
    on_reject: RejectHandler,
    state: Mutex<PipelineState>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig, table: Arc<ShardTable>) -> Self {
        Self::with_cancellation(cfg, table, CancellationToken::new())
    }

    /// Creates a pipeline that stops early once `cancel` fires.
    pub fn with_cancellation(
        cfg: PipelineConfig,
        table: Arc<ShardTable>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            table,
            stats: Arc::new(IngestStats::new()),
            on_reject: Arc::new(log_rejection),
            state: Mutex::new(PipelineState::Idle),
            cancel,
        }
    }

    /// Replaces the rejection sink.
    pub fn on_reject(&mut self, handler: RejectHandler) {
        self.on_reject = handler;
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn table(&self) -> &Arc<ShardTable> {
        &self.table
    }

    /// Current ingestion counters.
    pub fn stats(&self) -> IngestSummary {
        self.stats.snapshot()
    }

    /// Requests the reader and workers to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Opens `path` and runs the pipeline over it.
    ///
    /// Fails with [`PipelineError::SourceUnavailable`] before any worker is
    /// started if the file cannot be opened.
    pub async fn run_path(&self, path: &Path) -> Result<IngestSummary, PipelineError> {
        self.ensure_idle()?;

        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(source) => {
                self.set_state(PipelineState::Failed);
                return Err(PipelineError::SourceUnavailable {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        info!(path = %path.display(), "opened source");

        self.run(BufReader::new(file)).await
    }

    /// Runs the pipeline over an already open source.
    ///
    /// The first line is treated as a header and skipped. Returns once every
    /// queued line has been applied.
    pub async fn run<R>(&self, source: R) -> Result<IngestSummary, PipelineError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        self.begin()?;

        let worker_count = self.cfg.worker_count.max(1);
        let (tx, rx) = mpsc::channel(self.cfg.queue_capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));

        let mut tasks = JoinSet::new();
        for id in 0..worker_count {
            let worker = Worker {
                id,
                rx: Arc::clone(&rx),
                table: Arc::clone(&self.table),
                stats: Arc::clone(&self.stats),
                on_reject: Arc::clone(&self.on_reject),
                interval: self.cfg.interval,
                utc_offset: self.cfg.utc_offset,
                cancel: self.cancel.clone(),
            };
            tasks.spawn(async move {
                worker.run().await;
                Task::Worker
            });
        }
        // Workers hold the only receivers, so the queue closes for the
        // reader if they all exit.
        drop(rx);

        let reader = Reader {
            tx,
            stats: Arc::clone(&self.stats),
            cancel: self.cancel.clone(),
        };
        tasks.spawn(async move { Task::Reader(reader.run(source).await) });
        debug!(
            workers = worker_count,
            queue_capacity = self.cfg.queue_capacity,
            "ingestion started"
        );

        let mut failure = None;
        let mut read_exit = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Task::Reader(exit)) => {
                    read_exit = Some(exit);
                    let mut state = self.state.lock();
                    if *state == PipelineState::Reading {
                        *state = PipelineState::Draining;
                    }
                }
                Ok(Task::Worker) => {}
                Err(e) => {
                    error!(error = %e, "ingestion task failed, cancelling run");
                    self.cancel.cancel();
                    failure.get_or_insert(PipelineError::WorkerFailed {
                        reason: e.to_string(),
                    });
                }
            }
        }

        let summary = self.stats.snapshot();
        if let Some(err) = failure {
            self.set_state(PipelineState::Failed);
            return Err(err);
        }
        // A cancel that lands after every line was applied does not void the run.
        let stopped_early =
            read_exit != Some(ReadExit::Exhausted) || summary.unprocessed() > 0;
        if stopped_early && self.cancel.is_cancelled() {
            self.set_state(PipelineState::Failed);
            warn!(
                rows_read = summary.rows_read,
                unprocessed = summary.unprocessed(),
                "ingestion cancelled"
            );
            return Err(PipelineError::Cancelled);
        }

        self.set_state(PipelineState::Done);
        info!(
            rows_read = summary.rows_read,
            accepted = summary.accepted,
            rejected = summary.rejected_total(),
            "ingestion complete"
        );
        Ok(summary)
    }

    fn ensure_idle(&self) -> Result<(), PipelineError> {
        match self.state() {
            PipelineState::Idle => Ok(()),
            state => Err(PipelineError::InvalidState { state }),
        }
    }

    fn begin(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock();
        if *state != PipelineState::Idle {
            return Err(PipelineError::InvalidState { state: *state });
        }
        *state = PipelineState::Reading;
        Ok(())
    }

    fn set_state(&self, next: PipelineState) {
        *self.state.lock() = next;
    }
}

/// Scans the source and feeds the queue. Dropping it closes the queue.
struct Reader {
    tx: mpsc::Sender<SourceLine>,
    stats: Arc<IngestStats>,
    cancel: CancellationToken,
}

impl Reader {
    async fn run<R>(self, mut source: R) -> ReadExit
    where
        R: AsyncBufRead + Unpin,
    {
        let mut header = Vec::new();
        match read_line(&mut source, &mut header).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("source is empty");
                return ReadExit::Exhausted;
            }
            Err(e) => {
                error!(error = %e, "reading header failed");
                return ReadExit::Exhausted;
            }
        }

        let mut number = 1u64;
        loop {
            let mut bytes = Vec::new();
            match read_line(&mut source, &mut bytes).await {
                Ok(true) => {}
                Ok(false) => return ReadExit::Exhausted,
                Err(e) => {
                    error!(line = number + 1, error = %e, "source read failed, ending scan");
                    return ReadExit::Exhausted;
                }
            }
            number += 1;
            self.stats.record_read();

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(line = number, "reader observed cancellation");
                    return ReadExit::Cancelled;
                }
                sent = self.tx.send(SourceLine { number, bytes }) => {
                    if sent.is_err() {
                        debug!(line = number, "queue closed, reader stopping");
                        return ReadExit::QueueClosed;
                    }
                }
            }
        }
    }
}

/// Reads one line into `buf` without its `\n` or `\r\n` terminator.
/// Returns `false` at end of input.
async fn read_line<R>(source: &mut R, buf: &mut Vec<u8>) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    if source.read_until(b'\n', buf).await? == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(true)
}

/// Decodes queued lines and applies them to the shard table.
struct Worker {
    id: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<SourceLine>>>,
    table: Arc<ShardTable>,
    stats: Arc<IngestStats>,
    on_reject: RejectHandler,
    interval: Duration,
    utc_offset: FixedOffset,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let mut applied = 0u64;
        loop {
            let next = {
                let mut rx = self.rx.lock().await;
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    line = rx.recv() => line,
                }
            };
            let Some(line) = next else {
                break;
            };
            self.apply(&line);
            applied += 1;
        }
        debug!(worker = self.id, applied, "worker finished");
    }

    fn apply(&self, line: &SourceLine) {
        // Invalid UTF-8 turns into replacement characters, which no field
        // parser accepts, so such rows are rejected like any other bad row.
        let text = String::from_utf8_lossy(&line.bytes);
        match decode_row(&text, self.utc_offset) {
            Ok(reading) => {
                let quarter = resolve_quarter(reading.timestamp, self.interval);
                self.table.add(reading.entity, quarter, reading.measurement);
                self.stats.record_accepted();
            }
            Err(error) => {
                self.stats.record_rejected(error.kind());
                (self.on_reject)(&Rejection {
                    line: line.number,
                    raw: &text,
                    error: &error,
                });
            }
        }
    }
}
