//! Single-table dump: estimate, open cursor, stream rows into the output file.
//!
//! A job moves `Pending → Estimating → Streaming → Flushing` and ends in
//! `Completed`, `Failed` or `Cancelled`. A failed size estimate only degrades
//! the progress display. Cursor and sink are released on every exit path, and
//! partial output from a failed run is left on disk.

use crate::cancel::CancelToken;
use crate::config::PROGRESS_INTERVAL;
use crate::encoder::Encoder;
use crate::error::{DumpError, DumpResult};
use crate::models::{DumpJob, DumpOutcome, DumpState, DumpStatus, TableSizeEstimate, UploadStatus};
use crate::sink::FileSink;
use crate::source::{CheckedCursor, RowCursor, RowSource};
use crate::upload::Uploader;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How a streaming pass ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Exhausted,
    Cancelled,
}

struct Attempt {
    end: StreamEnd,
    rows: u64,
    bytes: u64,
    #[cfg_attr(not(test), allow(dead_code))]
    progress: ProgressBar,
}

/// A failed pass and the data rows it left in the output file.
struct Failure {
    error: DumpError,
    rows: u64,
}

impl From<DumpError> for Failure {
    fn from(error: DumpError) -> Self {
        Self { error, rows: 0 }
    }
}

/// Runs one table at a time; holds no per-table state between runs.
pub struct Dumper {
    source: Arc<dyn RowSource>,
    uploader: Option<Arc<dyn Uploader>>,
    progress: MultiProgress,
    max_retries: u32,
}

impl Dumper {
    pub fn new(source: Arc<dyn RowSource>) -> Self {
        Self {
            source,
            uploader: None,
            progress: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            max_retries: 0,
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn source(&self) -> &Arc<dyn RowSource> {
        &self.source
    }

    pub fn run(&self, job: &DumpJob, cancel: &CancelToken) -> DumpOutcome {
        let start = Instant::now();
        let mut attempts = 0;
        transition(job, DumpState::Pending);

        let status = loop {
            attempts += 1;
            match self.attempt(job, cancel) {
                Ok(attempt) if attempt.end == StreamEnd::Cancelled => {
                    transition(job, DumpState::Cancelled);
                    info!(table = %job.table, rows = attempt.rows, "Dump cancelled");
                    break DumpStatus::Cancelled {
                        rows: attempt.rows,
                        started: true,
                    };
                }
                Ok(attempt) => {
                    break DumpStatus::Completed {
                        rows: attempt.rows,
                        bytes: attempt.bytes,
                        path: job.path.clone(),
                        upload: None,
                    };
                }
                Err(failure)
                    if failure.error.is_retryable()
                        && attempts <= self.max_retries
                        && !cancel.is_cancelled() =>
                {
                    warn!(
                        table = %job.table,
                        attempt = attempts,
                        max_retries = self.max_retries,
                        error = %failure.error,
                        "Transient failure, restarting table dump"
                    );
                }
                Err(Failure { error, rows }) => {
                    transition(job, DumpState::Failed);
                    warn!(table = %job.table, rows, error = %error, "Dump failed");
                    break DumpStatus::Failed { error, rows };
                }
            }
        };

        let elapsed = start.elapsed();
        let status = match status {
            DumpStatus::Completed { rows, bytes, path, .. } => {
                transition(job, DumpState::Completed);
                info!(
                    table = %job.table,
                    rows,
                    bytes,
                    duration_secs = elapsed.as_secs_f64(),
                    "{} took {:?}", job.table, elapsed
                );
                let upload = self.uploader.as_ref().map(|up| match up.upload(&path, &job.table) {
                    Ok(remote) => UploadStatus::Uploaded(remote),
                    Err(e) => {
                        warn!(table = %job.table, error = %e, "Upload failed");
                        UploadStatus::Failed(e)
                    }
                });
                DumpStatus::Completed { rows, bytes, path, upload }
            }
            other => other,
        };

        DumpOutcome {
            seq: job.seq,
            table: job.table.clone(),
            elapsed,
            attempts,
            status,
        }
    }

    /// One full pass over the table, truncating any earlier output.
    fn attempt(&self, job: &DumpJob, cancel: &CancelToken) -> Result<Attempt, Failure> {
        transition(job, DumpState::Estimating);
        let estimate = match self.source.estimate_size(&job.table) {
            Ok(estimate) => {
                debug!(table = %job.table, rows = estimate.rows, size_mb = estimate.size_mb, "Size estimated");
                Some(estimate)
            }
            Err(e) => {
                warn!(table = %job.table, error = %e, "Size estimate unavailable, continuing without it");
                None
            }
        };

        transition(job, DumpState::Streaming);
        let encoder = Encoder::new(&job.format)?;
        let mut cursor = CheckedCursor::new(self.source.open_cursor(&job.table)?);
        let mut sink = match FileSink::create(&job.path) {
            Ok(sink) => sink,
            Err(e) => {
                close_cursor(job, &mut cursor);
                return Err(e.into());
            }
        };

        let pb = self.progress_bar(job, estimate);
        let streamed = stream_rows(job, &encoder, &mut cursor, &mut sink, &pb, cancel);

        transition(job, DumpState::Flushing);
        close_cursor(job, &mut cursor);
        let header = u64::from(job.format.write_header);
        let rows = sink.records().saturating_sub(header);
        let finished = sink.finish();

        match streamed {
            Ok(end) => {
                let summary = finished.map_err(|error| Failure { error, rows })?;
                advance(&pb, rows);
                match end {
                    StreamEnd::Exhausted => {
                        // Finishing fills the bar to its length; pin that to what was written.
                        if pb.length().is_some() {
                            pb.set_length(rows);
                        }
                        pb.finish_with_message("done");
                    }
                    StreamEnd::Cancelled => pb.abandon_with_message("cancelled"),
                }
                Ok(Attempt {
                    end,
                    rows,
                    bytes: summary.bytes,
                    progress: pb,
                })
            }
            Err(e) => {
                if let Err(flush) = finished {
                    warn!(table = %job.table, error = %flush, "Flushing partial output failed");
                }
                pb.abandon_with_message("failed");
                Err(Failure { error: e, rows })
            }
        }
    }

    fn progress_bar(&self, job: &DumpJob, estimate: Option<TableSizeEstimate>) -> ProgressBar {
        let pb = match estimate {
            Some(est) if est.rows > 0 => {
                let pb = ProgressBar::new(est.rows);
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.cyan} {prefix:<32} [{bar:30.cyan/blue}] {pos}/{len} rows {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=> "),
                );
                pb
            }
            _ => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.cyan} {prefix:<32} {pos} rows {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                pb
            }
        };
        let pb = self.progress.add(pb);
        pb.set_prefix(job.table.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

fn stream_rows(
    job: &DumpJob,
    encoder: &Encoder,
    cursor: &mut dyn RowCursor,
    sink: &mut FileSink,
    pb: &ProgressBar,
    cancel: &CancelToken,
) -> DumpResult<StreamEnd> {
    let mut record = Vec::with_capacity(512);

    if job.format.write_header {
        encoder.encode_header(cursor.columns(), &mut record);
        sink.write_record(&record)?;
    }

    let mut rows: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return Ok(StreamEnd::Cancelled);
        }
        let Some(row) = cursor.next_row()? else {
            return Ok(StreamEnd::Exhausted);
        };
        record.clear();
        encoder.encode_row(&row, &mut record);
        sink.write_record(&record)?;
        rows += 1;

        if rows % PROGRESS_INTERVAL == 0 {
            advance(pb, rows);
        }
    }
}

/// Catalog estimates can be stale; grow the bar instead of overshooting it.
fn advance(pb: &ProgressBar, rows: u64) {
    if pb.length().is_some_and(|len| rows > len) {
        pb.set_length(rows);
    }
    pb.set_position(rows);
}

fn close_cursor(job: &DumpJob, cursor: &mut dyn RowCursor) {
    if let Err(e) = cursor.close() {
        warn!(table = %job.table, error = %e, "Failed to close cursor");
    }
}

fn transition(job: &DumpJob, state: DumpState) {
    debug!(table = %job.table, state = ?state, "Dump state");
}
