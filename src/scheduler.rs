//! Bounded worker pool over a queue of tables.
//!
//! Tables are queued in input order; each of `N` workers pulls the next one
//! as soon as it finishes its current table. Outcomes are collected in
//! arrival order, one per input table. Once cancellation is raised no new
//! table is started; queued tables are reported as not started.

use crate::cancel::CancelToken;
use crate::config::{self, OUTPUT_EXTENSION};
use crate::dump::Dumper;
use crate::error::{DumpError, DumpResult};
use crate::models::{DumpJob, DumpOutcome, RecordFormat, Table};
use crossbeam_channel::{bounded, unbounded};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info, warn};

pub struct Scheduler {
    dumper: Dumper,
    max_concurrency: usize,
    output_dir: PathBuf,
    format: RecordFormat,
}

impl Scheduler {
    /// Fails fast when `max_concurrency` is zero or larger than the number of
    /// cursors the source can serve at once.
    pub fn new(
        dumper: Dumper,
        max_concurrency: usize,
        output_dir: &Path,
        format: RecordFormat,
    ) -> DumpResult<Self> {
        config::validate_concurrency(max_concurrency, dumper.source().capacity())?;
        config::validate_format(&format)?;
        Ok(Self {
            dumper,
            max_concurrency,
            output_dir: output_dir.to_path_buf(),
            format,
        })
    }

    pub fn job_for(&self, seq: usize, table: &Table) -> DumpJob {
        DumpJob {
            seq,
            table: table.clone(),
            path: self.output_dir.join(table.file_name(OUTPUT_EXTENSION)),
            format: self.format.clone(),
        }
    }

    /// Dumps every table and returns one outcome per table, in arrival order.
    pub fn run(&self, tables: &[Table], cancel: &CancelToken) -> DumpResult<Vec<DumpOutcome>> {
        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| DumpError::from_io(e, &self.output_dir))?;

        let workers = self.max_concurrency.min(tables.len().max(1));
        info!(tables = tables.len(), workers, "Starting dump");

        let (job_tx, job_rx) = bounded::<DumpJob>(workers);
        let (outcome_tx, outcome_rx) = unbounded::<DumpOutcome>();

        let outcomes = thread::scope(|s| {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let outcome_tx = outcome_tx.clone();
                s.spawn(move || {
                    debug!(worker, "Worker started");
                    while let Ok(job) = job_rx.recv() {
                        let outcome = if cancel.is_cancelled() {
                            debug!(worker, table = %job.table, "Skipping table after cancellation");
                            DumpOutcome::not_started(&job)
                        } else {
                            self.dumper.run(&job, cancel)
                        };
                        if outcome_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                    debug!(worker, "Worker finished");
                });
            }
            drop(job_rx);

            for (seq, table) in tables.iter().enumerate() {
                let job = self.job_for(seq, table);
                if cancel.is_cancelled() {
                    let _ = outcome_tx.send(DumpOutcome::not_started(&job));
                    continue;
                }
                if let Err(returned) = job_tx.send(job) {
                    // Every worker has exited; nothing can pick this table up.
                    warn!(table = %returned.0.table, "No worker available");
                    let _ = outcome_tx.send(DumpOutcome::not_started(&returned.0));
                }
            }
            drop(job_tx);
            drop(outcome_tx);

            outcome_rx.iter().collect::<Vec<_>>()
        });

        let completed = outcomes.iter().filter(|o| o.is_completed()).count();
        info!(completed, total = outcomes.len(), "Dump finished");
        Ok(outcomes)
    }
}
