use crate::error::{DumpError, DumpResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_$]+$").unwrap());

/// A schema-qualified table. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Table {
    schema: String,
    name: String,
}

impl Table {
    pub fn new(schema: &str, name: &str) -> DumpResult<Self> {
        for part in [schema, name] {
            if !IDENTIFIER.is_match(part) {
                return Err(DumpError::Config(format!(
                    "invalid identifier '{}' (allowed: letters, digits, '_', '$')",
                    part
                )));
            }
        }
        Ok(Self {
            schema: schema.to_string(),
            name: name.to_string(),
        })
    }

    /// Parses `schema.table`, or a bare `table` placed in `default_schema`.
    pub fn parse(spec: &str, default_schema: Option<&str>) -> DumpResult<Self> {
        match spec.trim().split_once('.') {
            Some((schema, name)) => Self::new(schema, name),
            None => match default_schema {
                Some(schema) => Self::new(schema, spec.trim()),
                None => Err(DumpError::Config(format!(
                    "table '{}' has no schema and no default database is configured",
                    spec
                ))),
            },
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backtick-quoted form for use inside SQL.
    pub fn quoted(&self) -> String {
        format!("`{}`.`{}`", self.schema, self.name)
    }

    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}.{}", self.schema, self.name, extension)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Advisory size of a table, taken from catalog metadata.
///
/// Catalog row counts are approximate for some storage engines, so the real
/// stream may yield more or fewer rows than `rows`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableSizeEstimate {
    pub rows: u64,
    pub size_mb: f64,
}

/// One record: raw values positionally aligned with the cursor's columns.
/// `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    values: Vec<Option<Vec<u8>>>,
}

impl Row {
    pub fn new(values: Vec<Option<Vec<u8>>>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Option<Vec<u8>>] {
        &self.values
    }

    pub fn get(&self, idx: usize) -> Option<&[u8]> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }
}

/// Text layout of one output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFormat {
    pub delimiter: char,
    pub record_terminator: char,
    pub null_sentinel: String,
    pub write_header: bool,
}

impl Default for RecordFormat {
    fn default() -> Self {
        Self {
            delimiter: crate::config::DEFAULT_DELIMITER,
            record_terminator: crate::config::DEFAULT_RECORD_TERMINATOR,
            null_sentinel: crate::config::DEFAULT_NULL_SENTINEL.to_string(),
            write_header: true,
        }
    }
}

/// One unit of work handed from the scheduler to a worker.
#[derive(Debug, Clone)]
pub struct DumpJob {
    /// Position of the table in the caller's input list.
    pub seq: usize,
    pub table: Table,
    pub path: PathBuf,
    pub format: RecordFormat,
}

/// States a single table dump moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpState {
    Pending,
    Estimating,
    Streaming,
    Flushing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug)]
pub enum UploadStatus {
    Uploaded(String),
    Failed(DumpError),
}

#[derive(Debug)]
pub enum DumpStatus {
    Completed {
        rows: u64,
        bytes: u64,
        path: PathBuf,
        upload: Option<UploadStatus>,
    },
    /// Partial output, if any, is left on disk and must be treated as untrusted.
    Failed { error: DumpError, rows: u64 },
    /// `started` is false when the table was never dispatched.
    Cancelled { rows: u64, started: bool },
}

/// Terminal result for one table.
#[derive(Debug)]
pub struct DumpOutcome {
    pub seq: usize,
    pub table: Table,
    pub elapsed: Duration,
    pub attempts: u32,
    pub status: DumpStatus,
}

impl DumpOutcome {
    pub fn not_started(job: &DumpJob) -> Self {
        Self {
            seq: job.seq,
            table: job.table.clone(),
            elapsed: Duration::ZERO,
            attempts: 0,
            status: DumpStatus::Cancelled {
                rows: 0,
                started: false,
            },
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, DumpStatus::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, DumpStatus::Failed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, DumpStatus::Cancelled { .. })
    }

    pub fn rows(&self) -> u64 {
        match self.status {
            DumpStatus::Completed { rows, .. }
            | DumpStatus::Failed { rows, .. }
            | DumpStatus::Cancelled { rows, .. } => rows,
        }
    }

    pub fn label(&self) -> &'static str {
        match self.status {
            DumpStatus::Completed { .. } => "COMPLETED",
            DumpStatus::Failed { .. } => "FAILED",
            DumpStatus::Cancelled { .. } => "CANCELLED",
        }
    }
}

/// Re-sorts outcomes (which arrive in completion order) into input order.
pub fn in_input_order(mut outcomes: Vec<DumpOutcome>) -> Vec<DumpOutcome> {
    outcomes.sort_by_key(|o| o.seq);
    outcomes
}
