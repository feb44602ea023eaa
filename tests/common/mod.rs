//! In-memory row source shared by the integration tests.
//!
//! Each table is scripted: its columns and rows, whether the size estimate
//! succeeds, and which faults the cursor raises. The source records every
//! cursor it opens and the peak number open at once.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tabledump::error::{DumpError, DumpResult};
use tabledump::models::{Row, Table, TableSizeEstimate};
use tabledump::source::{RowCursor, RowSource};

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    ConnectionLost,
    QuerySyntax,
    NotFound,
}

impl Fault {
    fn error(self, table: &Table) -> DumpError {
        match self {
            Fault::ConnectionLost => DumpError::ConnectionLost(format!("{} reset by peer", table)),
            Fault::QuerySyntax => DumpError::QuerySyntax(format!("near '{}'", table)),
            Fault::NotFound => DumpError::ElementNotFound(format!("table {}", table)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableScript {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// `None` makes the size estimate fail.
    pub estimate: Option<TableSizeEstimate>,
    pub open_fault: Option<Fault>,
    /// Raise the fault after yielding this many rows.
    pub fail_after: Option<(usize, Fault)>,
    /// Only the first N opens hit `fail_after`.
    pub failing_opens: Option<usize>,
    /// Cycle through `rows` forever.
    pub endless: bool,
    pub row_delay: Duration,
    /// Rows yielded before the row width changes.
    pub drift_after: Option<usize>,
}

impl TableScript {
    pub fn new(columns: &[&str], rows: Vec<Row>) -> Self {
        let count = rows.len() as u64;
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            estimate: Some(TableSizeEstimate {
                rows: count,
                size_mb: 0.01,
            }),
            ..Default::default()
        }
    }
}

pub fn cell(value: &str) -> Option<Vec<u8>> {
    Some(value.as_bytes().to_vec())
}

pub fn row(values: &[Option<&str>]) -> Row {
    Row::new(values.iter().map(|v| v.map(|s| s.as_bytes().to_vec())).collect())
}

/// `n` rows of `(id, name)` with sequential ids.
pub fn numbered_rows(n: usize) -> Vec<Row> {
    (1..=n)
        .map(|i| Row::new(vec![cell(&i.to_string()), cell(&format!("name-{}", i))]))
        .collect()
}

#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<Table, TableScript>,
    opens: Mutex<Vec<Table>>,
    active: Arc<AtomicUsize>,
    peak_active: Arc<AtomicUsize>,
    capacity: Option<usize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &Table, script: TableScript) -> Self {
        self.tables.insert(table.clone(), script);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Tables in the order their cursors were opened.
    pub fn opened(&self) -> Vec<Table> {
        self.opens.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    pub fn open_count_for(&self, table: &Table) -> usize {
        self.opens.lock().unwrap().iter().filter(|t| *t == table).count()
    }

    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn script(&self, table: &Table) -> DumpResult<&TableScript> {
        self.tables
            .get(table)
            .ok_or_else(|| DumpError::ElementNotFound(format!("table {}", table)))
    }
}

impl RowSource for MemorySource {
    fn estimate_size(&self, table: &Table) -> DumpResult<TableSizeEstimate> {
        self.script(table)?
            .estimate
            .ok_or_else(|| DumpError::QueryFailure("information_schema unavailable".to_string()))
    }

    fn open_cursor(&self, table: &Table) -> DumpResult<Box<dyn RowCursor>> {
        let script = self.script(table)?;
        let previous_opens = {
            let mut opens = self.opens.lock().unwrap();
            let previous = opens.iter().filter(|t| *t == table).count();
            opens.push(table.clone());
            previous
        };
        if let Some(fault) = script.open_fault {
            return Err(fault.error(table));
        }

        let fail_after = match (script.fail_after, script.failing_opens) {
            (Some(_), Some(limit)) if previous_opens >= limit => None,
            (other, _) => other,
        };

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(MemoryCursor {
            table: table.clone(),
            columns: script.columns.clone(),
            rows: script.rows.clone(),
            pos: 0,
            fail_after,
            endless: script.endless,
            row_delay: script.row_delay,
            drift_after: script.drift_after,
            active: Some(Arc::clone(&self.active)),
        }))
    }

    fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

struct MemoryCursor {
    table: Table,
    columns: Vec<String>,
    rows: Vec<Row>,
    pos: usize,
    fail_after: Option<(usize, Fault)>,
    endless: bool,
    row_delay: Duration,
    drift_after: Option<usize>,
    active: Option<Arc<AtomicUsize>>,
}

impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> DumpResult<Option<Row>> {
        if !self.row_delay.is_zero() {
            thread::sleep(self.row_delay);
        }
        if let Some((after, fault)) = self.fail_after {
            if self.pos >= after {
                return Err(fault.error(&self.table));
            }
        }
        if let Some(after) = self.drift_after {
            if self.pos >= after {
                self.pos += 1;
                let mut values = vec![cell("x"); self.columns.len() + 1];
                values[0] = cell(&self.pos.to_string());
                return Ok(Some(Row::new(values)));
            }
        }
        if self.rows.is_empty() {
            return Ok(None);
        }
        let idx = if self.endless {
            self.pos % self.rows.len()
        } else if self.pos < self.rows.len() {
            self.pos
        } else {
            return Ok(None);
        };
        self.pos += 1;
        Ok(Some(self.rows[idx].clone()))
    }

    fn close(&mut self) -> DumpResult<()> {
        if let Some(active) = self.active.take() {
            active.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
