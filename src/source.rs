//! Boundary with the database: the connection provider and its cursors.

use crate::error::{DumpError, DumpResult};
use crate::models::{Row, Table, TableSizeEstimate};

/// Forward-only stream over one query's result set.
///
/// Rows are pulled one at a time; implementations must not hold the whole
/// result set in memory. The column list is fixed when the cursor opens.
pub trait RowCursor: Send {
    fn columns(&self) -> &[String];

    /// `Ok(None)` signals end-of-data.
    fn next_row(&mut self) -> DumpResult<Option<Row>>;

    /// Releases the underlying query. Safe to call more than once.
    fn close(&mut self) -> DumpResult<()>;
}

/// Supplies cursors and size estimates for tables.
pub trait RowSource: Send + Sync {
    fn estimate_size(&self, table: &Table) -> DumpResult<TableSizeEstimate>;

    fn open_cursor(&self, table: &Table) -> DumpResult<Box<dyn RowCursor>>;

    /// How many cursors can be open at once, when the source knows.
    fn capacity(&self) -> Option<usize> {
        None
    }
}

pub fn select_all_query(table: &Table) -> String {
    format!("SELECT * FROM {}", table.quoted())
}

/// Wraps a cursor and fails with `SchemaDrift` as soon as a row's width
/// stops matching the columns reported at open.
pub struct CheckedCursor {
    inner: Box<dyn RowCursor>,
    width: usize,
    closed: bool,
}

impl CheckedCursor {
    pub fn new(inner: Box<dyn RowCursor>) -> Self {
        let width = inner.columns().len();
        Self {
            inner,
            width,
            closed: false,
        }
    }
}

impl RowCursor for CheckedCursor {
    fn columns(&self) -> &[String] {
        self.inner.columns()
    }

    fn next_row(&mut self) -> DumpResult<Option<Row>> {
        if self.closed {
            return Ok(None);
        }
        match self.inner.next_row()? {
            Some(row) if row.len() != self.width => Err(DumpError::SchemaDrift {
                expected: self.width,
                actual: row.len(),
            }),
            other => Ok(other),
        }
    }

    fn close(&mut self) -> DumpResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close()
    }
}
