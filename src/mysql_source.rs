//! MySQL-backed [`RowSource`].
//!
//! Each cursor runs its query on a dedicated reader thread that owns a pooled
//! connection and pushes converted rows through a bounded channel, so at most
//! `CURSOR_PREFETCH_ROWS` rows are buffered per table. Closing a cursor
//! before the result set is exhausted kills the running query, so the reader
//! hands its connection back to the pool without scanning the rest of the
//! table.

use crate::config::{DatabaseConfig, CURSOR_PREFETCH_ROWS};
use crate::error::{DumpError, DumpResult};
use crate::estimate;
use crate::models::{Row, Table, TableSizeEstimate};
use crate::source::{select_all_query, RowCursor, RowSource};
use crossbeam_channel::{bounded, Receiver, Sender};
use mysql::prelude::Queryable;
use mysql::{Conn, DriverError, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, PooledConn, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, warn};

// Server error codes, see include/mysqld_error.h
const ER_BAD_DB_ERROR: u16 = 1049;
const ER_PARSE_ERROR: u16 = 1064;
const ER_NO_SUCH_TABLE: u16 = 1146;
const ER_SERVER_SHUTDOWN: u16 = 1053;
const ER_QUERY_INTERRUPTED: u16 = 1317;

const CATALOG_SIZE_QUERY: &str = "SELECT TABLE_ROWS, DATA_LENGTH \
     FROM information_schema.TABLES \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?";

const CATALOG_TYPES_QUERY: &str = "SELECT COLUMN_TYPE \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

pub struct MySqlSource {
    pool: Pool,
    opts: Opts,
    pool_size: usize,
}

impl MySqlSource {
    pub fn connect(config: &DatabaseConfig) -> DumpResult<Self> {
        let pool_size = config.pool_size.max(1);
        let constraints = PoolConstraints::new(1, pool_size).ok_or_else(|| {
            DumpError::Config(format!("invalid pool size {}", config.pool_size))
        })?;
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass(config.resolved_password())
            .db_name(config.dbname.clone())
            .pool_opts(PoolOpts::default().with_constraints(constraints))
            .into();

        let pool = Pool::new(opts.clone()).map_err(map_error)?;
        debug!(host = %config.host, port = config.port, pool_size, "Connected to MySQL");
        Ok(Self {
            pool,
            opts,
            pool_size,
        })
    }
}

impl RowSource for MySqlSource {
    fn estimate_size(&self, table: &Table) -> DumpResult<TableSizeEstimate> {
        let mut conn = self.pool.get_conn().map_err(map_error)?;
        let params = (table.schema(), table.name());

        let catalog: Option<(Option<u64>, Option<u64>)> =
            conn.exec_first(CATALOG_SIZE_QUERY, params).map_err(map_error)?;
        let (rows, data_length) =
            catalog.ok_or_else(|| DumpError::ElementNotFound(format!("table {}", table)))?;

        let row_width = if data_length.unwrap_or(0) == 0 {
            let types: Vec<String> = conn.exec(CATALOG_TYPES_QUERY, params).map_err(map_error)?;
            Some(estimate::row_width(types.iter().map(String::as_str)))
        } else {
            None
        };

        Ok(estimate::from_catalog(rows, data_length, row_width))
    }

    fn open_cursor(&self, table: &Table) -> DumpResult<Box<dyn RowCursor>> {
        Ok(Box::new(MySqlCursor::open(
            self.pool.clone(),
            self.opts.clone(),
            table,
        )?))
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.pool_size)
    }
}

/// Connection id of the query a reader thread is running.
///
/// The reader clears it before its connection goes back to the pool, and the
/// interrupt runs under the same lock, so a kill can never reach a connection
/// that has been handed to another cursor.
#[derive(Debug, Default)]
struct RunningQuery {
    connection_id: Mutex<Option<u32>>,
}

impl RunningQuery {
    fn start(&self, connection_id: u32) {
        *self.lock() = Some(connection_id);
    }

    fn release(&self) {
        self.lock().take();
    }

    /// Runs `kill` against the connection if its query is still running.
    /// Returns whether anything was interrupted.
    fn interrupt<F>(&self, kill: F) -> DumpResult<bool>
    where
        F: FnOnce(u32) -> DumpResult<()>,
    {
        let running = self.lock();
        match *running {
            Some(connection_id) => kill(connection_id).map(|_| true),
            None => Ok(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<u32>> {
        self.connection_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct MySqlCursor {
    columns: Vec<String>,
    rows: Option<Receiver<DumpResult<Row>>>,
    running: Arc<RunningQuery>,
    opts: Opts,
}

impl MySqlCursor {
    fn open(pool: Pool, opts: Opts, table: &Table) -> DumpResult<Self> {
        let query = select_all_query(table);
        let (columns_tx, columns_rx) = bounded::<DumpResult<Vec<String>>>(1);
        let (rows_tx, rows_rx) = bounded::<DumpResult<Row>>(CURSOR_PREFETCH_ROWS);
        let running = Arc::new(RunningQuery::default());
        let reader_running = Arc::clone(&running);

        thread::Builder::new()
            .name(format!("cursor-{}", table))
            .spawn(move || {
                let mut conn = match pool.get_conn() {
                    Ok(conn) => conn,
                    Err(e) => {
                        let _ = columns_tx.send(Err(map_error(e)));
                        return;
                    }
                };
                reader_running.start(conn.connection_id());
                read_rows(&mut conn, &query, &columns_tx, &rows_tx);
                // The connection is returned to the pool only after this.
                reader_running.release();
            })
            .map_err(|e| DumpError::QueryFailure(format!("failed to start reader thread: {}", e)))?;

        let columns = columns_rx.recv().map_err(|_| {
            DumpError::ConnectionLost("reader thread exited before returning columns".to_string())
        })??;

        Ok(Self {
            columns,
            rows: Some(rows_rx),
            running,
            opts,
        })
    }
}

/// Streams the result set into `rows_tx` until it is exhausted, a row fails,
/// or the cursor side hangs up.
fn read_rows(
    conn: &mut PooledConn,
    query: &str,
    columns_tx: &Sender<DumpResult<Vec<String>>>,
    rows_tx: &Sender<DumpResult<Row>>,
) {
    let result = match conn.query_iter(query) {
        Ok(result) => result,
        Err(e) => {
            let _ = columns_tx.send(Err(map_error(e)));
            return;
        }
    };
    let columns: Vec<String> = result
        .columns()
        .as_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();
    if columns_tx.send(Ok(columns)).is_err() {
        return;
    }

    for row in result {
        let item = row.map(convert_row).map_err(map_error);
        let failed = item.is_err();
        // A closed receiver means the cursor was closed early.
        if rows_tx.send(item).is_err() || failed {
            break;
        }
    }
}

/// `KILL QUERY` over a short-lived connection outside the pool, so closing
/// never waits for a pooled connection to free up.
fn kill_query(opts: &Opts, connection_id: u32) -> DumpResult<()> {
    let mut admin = Conn::new(opts.clone()).map_err(map_error)?;
    admin
        .query_drop(format!("KILL QUERY {}", connection_id))
        .map_err(map_error)
}

impl RowCursor for MySqlCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> DumpResult<Option<Row>> {
        let Some(rows) = &self.rows else {
            return Ok(None);
        };
        match rows.recv() {
            Ok(item) => item.map(Some),
            // Sender dropped: the result set is exhausted.
            Err(_) => Ok(None),
        }
    }

    fn close(&mut self) -> DumpResult<()> {
        let Some(rows) = self.rows.take() else {
            return Ok(());
        };
        // Unblocks a reader waiting on a full channel.
        drop(rows);

        let opts = &self.opts;
        let interrupted = self
            .running
            .interrupt(|connection_id| {
                debug!(connection_id, "Killing unfinished query");
                kill_query(opts, connection_id)
            })?;
        debug!(columns = self.columns.len(), interrupted, "Cursor closed");
        Ok(())
    }
}

impl Drop for MySqlCursor {
    fn drop(&mut self) {
        if self.rows.is_some() {
            warn!("Cursor dropped without close");
            if let Err(e) = self.close() {
                warn!(error = %e, "Failed to stop reader");
            }
        }
    }
}

fn convert_row(mut row: mysql::Row) -> Row {
    let values = (0..row.len())
        .map(|i| row.take::<Value, _>(i).and_then(value_bytes))
        .collect();
    Row::new(values)
}

/// Raw text bytes of a value as the server would print it; `None` for NULL.
pub fn value_bytes(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(bytes),
        Value::Int(n) => Some(itoa::Buffer::new().format(n).as_bytes().to_vec()),
        Value::UInt(n) => Some(itoa::Buffer::new().format(n).as_bytes().to_vec()),
        Value::Float(f) => Some(f.to_string().into_bytes()),
        Value::Double(f) => Some(f.to_string().into_bytes()),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut s = format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            );
            if micros > 0 {
                s.push_str(&format!(".{:06}", micros));
            }
            Some(s.into_bytes())
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = days * 24 + u32::from(hours);
            let mut s = format!(
                "{}{:02}:{:02}:{:02}",
                if negative { "-" } else { "" },
                total_hours,
                minutes,
                seconds
            );
            if micros > 0 {
                s.push_str(&format!(".{:06}", micros));
            }
            Some(s.into_bytes())
        }
    }
}

pub fn map_error(err: mysql::Error) -> DumpError {
    match err {
        mysql::Error::MySqlError(e) => match e.code {
            ER_PARSE_ERROR => DumpError::QuerySyntax(e.message),
            ER_NO_SUCH_TABLE | ER_BAD_DB_ERROR => DumpError::ElementNotFound(e.message),
            ER_SERVER_SHUTDOWN | ER_QUERY_INTERRUPTED => DumpError::ConnectionLost(e.message),
            _ => DumpError::QueryFailure(format!("{} ({})", e.message, e.code)),
        },
        mysql::Error::IoError(e) => DumpError::ConnectionLost(e.to_string()),
        mysql::Error::DriverError(e) => match e {
            DriverError::ConnectTimeout
            | DriverError::CouldNotConnect(_)
            | DriverError::PacketOutOfSync
            | DriverError::UnexpectedPacket => DumpError::ConnectionLost(e.to_string()),
            _ => DumpError::QueryFailure(e.to_string()),
        },
        other => DumpError::QueryFailure(other.to_string()),
    }
}
