//! Tabledump: bulk export of relational tables to delimited flat files
//!
//! Each table is read through a streaming cursor and written to its own file,
//! one record per row, with a column-name header. Several tables are dumped at
//! once by a bounded pool of workers, and one table's failure never affects
//! another's.
//!
//! # Pipeline
//!
//! 1. **Schedule** -- Tables are queued in input order and pulled by `N` workers
//! 2. **Estimate** -- Catalog metadata gives an approximate row count for progress
//! 3. **Stream** -- A cursor yields rows one at a time; memory stays bounded
//! 4. **Encode** -- Rows become `a|b|NULL\n` records; embedded terminators are stripped
//! 5. **Write** -- A buffered, truncating sink persists records and is always flushed
//! 6. **Upload** (optional) -- Completed files are handed to an object-storage CLI
//!
//! # Output format
//!
//! - Fields separated by the delimiter (default `|`), none after the last column
//! - Records terminated by the record terminator (default `\n`)
//! - SQL NULL written as the sentinel literal (default `NULL`)
//! - Field text is not quoted; a value equal to the sentinel or containing the
//!   delimiter cannot be distinguished on read
//!
//! # Key Modules
//!
//! - [`encoder`] -- Row-to-record encoding with a pluggable byte filter
//! - [`source`] -- Row source and cursor traits, schema-drift checking
//! - [`mysql_source`] -- MySQL implementation over a connection pool
//! - [`estimate`] -- Size estimates from catalog metadata
//! - [`sink`] -- Buffered truncating output files
//! - [`dump`] -- Per-table state machine with progress and bounded retry
//! - [`scheduler`] -- Bounded worker pool with per-table outcomes
//! - [`cancel`] -- Run-wide cancellation flag
//! - [`upload`] -- Object-storage hand-off
//! - [`report`] -- Run summary and JSON report
//! - [`config`] -- Constants, config file and validation
//!
//! # Example Usage
//!
//! ```bash
//! # Dump two tables with 4 workers
//! tabledump -v dump -o out/ shop.orders shop.customers -j 4
//!
//! # Tab-separated, no header, upload to S3 when done
//! tabledump dump -o out/ shop.orders --delimiter '\t' --no-header --upload-prefix s3://bucket/dumps
//!
//! # Show catalog estimates only
//! tabledump estimate shop.orders
//! ```

pub mod cancel;
pub mod config;
pub mod dump;
pub mod encoder;
pub mod error;
pub mod estimate;
pub mod models;
pub mod mysql_source;
pub mod report;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod upload;
