use std::io;
use std::path::Path;
use thiserror::Error;

/// Errors raised while dumping a table.
///
/// Every table-level error is captured into that table's outcome; only
/// `Config` is allowed to stop a whole run before dispatch.
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0} not found")]
    ElementNotFound(String),

    #[error("query failed: {0}")]
    QueryFailure(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("query syntax error: {0}")]
    QuerySyntax(String),

    #[error("schema drift: expected {expected} columns, row has {actual}")]
    SchemaDrift { expected: usize, actual: usize },

    #[error("disk full while writing {path}")]
    DiskFull { path: String },

    #[error("permission denied for {path}")]
    PermissionDenied { path: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("upload failed: {0}")]
    Upload(String),
}

impl DumpError {
    /// Only a dropped connection is worth re-running a whole table for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DumpError::ConnectionLost(_))
    }

    pub fn from_io(err: io::Error, path: &Path) -> Self {
        let path = path.display().to_string();
        match err.kind() {
            io::ErrorKind::StorageFull => DumpError::DiskFull { path },
            io::ErrorKind::PermissionDenied => DumpError::PermissionDenied { path },
            _ => DumpError::Io { path, source: err },
        }
    }

    /// Short machine-friendly name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            DumpError::Config(_) => "config",
            DumpError::ElementNotFound(_) => "element_not_found",
            DumpError::QueryFailure(_) => "query_failure",
            DumpError::ConnectionLost(_) => "connection_lost",
            DumpError::QuerySyntax(_) => "query_syntax",
            DumpError::SchemaDrift { .. } => "schema_drift",
            DumpError::DiskFull { .. } => "disk_full",
            DumpError::PermissionDenied { .. } => "permission_denied",
            DumpError::Io { .. } => "io",
            DumpError::Upload(_) => "upload",
        }
    }
}

pub type DumpResult<T> = std::result::Result<T, DumpError>;
