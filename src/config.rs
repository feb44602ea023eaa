use crate::error::{DumpError, DumpResult};
use crate::models::RecordFormat;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Field separator written between columns
pub const DEFAULT_DELIMITER: char = '|';

/// Written after the last column of every record
pub const DEFAULT_RECORD_TERMINATOR: char = '\n';

/// Literal written in place of SQL NULL
pub const DEFAULT_NULL_SENTINEL: &str = "NULL";

/// Number of tables dumped at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Whole-table re-runs allowed after a dropped connection
pub const DEFAULT_MAX_RETRIES: u32 = 0;

/// Capacity of the buffered writer in front of each output file
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Rows a cursor may fetch ahead of the writer
pub const CURSOR_PREFETCH_ROWS: usize = 1024;

/// Progress update interval (redraw every N rows)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Connections kept by the database pool
pub const DEFAULT_POOL_SIZE: usize = 8;

pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Extension of the per-table output files
pub const OUTPUT_EXTENSION: &str = "txt";

/// Environment variable consulted when no password is configured
pub const PASSWORD_ENV: &str = "TABLEDUMP_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: Option<String>,
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_MYSQL_PORT,
            user: "root".to_string(),
            password: None,
            dbname: None,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl DatabaseConfig {
    pub fn resolved_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var(PASSWORD_ENV).ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub output_dir: String,
    pub tables: Vec<String>,
    pub delimiter: char,
    pub record_terminator: char,
    pub null_sentinel: String,
    pub write_header: bool,
    pub max_concurrency: usize,
    pub max_retries: u32,
    /// `s3://bucket/prefix` or `gs://bucket/prefix`; uploads are skipped when unset
    pub upload_prefix: Option<String>,
    /// Copy command run as `<command..> <local> <remote>`; chosen from the prefix scheme when unset
    pub upload_command: Option<Vec<String>>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: ".".to_string(),
            tables: Vec::new(),
            delimiter: DEFAULT_DELIMITER,
            record_terminator: DEFAULT_RECORD_TERMINATOR,
            null_sentinel: DEFAULT_NULL_SENTINEL.to_string(),
            write_header: true,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            upload_prefix: None,
            upload_command: None,
        }
    }
}

impl ExportConfig {
    pub fn record_format(&self) -> RecordFormat {
        RecordFormat {
            delimiter: self.delimiter,
            record_terminator: self.record_terminator,
            null_sentinel: self.null_sentinel.clone(),
            write_header: self.write_header,
        }
    }

    /// Rejects settings that would make output ambiguous or the run unschedulable.
    /// `pool_capacity` is the number of concurrent cursors the source can serve.
    pub fn validate(&self, pool_capacity: Option<usize>) -> DumpResult<()> {
        validate_format(&self.record_format())?;
        validate_concurrency(self.max_concurrency, pool_capacity)
    }
}

/// `max_concurrency` must be at least one and, when known, no larger than the
/// number of cursors the source can serve at once.
pub fn validate_concurrency(max_concurrency: usize, capacity: Option<usize>) -> DumpResult<()> {
    if max_concurrency == 0 {
        return Err(DumpError::Config(
            "max_concurrency must be at least 1".to_string(),
        ));
    }
    match capacity {
        Some(capacity) if max_concurrency > capacity => Err(DumpError::Config(format!(
            "max_concurrency ({}) exceeds the connection pool size ({})",
            max_concurrency, capacity
        ))),
        _ => Ok(()),
    }
}

pub fn validate_format(format: &RecordFormat) -> DumpResult<()> {
    for (label, c) in [
        ("delimiter", format.delimiter),
        ("record_terminator", format.record_terminator),
    ] {
        if !c.is_ascii() {
            return Err(DumpError::Config(format!(
                "{} must be a single-byte ASCII character, got {:?}",
                label, c
            )));
        }
    }
    if format.delimiter == format.record_terminator {
        return Err(DumpError::Config(
            "delimiter and record_terminator must differ".to_string(),
        ));
    }
    if format.null_sentinel.is_empty() {
        return Err(DumpError::Config("null_sentinel must not be empty".to_string()));
    }
    if format.null_sentinel.contains(format.delimiter)
        || format.null_sentinel.contains(format.record_terminator)
    {
        return Err(DumpError::Config(format!(
            "null_sentinel {:?} collides with the delimiter or record_terminator",
            format.null_sentinel
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mysql: DatabaseConfig,
    pub export: ExportConfig,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Parses a one-character CLI value, accepting `\n`, `\t`, `\r` and `\0` escapes.
pub fn parse_char(s: &str) -> Result<char, String> {
    match s {
        "\\n" => Ok('\n'),
        "\\t" => Ok('\t'),
        "\\r" => Ok('\r'),
        "\\0" => Ok('\0'),
        _ => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(format!("expected a single character, got {:?}", s)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ExportConfig::default();
        assert!(config.validate(Some(DEFAULT_POOL_SIZE)).is_ok());
        assert_eq!(config.record_format().null_sentinel, "NULL");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let config = ExportConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(None), Err(DumpError::Config(_))));
    }

    #[test]
    fn concurrency_above_pool_is_rejected() {
        let config = ExportConfig {
            max_concurrency: 16,
            ..Default::default()
        };
        let err = config.validate(Some(8)).unwrap_err();
        assert!(err.to_string().contains("pool size"));
        assert!(config.validate(None).is_ok());
    }

    #[test]
    fn sentinel_collisions_are_rejected() {
        let config = ExportConfig {
            null_sentinel: "N|A".to_string(),
            ..Default::default()
        };
        assert!(config.validate(None).is_err());

        let config = ExportConfig {
            null_sentinel: String::new(),
            ..Default::default()
        };
        assert!(config.validate(None).is_err());
    }

    #[test]
    fn delimiter_must_differ_from_terminator_and_be_ascii() {
        let config = ExportConfig {
            delimiter: '\n',
            ..Default::default()
        };
        assert!(config.validate(None).is_err());

        let config = ExportConfig {
            delimiter: '¦',
            ..Default::default()
        };
        assert!(config.validate(None).is_err());
    }

    #[test]
    fn parse_char_handles_escapes() {
        assert_eq!(parse_char("|"), Ok('|'));
        assert_eq!(parse_char("\\t"), Ok('\t'));
        assert_eq!(parse_char("\\n"), Ok('\n'));
        assert!(parse_char("ab").is_err());
        assert!(parse_char("").is_err());
    }

    #[test]
    fn loads_toml_config() -> Result<()> {
        let toml = r#"
[mysql]
host = "db.internal"
user = "exporter"
password = "secret"
dbname = "rtr_prod0808"

[export]
output_dir = "./out"
tables = ["rtr_prod0808.uc_orders", "uc_users"]
delimiter = "\t"
max_concurrency = 2
upload_prefix = "s3://warehouse/daily"
upload_command = ["rclone", "copyto"]
"#;
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "{}", toml)?;

        let config = AppConfig::from_file(file.path())?;
        assert_eq!(config.mysql.host, "db.internal");
        assert_eq!(config.mysql.port, DEFAULT_MYSQL_PORT);
        assert_eq!(config.mysql.dbname.as_deref(), Some("rtr_prod0808"));
        assert_eq!(config.export.tables.len(), 2);
        assert_eq!(config.export.delimiter, '\t');
        assert_eq!(config.export.max_concurrency, 2);
        assert_eq!(config.export.null_sentinel, "NULL");
        assert!(config.export.write_header);
        assert_eq!(config.export.upload_prefix.as_deref(), Some("s3://warehouse/daily"));
        assert_eq!(
            config.export.upload_command,
            Some(vec!["rclone".to_string(), "copyto".to_string()])
        );
        Ok(())
    }

    #[test]
    fn missing_config_file_reports_path() {
        let err = AppConfig::from_file(Path::new("/nonexistent/tabledump.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/tabledump.toml"));
    }
}
