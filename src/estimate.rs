//! Turning catalog metadata into a [`TableSizeEstimate`].
//!
//! Estimates are advisory. They size progress bars and nothing else.

use crate::models::TableSizeEstimate;

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Width assumed for variable-length and unrecognised types.
pub const VARIABLE_WIDTH: u64 = 128;

/// Approximate on-disk bytes for one value of a MySQL column type.
/// Accepts both bare types (`int`) and full column types (`int(11) unsigned`).
pub fn type_width(data_type: &str) -> u64 {
    let base = data_type
        .split(|c: char| c == '(' || c.is_whitespace())
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    match base.as_str() {
        "TINYINT" => 1,
        "SMALLINT" => 2,
        "MEDIUMINT" => 3,
        "INT" | "INTEGER" => 4,
        "BIGINT" => 8,
        "FLOAT" => 4,
        "DOUBLE" => 8,
        "DATE" => 3,
        "TIME" => 4,
        "DATETIME" => 8,
        "TIMESTAMP" => 4,
        _ => VARIABLE_WIDTH,
    }
}

pub fn row_width<'a, I>(data_types: I) -> u64
where
    I: IntoIterator<Item = &'a str>,
{
    data_types.into_iter().map(type_width).sum()
}

/// Combines catalog figures. `data_length` wins when present; otherwise the
/// size is derived from the row count and the per-row type width.
pub fn from_catalog(
    rows: Option<u64>,
    data_length: Option<u64>,
    row_width: Option<u64>,
) -> TableSizeEstimate {
    let rows = rows.unwrap_or(0);
    let bytes = match (data_length, row_width) {
        (Some(len), _) if len > 0 => len,
        (_, Some(width)) => rows.saturating_mul(width),
        _ => 0,
    };
    TableSizeEstimate {
        rows,
        size_mb: bytes as f64 / BYTES_PER_MB,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_types() {
        assert_eq!(type_width("TINYINT"), 1);
        assert_eq!(type_width("int"), 4);
        assert_eq!(type_width("int(11) unsigned"), 4);
        assert_eq!(type_width("bigint(20)"), 8);
        assert_eq!(type_width("datetime"), 8);
        assert_eq!(type_width("timestamp"), 4);
    }

    #[test]
    fn variable_and_unknown_types() {
        assert_eq!(type_width("varchar(255)"), VARIABLE_WIDTH);
        assert_eq!(type_width("text"), VARIABLE_WIDTH);
        assert_eq!(type_width("json"), VARIABLE_WIDTH);
        assert_eq!(type_width(""), VARIABLE_WIDTH);
    }

    #[test]
    fn row_width_sums_columns() {
        assert_eq!(row_width(["bigint", "int", "varchar(64)", "date"]), 8 + 4 + 128 + 3);
        assert_eq!(row_width(Vec::<&str>::new()), 0);
    }

    #[test]
    fn catalog_data_length_wins() {
        let est = from_catalog(Some(10), Some(2 * 1024 * 1024), Some(8));
        assert_eq!(est.rows, 10);
        assert!((est.size_mb - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn falls_back_to_type_widths() {
        let est = from_catalog(Some(1024 * 1024), None, Some(12));
        assert!((est.size_mb - 12.0).abs() < f64::EPSILON);

        let est = from_catalog(Some(1024 * 1024), Some(0), Some(1));
        assert!((est.size_mb - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_figures_estimate_zero() {
        let est = from_catalog(None, None, None);
        assert_eq!(est.rows, 0);
        assert_eq!(est.size_mb, 0.0);
    }
}
