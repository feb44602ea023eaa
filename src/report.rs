use crate::models::{DumpOutcome, DumpStatus, UploadStatus};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_rows: u64,
    pub total_bytes: u64,
    pub duration_secs: f64,
}

impl RunSummary {
    pub fn from_outcomes(outcomes: &[DumpOutcome], duration: Duration) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            duration_secs: duration.as_secs_f64(),
            ..Default::default()
        };
        for outcome in outcomes {
            match &outcome.status {
                DumpStatus::Completed { rows, bytes, .. } => {
                    summary.completed += 1;
                    summary.total_rows += rows;
                    summary.total_bytes += bytes;
                }
                DumpStatus::Failed { .. } => summary.failed += 1,
                DumpStatus::Cancelled { .. } => summary.cancelled += 1,
            }
        }
        summary
    }

    /// Zero only when every table completed.
    pub fn exit_code(&self) -> u8 {
        if self.failed == 0 && self.cancelled == 0 {
            0
        } else {
            1
        }
    }

    pub fn describe(&self) -> &'static str {
        if self.total == 0 {
            "nothing to do"
        } else if self.completed == self.total {
            "all tables completed"
        } else if self.completed == 0 {
            "no table completed"
        } else {
            "partial success"
        }
    }
}

fn outcome_json(outcome: &DumpOutcome) -> serde_json::Value {
    let mut entry = json!({
        "table": outcome.table.to_string(),
        "status": outcome.label(),
        "rows": outcome.rows(),
        "attempts": outcome.attempts,
        "duration_seconds": outcome.elapsed.as_secs_f64(),
    });
    match &outcome.status {
        DumpStatus::Completed { bytes, path, upload, .. } => {
            entry["bytes"] = json!(bytes);
            entry["path"] = json!(path.display().to_string());
            match upload {
                Some(UploadStatus::Uploaded(remote)) => entry["remote"] = json!(remote),
                Some(UploadStatus::Failed(e)) => entry["upload_error"] = json!(e.to_string()),
                None => {}
            }
        }
        DumpStatus::Failed { error, .. } => {
            entry["error_kind"] = json!(error.kind());
            entry["error"] = json!(error.to_string());
        }
        DumpStatus::Cancelled { started, .. } => {
            entry["started"] = json!(started);
        }
    }
    entry
}

/// Writes `report_<YYYYmmdd_HHMMSS>.json` into `output_dir` and returns its path.
/// An existing report is never overwritten; later reports in the same second
/// get a `_1`, `_2`, ... suffix.
pub fn write_json_report(
    output_dir: &Path,
    outcomes: &[DumpOutcome],
    summary: &RunSummary,
) -> Result<PathBuf> {
    let report = json!({
        "generated_at": chrono::Local::now().to_rfc3339(),
        "summary": summary,
        "details": outcomes.iter().map(outcome_json).collect::<Vec<_>>(),
    });

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let (path, file) = create_report_file(output_dir, &stamp)?;
    serde_json::to_writer_pretty(BufWriter::new(file), &report)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(path)
}

fn create_report_file(output_dir: &Path, stamp: &str) -> Result<(PathBuf, File)> {
    for attempt in 0u32.. {
        let name = match attempt {
            0 => format!("report_{}.json", stamp),
            n => format!("report_{}_{}.json", stamp, n),
        };
        let path = output_dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create report: {}", path.display()))
            }
        }
    }
    anyhow::bail!("No free report name for {} in {}", stamp, output_dir.display())
}

pub fn print_summary(outcomes: &[DumpOutcome], summary: &RunSummary) {
    println!();
    println!("=== Summary ===");
    for outcome in outcomes {
        let detail = match &outcome.status {
            DumpStatus::Completed { path, upload, .. } => match upload {
                Some(UploadStatus::Uploaded(remote)) => remote.clone(),
                Some(UploadStatus::Failed(e)) => format!("{} (upload failed: {})", path.display(), e),
                None => path.display().to_string(),
            },
            DumpStatus::Failed { error, .. } => error.to_string(),
            DumpStatus::Cancelled { started: false, .. } => "not started".to_string(),
            DumpStatus::Cancelled { .. } => "stopped early, output incomplete".to_string(),
        };
        println!(
            "{:<10} {:<40} {:>12} rows  {:>8.2}s  {}",
            outcome.label(),
            outcome.table.to_string(),
            outcome.rows(),
            outcome.elapsed.as_secs_f64(),
            detail
        );
    }
    println!();
    println!("Tables:     {} ({})", summary.total, summary.describe());
    println!("Completed:  {}", summary.completed);
    println!("Failed:     {}", summary.failed);
    println!("Cancelled:  {}", summary.cancelled);
    println!("Rows:       {}", summary.total_rows);
    println!("Time:       {:.2}s", summary.duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DumpError;
    use crate::models::Table;
    use tempfile::TempDir;

    fn outcome(seq: usize, status: DumpStatus) -> DumpOutcome {
        DumpOutcome {
            seq,
            table: Table::new("shop", &format!("t{}", seq)).unwrap(),
            elapsed: Duration::from_millis(10),
            attempts: 1,
            status,
        }
    }

    fn completed(seq: usize, rows: u64) -> DumpOutcome {
        outcome(
            seq,
            DumpStatus::Completed {
                rows,
                bytes: rows * 10,
                path: PathBuf::from(format!("shop.t{}.txt", seq)),
                upload: None,
            },
        )
    }

    #[test]
    fn summary_counts_each_status() {
        let outcomes = vec![
            completed(0, 5),
            completed(1, 7),
            outcome(
                2,
                DumpStatus::Failed {
                    error: DumpError::QuerySyntax("near FROM".into()),
                    rows: 0,
                },
            ),
            outcome(3, DumpStatus::Cancelled { rows: 0, started: false }),
        ];
        let summary = RunSummary::from_outcomes(&outcomes, Duration::from_secs(2));
        assert_eq!(summary.total, 4);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.total_rows, 12);
        assert_eq!(summary.total_bytes, 120);
        assert_eq!(summary.describe(), "partial success");
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn all_completed_exits_zero() {
        let summary = RunSummary::from_outcomes(&[completed(0, 1)], Duration::ZERO);
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(summary.describe(), "all tables completed");
    }

    #[test]
    fn json_report_lists_every_table() -> Result<()> {
        let dir = TempDir::new()?;
        let outcomes = vec![
            completed(0, 3),
            outcome(
                1,
                DumpStatus::Failed {
                    error: DumpError::SchemaDrift { expected: 2, actual: 3 },
                    rows: 1,
                },
            ),
        ];
        let summary = RunSummary::from_outcomes(&outcomes, Duration::from_secs(1));
        let path = write_json_report(dir.path(), &outcomes, &summary)?;

        let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
        assert_eq!(report["summary"]["completed"], 1);
        assert_eq!(report["summary"]["failed"], 1);
        let details = report["details"].as_array().unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0]["status"], "COMPLETED");
        assert_eq!(details[1]["error_kind"], "schema_drift");
        Ok(())
    }

    #[test]
    fn back_to_back_reports_are_both_kept() -> Result<()> {
        let dir = TempDir::new()?;
        let summary = RunSummary::from_outcomes(&[completed(0, 1)], Duration::ZERO);

        let first = write_json_report(dir.path(), &[completed(0, 1)], &summary)?;
        let second = write_json_report(dir.path(), &[], &summary)?;

        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
        let first: serde_json::Value = serde_json::from_str(&fs::read_to_string(first)?)?;
        assert_eq!(first["details"].as_array().map(Vec::len), Some(1));
        Ok(())
    }

    #[test]
    fn report_name_carries_local_timestamp() -> Result<()> {
        let dir = TempDir::new()?;
        let (path, _) = create_report_file(dir.path(), "20240115_103000")?;
        assert_eq!(path.file_name().unwrap(), "report_20240115_103000.json");
        let (path, _) = create_report_file(dir.path(), "20240115_103000")?;
        assert_eq!(path.file_name().unwrap(), "report_20240115_103000_1.json");
        Ok(())
    }
}
