//! Hand-off of finished files to object storage via the vendor CLIs.

use crate::error::{DumpError, DumpResult};
use crate::models::Table;
use std::path::Path;
use std::process::Command;
use tracing::info;

pub trait Uploader: Send + Sync {
    /// Copies `local` to remote storage and returns its remote location.
    fn upload(&self, local: &Path, table: &Table) -> DumpResult<String>;
}

/// Shells out to a copy command: `<program> <args..> <local> <remote>`.
#[derive(Debug, Clone)]
pub struct CommandUploader {
    program: String,
    args: Vec<String>,
    prefix: String,
}

impl CommandUploader {
    pub fn new(program: &str, args: &[&str], prefix: &str) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Picks `aws s3 cp` for `s3://` and `gcloud storage cp` for `gs://`.
    pub fn for_prefix(prefix: &str) -> DumpResult<Self> {
        if prefix.starts_with("s3://") {
            Ok(Self::new("aws", &["s3", "cp", "--only-show-errors"], prefix))
        } else if prefix.starts_with("gs://") {
            Ok(Self::new("gcloud", &["storage", "cp"], prefix))
        } else {
            Err(DumpError::Config(format!(
                "unsupported upload prefix '{}' (expected s3:// or gs://)",
                prefix
            )))
        }
    }

    /// Uses a configured copy command, program first.
    pub fn from_command(command: &[String], prefix: &str) -> DumpResult<Self> {
        let Some((program, args)) = command.split_first() else {
            return Err(DumpError::Config("upload_command must not be empty".to_string()));
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Ok(Self::new(program, &args, prefix))
    }

    pub fn remote_location(&self, local: &Path) -> String {
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/{}", self.prefix, file_name)
    }
}

impl Uploader for CommandUploader {
    fn upload(&self, local: &Path, table: &Table) -> DumpResult<String> {
        let remote = self.remote_location(local);
        info!(table = %table, remote = %remote, "Uploading");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(local)
            .arg(&remote)
            .output()
            .map_err(|e| DumpError::Upload(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DumpError::Upload(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(remote)
    }
}
