use crate::config::WRITE_BUFFER_SIZE;
use crate::error::{DumpError, DumpResult};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Totals reported once a sink has been flushed and released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSummary {
    pub records: u64,
    pub bytes: u64,
}

/// Buffered, truncating writer for one output file.
///
/// `finish` flushes and releases the file. A sink dropped without `finish`
/// (e.g. on panic) still flushes, logging rather than returning any error.
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    records: u64,
    bytes: u64,
}

impl FileSink {
    /// Creates or truncates `path`. Never appends.
    pub fn create(path: &Path) -> DumpResult<Self> {
        Self::with_capacity(path, WRITE_BUFFER_SIZE)
    }

    pub fn with_capacity(path: &Path, capacity: usize) -> DumpResult<Self> {
        let file = File::create(path).map_err(|e| DumpError::from_io(e, path))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::with_capacity(capacity, file)),
            records: 0,
            bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn write_record(&mut self, record: &[u8]) -> DumpResult<()> {
        let writer = self.writer.as_mut().ok_or_else(|| DumpError::Io {
            path: self.path.display().to_string(),
            source: std::io::Error::other("sink already finished"),
        })?;
        writer
            .write_all(record)
            .map_err(|e| DumpError::from_io(e, &self.path))?;
        self.records += 1;
        self.bytes += record.len() as u64;
        Ok(())
    }

    pub fn finish(mut self) -> DumpResult<SinkSummary> {
        self.close()?;
        Ok(SinkSummary {
            records: self.records,
            bytes: self.bytes,
        })
    }

    fn close(&mut self) -> DumpResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| DumpError::from_io(e, &self.path))?;
        }
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "Failed to flush output on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finish_flushes_everything() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");

        let mut sink = FileSink::with_capacity(&path, 16).unwrap();
        for i in 0..100 {
            sink.write_record(format!("{}|row\n", i).as_bytes()).unwrap();
        }
        let summary = sink.finish().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(summary.records, 100);
        assert_eq!(summary.bytes, contents.len() as u64);
        assert_eq!(contents.lines().count(), 100);
    }

    #[test]
    fn create_truncates_existing_output() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, "stale contents from an earlier run\n").unwrap();

        let mut sink = FileSink::create(&path).unwrap();
        sink.write_record(b"fresh\n").unwrap();
        sink.finish().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[test]
    fn drop_flushes_buffered_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        {
            let mut sink = FileSink::create(&path).unwrap();
            sink.write_record(b"partial\n").unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "partial\n");
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no/such/dir/out.txt");
        let err = FileSink::create(&path).err().unwrap();
        assert_eq!(err.kind(), "io");
    }
}
