// JSON Lines exchange log store
//
// One JSON object per line, one file per relay run:
//   model-relay-YYYYMMDD-HHMMSS.jsonl
// Example: jq 'select(.status_code >= 400) | .request_url' logs/exchanges/*.jsonl

use super::{LogRecord, RecordStore};
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct JsonlStore {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlStore {
    /// Create the log directory and open this run's file in append mode
    pub fn open(log_dir: &Path) -> Result<Self> {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;

        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let path = log_dir.join(format!("model-relay-{stamp}.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for JsonlStore {
    fn write_batch(&mut self, batch: &[LogRecord]) -> Result<u64> {
        let mut failed = 0u64;

        for record in batch {
            let line = match serde_json::to_string(record) {
                Ok(line) => line,
                Err(e) => {
                    failed += 1;
                    tracing::warn!(url = %record.request_url, error = %e, "Failed to serialize exchange log");
                    continue;
                }
            };
            writeln!(self.writer, "{line}").context("Failed to write to log file")?;
        }

        // Flush per batch so logs are visible even if the process crashes
        self.writer.flush().context("Failed to flush log file")?;
        Ok(failed)
    }
}
