//! Exchange log persistence
//!
//! Finished [`LogRecord`]s are handed to a [`LogSink`]. The real sinks queue
//! records for a dedicated writer thread so request tasks never block on disk.
//!
//! # Architecture
//!
//! ```text
//! Deferred recorder (async task)
//!     │
//!     └──→ BackgroundWriter.submit()
//!             │
//!             └──→ std::sync::mpsc::SyncSender (bounded, try_send)
//!                     │
//!                     └──→ Dedicated Writer Thread
//!                             │
//!                             ├──→ Batch buffer (batch_size or flush interval)
//!                             └──→ RecordStore (SQLite in WAL mode, or JSONL)
//! ```

mod jsonl;
mod record;
mod sqlite;

pub use jsonl::JsonlStore;
pub use record::{LogRecord, StreamOutcome};
pub use sqlite::{recent, SqliteStore};

use crate::config::{StorageBackend, StorageConfig};
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long shutdown waits for the writer to drain
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Retention cleanup cadence
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 3600);

// ─────────────────────────────────────────────────────────────────────────────
// Sink
// ─────────────────────────────────────────────────────────────────────────────

/// Receiver of finished exchange records
///
/// `submit` must not block: it is called from async request tasks.
pub trait LogSink: Send + Sync {
    /// Queue a record for persistence. Failures are reported, never returned.
    fn submit(&self, record: LogRecord);

    /// Flush anything queued and stop accepting records
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Sink for `backend = "none"`
#[derive(Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn submit(&self, record: LogRecord) {
        tracing::trace!(url = %record.request_url, "Exchange log discarded (storage disabled)");
    }
}

/// Open the sink selected by the storage config
pub fn open_sink(config: &StorageConfig) -> Result<Arc<dyn LogSink>> {
    let settings = WriterSettings::from(config);

    let sink: Arc<dyn LogSink> = match config.backend {
        StorageBackend::Sqlite => {
            let store = SqliteStore::open(&config.db_path, config.retention_days)?;
            tracing::info!(path = %config.db_path.display(), "Exchange logs stored in SQLite");
            Arc::new(BackgroundWriter::spawn("sqlite", store, settings)?)
        }
        StorageBackend::Jsonl => {
            let store = JsonlStore::open(&config.log_dir)?;
            tracing::info!(path = %store.path().display(), "Exchange logs stored as JSON lines");
            Arc::new(BackgroundWriter::spawn("jsonl", store, settings)?)
        }
        StorageBackend::None => {
            tracing::info!("Exchange log storage disabled");
            Arc::new(NullSink)
        }
    };

    Ok(sink)
}

// ─────────────────────────────────────────────────────────────────────────────
// Record Store
// ─────────────────────────────────────────────────────────────────────────────

/// Synchronous storage backend driven by the writer thread
pub trait RecordStore: Send + 'static {
    /// Persist a batch; returns how many records failed individually
    fn write_batch(&mut self, batch: &[LogRecord]) -> Result<u64>;

    /// Periodic housekeeping such as retention cleanup
    fn maintain(&mut self) -> Result<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Completion Signal
// ─────────────────────────────────────────────────────────────────────────────

/// One-shot flag a thread raises when it has finished
#[derive(Debug, Default)]
pub struct CompletionSignal {
    done: Mutex<bool>,
    cvar: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        let mut done = self.done.lock().unwrap_or_else(|e| e.into_inner());
        *done = true;
        self.cvar.notify_all();
    }

    /// Wait until completed; false on timeout
    pub fn wait(&self, timeout: Duration) -> bool {
        let done = self.done.lock().unwrap_or_else(|e| e.into_inner());
        let (done, _) = self
            .cvar
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap_or_else(|e| e.into_inner());
        *done
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer Metrics
// ─────────────────────────────────────────────────────────────────────────────

/// Counters for the writer itself
#[derive(Debug, Default)]
pub struct WriterMetrics {
    /// Records successfully stored
    pub stored: AtomicU64,
    /// Records dropped due to backpressure (channel full)
    pub dropped: AtomicU64,
    /// Records that failed to store
    pub failed: AtomicU64,
    /// Number of batch flushes
    pub flush_count: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub stored: u64,
    pub dropped: u64,
    pub failed: u64,
    pub flush_count: u64,
}

impl WriterMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            stored: self.stored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Background Writer
// ─────────────────────────────────────────────────────────────────────────────

/// Writer thread tuning
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub channel_buffer: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl From<&StorageConfig> for WriterSettings {
    fn from(config: &StorageConfig) -> Self {
        Self {
            channel_buffer: config.channel_buffer.max(1),
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_secs(config.flush_interval_secs.max(1)),
        }
    }
}

enum WriterCommand {
    Store(Box<LogRecord>),
    Shutdown,
}

/// Sink that feeds a [`RecordStore`] on a dedicated OS thread
pub struct BackgroundWriter {
    tx: SyncSender<WriterCommand>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    completion: Arc<CompletionSignal>,
    metrics: Arc<WriterMetrics>,
}

impl BackgroundWriter {
    /// Move `store` onto a new writer thread
    pub fn spawn<S: RecordStore>(name: &str, store: S, settings: WriterSettings) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<WriterCommand>(settings.channel_buffer);

        let metrics = Arc::new(WriterMetrics::default());
        let writer_metrics = metrics.clone();

        let completion = Arc::new(CompletionSignal::new());
        let writer_completion = completion.clone();

        // Dedicated OS thread, not a tokio task: the stores do blocking I/O
        let writer_handle = thread::Builder::new()
            .name(format!("{name}-writer"))
            .spawn(move || {
                if let Err(e) = Self::writer_thread(rx, store, settings, writer_metrics) {
                    tracing::error!(error = %e, "Exchange log writer thread error");
                }
                // Signal completion regardless of success/failure
                writer_completion.complete();
            })?;

        Ok(Self {
            tx,
            writer_handle: Mutex::new(Some(writer_handle)),
            completion,
            metrics,
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn writer_thread<S: RecordStore>(
        rx: mpsc::Receiver<WriterCommand>,
        mut store: S,
        settings: WriterSettings,
        metrics: Arc<WriterMetrics>,
    ) -> Result<()> {
        let mut batch: Vec<LogRecord> = Vec::with_capacity(settings.batch_size);
        let mut last_flush = Instant::now();

        Self::run_maintenance(&mut store);
        let mut last_maintenance = Instant::now();

        loop {
            match rx.recv_timeout(settings.flush_interval) {
                Ok(WriterCommand::Store(record)) => {
                    batch.push(*record);
                    if batch.len() >= settings.batch_size {
                        Self::flush_batch(&mut store, &mut batch, &metrics);
                        last_flush = Instant::now();
                    }
                }
                Ok(WriterCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    Self::flush_batch(&mut store, &mut batch, &metrics);
                    tracing::debug!("Exchange log writer thread shutting down");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !batch.is_empty() && last_flush.elapsed() >= settings.flush_interval {
                        Self::flush_batch(&mut store, &mut batch, &metrics);
                        last_flush = Instant::now();
                    }
                    if last_maintenance.elapsed() >= MAINTENANCE_INTERVAL {
                        Self::run_maintenance(&mut store);
                        last_maintenance = Instant::now();
                    }
                }
            }
        }

        Ok(())
    }

    fn run_maintenance<S: RecordStore>(store: &mut S) {
        if let Err(e) = store.maintain() {
            // Non-fatal: keep writing even if cleanup fails
            tracing::warn!(error = %e, "Exchange log maintenance failed");
        }
    }

    /// Write the pending batch. A failed batch is counted and dropped.
    fn flush_batch<S: RecordStore>(
        store: &mut S,
        batch: &mut Vec<LogRecord>,
        metrics: &WriterMetrics,
    ) {
        if batch.is_empty() {
            return;
        }

        let start = Instant::now();
        let count = batch.len() as u64;

        match store.write_batch(batch) {
            Ok(failed) => {
                metrics.stored.fetch_add(count - failed, Ordering::Relaxed);
                if failed > 0 {
                    metrics.failed.fetch_add(failed, Ordering::Relaxed);
                }
            }
            Err(e) => {
                metrics.failed.fetch_add(count, Ordering::Relaxed);
                tracing::error!(error = %e, records = count, "Failed to write exchange log batch");
            }
        }
        metrics.flush_count.fetch_add(1, Ordering::Relaxed);
        batch.clear();

        tracing::trace!(
            records = count,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Flushed exchange logs"
        );
    }
}

impl LogSink for BackgroundWriter {
    fn submit(&self, record: LogRecord) {
        match self.tx.try_send(WriterCommand::Store(Box::new(record))) {
            Ok(()) => {}
            Err(mpsc::TrySendError::Full(_)) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    dropped_total = self.metrics.dropped.load(Ordering::Relaxed),
                    "Exchange log backpressure: dropped record"
                );
            }
            Err(mpsc::TrySendError::Disconnected(_)) => {
                tracing::error!("Exchange log writer thread disconnected");
            }
        }
    }

    fn shutdown(&self) -> Result<()> {
        // Blocking send so the shutdown command is not lost to a full queue
        let _ = self.tx.send(WriterCommand::Shutdown);

        if !self.completion.wait(SHUTDOWN_TIMEOUT) {
            tracing::warn!(
                timeout = ?SHUTDOWN_TIMEOUT,
                "Exchange log writer did not complete in time"
            );
            return Err(anyhow::anyhow!("Shutdown timeout"));
        }

        if let Some(handle) = self
            .writer_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }

        tracing::debug!(metrics = ?self.metrics(), "Exchange log writer shutdown complete");
        Ok(())
    }
}

impl Drop for BackgroundWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(WriterCommand::Shutdown);
        if let Some(handle) = self
            .writer_handle
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }
}
