//! Deferred exchange log recorder
//!
//! The request handler starts a [`RecordDraft`] as soon as the exchange
//! begins and fills it in while talking to the upstream. Once the response
//! body is streaming, [`Recorder::defer`] spawns a detached task that waits
//! for the body to end, finalizes the record and submits it to the sink.
//! Nothing here runs on the caller's response path, and no failure here can
//! reach the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{oneshot, Notify};

use super::handlers::Capture;
use crate::storage::{LogRecord, LogSink, StreamOutcome};

// ─────────────────────────────────────────────────────────────────────────────
// Record Draft
// ─────────────────────────────────────────────────────────────────────────────

/// A log record under construction
#[derive(Debug, Clone)]
pub struct RecordDraft {
    started: Instant,
    request_time: i64,
    pub request_method: String,
    pub request_url: String,
    pub request_body: String,
    pub status_code: u16,
    pub response_headers: String,
}

impl RecordDraft {
    /// Start timing an exchange now
    pub fn begin(method: &str) -> Self {
        Self {
            started: Instant::now(),
            request_time: chrono::Utc::now().timestamp_millis(),
            request_method: method.to_string(),
            request_url: String::new(),
            request_body: String::new(),
            status_code: 0,
            response_headers: "{}".to_string(),
        }
    }

    /// Set the duration and produce the final record
    pub fn finish(self, body: Bytes, outcome: StreamOutcome) -> LogRecord {
        LogRecord {
            request_url: self.request_url,
            request_method: self.request_method,
            request_time: self.request_time,
            response_duration_ms: self.started.elapsed().as_millis() as u64,
            status_code: self.status_code,
            request_body: self.request_body,
            response_headers: self.response_headers,
            response_content: body.to_vec(),
            outcome,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recorder
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when a recorder task ends, even by panic
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Schedules log persistence after responses complete
#[derive(Clone)]
pub struct Recorder {
    sink: Arc<dyn LogSink>,
    in_flight: Arc<InFlight>,
}

impl Recorder {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Record the exchange once `done` fires.
    ///
    /// Must be called from within a tokio runtime. The task is detached; use
    /// [`Recorder::drain`] at shutdown to wait for stragglers.
    pub(crate) fn defer(&self, draft: RecordDraft, done: oneshot::Receiver<Capture>) {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(self.in_flight.clone());
        let sink = self.sink.clone();

        tokio::spawn(async move {
            let _guard = guard;

            let capture = match done.await {
                Ok(capture) => capture,
                // Stream dropped without reporting; treat as a disconnect
                Err(_) => Capture {
                    body: Bytes::new(),
                    outcome: StreamOutcome::ClientDisconnected,
                },
            };

            let record = draft.finish(capture.body, capture.outcome);
            tracing::info!(
                method = %record.request_method,
                url = %record.request_url,
                status = record.status_code,
                duration_ms = record.response_duration_ms,
                bytes = record.response_content.len(),
                outcome = %record.outcome,
                "Exchange complete"
            );

            sink.submit(record);
        });
    }

    /// Number of recorder tasks still waiting on a response body
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Wait for in-flight recorder tasks, up to `timeout`.
    ///
    /// Returns false if some were still pending when the timeout expired.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait_idle = async {
            loop {
                let notified = self.in_flight.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        match tokio::time::timeout(timeout, wait_idle).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    pending = self.in_flight(),
                    "Exchange recorders still pending at shutdown"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::MemorySink;

    fn draft() -> RecordDraft {
        let mut draft = RecordDraft::begin("POST");
        draft.request_url = "http://up/v1/chat".to_string();
        draft.request_body = r#"{"model":"b"}"#.to_string();
        draft.status_code = 200;
        draft
    }

    #[tokio::test]
    async fn test_record_waits_for_stream_end() {
        let sink = Arc::new(MemorySink::default());
        let recorder = Recorder::new(sink.clone());

        let (tx, rx) = oneshot::channel();
        recorder.defer(draft(), rx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.records().is_empty());
        assert_eq!(recorder.in_flight(), 1);

        tx.send(Capture {
            body: Bytes::from_static(b"hello"),
            outcome: StreamOutcome::Complete,
        })
        .unwrap();
        assert!(recorder.drain(Duration::from_secs(1)).await);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].response_content, b"hello");
        assert_eq!(records[0].status_code, 200);
        assert_eq!(records[0].outcome, StreamOutcome::Complete);
        assert!(records[0].response_duration_ms >= 20);
    }

    #[tokio::test]
    async fn test_dropped_sender_records_disconnect() {
        let sink = Arc::new(MemorySink::default());
        let recorder = Recorder::new(sink.clone());

        let (tx, rx) = oneshot::channel::<Capture>();
        recorder.defer(draft(), rx);
        drop(tx);

        assert!(recorder.drain(Duration::from_secs(1)).await);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, StreamOutcome::ClientDisconnected);
        assert!(records[0].response_content.is_empty());
    }

    #[tokio::test]
    async fn test_drain_times_out_with_pending_stream() {
        let recorder = Recorder::new(Arc::new(MemorySink::default()));
        let (_tx, rx) = oneshot::channel();
        recorder.defer(draft(), rx);

        assert!(!recorder.drain(Duration::from_millis(20)).await);
        assert_eq!(recorder.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_drain_with_nothing_in_flight() {
        let recorder = Recorder::new(Arc::new(MemorySink::default()));
        assert!(recorder.drain(Duration::from_millis(10)).await);
    }

    #[test]
    fn test_finish_sets_duration_and_fields() {
        let record = draft().finish(Bytes::from_static(b"x"), StreamOutcome::UpstreamError);
        assert_eq!(record.request_method, "POST");
        assert_eq!(record.request_url, "http://up/v1/chat");
        assert_eq!(record.outcome, StreamOutcome::UpstreamError);
        assert!(record.request_time > 0);
    }
}
