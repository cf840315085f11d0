//! Streaming response relay
//!
//! Upstream chunks pass through [`CaptureStream`] on their way to the caller.
//! Each chunk is yielded unchanged and appended to a capture buffer in the
//! same order, so the recorded body always equals the delivered body.
//!
//! When the stream ends (exhausted, failed or dropped because the caller went
//! away) the buffer and the outcome are sent once over a oneshot channel. The
//! deferred recorder waits on that channel.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::storage::StreamOutcome;

/// Everything the caller received, and how the stream ended
#[derive(Debug)]
pub(crate) struct Capture {
    pub body: Bytes,
    pub outcome: StreamOutcome,
}

pub(crate) struct CaptureStream<S> {
    inner: S,
    buffer: BytesMut,
    done_tx: Option<oneshot::Sender<Capture>>,
}

impl<S> CaptureStream<S> {
    pub(crate) fn new(inner: S) -> (Self, oneshot::Receiver<Capture>) {
        let (done_tx, done_rx) = oneshot::channel();
        let stream = Self {
            inner,
            buffer: BytesMut::new(),
            done_tx: Some(done_tx),
        };
        (stream, done_rx)
    }

    /// Hand the capture to the recorder; only the first call has an effect
    fn finish(&mut self, outcome: StreamOutcome) {
        if let Some(tx) = self.done_tx.take() {
            let body = std::mem::take(&mut self.buffer).freeze();
            // Receiver gone means nobody records this exchange
            let _ = tx.send(Capture { body, outcome });
        }
    }
}

impl<S, E> Stream for CaptureStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.buffer.extend_from_slice(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                tracing::warn!(
                    error = %err,
                    captured_bytes = self.buffer.len(),
                    "Upstream stream failed; truncating response"
                );
                self.finish(StreamOutcome::UpstreamError);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.finish(StreamOutcome::Complete);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for CaptureStream<S> {
    fn drop(&mut self) {
        if self.done_tx.is_some() {
            tracing::debug!(
                captured_bytes = self.buffer.len(),
                "Caller disconnected before the response finished"
            );
            self.finish(StreamOutcome::ClientDisconnected);
        }
    }
}
