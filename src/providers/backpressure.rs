//! Streaming backpressure via bounded channels.
//!
//! Wraps stream output in a bounded `tokio::sync::mpsc::channel` so that
//! producers block when consumers fall behind. Without this, a fast
//! provider can fill unbounded memory if the consumer is slow.
//!
//! # Usage
//!
//! Applied by [`ChatService::stream`](crate::ChatService::stream) to reply
//! streams. The buffer size defaults to [`DEFAULT_STREAM_BUFFER`] and can
//! be overridden via the builder.

use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

use crate::Result;

/// Default number of items buffered between producer and consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Wrap a stream in a bounded channel for backpressure.
///
/// Spawns a producer task that reads from `inner` and sends items
/// through a bounded `mpsc` channel. When the channel is full, the
/// producer waits until the consumer reads. If the consumer drops
/// the stream, the producer stops and drops `inner` with it.
///
/// # Panics
///
/// Requires a tokio runtime context (called within an async fn).
pub fn bounded_stream<T: Send + 'static>(
    inner: Pin<Box<dyn Stream<Item = Result<T>> + Send>>,
    buffer_size: usize,
) -> Pin<Box<dyn Stream<Item = Result<T>> + Send>> {
    let (tx, rx) = tokio::sync::mpsc::channel(buffer_size.max(1));

    tokio::spawn(async move {
        let mut inner = inner;
        loop {
            tokio::select! {
                item = inner.next() => match item {
                    Some(item) => {
                        if tx.send(item).await.is_err() {
                            break; // receiver dropped
                        }
                    }
                    None => break,
                },
                () = tx.closed() => break,
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}
