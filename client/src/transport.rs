//! Timeout-bounded message channel the correlator drives.

use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::codec::{JsonRpcReader, JsonRpcWriter};

const READER_CHANNEL_CAPACITY: usize = 64;

/// Bidirectional framed-message channel.
///
/// `write` is fire-and-forget and fails loudly when the channel is gone.
/// `read` blocks up to `timeout` for one whole message; `Ok(None)` covers
/// both "nothing arrived in time" and "stream closed cleanly" — callers
/// treat the two identically. Transport-level failures (malformed framing,
/// pipe errors mid-frame) are `Err` and abort the session.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn write(&mut self, message: &Value) -> Result<()>;
    async fn read(&mut self, timeout: Duration) -> Result<Option<Value>>;
}

/// [`Transport`] over a Content-Length framed reader/writer pair, normally
/// a child process's stdout/stdin.
///
/// Decoding runs on a dedicated task that owns the read half and feeds a
/// channel; `read` applies its timeout to the channel receive, which is
/// cancel-safe. A frame that is mid-arrival when a read window closes is
/// therefore never torn — the task keeps assembling it and the next read
/// picks it up whole.
pub struct FramedTransport<W> {
    incoming: mpsc::Receiver<Result<Value>>,
    writer: JsonRpcWriter<W>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl<W: AsyncWrite + Unpin> FramedTransport<W> {
    /// Wire up a transport. Must be called inside a tokio runtime: the
    /// read half moves onto a spawned decoder task.
    pub fn new<R>(read_half: R, write_half: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (frame_tx, frame_rx) = mpsc::channel(READER_CHANNEL_CAPACITY);
        let reader_handle = tokio::spawn(async move {
            let mut reader = JsonRpcReader::new(read_half);
            loop {
                match reader.read_message().await {
                    Ok(Some(message)) => {
                        if frame_tx.send(Ok(message)).await.is_err() {
                            break; // transport dropped
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        let _ = frame_tx.send(Err(error)).await;
                        break;
                    }
                }
            }
        });

        Self {
            incoming: frame_rx,
            writer: JsonRpcWriter::new(write_half),
            reader_handle,
        }
    }
}

impl<W> Drop for FramedTransport<W> {
    fn drop(&mut self) {
        // The decoder task owns the read half; reclaim it promptly instead
        // of leaving the task parked on a dead stream.
        self.reader_handle.abort();
    }
}

impl<W: AsyncWrite + Unpin> Transport for FramedTransport<W> {
    async fn write(&mut self, message: &Value) -> Result<()> {
        self.writer.write_message(message).await
    }

    async fn read(&mut self, timeout: Duration) -> Result<Option<Value>> {
        match tokio::time::timeout(timeout, self.incoming.recv()).await {
            Ok(Some(Ok(message))) => Ok(Some(message)),
            Ok(Some(Err(error))) => Err(error),
            // Decoder task finished: clean EOF (an error would have been
            // delivered through the channel first).
            Ok(None) => Ok(None),
            Err(_) => {
                tracing::trace!(?timeout, "read window elapsed without a message");
                Ok(None)
            }
        }
    }
}
