//! Content-Length framing for JSON-RPC over byte streams.
//!
//! The wire format is the LSP one: `Content-Length: N\r\n\r\n{json}`.
//! [`JsonRpcReader`] and [`JsonRpcWriter`] frame and unframe whole
//! `serde_json::Value` messages over any async reader/writer pair.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single message body (8 MiB). Symbol-search responses on
/// large codebases run big, but nothing legitimate approaches this.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Reads framed JSON-RPC messages from an async byte stream.
pub struct JsonRpcReader<R> {
    stream: BufReader<R>,
}

impl<R: AsyncRead + Unpin> JsonRpcReader<R> {
    pub fn new(stream: R) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Read one complete message.
    ///
    /// Returns `Ok(None)` when the stream is cleanly closed at a frame
    /// boundary. EOF inside a frame, a missing or invalid `Content-Length`
    /// header, an oversized body, or an unparseable body are all errors.
    pub async fn read_message(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(body_len) = self.read_content_length().await? else {
            return Ok(None);
        };

        if body_len > MAX_BODY_BYTES {
            bail!("refusing {body_len}-byte frame (limit {MAX_BODY_BYTES})");
        }

        let mut body = vec![0u8; body_len];
        self.stream
            .read_exact(&mut body)
            .await
            .context("reading message body")?;

        serde_json::from_slice(&body)
            .context("parsing message body as JSON")
            .map(Some)
    }

    /// Consume the header block and return the declared body length, or
    /// `None` on EOF at a frame boundary.
    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        let mut declared: Option<usize> = None;
        let mut line = String::new();
        let mut mid_frame = false;

        loop {
            line.clear();
            let n = self
                .stream
                .read_line(&mut line)
                .await
                .context("reading frame header")?;

            if n == 0 {
                // EOF between frames is a clean shutdown; EOF after any
                // header bytes means the peer died mid-frame.
                if mid_frame {
                    bail!("stream closed inside frame headers");
                }
                return Ok(None);
            }
            mid_frame = true;

            let header = line.trim();
            if header.is_empty() {
                break;
            }

            if let Some((name, value)) = header.split_once(':')
                && name.trim().eq_ignore_ascii_case("Content-Length")
            {
                declared = Some(
                    value
                        .trim()
                        .parse()
                        .with_context(|| format!("bad Content-Length value {:?}", value.trim()))?,
                );
            }
            // Other headers (Content-Type) are legal and ignored.
        }

        match declared {
            Some(len) => Ok(Some(len)),
            None => bail!("frame headers ended without Content-Length"),
        }
    }
}

/// Writes framed JSON-RPC messages to an async byte stream.
pub struct JsonRpcWriter<W> {
    stream: W,
}

impl<W: AsyncWrite + Unpin> JsonRpcWriter<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    /// Serialize `message` and write it as one frame. Flushes, so the peer
    /// sees the message immediately.
    pub async fn write_message(&mut self, message: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_string(message).context("serializing message")?;
        let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());

        self.stream
            .write_all(frame.as_bytes())
            .await
            .context("writing frame")?;
        self.stream.flush().await.context("flushing frame")?;
        Ok(())
    }
}
