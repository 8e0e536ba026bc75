use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::protocol::SendError;

const WRITE_BUF_SIZE: usize = 4096;

/// The connection's buffered write half.
///
/// Two parties write into the same buffer during one request: the handler
/// (through [`ResponseWriter`]) and the body's expect-continue wrapper, which
/// emits the interim `100 Continue` line on the first body read. Both hold a
/// clone of this handle. The mutex is per-connection and never contended,
/// because execution within a connection is strictly sequential; it stands in
/// for the aliased pointer a garbage-collected runtime would use.
#[derive(Clone)]
pub(crate) struct ResponseBuffer {
    inner: Arc<Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>>,
}

impl ResponseBuffer {
    pub(crate) fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        Self { inner: Arc::new(Mutex::new(BufWriter::with_capacity(WRITE_BUF_SIZE, writer))) }
    }

    pub(crate) async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        self.inner.lock().await.write_all(buf).await
    }

    pub(crate) async fn flush(&self) -> io::Result<()> {
        self.inner.lock().await.flush().await
    }
}

/// The raw byte sink handed to handlers.
///
/// Handlers write the entire response through it: status line, headers and
/// body. The core contributes nothing of its own except the conditional
/// `100 Continue` interim line and the final flush after the handler returns.
pub struct ResponseWriter {
    buffer: ResponseBuffer,
}

impl ResponseWriter {
    pub(crate) fn new(buffer: ResponseBuffer) -> Self {
        Self { buffer }
    }

    /// Writes `buf` into the response buffer, returning the number of bytes
    /// accepted (always the full slice).
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, SendError> {
        self.buffer.write_all(buf).await.map_err(SendError::io)?;
        Ok(buf.len())
    }

    /// Writes the whole of `buf` into the response buffer.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), SendError> {
        self.buffer.write_all(buf).await.map_err(SendError::io)
    }
}
