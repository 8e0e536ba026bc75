use std::cmp;
use std::io;

use bytes::{Bytes, BytesMut};

use crate::protocol::ParseError;

/// Size of the fixed in-memory read buffer. Also the multipart peek window.
pub(crate) const BUF_SIZE: usize = 4096;

/// A byte source the buffered reader can refill from.
///
/// `exhausted` lets the request decoder tell a capped-out reader apart from a
/// peer that closed the transport; only [`LimitedReader`](super::LimitedReader)
/// overrides it.
pub(crate) trait Source {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ParseError>;

    fn exhausted(&self) -> bool {
        false
    }
}

/// A line-oriented buffered reader with a fixed 4 KiB window.
///
/// This is the single reader every downstream consumer shares: the header
/// decoder reads CRLF lines off it, the body variants read and peek through
/// it, and the multipart splitter layers a second instance of it over the
/// body stream. A line longer than the buffer is assembled transparently from
/// fragments; the caller always observes one logical line without its
/// terminator.
pub(crate) struct BufferedReader<S> {
    source: S,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
}

impl<S: Source> BufferedReader<S> {
    pub(crate) fn new(source: S) -> Self {
        Self { source, buf: vec![0u8; BUF_SIZE].into_boxed_slice(), pos: 0, filled: 0 }
    }

    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    pub(crate) fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Number of bytes currently sitting in the buffer.
    pub(crate) fn buffered(&self) -> usize {
        self.filled - self.pos
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
        }
    }

    /// Pulls more bytes from the source into the buffer. Returns 0 when the
    /// source is at end-of-stream or the buffer is already full.
    async fn fill(&mut self) -> Result<usize, ParseError> {
        if self.filled == self.buf.len() {
            self.compact();
        }
        if self.filled == self.buf.len() {
            return Ok(0);
        }
        let n = self.source.read(&mut self.buf[self.filled..]).await?;
        self.filled += n;
        Ok(n)
    }

    /// Returns up to `n` bytes without consuming them, forcing fills until
    /// the buffer holds `n` bytes or the source ends. A shorter slice than
    /// requested therefore means the source is at end-of-stream.
    pub(crate) async fn peek(&mut self, n: usize) -> Result<&[u8], ParseError> {
        let n = cmp::min(n, self.buf.len());
        while self.buffered() < n {
            if self.fill().await? == 0 {
                break;
            }
        }
        let end = cmp::min(self.pos + n, self.filled);
        Ok(&self.buf[self.pos..end])
    }

    /// Reads into `dst`, serving from the buffer first. Reads at least as
    /// large as the buffer bypass it entirely.
    pub(crate) async fn read(&mut self, dst: &mut [u8]) -> Result<usize, ParseError> {
        if dst.is_empty() {
            return Ok(0);
        }
        if self.buffered() == 0 {
            if dst.len() >= self.buf.len() {
                return self.source.read(dst).await;
            }
            if self.fill().await? == 0 {
                return Ok(0);
            }
        }
        let n = cmp::min(self.buffered(), dst.len());
        dst[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    /// Reads until `dst` is full or the source ends; returns the byte count.
    pub(crate) async fn read_full(&mut self, dst: &mut [u8]) -> Result<usize, ParseError> {
        let mut total = 0;
        while total < dst.len() {
            let n = self.read(&mut dst[total..]).await?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Reads one line, consuming but not returning the terminator. A lone
    /// `\n` is tolerated the way the original line reader tolerated it.
    ///
    /// End-of-stream before the first byte of a line is reported as
    /// [`ParseError::ConnectionClosed`]; end-of-stream in the middle of a
    /// line is an `UnexpectedEof` I/O error.
    pub(crate) async fn read_line(&mut self) -> Result<Bytes, ParseError> {
        let mut line = BytesMut::new();
        loop {
            if self.buffered() == 0 && self.fill().await? == 0 {
                return Err(if line.is_empty() {
                    ParseError::ConnectionClosed
                } else {
                    ParseError::io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ended in the middle of a line",
                    ))
                });
            }
            let window = &self.buf[self.pos..self.filled];
            match window.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    line.extend_from_slice(&window[..i]);
                    self.pos += i + 1;
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                    return Ok(line.freeze());
                }
                None => {
                    line.extend_from_slice(window);
                    self.pos = self.filled;
                }
            }
        }
    }
}
