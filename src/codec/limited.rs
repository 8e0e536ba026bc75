use std::cmp;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::Source;
use crate::protocol::ParseError;

/// Effectively no cap; body framing provides the real termination.
pub(crate) const NO_LIMIT: u64 = u64::MAX;

/// A byte-capped reader sitting between the transport and the line buffer.
///
/// The cap bounds how much a single request head may pull off the transport:
/// the connection arms it with the header limit before parsing and raises it
/// to [`NO_LIMIT`] once the headers are in, so bodies are bounded only by
/// their own framing. A read against an exhausted cap reports end-of-stream,
/// which the request decoder turns into a header-oversize error.
pub(crate) struct LimitedReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    remaining: u64,
}

impl LimitedReader {
    pub(crate) fn new(inner: Box<dyn AsyncRead + Send + Unpin>, limit: u64) -> Self {
        Self { inner, remaining: limit }
    }

    pub(crate) fn set_limit(&mut self, limit: u64) {
        self.remaining = limit;
    }
}

impl Source for LimitedReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ParseError> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let n = cmp::min(buf.len() as u64, self.remaining) as usize;
        let read = self.inner.read(&mut buf[..n]).await.map_err(ParseError::io)?;
        self.remaining -= read as u64;
        Ok(read)
    }

    fn exhausted(&self) -> bool {
        self.remaining == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stops_at_the_cap() {
        let mut reader = LimitedReader::new(Box::new(&b"abcdef"[..]), 4);
        let mut buf = [0u8; 8];

        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        assert!(reader.exhausted());

        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn raising_the_cap_resumes_reading() {
        let mut reader = LimitedReader::new(Box::new(&b"abcdef"[..]), 2);
        let mut buf = [0u8; 8];

        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);

        reader.set_limit(NO_LIMIT);
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"cdef");
    }
}
