//! Streaming request bodies.
//!
//! The body a handler sees is one of three framings decided by the request
//! head: no body at all, exactly `Content-Length` bytes, or chunked transfer
//! encoding decoded on the fly. All three read through the connection's
//! shared buffered reader, so a body left unread can later be drained to
//! bring the transport back to a request boundary.

mod chunked;

use std::cmp;

use http::{header, HeaderMap, Method};

use crate::codec::{BufferedReader, LimitedReader};
use crate::protocol::body::chunked::ChunkReader;
use crate::protocol::{ParseError, ResponseBuffer};

const CONTINUE_LINE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// A streaming view of one request's body.
///
/// Reading past the end always returns 0; the framing, not the transport,
/// decides where the body stops.
pub struct Body<'conn> {
    kind: BodyKind,
    reader: &'conn mut BufferedReader<LimitedReader>,
    /// Present while a `100 Continue` is owed to the client; taken on the
    /// first read so the interim response is emitted exactly once, before
    /// any body byte is returned.
    interim: Option<ResponseBuffer>,
}

enum BodyKind {
    Empty,
    Limited { remaining: u64 },
    Chunked(ChunkReader),
}

impl<'conn> Body<'conn> {
    /// Selects the body framing for a parsed request head.
    ///
    /// Only `POST` and `PUT` may carry a body. `Transfer-Encoding: chunked`
    /// wins over `Content-Length`; a missing or malformed length means no
    /// body. When the client sent `Expect: 100-continue` and a body is
    /// expected, the interim response is armed here and fired by the first
    /// read.
    pub(crate) fn setup(
        method: &Method,
        headers: &HeaderMap,
        reader: &'conn mut BufferedReader<LimitedReader>,
        response: &ResponseBuffer,
    ) -> Body<'conn> {
        let kind = if !matches!(method, &Method::POST | &Method::PUT) {
            BodyKind::Empty
        } else if is_chunked(headers) {
            BodyKind::Chunked(ChunkReader::new())
        } else if let Some(value) = headers.get(header::CONTENT_LENGTH) {
            match value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok()) {
                Some(length) => BodyKind::Limited { remaining: length },
                None => BodyKind::Empty,
            }
        } else {
            BodyKind::Empty
        };

        let interim = match kind {
            BodyKind::Empty => None,
            _ if expects_continue(headers) => Some(response.clone()),
            _ => None,
        };

        Body { kind, reader, interim }
    }

    /// Reads up to `dst.len()` body bytes. Returns 0 at end of body.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize, ParseError> {
        if let Some(response) = self.interim.take() {
            response.write_all(CONTINUE_LINE).await.map_err(ParseError::io)?;
            response.flush().await.map_err(ParseError::io)?;
        }

        if dst.is_empty() {
            return Ok(0);
        }

        match &mut self.kind {
            BodyKind::Empty => Ok(0),
            BodyKind::Limited { remaining } => {
                if *remaining == 0 {
                    return Ok(0);
                }
                let n = cmp::min(dst.len() as u64, *remaining) as usize;
                let read = self.reader.read(&mut dst[..n]).await?;
                *remaining -= read as u64;
                Ok(read)
            }
            BodyKind::Chunked(decoder) => decoder.read(self.reader, dst).await,
        }
    }

    /// Reads the whole remaining body into `dst`; returns the byte count.
    pub async fn read_to_end(&mut self, dst: &mut Vec<u8>) -> Result<usize, ParseError> {
        let mut scratch = [0u8; 1024];
        let mut total = 0;
        loop {
            let n = self.read(&mut scratch).await?;
            if n == 0 {
                return Ok(total);
            }
            dst.extend_from_slice(&scratch[..n]);
            total += n;
        }
    }

    /// Reads and discards whatever the handler left unread, returning the
    /// number of discarded bytes. This is what keeps keep-alive safe: the
    /// next request starts at a clean byte boundary regardless of how much
    /// of this body the handler consumed.
    pub(crate) async fn drain(&mut self) -> Result<u64, ParseError> {
        let mut scratch = [0u8; 1024];
        let mut skipped = 0u64;
        loop {
            let n = self.read(&mut scratch).await?;
            if n == 0 {
                return Ok(skipped);
            }
            skipped += n as u64;
        }
    }
}

fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get(header::TRANSFER_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim() == "chunked")
        .unwrap_or(false)
}

fn expects_continue(headers: &HeaderMap) -> bool {
    headers
        .get(header::EXPECT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim() == "100-continue")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NO_LIMIT;
    use http::HeaderValue;
    use tokio::io::AsyncReadExt;

    fn reader(input: &'static [u8]) -> BufferedReader<LimitedReader> {
        BufferedReader::new(LimitedReader::new(Box::new(input), NO_LIMIT))
    }

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn discarding_response() -> ResponseBuffer {
        ResponseBuffer::new(tokio::io::sink())
    }

    #[tokio::test]
    async fn non_body_methods_get_an_empty_body() {
        let mut bufr = reader(b"leftover");
        let headers = headers(&[("content-length", "8")]);
        let response = discarding_response();

        let mut body = Body::setup(&Method::GET, &headers, &mut bufr, &response);

        let mut buf = [0u8; 8];
        assert_eq!(body.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn content_length_bounds_the_body() {
        let mut bufr = reader(b"hello, worldNEXT");
        let headers = headers(&[("content-length", "12")]);
        let response = discarding_response();

        let mut body = Body::setup(&Method::POST, &headers, &mut bufr, &response);

        let mut out = Vec::new();
        assert_eq!(body.read_to_end(&mut out).await.unwrap(), 12);
        assert_eq!(out, b"hello, world");
        assert_eq!(body.read(&mut [0u8; 4]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn malformed_content_length_means_no_body() {
        let mut bufr = reader(b"hello");
        let headers = headers(&[("content-length", "five")]);
        let response = discarding_response();

        let mut body = Body::setup(&Method::POST, &headers, &mut bufr, &response);
        assert_eq!(body.read(&mut [0u8; 8]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn chunked_body_is_decoded() {
        let mut bufr = reader(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
        let headers = headers(&[("transfer-encoding", "chunked")]);
        let response = discarding_response();

        let mut body = Body::setup(&Method::POST, &headers, &mut bufr, &response);

        let mut out = Vec::new();
        body.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn drain_discards_the_unread_tail() {
        let mut bufr = reader(b"0123456789NEXT");
        let headers = headers(&[("content-length", "10")]);
        let response = discarding_response();

        let mut body = Body::setup(&Method::POST, &headers, &mut bufr, &response);

        let mut buf = [0u8; 3];
        body.read(&mut buf).await.unwrap();
        assert_eq!(body.drain().await.unwrap(), 7);
        assert_eq!(body.read(&mut buf).await.unwrap(), 0);

        let mut rest = [0u8; 4];
        let n = bufr.read_full(&mut rest).await.unwrap();
        assert_eq!(&rest[..n], b"NEXT");
    }

    #[tokio::test]
    async fn continue_is_emitted_once_before_the_first_body_byte() {
        let (mut client, server) = tokio::io::duplex(256);
        let (_, server_write) = tokio::io::split(server);

        let mut bufr = reader(b"abc");
        let headers = headers(&[("content-length", "3"), ("expect", "100-continue")]);
        let response = ResponseBuffer::new(server_write);

        let mut body = Body::setup(&Method::POST, &headers, &mut bufr, &response);

        let mut buf = [0u8; 8];
        let n = body.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abc");

        // a second read must not repeat the interim response
        assert_eq!(body.read(&mut buf).await.unwrap(), 0);
        drop(body);
        drop(response);

        let mut written = Vec::new();
        client.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, b"HTTP/1.1 100 Continue\r\n\r\n");
    }
}
