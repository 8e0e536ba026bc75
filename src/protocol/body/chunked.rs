//! Pull decoder for chunked transfer encoding.
//!
//! The framing is `size-hex CRLF data CRLF ... 0 CRLF CRLF`, per
//! [RFC 7230 section 4.1](https://tools.ietf.org/html/rfc7230#section-4.1).
//! Chunk sizes are hexadecimal; extensions after a `;` are ignored.

use std::cmp;
use std::str;

use crate::codec::{BufferedReader, LimitedReader};
use crate::ensure;
use crate::protocol::ParseError;

/// Decoding state for one chunked body: how much of the current chunk is
/// still unread, and whether the terminal zero-size chunk was seen.
#[derive(Debug, Default)]
pub(crate) struct ChunkReader {
    remaining: u64,
    done: bool,
}

impl ChunkReader {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Reads decoded payload bytes into `dst`.
    ///
    /// Returns 0 once the terminal chunk has been consumed, including the
    /// CRLF pair that closes the body, so the next request starts at a clean
    /// byte boundary. Any framing violation is fatal for the body.
    pub(crate) async fn read(
        &mut self,
        bufr: &mut BufferedReader<LimitedReader>,
        dst: &mut [u8],
    ) -> Result<usize, ParseError> {
        if self.done {
            return Ok(0);
        }

        if self.remaining == 0 {
            self.remaining = read_chunk_size(bufr).await?;
            if self.remaining == 0 {
                self.done = true;
                discard_crlf(bufr).await?;
                return Ok(0);
            }
        }

        let n = cmp::min(dst.len() as u64, self.remaining) as usize;
        let read = bufr.read(&mut dst[..n]).await?;
        ensure!(read > 0, ParseError::invalid_chunk("stream ended inside a chunk"));
        self.remaining -= read as u64;

        if self.remaining == 0 {
            discard_crlf(bufr).await?;
        }
        Ok(read)
    }
}

async fn read_chunk_size(bufr: &mut BufferedReader<LimitedReader>) -> Result<u64, ParseError> {
    let line = bufr.read_line().await?;
    let text = str::from_utf8(&line)
        .map_err(|_| ParseError::invalid_chunk("chunk size line is not valid UTF-8"))?;

    // extensions "end" the size token at the first semicolon
    let size = text.split(';').next().unwrap_or("").trim();
    ensure!(!size.is_empty(), ParseError::invalid_chunk("empty chunk size line"));

    u64::from_str_radix(size, 16)
        .map_err(|_| ParseError::invalid_chunk(format!("invalid chunk size {size:?}")))
}

async fn discard_crlf(bufr: &mut BufferedReader<LimitedReader>) -> Result<(), ParseError> {
    let mut crlf = [0u8; 2];
    let n = bufr.read_full(&mut crlf).await?;
    ensure!(
        n == 2 && crlf == *b"\r\n",
        ParseError::invalid_chunk("chunk data is not terminated by CRLF")
    );
    Ok(())
}
