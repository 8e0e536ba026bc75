//! Streaming `multipart/form-data` parsing.
//!
//! A [`MultipartReader`] wraps a request [`Body`] in its own buffered reader
//! and splits the stream into parts delimited by the boundary token declared
//! in the `Content-Type` header. Boundaries are discovered by peeking the
//! buffered window, so part payloads stream through without the body ever
//! being collected whole.
//!
//! The current part's state lives inside the reader; [`Part`] is a borrowing
//! handle over it. The borrow ensures at most one part is live at a time, and
//! advancing to the next part first consumes whatever the previous one left
//! unread.

use std::cmp;

use bytes::Bytes;
use http::{header, HeaderMap};

use crate::codec::{read_header_block, BufferedReader, Source, BUF_SIZE};
use crate::ensure;
use crate::protocol::{Body, ParseError};

/// Adapts the request body to the buffered reader's source contract.
struct BodySource<'b, 'conn>(&'b mut Body<'conn>);

impl Source for BodySource<'_, '_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ParseError> {
        self.0.read(buf).await
    }
}

/// Splits a multipart body into a sequence of [`Part`]s.
pub struct MultipartReader<'b, 'conn> {
    bufr: BufferedReader<BodySource<'b, 'conn>>,
    /// Set once the body has reported end-of-stream; from then on only the
    /// buffered remainder can still hold part data.
    eof_seen: bool,
    current: Option<PartState>,

    // the four byte patterns derived from the boundary, all slices of one
    // allocation: "\r\n--B--"
    #[allow(dead_code)]
    crlf_dash_boundary_dash: Bytes,
    crlf_dash_boundary: Bytes,
    dash_boundary: Bytes,
    dash_boundary_dash: Bytes,
}

struct PartState {
    headers: HeaderMap,
    /// Remaining part bytes once the boundary has been located in the peek
    /// window; `None` while the part's end is still unknown.
    substitute: Option<u64>,
    closed: bool,
    /// The stream ended before this part's delimiter arrived; there is no
    /// further part to find.
    truncated: bool,
    parsed: bool,
    form_name: Option<String>,
    file_name: Option<String>,
}

impl PartState {
    fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            substitute: None,
            closed: false,
            truncated: false,
            parsed: false,
            form_name: None,
            file_name: None,
        }
    }
}

impl<'b, 'conn> MultipartReader<'b, 'conn> {
    pub(crate) fn new(body: &'b mut Body<'conn>, boundary: &str) -> Self {
        let delimiter = Bytes::from(format!("\r\n--{boundary}--"));
        let len = delimiter.len();
        Self {
            bufr: BufferedReader::new(BodySource(body)),
            eof_seen: false,
            current: None,
            crlf_dash_boundary: delimiter.slice(..len - 2),
            dash_boundary: delimiter.slice(2..len - 2),
            dash_boundary_dash: delimiter.slice(2..),
            crlf_dash_boundary_dash: delimiter,
        }
    }

    /// Advances to the next part.
    ///
    /// Any previous part is closed first: its unread bytes are consumed so
    /// the stream points at the delimiter line. Returns `Ok(None)` at the
    /// final `--boundary--` delimiter, or when the body ends prematurely (a
    /// truncated stream is malformed but recoverable). A line that is not a
    /// delimiter at all is an error.
    pub async fn next_part(&mut self) -> Result<Option<Part<'_, 'b, 'conn>>, ParseError> {
        if self.current.is_some() {
            self.close_current().await?;
            let truncated = self.current.take().is_some_and(|state| state.truncated);
            if truncated || !self.discard_crlf().await? {
                return Ok(None);
            }
        }

        let line = match self.bufr.read_line().await {
            Ok(line) => line,
            Err(ParseError::ConnectionClosed) => return Ok(None),
            Err(ParseError::Io { source }) if source.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };

        if line == self.dash_boundary_dash {
            return Ok(None);
        }
        ensure!(
            line == self.dash_boundary,
            ParseError::invalid_multipart(format!(
                "want delimiter {:?}, but got {:?}",
                String::from_utf8_lossy(&self.dash_boundary),
                String::from_utf8_lossy(&line),
            ))
        );

        let headers = read_header_block(&mut self.bufr).await?;
        self.current = Some(PartState::new(headers));
        Ok(Some(Part { mr: self }))
    }

    /// Reads payload bytes of the current part into `dst`.
    async fn read_current(&mut self, dst: &mut [u8]) -> Result<usize, ParseError> {
        loop {
            let Some(state) = self.current.as_mut() else {
                return Ok(0);
            };
            if state.closed || dst.is_empty() {
                return Ok(0);
            }

            // once the part's remaining length is known, serve a bounded
            // view of the shared buffer
            if let Some(remaining) = state.substitute {
                if remaining == 0 {
                    return Ok(0);
                }
                let n = cmp::min(dst.len() as u64, remaining) as usize;
                let read = self.bufr.read(&mut dst[..n]).await?;
                state.substitute = Some(remaining - read as u64);
                return Ok(read);
            }

            // look for the delimiter in the buffered window
            let needle_len = self.crlf_dash_boundary.len();
            let (index, at_eof) = {
                let peeked = self.bufr.peek(BUF_SIZE).await?;
                (find(peeked, &self.crlf_dash_boundary), peeked.len() < BUF_SIZE)
            };
            if at_eof {
                self.eof_seen = true;
            }

            let state = self.current.as_mut().expect("current part while reading");
            match index {
                // the part ends `index` bytes ahead; after those bytes the
                // stream points exactly at "\r\n--B"
                Some(index) => {
                    state.substitute = Some(index as u64);
                }
                // truncated stream: the delimiter will never arrive
                None if self.eof_seen => {
                    state.substitute = Some(0);
                    state.truncated = true;
                    return Ok(0);
                }
                // everything in the window except the longest tail that
                // could still begin a delimiter is part payload
                None => {
                    let max_read = cmp::min(dst.len(), BUF_SIZE - needle_len + 1);
                    return self.bufr.read(&mut dst[..max_read]).await;
                }
            }
        }
    }

    /// Consumes the current part's remaining bytes up to the delimiter.
    async fn close_current(&mut self) -> Result<(), ParseError> {
        let mut scratch = [0u8; 1024];
        loop {
            if self.read_current(&mut scratch).await? == 0 {
                break;
            }
        }
        if let Some(state) = self.current.as_mut() {
            state.closed = true;
        }
        Ok(())
    }

    /// Consumes the CRLF that separates part data from the delimiter line.
    /// Returns false when the stream ended instead.
    async fn discard_crlf(&mut self) -> Result<bool, ParseError> {
        let mut crlf = [0u8; 2];
        let n = self.bufr.read_full(&mut crlf).await?;
        if n == 0 {
            return Ok(false);
        }
        ensure!(
            n == 2 && crlf == *b"\r\n",
            ParseError::invalid_multipart("part data is not terminated by CRLF")
        );
        Ok(true)
    }
}

/// One segment of a multipart body: its own header block plus a streaming
/// payload. Reading past the part's end, or after closing it, returns 0.
pub struct Part<'p, 'b, 'conn> {
    mr: &'p mut MultipartReader<'b, 'conn>,
}

impl Part<'_, '_, '_> {
    /// The part's own header block.
    pub fn headers(&self) -> &HeaderMap {
        &self.state().headers
    }

    /// Reads up to `dst.len()` payload bytes. Returns 0 at end of part.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize, ParseError> {
        self.mr.read_current(dst).await
    }

    /// Reads the whole remaining payload into `dst`; returns the byte count.
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

    /// Consumes the rest of the payload; later reads return 0.
    pub async fn close(&mut self) -> Result<(), ParseError> {
        self.mr.close_current().await
    }

    /// The `name` parameter of a `form-data` content disposition.
    pub fn form_name(&mut self) -> Option<&str> {
        self.parse_form_data();
        self.state().form_name.as_deref()
    }

    /// The `filename` parameter of a `form-data` content disposition; set
    /// when the part carries an uploaded file.
    pub fn file_name(&mut self) -> Option<&str> {
        self.parse_form_data();
        self.state().file_name.as_deref()
    }

    fn state(&self) -> &PartState {
        self.mr.current.as_ref().expect("part handle without state")
    }

    /// Splits `Content-Disposition` lazily, on the first name lookup.
    fn parse_form_data(&mut self) {
        let state = self.mr.current.as_mut().expect("part handle without state");
        if state.parsed {
            return;
        }
        state.parsed = true;

        let Some(disposition) =
            state.headers.get(header::CONTENT_DISPOSITION).and_then(|v| v.to_str().ok())
        else {
            return;
        };

        let mut segments = disposition.split(';');
        match segments.next() {
            Some(first) if first.trim().eq_ignore_ascii_case("form-data") => {}
            _ => return,
        }

        for segment in segments {
            let Some((key, value)) = segment.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            match key.trim() {
                "name" => state.form_name = Some(value.to_string()),
                "filename" => state.file_name = Some(value.to_string()),
                _ => {}
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
