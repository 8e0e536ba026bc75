use std::net::SocketAddr;

use http::header;
use tracing::trace;

use crate::codec::{parse_request_line, read_header_block, BufferedReader, LimitedReader, Source, NO_LIMIT};
use crate::protocol::{Body, ParseError, Request, ResponseBuffer};

/// Byte cap for one request head. Armed on the transport reader before
/// parsing begins and raised to [`NO_LIMIT`] once the headers are in.
pub(crate) const MAX_HEADER_BYTES: usize = 1 << 20;

/// Parses one request off the connection: request line, header block, then
/// body selection over the same buffered reader.
pub(crate) async fn read_request<'conn>(
    reader: &'conn mut BufferedReader<LimitedReader>,
    response: &ResponseBuffer,
    remote_addr: Option<SocketAddr>,
) -> Result<Request<'conn>, ParseError> {
    let line = match reader.read_line().await {
        Ok(line) => line,
        Err(e) => return Err(classify_read_error(reader, e)),
    };
    let request_line = parse_request_line(&line)?;
    trace!(method = %request_line.method, target = %request_line.target, "parsed request line");

    let headers = match read_header_block(reader).await {
        Ok(headers) => headers,
        Err(e) => return Err(classify_read_error(reader, e)),
    };

    // headers are in; from here the body framing bounds what we read
    reader.source_mut().set_limit(NO_LIMIT);

    let (content_type, boundary) = parse_content_type(&headers);
    let body = Body::setup(&request_line.method, &headers, reader, response);

    Ok(Request::new(request_line, headers, body, remote_addr, content_type, boundary))
}

/// An end-of-stream while the cap is exhausted is not a closed connection,
/// it is a header block that ran past the limit.
fn classify_read_error(reader: &BufferedReader<LimitedReader>, error: ParseError) -> ParseError {
    let end_of_stream = match &error {
        ParseError::ConnectionClosed => true,
        ParseError::Io { source } => source.kind() == std::io::ErrorKind::UnexpectedEof,
        _ => false,
    };
    if end_of_stream && reader.source().exhausted() {
        ParseError::too_large_header(MAX_HEADER_BYTES)
    } else {
        error
    }
}

/// Splits `Content-Type` into the bare media type and, for multipart bodies,
/// the boundary parameter (quotes optional).
fn parse_content_type(headers: &http::HeaderMap) -> (Option<String>, Option<String>) {
    let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
    else {
        return (None, None);
    };

    match content_type.split_once(';') {
        None => (Some(content_type.trim().to_string()), None),
        Some((media_type, parameters)) => {
            let boundary = parameters.split(';').find_map(|parameter| {
                let (name, value) = parameter.split_once('=')?;
                (name.trim() == "boundary").then(|| value.trim().trim_matches('"').to_string())
            });
            (Some(media_type.trim().to_string()), boundary)
        }
    }
}
