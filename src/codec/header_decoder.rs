use std::str;

use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version};

use crate::codec::{BufferedReader, Source};
use crate::ensure;
use crate::protocol::ParseError;

/// The parsed first line of a request: `METHOD SP TARGET SP VERSION`.
pub(crate) struct RequestLine {
    pub(crate) method: Method,
    pub(crate) target: String,
    pub(crate) uri: Uri,
    pub(crate) version: Version,
}

/// Scans a request line into its three tokens.
///
/// Exactly three whitespace-separated tokens are accepted; the target is then
/// parsed as a URI reference and the version token must name a supported
/// HTTP/1.x version.
pub(crate) fn parse_request_line(line: &[u8]) -> Result<RequestLine, ParseError> {
    let text = str::from_utf8(line)
        .map_err(|_| ParseError::invalid_request_line(String::from_utf8_lossy(line)))?;

    let mut tokens = text.split_ascii_whitespace();
    let (method, target, version) = match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(method), Some(target), Some(version)) => (method, target, version),
        _ => return Err(ParseError::invalid_request_line(text)),
    };
    ensure!(tokens.next().is_none(), ParseError::invalid_request_line(text));

    let method = Method::from_bytes(method.as_bytes()).map_err(|_| ParseError::InvalidMethod)?;
    let uri: Uri = target.parse().map_err(|_| ParseError::InvalidUri)?;
    let version = match version {
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/1.0" => Version::HTTP_10,
        other => return Err(ParseError::InvalidVersion { token: other.to_string() }),
    };

    Ok(RequestLine { method, target: target.to_string(), uri, version })
}

/// Reads header lines until the empty line that ends the block.
///
/// Parsing is lenient: a line without a colon, with the colon in last
/// position, or with a name the header map rejects is skipped rather than
/// failing the request. Values are stripped of surrounding whitespace and
/// appended, so duplicates keep their order. Name lookup on the returned map
/// is case-insensitive.
pub(crate) async fn read_header_block<S: Source>(
    bufr: &mut BufferedReader<S>,
) -> Result<HeaderMap, ParseError> {
    let mut headers = HeaderMap::new();

    loop {
        let line = bufr.read_line().await?;
        if line.is_empty() {
            break;
        }

        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        if colon == line.len() - 1 {
            continue;
        }

        let Ok(name) = HeaderName::from_bytes(&line[..colon]) else {
            continue;
        };
        let Ok(value) = HeaderValue::from_bytes(line[colon + 1..].trim_ascii()) else {
            continue;
        };
        headers.append(name, value);
    }

    Ok(headers)
}
