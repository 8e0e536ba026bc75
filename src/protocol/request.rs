//! The parsed request a handler works with.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::OnceLock;

use http::{header, HeaderMap, Method, Uri, Version};

use crate::codec::RequestLine;
use crate::protocol::{Body, MultipartReader, ParseError};

/// One client request: the parsed head plus the streaming body.
///
/// Method, target and version are set once during parsing and immutable from
/// then on. The query string and cookies are split on first access and the
/// result cached, so handlers that never touch them pay nothing.
pub struct Request<'conn> {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    target: String,
    remote_addr: Option<SocketAddr>,
    content_type: Option<String>,
    boundary: Option<String>,
    body: Body<'conn>,
    query: OnceLock<HashMap<String, String>>,
    cookies: OnceLock<HashMap<String, String>>,
}

impl<'conn> Request<'conn> {
    pub(crate) fn new(
        request_line: RequestLine,
        headers: HeaderMap,
        body: Body<'conn>,
        remote_addr: Option<SocketAddr>,
        content_type: Option<String>,
        boundary: Option<String>,
    ) -> Self {
        Self {
            method: request_line.method,
            uri: request_line.uri,
            version: request_line.version,
            target: request_line.target,
            headers,
            remote_addr,
            content_type,
            boundary,
            body,
            query: OnceLock::new(),
            cookies: OnceLock::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request target exactly as it appeared on the request line.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// The media type of the body, without its parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The streaming request body.
    pub fn body_mut(&mut self) -> &mut Body<'conn> {
        &mut self.body
    }

    /// Looks up a decoded query string parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query
            .get_or_init(|| parse_query(self.uri.query().unwrap_or("")))
            .get(name)
            .map(String::as_str)
    }

    /// Looks up a cookie sent by the client.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .get_or_init(|| parse_cookies(&self.headers))
            .get(name)
            .map(String::as_str)
    }

    /// Starts iterating a `multipart/form-data` body.
    ///
    /// Fails when the `Content-Type` header did not declare a boundary.
    pub fn multipart_reader(&mut self) -> Result<MultipartReader<'_, 'conn>, ParseError> {
        let boundary = self.boundary.clone().ok_or(ParseError::MissingBoundary)?;
        Ok(MultipartReader::new(&mut self.body, &boundary))
    }
}

/// Splits `a=1&b=2` into a lookup map. Pairs without a value are dropped;
/// repeated names keep the last value.
fn parse_query(raw_query: &str) -> HashMap<String, String> {
    let mut queries = HashMap::new();
    for pair in raw_query.split('&') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        queries.insert(name.trim().to_string(), value.trim().to_string());
    }
    queries
}

/// Splits every `Cookie` header of the form `a=1; b=2` into a lookup map.
fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.trim().split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            cookies.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    cookies
}
