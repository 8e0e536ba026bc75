//! Error types for HTTP protocol handling
//!
//! The error types form a hierarchy where [`HttpError`] is the top-level error
//! reported by the connection driver. It wraps [`ParseError`] (everything that
//! can go wrong while reading a request) and [`SendError`] (failures while
//! writing the response), plus the two handler dispositions the driver has to
//! account for: a handler returning an error and a handler panicking.

use std::error::Error;
use std::io;
use thiserror::Error;

/// The top-level error type for a connection.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Errors that occur while parsing or streaming the request
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    /// Errors that occur while writing the response
    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },

    /// The handler returned an error; the connection is torn down
    #[error("handler error: {source}")]
    HandlerError { source: Box<dyn Error + Send + Sync> },

    /// The handler panicked; the panic was recovered and the connection closed
    #[error("handler panicked: {message}")]
    HandlerPanic { message: String },
}

/// Errors that occur during HTTP request parsing and body streaming.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The header block ran past the per-request byte cap
    #[error("header block exceeds the limit of {max_size} bytes")]
    TooLargeHeader { max_size: usize },

    /// The request line did not scan as `METHOD TARGET VERSION`
    #[error("invalid request line: {line:?}")]
    InvalidRequestLine { line: String },

    /// Invalid or unsupported HTTP method
    #[error("invalid http method")]
    InvalidMethod,

    /// The request target did not parse as a URI reference
    #[error("invalid http uri")]
    InvalidUri,

    /// Unsupported HTTP version token
    #[error("invalid http version: {token:?}")]
    InvalidVersion { token: String },

    /// Broken chunked transfer encoding; fatal for the body
    #[error("invalid chunked encoding: {reason}")]
    InvalidChunk { reason: String },

    /// Broken multipart framing, e.g. a missing delimiter line
    #[error("invalid multipart body: {reason}")]
    InvalidMultipart { reason: String },

    /// `multipart_reader` was called but no boundary was declared
    #[error("request has no multipart boundary")]
    MissingBoundary,

    /// The peer closed the transport at a request boundary
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// I/O error on the transport
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    /// Creates a new TooLargeHeader error
    pub fn too_large_header(max_size: usize) -> Self {
        Self::TooLargeHeader { max_size }
    }

    /// Creates a new InvalidRequestLine error
    pub fn invalid_request_line<S: ToString>(line: S) -> Self {
        Self::InvalidRequestLine { line: line.to_string() }
    }

    /// Creates a new InvalidChunk error
    pub fn invalid_chunk<S: ToString>(reason: S) -> Self {
        Self::InvalidChunk { reason: reason.to_string() }
    }

    /// Creates a new InvalidMultipart error
    pub fn invalid_multipart<S: ToString>(reason: S) -> Self {
        Self::InvalidMultipart { reason: reason.to_string() }
    }

    /// Creates a new I/O error
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Errors that occur while writing response bytes to the transport.
#[derive(Debug, Error)]
pub enum SendError {
    /// I/O error during sending
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    /// Creates a new I/O error
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
