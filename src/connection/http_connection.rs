use std::any::Any;
use std::backtrace::Backtrace;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use http::header;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{error, info, trace};

use crate::codec::{read_request, BufferedReader, LimitedReader, MAX_HEADER_BYTES};
use crate::handler::Handler;
use crate::protocol::{HttpError, ParseError, ResponseBuffer, ResponseWriter, SendError};

/// The per-connection driver behind keep-alive request pipelining.
///
/// `HttpConnection` owns both halves of one accepted transport and runs the
/// request cycle until the peer goes away: parse a request head under the
/// header byte cap, hand the request and the raw response sink to the
/// handler, flush, drain the unread body tail, re-arm the cap, repeat.
/// Execution is strictly sequential; request N's body is fully consumed
/// before request N+1 is parsed.
pub struct HttpConnection {
    reader: BufferedReader<LimitedReader>,
    response: ResponseBuffer,
    remote_addr: Option<SocketAddr>,
    idle_timeout: Option<Duration>,
}

impl HttpConnection {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: BufferedReader::new(LimitedReader::new(
                Box::new(reader),
                MAX_HEADER_BYTES as u64,
            )),
            response: ResponseBuffer::new(writer),
            remote_addr: None,
            idle_timeout: None,
        }
    }

    pub fn with_remote_addr(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    /// Caps how long the connection may sit idle waiting for the next
    /// request head before it is closed.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    /// Serves requests off this connection until the peer closes it, a
    /// parse or I/O failure tears it down, or the handler fails.
    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler,
    {
        loop {
            self.reader.source_mut().set_limit(MAX_HEADER_BYTES as u64);

            let parse = read_request(&mut self.reader, &self.response, self.remote_addr);
            let parsed = match self.idle_timeout {
                Some(idle) => match timeout(idle, parse).await {
                    Ok(parsed) => parsed,
                    Err(_) => {
                        info!("connection idle for {:?}, shutting down", idle);
                        return Ok(());
                    }
                },
                None => parse.await,
            };

            let mut request = match parsed {
                Ok(request) => request,
                Err(ParseError::ConnectionClosed) => {
                    trace!("cant read more requests, break this connection down");
                    return Ok(());
                }
                Err(e) => {
                    error!(cause = %e, "failed to parse request, closing connection");
                    return Err(e.into());
                }
            };

            let mut response_writer = ResponseWriter::new(self.response.clone());

            let served = AssertUnwindSafe(handler.serve(&mut response_writer, &mut request))
                .catch_unwind()
                .await;
            match served {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let source = e.into();
                    error!(cause = %source, "handler failed, closing connection");
                    return Err(HttpError::HandlerError { source });
                }
                Err(panic) => {
                    let message = panic_message(panic);
                    let backtrace = Backtrace::force_capture();
                    error!("handler panicked, closing connection: {message}\n{backtrace}");
                    return Err(HttpError::HandlerPanic { message });
                }
            }

            self.response.flush().await.map_err(SendError::io)?;

            match request.body_mut().drain().await {
                Ok(skipped) if skipped > 0 => {
                    info!(skipped, "discarded unread request body");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(cause = %e, "failed to drain request body, closing connection");
                    return Err(e.into());
                }
            }

            let close = wants_close(request.headers());
            drop(request);
            if close {
                info!("client requested connection close");
                return Ok(());
            }
        }
    }
}

/// The `Connection` header is a comma-separated token list; `close` counts
/// wherever it appears in the list, e.g. `Connection: keep-alive, close`.
fn wants_close(headers: &http::HeaderMap) -> bool {
    headers
        .get(header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("close"))
        })
        .unwrap_or(false)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;
    use async_trait::async_trait;
    use std::error::Error;
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt};

    /// Feeds `input` through a duplex transport and returns everything the
    /// connection wrote back.
    async fn run<H: Handler>(input: &[u8], handler: H) -> (Vec<u8>, Result<(), HttpError>) {
        let (mut client, server) = duplex(64 * 1024);
        let (server_read, server_write) = split(server);
        let connection = HttpConnection::new(server_read, server_write);

        let task = tokio::spawn(connection.process(Arc::new(handler)));

        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();

        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();
        let result = task.await.unwrap();
        (output, result)
    }

    fn ok_response(body: &[u8]) -> Vec<u8> {
        let mut response = Vec::new();
        response.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
        response.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        response.extend_from_slice(body);
        response
    }

    /// Echoes the parsed request metadata back in the response body.
    struct MetadataHandler;

    #[async_trait]
    impl Handler for MetadataHandler {
        type Error = SendError;

        async fn serve(
            &self,
            response: &mut ResponseWriter,
            request: &mut Request<'_>,
        ) -> Result<(), Self::Error> {
            let mut body = Vec::new();
            let read = request.body_mut().read_to_end(&mut body).await.map_err(|_| {
                SendError::io(std::io::Error::new(std::io::ErrorKind::Other, "body read"))
            })?;

            let summary = format!(
                "method={} path={} x={} y={} body={}",
                request.method(),
                request.uri().path(),
                request.query("x").unwrap_or("-"),
                request.query("y").unwrap_or("-"),
                read,
            );
            response.write_all(&ok_response(summary.as_bytes())).await
        }
    }

    /// Reads the body fully and echoes it back.
    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        type Error = Box<dyn Error + Send + Sync>;

        async fn serve(
            &self,
            response: &mut ResponseWriter,
            request: &mut Request<'_>,
        ) -> Result<(), Self::Error> {
            let mut body = Vec::new();
            request.body_mut().read_to_end(&mut body).await?;
            response.write_all(&ok_response(&body)).await?;
            Ok(())
        }
    }

    /// Writes a response without ever touching the body.
    struct IgnoresBodyHandler;

    #[async_trait]
    impl Handler for IgnoresBodyHandler {
        type Error = SendError;

        async fn serve(
            &self,
            response: &mut ResponseWriter,
            _request: &mut Request<'_>,
        ) -> Result<(), Self::Error> {
            response.write_all(&ok_response(b"ignored")).await
        }
    }

    /// Reads only the first three body bytes.
    struct PartialReadHandler;

    #[async_trait]
    impl Handler for PartialReadHandler {
        type Error = Box<dyn Error + Send + Sync>;

        async fn serve(
            &self,
            response: &mut ResponseWriter,
            request: &mut Request<'_>,
        ) -> Result<(), Self::Error> {
            let mut first = [0u8; 3];
            let n = request.body_mut().read(&mut first).await?;
            response.write_all(&ok_response(&first[..n])).await?;
            Ok(())
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl Handler for PanickingHandler {
        type Error = SendError;

        async fn serve(
            &self,
            _response: &mut ResponseWriter,
            _request: &mut Request<'_>,
        ) -> Result<(), Self::Error> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn simple_get_parses_metadata_and_empty_body() {
        let (output, result) =
            run(b"GET /a?x=1&y=2 HTTP/1.1\r\nHost: h\r\n\r\n", MetadataHandler).await;

        result.unwrap();
        let expected = ok_response(b"method=GET path=/a x=1 y=2 body=0");
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn post_with_content_length_yields_the_exact_body() {
        let (output, result) =
            run(b"POST /p HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello", EchoHandler).await;

        result.unwrap();
        assert_eq!(output, ok_response(b"hello"));
    }

    #[tokio::test]
    async fn chunked_post_is_decoded() {
        let input = concat!(
            "POST /p HTTP/1.1\r\n",
            "Transfer-Encoding: chunked\r\n",
            "\r\n",
            "5\r\nhello\r\n",
            "6\r\n world\r\n",
            "0\r\n\r\n",
        );
        let (output, result) = run(input.as_bytes(), EchoHandler).await;

        result.unwrap();
        assert_eq!(output, ok_response(b"hello world"));
    }

    #[tokio::test]
    async fn expect_continue_is_sent_before_the_echoed_body() {
        let input = concat!(
            "POST /p HTTP/1.1\r\n",
            "Content-Length: 3\r\n",
            "Expect: 100-continue\r\n",
            "\r\n",
            "abc",
        );
        let (output, result) = run(input.as_bytes(), EchoHandler).await;

        result.unwrap();
        let mut expected = Vec::from(&b"HTTP/1.1 100 Continue\r\n\r\n"[..]);
        expected.extend_from_slice(&ok_response(b"abc"));
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn pipelined_requests_survive_an_ignored_body() {
        let one = b"POST /p HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789";
        let mut input = Vec::new();
        input.extend_from_slice(one);
        input.extend_from_slice(one);

        let (output, result) = run(&input, IgnoresBodyHandler).await;

        result.unwrap();
        let mut expected = ok_response(b"ignored");
        expected.extend_from_slice(&ok_response(b"ignored"));
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn pipelined_requests_survive_a_partial_read() {
        let mut input = Vec::new();
        input.extend_from_slice(b"POST /p HTTP/1.1\r\nContent-Length: 10\r\n\r\nabcdefghij");
        input.extend_from_slice(b"POST /q HTTP/1.1\r\nContent-Length: 4\r\n\r\nwxyz");

        let (output, result) = run(&input, PartialReadHandler).await;

        result.unwrap();
        let mut expected = ok_response(b"abc");
        expected.extend_from_slice(&ok_response(b"wxy"));
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn multipart_form_streams_both_parts() {
        struct FormHandler;

        #[async_trait]
        impl Handler for FormHandler {
            type Error = Box<dyn Error + Send + Sync>;

            async fn serve(
                &self,
                response: &mut ResponseWriter,
                request: &mut Request<'_>,
            ) -> Result<(), Self::Error> {
                let mut summary = String::new();
                let mut reader = request.multipart_reader()?;
                while let Some(mut part) = reader.next_part().await? {
                    let name = part.form_name().unwrap_or("-").to_string();
                    let file = part.file_name().unwrap_or("-").to_string();
                    let mut data = Vec::new();
                    part.read_to_end(&mut data).await?;
                    summary.push_str(&format!(
                        "{name}:{file}:{};",
                        String::from_utf8_lossy(&data)
                    ));
                }
                response.write_all(&ok_response(summary.as_bytes())).await?;
                Ok(())
            }
        }

        let form = concat!(
            "--X\r\n",
            "Content-Disposition: form-data; name=\"a\"\r\n",
            "\r\n",
            "hello\r\n",
            "--X\r\n",
            "Content-Disposition: form-data; name=\"f\"; filename=\"t.txt\"\r\n",
            "\r\n",
            "FILE\r\n",
            "--X--\r\n",
        );
        let input = format!(
            "POST /form HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=X\r\nContent-Length: {}\r\n\r\n{}",
            form.len(),
            form,
        );

        let (output, result) = run(input.as_bytes(), FormHandler).await;

        result.unwrap();
        assert_eq!(output, ok_response(b"a:-:hello;f:t.txt:FILE;"));
    }

    #[tokio::test]
    async fn malformed_request_line_tears_the_connection_down() {
        let (output, result) = run(b"NOT-A-REQUEST\r\n\r\n", EchoHandler).await;

        assert!(output.is_empty());
        assert!(matches!(
            result,
            Err(HttpError::RequestError { source: ParseError::InvalidRequestLine { .. } })
        ));
    }

    #[tokio::test]
    async fn handler_panic_is_recovered_and_reported() {
        let (_, result) = run(b"GET / HTTP/1.1\r\n\r\n", PanickingHandler).await;

        assert!(matches!(result, Err(HttpError::HandlerPanic { message }) if message == "boom"));
    }

    #[tokio::test]
    async fn connection_close_header_ends_the_loop() {
        let mut input = Vec::new();
        input.extend_from_slice(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        input.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");

        let (output, result) = run(&input, IgnoresBodyHandler).await;

        result.unwrap();
        // only the first request is answered
        assert_eq!(output, ok_response(b"ignored"));
    }

    #[tokio::test]
    async fn close_is_honored_inside_a_connection_token_list() {
        let mut input = Vec::new();
        input.extend_from_slice(b"GET / HTTP/1.1\r\nConnection: keep-alive, Close\r\n\r\n");
        input.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");

        let (output, result) = run(&input, IgnoresBodyHandler).await;

        result.unwrap();
        assert_eq!(output, ok_response(b"ignored"));
    }

    #[tokio::test]
    async fn keep_alive_without_close_keeps_the_connection() {
        let mut input = Vec::new();
        input.extend_from_slice(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        input.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");

        let (output, result) = run(&input, IgnoresBodyHandler).await;

        result.unwrap();
        let mut expected = ok_response(b"ignored");
        expected.extend_from_slice(&ok_response(b"ignored"));
        assert_eq!(output, expected);
    }
}
