use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::connection::HttpConnection;
use crate::handler::Handler;

/// The process-level server: a listening address and a handler.
///
/// `start` binds the address and accepts connections forever, spawning one
/// task per accepted transport. All protocol work happens inside
/// [`HttpConnection`]; the server only owns the accept loop.
pub struct Server<H> {
    address: Vec<SocketAddr>,
    handler: Arc<H>,
    idle_timeout: Option<Duration>,
}

pub struct ServerBuilder<H> {
    address: Option<Vec<SocketAddr>>,
    handler: Option<Arc<H>>,
    idle_timeout: Option<Duration>,
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("handler must be set")]
    MissingHandler,
    #[error("address must be set")]
    MissingAddress,
}

impl<H: Handler> ServerBuilder<H> {
    fn new() -> Self {
        Self { address: None, handler: None, idle_timeout: None }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().unwrap().collect::<Vec<_>>());
        self
    }

    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// How long a kept-alive connection may wait for its next request
    /// before being closed. No timeout by default.
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn build(self) -> Result<Server<H>, ServerBuildError> {
        let address = self.address.ok_or(ServerBuildError::MissingAddress)?;
        let handler = self.handler.ok_or(ServerBuildError::MissingHandler)?;
        Ok(Server { address, handler, idle_timeout: self.idle_timeout })
    }
}

impl<H: Handler> Server<H> {
    pub fn builder() -> ServerBuilder<H> {
        ServerBuilder::new()
    }

    pub async fn start(self) {
        info!("start listening at {:?}", self.address);
        let listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return;
            }
        };

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let handler = Arc::clone(&self.handler);
            let idle_timeout = self.idle_timeout;

            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                let mut connection =
                    HttpConnection::new(reader, writer).with_remote_addr(remote_addr);
                if let Some(idle_timeout) = idle_timeout {
                    connection = connection.with_idle_timeout(idle_timeout);
                }
                match connection.process(handler).await {
                    Ok(_) => {
                        info!("finished process, connection shutdown");
                    }
                    Err(e) => {
                        error!("service has error, cause {}, connection shutdown", e);
                    }
                }
            });
        }
    }
}
