use std::error::Error;

use async_trait::async_trait;

use crate::protocol::{Request, ResponseWriter};

/// The application's entry point, invoked once per parsed request.
///
/// The handler owns the whole response: it writes the status line, headers
/// and body through the [`ResponseWriter`] itself. It may read the request
/// body partially or not at all; the connection drains whatever is left so
/// the next request on the same transport is framed correctly either way.
///
/// Returning an error closes the connection. No error response is sent on
/// its behalf, since the handler may already have written part of one.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Error: Into<Box<dyn Error + Send + Sync>> + Send + 'static;

    async fn serve(
        &self,
        response: &mut ResponseWriter,
        request: &mut Request<'_>,
    ) -> Result<(), Self::Error>;
}
