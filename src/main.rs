use std::error::Error;
use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use httpd::handler::Handler;
use httpd::protocol::{Request, ResponseWriter};
use httpd::server::Server;

/// Demo handler: `/echo` sends the body back, `/form` walks a multipart
/// form, everything else gets a dump of the parsed request metadata.
struct DemoHandler;

#[async_trait]
impl Handler for DemoHandler {
    type Error = Box<dyn Error + Send + Sync>;

    async fn serve(
        &self,
        response: &mut ResponseWriter,
        request: &mut Request<'_>,
    ) -> Result<(), Self::Error> {
        match request.uri().path() {
            "/echo" => echo(response, request).await,
            "/form" => form(response, request).await,
            _ => info_page(response, request).await,
        }
    }
}

async fn write_response(
    response: &mut ResponseWriter,
    body: &[u8],
) -> Result<(), Box<dyn Error + Send + Sync>> {
    response.write_all(b"HTTP/1.1 200 OK\r\n").await?;
    response.write_all(format!("Content-Length: {}\r\n", body.len()).as_bytes()).await?;
    response.write_all(b"\r\n").await?;
    response.write_all(body).await?;
    Ok(())
}

async fn echo(
    response: &mut ResponseWriter,
    request: &mut Request<'_>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut body = Vec::from(&b"your message: "[..]);
    request.body_mut().read_to_end(&mut body).await?;
    write_response(response, &body).await
}

async fn form(
    response: &mut ResponseWriter,
    request: &mut Request<'_>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut reader = request.multipart_reader()?;
    while let Some(mut part) = reader.next_part().await? {
        let name = part.form_name().unwrap_or_default().to_string();
        let file_name = part.file_name().unwrap_or_default().to_string();

        let mut data = Vec::new();
        part.read_to_end(&mut data).await?;
        info!(name, file_name, bytes = data.len(), "received form part");
    }
    write_response(response, b"").await
}

async fn info_page(
    response: &mut ResponseWriter,
    request: &mut Request<'_>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut page = String::new();
    let _ = writeln!(page, "[query]name={}", request.query("name").unwrap_or_default());
    let _ = writeln!(page, "[query]token={}", request.query("token").unwrap_or_default());
    let _ = writeln!(page, "[cookie]foo1={}", request.cookie("foo1").unwrap_or_default());
    let _ = writeln!(page, "[cookie]foo2={}", request.cookie("foo2").unwrap_or_default());
    let user_agent = request
        .headers()
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let _ = writeln!(page, "[header]User-Agent={user_agent}");
    let _ = writeln!(page, "[request]method={}", request.method());
    let _ = writeln!(page, "[request]target={}", request.target());
    let _ = writeln!(page, "[request]version={:?}", request.version());
    if let Some(remote_addr) = request.remote_addr() {
        let _ = writeln!(page, "[request]remote_addr={remote_addr}");
    }
    write_response(response, page.as_bytes()).await
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let server = Server::builder()
        .address("127.0.0.1:8088")
        .handler(DemoHandler)
        .idle_timeout(Duration::from_secs(3))
        .build()
        .expect("server must have an address and a handler");

    server.start().await;
}
