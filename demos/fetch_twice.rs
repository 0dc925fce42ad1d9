//! Fetches the same URL twice over real HTTP/1.1, then revalidates it.
//!
//! Runs a throwaway local server so it works offline:
//!
//! ```text
//! RUST_LOG=refetch=debug cargo run --example fetch_twice
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use refetch::transport::Http1Transport;
use refetch::{Client, FetchPolicy, Hooks, RequestDescriptor};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refetch=debug,fetch_twice=info".into()),
        )
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}/books", listener.local_addr()?);
    let hits = Arc::new(AtomicUsize::new(0));
    tokio::spawn(serve(listener, Arc::clone(&hits)));

    let client = Client::new(Http1Transport::new());
    let session = client.session(
        Hooks::new()
            .on_before_fetch(|info| info!(url = %info.url, "before fetch"))
            .on_after_fetch(|info| info!(failed = info.failed, "after fetch"))
            .on_result(|error, response| {
                info!(
                    error = ?error.map(ToString::to_string),
                    status = ?response.map(|r| r.status.as_u16()),
                    "result"
                );
            }),
    );

    let first = session.request(url.as_str()).await?;
    info!(data = ?first.data, "first request (network)");

    let second = session.request(url.as_str()).await?;
    info!(data = ?second.data, "second request (cache)");

    let refreshed = session
        .request(
            RequestDescriptor::builder(url.as_str())
                .fetch_policy(FetchPolicy::CacheAndNetwork)
                .build(),
        )
        .await?;
    info!(data = ?refreshed.data, "third request (cache, then network)");

    info!(server_hits = hits.load(Ordering::SeqCst), "done");
    Ok(())
}

async fn serve(listener: TcpListener, hits: Arc<AtomicUsize>) {
    loop {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let body = format!(r#"{{"books":[1,42,150],"served":{n}}}"#);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}
