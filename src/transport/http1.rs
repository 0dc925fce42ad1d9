//! Plain HTTP/1.1 over TCP.
//!
//! One request per connection (`Connection: close`). The response head is
//! parsed with [`httparse`]; the body is read by `Content-Length`, or to EOF,
//! and de-chunked when the server used `Transfer-Encoding: chunked`.
//! There is no TLS: `https://` URLs fail with a [`NetworkError`].

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{Transport, TransportFuture};
use crate::error::NetworkError;
use crate::http::{Headers, Method, RawResponse, RequestInit};

/// Default cap on a buffered response, head and body together (8 MiB).
pub const MAX_RESPONSE_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Maximum number of response headers we accept.
const MAX_HEADERS: usize = 64;

/// A minimal HTTP/1.1 client transport.
///
/// ```rust,no_run
/// use refetch::Client;
/// use refetch::transport::Http1Transport;
///
/// let client = Client::new(Http1Transport::new());
/// # let _ = client;
/// ```
#[derive(Debug, Clone)]
pub struct Http1Transport {
    max_response_bytes: usize,
}

impl Default for Http1Transport {
    fn default() -> Self {
        Self {
            max_response_bytes: MAX_RESPONSE_SIZE,
        }
    }
}

impl Http1Transport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of bytes buffered for one response.
    #[must_use]
    pub fn max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = max;
        self
    }
}

impl Transport for Http1Transport {
    fn perform_network_call(&self, url: &str, init: &RequestInit) -> TransportFuture {
        let url = url.to_owned();
        let init = init.clone();
        let max = self.max_response_bytes;

        Box::pin(async move {
            let result = match init.signal.clone() {
                None => send(&url, &init, max).await,
                Some(signal) if signal.is_canceled() => Err(NetworkError::aborted()),
                Some(signal) => tokio::select! {
                    result = send(&url, &init, max) => result,
                    () = signal.cancelled() => Err(NetworkError::aborted()),
                },
            };
            if let Err(e) = &result {
                warn!(url = %url, error = %e, "HTTP/1.1 request failed");
            }
            result
        })
    }
}

/// The pieces of an `http://` URL this transport needs.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    /// Path plus query, always starting with `/`.
    path: String,
}

impl Target {
    fn parse(url: &str) -> Result<Self, NetworkError> {
        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| NetworkError::new(format!("unsupported URL (only http:// is supported): {url}")))?;

        let (authority, path) = match rest.find(['/', '?']) {
            Some(pos) if rest.as_bytes()[pos] == b'?' => (&rest[..pos], format!("/{}", &rest[pos..])),
            Some(pos) => (&rest[..pos], rest[pos..].to_owned()),
            None => (rest, "/".to_owned()),
        };

        let parse_port = |port: &str| {
            port.parse::<u16>()
                .map_err(|_| NetworkError::new(format!("invalid port in URL: {url}")))
        };
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| NetworkError::new(format!("invalid host in URL: {url}")))?;
            match after.strip_prefix(':') {
                Some(port) => (host, parse_port(port)?),
                None => (host, 80),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (authority, 80),
            }
        };
        if host.is_empty() {
            return Err(NetworkError::new(format!("missing host in URL: {url}")));
        }

        Ok(Self {
            host: host.to_owned(),
            port,
            path,
        })
    }

    fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn encode_request(target: &Target, init: &RequestInit) -> BytesMut {
    let body = init.body.as_deref().unwrap_or("");
    let mut headers = init.headers.clone();
    if !headers.contains("host") {
        headers.set("Host", target.host_header());
    }
    headers.set("Connection", "close");
    if !body.is_empty() || !matches!(init.method, Method::Get | Method::Head) {
        headers.set("Content-Length", body.len().to_string());
    }

    let mut buf = BytesMut::with_capacity(128 + headers.len() * 64 + body.len());
    buf.put_slice(format!("{} {} HTTP/1.1\r\n", init.method, target.path).as_bytes());
    buf.put_slice(headers.to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(body.as_bytes());
    buf
}

struct Head {
    status: u16,
    reason: String,
    headers: Headers,
    body_offset: usize,
}

fn parse_head(buf: &[u8]) -> Result<Option<Head>, NetworkError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Response::new(&mut headers);
    let body_offset = match raw.parse(buf).map_err(NetworkError::from_source)? {
        httparse::Status::Complete(offset) => offset,
        httparse::Status::Partial => return Ok(None),
    };

    let status = raw
        .code
        .ok_or_else(|| NetworkError::new("response is missing a status code"))?;
    let mut header_map = Headers::new();
    for header in raw.headers.iter() {
        if let Ok(value) = std::str::from_utf8(header.value) {
            header_map.append(header.name, value);
        }
    }

    Ok(Some(Head {
        status,
        reason: raw.reason.unwrap_or("").to_owned(),
        headers: header_map,
        body_offset,
    }))
}

/// Reassembles a `Transfer-Encoding: chunked` body.
fn decode_chunked(mut input: &[u8]) -> Result<Bytes, NetworkError> {
    let mut out = BytesMut::with_capacity(input.len());
    loop {
        let (consumed, size) = match httparse::parse_chunk_size(input) {
            Ok(httparse::Status::Complete(pair)) => pair,
            Ok(httparse::Status::Partial) => {
                return Err(NetworkError::new("truncated chunked body"));
            }
            Err(_) => return Err(NetworkError::new("invalid chunk size")),
        };
        let size = usize::try_from(size).map_err(|_| NetworkError::new("chunk too large"))?;
        input = &input[consumed..];
        if size == 0 {
            return Ok(out.freeze());
        }
        let end = size
            .checked_add(2)
            .filter(|&end| input.len() >= end)
            .ok_or_else(|| NetworkError::new("truncated chunked body"))?;
        out.put_slice(&input[..size]);
        input = &input[end..];
    }
}

async fn send(url: &str, init: &RequestInit, max: usize) -> Result<RawResponse, NetworkError> {
    let target = Target::parse(url)?;
    let mut stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
    debug!(url = %url, method = %init.method, "connected");

    stream.write_all(&encode_request(&target, init)).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    let head = loop {
        let bytes_read = stream.read_buf(&mut buf).await?;
        if buf.len() > max {
            return Err(NetworkError::new(format!("response exceeds {max} bytes")));
        }
        if let Some(head) = parse_head(&buf)? {
            break head;
        }
        if bytes_read == 0 {
            return Err(NetworkError::new("connection closed before the response head"));
        }
    };

    let bodyless = init.method == Method::Head || matches!(head.status, 100..=199 | 204 | 304);
    let content_length = if bodyless {
        Some(0)
    } else {
        head.headers
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
    };

    let body_end = loop {
        if let Some(len) = content_length {
            if buf.len() >= head.body_offset + len {
                break head.body_offset + len;
            }
        }
        let bytes_read = stream.read_buf(&mut buf).await?;
        if buf.len() > max {
            return Err(NetworkError::new(format!("response exceeds {max} bytes")));
        }
        if bytes_read == 0 {
            if content_length.is_some() {
                return Err(NetworkError::new("connection closed before the full body"));
            }
            break buf.len();
        }
    };

    buf.truncate(body_end);
    let mut body = buf.split_off(head.body_offset).freeze();
    let chunked = head
        .headers
        .get("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
    if chunked && content_length.is_none() {
        body = decode_chunked(&body)?;
    }

    Ok(RawResponse::builder(head.status)
        .status_text(head.reason)
        .url(url)
        .headers(head.headers)
        .body(body)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::AbortController;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// Accepts one connection, captures the request head and replies with `response`.
    async fn serve_once(response: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::with_capacity(1024);
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                if socket.read_buf(&mut buf).await.unwrap() == 0 {
                    break;
                }
            }
            socket.write_all(response).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn target_parsing() {
        let t = Target::parse("http://example.com:8080/p/1?x=2").unwrap();
        assert_eq!((t.host.as_str(), t.port, t.path.as_str()), ("example.com", 8080, "/p/1?x=2"));

        let t = Target::parse("http://example.com").unwrap();
        assert_eq!((t.port, t.path.as_str()), (80, "/"));
        assert_eq!(t.host_header(), "example.com");

        let t = Target::parse("http://localhost?q=1").unwrap();
        assert_eq!(t.path, "/?q=1");

        assert!(Target::parse("https://example.com/").is_err());
        assert!(Target::parse("http://:80/").is_err());
    }

    #[test]
    fn request_encoding() {
        let target = Target::parse("http://localhost:3000/books").unwrap();
        let init = RequestInit {
            method: Method::Post,
            body: Some("{}".into()),
            ..RequestInit::default()
        };
        let wire = encode_request(&target, &init);
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("POST /books HTTP/1.1\r\n"));
        assert!(text.contains("Host: localhost:3000\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }

    #[test]
    fn chunked_bodies() {
        let body = decode_chunked(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n").unwrap();
        assert_eq!(&body[..], b"Wikipedia");
        assert!(decode_chunked(b"4\r\nWi").is_err());
    }

    #[test]
    fn huge_chunk_sizes_are_rejected() {
        let err = decode_chunked(b"ffffffffffffffff\r\nabc").unwrap_err();
        assert_eq!(err.message(), "truncated chunked body");
    }

    #[tokio::test]
    async fn fetches_over_tcp() {
        let (base, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\n\r\n{\"id\": 42}\n",
        )
        .await;

        let url = format!("{base}/p/1");
        let raw = Http1Transport::new()
            .perform_network_call(&url, &RequestInit::default())
            .await
            .unwrap();

        assert!(raw.ok());
        assert_eq!(raw.status_text(), "OK");
        assert_eq!(raw.url(), url);
        assert_eq!(raw.headers().content_type().as_deref(), Some("application/json"));
        assert_eq!(raw.json().unwrap()["id"], 42);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /p/1 HTTP/1.1\r\n"));
        assert!(request.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn reads_to_eof_without_content_length() {
        let (base, _server) =
            serve_once(b"HTTP/1.1 404 Not Found\r\n\r\nno such book").await;
        let raw = Http1Transport::new()
            .perform_network_call(&base, &RequestInit::default())
            .await
            .unwrap();
        assert!(!raw.ok());
        assert_eq!(raw.text().unwrap(), "no such book");
    }

    #[tokio::test]
    async fn aborted_signal_fails_fast() {
        let controller = AbortController::new();
        controller.abort();
        let init = RequestInit {
            signal: Some(Arc::new(controller.signal())),
            ..RequestInit::default()
        };
        let err = Http1Transport::new()
            .perform_network_call("http://127.0.0.1:9/", &init)
            .await
            .unwrap_err();
        assert_eq!(err.message(), "The operation was aborted");
    }

    #[tokio::test]
    async fn abort_interrupts_a_pending_request() {
        // Accepts the connection but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/slow", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
            drop(socket);
        });

        let controller = AbortController::new();
        let init = RequestInit {
            signal: Some(Arc::new(controller.signal())),
            ..RequestInit::default()
        };
        let call = tokio::spawn(async move {
            Http1Transport::new().perform_network_call(&url, &init).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!call.is_finished());
        controller.abort();
        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.message(), "The operation was aborted");
        server.abort();
    }

    #[tokio::test]
    async fn oversized_responses_are_rejected() {
        let (base, _server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 64\r\n\r\n0123456789012345678901234567890123456789012345678901234567890123",
        )
        .await;
        let err = Http1Transport::new()
            .max_response_bytes(32)
            .perform_network_call(&base, &RequestInit::default())
            .await
            .unwrap_err();
        assert!(err.message().contains("exceeds 32 bytes"));
    }
}
