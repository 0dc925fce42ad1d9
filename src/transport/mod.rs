//! The network primitive the engine sits on.
//!
//! The engine never talks to sockets itself. It calls
//! [`Transport::perform_network_call`] and treats the returned future as
//! opaque: it resolves with a [`RawResponse`] or fails with a [`NetworkError`].
//! Timeouts, TLS and retries are the transport's business.

use std::future::Future;
use std::pin::Pin;

use crate::error::NetworkError;
use crate::http::{RawResponse, RequestInit};

pub mod http1;

pub use http1::Http1Transport;

/// Boxed future returned by a transport.
pub type TransportFuture = Pin<Box<dyn Future<Output = Result<RawResponse, NetworkError>> + Send>>;

/// Something that can issue an HTTP call.
///
/// The returned future must not borrow from `self`, `url` or `init`: the engine
/// runs it on its own task so it can outlive the consumer that started it.
pub trait Transport: Send + Sync + 'static {
    fn perform_network_call(&self, url: &str, init: &RequestInit) -> TransportFuture;
}

/// Adapts an async closure into a [`Transport`].
///
/// ```
/// use refetch::http::RawResponse;
/// use refetch::transport::{self, Transport};
///
/// let echo = transport::from_fn(|url, _init| async move {
///     Ok(RawResponse::builder(200).url(url).body("pong").build())
/// });
/// # let _ = echo;
/// ```
pub fn from_fn<F, Fut>(f: F) -> FnTransport<F>
where
    F: Fn(String, RequestInit) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RawResponse, NetworkError>> + Send + 'static,
{
    FnTransport(f)
}

/// See [`from_fn`].
#[derive(Clone)]
pub struct FnTransport<F>(F);

impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(String, RequestInit) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RawResponse, NetworkError>> + Send + 'static,
{
    fn perform_network_call(&self, url: &str, init: &RequestInit) -> TransportFuture {
        Box::pin((self.0)(url.to_owned(), init.clone()))
    }
}

impl<F> std::fmt::Debug for FnTransport<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnTransport")
    }
}
