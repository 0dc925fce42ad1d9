//! # refetch
//!
//! A client-side HTTP request engine: in-flight deduplication, a policy-driven
//! response cache, and per-consumer cancellation and hooks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use refetch::{Client, FetchPolicy, Hooks, RequestDescriptor};
//! use refetch::transport::Http1Transport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new(Http1Transport::new());
//!     let session = client.session(Hooks::new().on_result(|error, response| {
//!         println!("error={error:?} status={:?}", response.map(|r| r.status));
//!     }));
//!
//!     // The first call goes to the network, the second is served from cache.
//!     let url = "http://127.0.0.1:8080/books";
//!     session.request(url).await?;
//!     session.request(url).await?;
//!
//!     // Serve the cached copy right away, then refresh it.
//!     let descriptor = RequestDescriptor::builder(url)
//!         .fetch_policy(FetchPolicy::CacheAndNetwork)
//!         .build();
//!     session.request(descriptor).await?;
//!     Ok(())
//! }
//! ```

// ── Engine ────────────────────────────────────────────────────────────────────
pub mod cache;
pub mod client;
pub mod hooks;
pub mod inflight;
pub mod key;
pub mod lifecycle;
pub mod policy;
pub mod session;

// ── Protocol and I/O ──────────────────────────────────────────────────────────
pub mod cancel;
pub mod error;
pub mod http;
pub mod transport;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::ResponseCache;
pub use client::{Client, ClientBuilder};
pub use error::{CancelReason, CancellationError, FetchError, NetworkError};
pub use hooks::{AfterFetchInfo, BeforeFetchInfo, Hooks};
pub use http::{Data, Method, RawResponse, RequestDescriptor, ResponseEnvelope, ResponseType};
pub use inflight::InFlightRegistry;
pub use key::{RequestKey, build_key};
pub use policy::FetchPolicy;
pub use session::{RequestState, Session};
pub use transport::Transport;
