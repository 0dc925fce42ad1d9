//! The engine handle consumers start from.
//!
//! A [`Client`] owns one policy engine (transport, response cache and in-flight
//! registry) and hands out [`Session`]s. By default every client shares the
//! process-wide cache and registry; [`ClientBuilder::isolated`] gives a client
//! its own, which is what tests want.

use std::sync::Arc;

use tracing::debug;

use crate::cache::ResponseCache;
use crate::error::FetchError;
use crate::hooks::Hooks;
use crate::http::{RequestDescriptor, ResponseEnvelope};
use crate::inflight::InFlightRegistry;
use crate::policy::PolicyEngine;
use crate::session::Session;
use crate::transport::Transport;

/// Entry point of the engine.
///
/// # Examples
///
/// ```rust,no_run
/// use refetch::{Client, Hooks};
/// use refetch::transport::Http1Transport;
///
/// #[tokio::main]
/// async fn main() -> Result<(), refetch::FetchError> {
///     let client = Client::new(Http1Transport::new());
///     let session = client.session(Hooks::new().on_before_fetch(|info| {
///         println!("GET {}", info.url);
///     }));
///
///     let books = session.request("http://127.0.0.1:3000/books").await?;
///     println!("{:?}", books.data);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    engine: PolicyEngine,
}

impl Client {
    /// A client over `transport` using the process-wide cache and registry.
    pub fn new(transport: impl Transport) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: impl Transport) -> ClientBuilder {
        ClientBuilder {
            transport: Arc::new(transport),
            cache: None,
            registry: None,
        }
    }

    /// Starts a consumer session with `hooks`.
    pub fn session(&self, hooks: Hooks) -> Session {
        Session::new(self.engine.clone(), hooks)
    }

    /// Starts a consumer session with no hooks.
    pub fn session_default(&self) -> Session {
        self.session(Hooks::new())
    }

    /// One-off request on a throwaway session.
    pub async fn request(
        &self,
        descriptor: impl Into<RequestDescriptor>,
    ) -> Result<ResponseEnvelope, FetchError> {
        self.session_default().request(descriptor).await
    }

    pub fn cache(&self) -> &ResponseCache {
        self.engine.cache()
    }

    pub fn registry(&self) -> &InFlightRegistry {
        self.engine.registry()
    }

    pub fn is_request_in_flight(&self, key: &str) -> bool {
        self.engine.registry().is_in_flight(key)
    }

    /// Clears every cached response. For tests and operational tooling.
    pub fn reset_response_cache(&self) {
        debug!("response cache reset");
        self.engine.cache().reset_all();
    }

    /// Forgets every in-flight call. For tests and operational tooling.
    pub fn reset_in_flight_registry(&self) {
        self.engine.registry().reset();
    }
}

/// Configures a [`Client`].
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    cache: Option<ResponseCache>,
    registry: Option<InFlightRegistry>,
}

impl ClientBuilder {
    /// Shares `cache` instead of the process-wide one.
    #[must_use]
    pub fn cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Shares `registry` instead of the process-wide one.
    #[must_use]
    pub fn registry(mut self, registry: InFlightRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Gives the client a fresh cache and registry of its own.
    #[must_use]
    pub fn isolated(self) -> Self {
        self.cache(ResponseCache::new()).registry(InFlightRegistry::new())
    }

    pub fn build(self) -> Client {
        let cache = self.cache.unwrap_or_else(ResponseCache::global);
        let registry = self.registry.unwrap_or_else(InFlightRegistry::global);
        Client {
            engine: PolicyEngine::new(self.transport, cache, registry),
        }
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("cache", &self.cache)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RawResponse;
    use crate::transport;

    fn echo() -> impl Transport {
        transport::from_fn(|url, _init| async move {
            Ok(RawResponse::builder(200).url(url).body("{}").build())
        })
    }

    #[test]
    fn default_clients_share_the_global_instances() {
        let a = Client::new(echo());
        let b = Client::new(echo());
        a.cache().set("shared-key".into(), {
            let raw = RawResponse::builder(200).build();
            ResponseEnvelope::decode(raw, &crate::http::ResponseType::Text)
        });
        assert!(b.cache().get("shared-key").is_some());
    }

    #[test]
    fn isolated_clients_do_not_share() {
        let a = Client::builder(echo()).isolated().build();
        let b = Client::builder(echo()).isolated().build();
        a.cache().set("k".into(), {
            let raw = RawResponse::builder(200).build();
            ResponseEnvelope::decode(raw, &crate::http::ResponseType::Text)
        });
        assert!(b.cache().get("k").is_none());
    }

    #[tokio::test]
    async fn maintenance_operations() {
        let client = Client::builder(echo()).isolated().build();
        client.request("/p/1").await.unwrap();
        assert_eq!(client.cache().len(), 1);
        assert!(!client.is_request_in_flight("/p/1||GET||||json"));

        client.reset_response_cache();
        assert!(client.cache().is_empty());
        client.reset_in_flight_registry();
    }
}
