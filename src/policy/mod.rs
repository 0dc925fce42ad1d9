//! Fetch policies and the engine that applies them.
//!
//! [`PolicyEngine::resolve`] combines the response cache, the in-flight
//! registry and the transport for one request, reporting every intermediate
//! result to an [`Observer`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::ResponseCache;
use crate::error::{FetchError, UnknownValue};
use crate::hooks::{AfterFetchInfo, BeforeFetchInfo, Delivery, Observer, Source};
use crate::http::request::wire_enum;
use crate::http::{Method, RequestDescriptor, ResponseEnvelope};
use crate::inflight::{FlightResult, InFlightRegistry};
use crate::key::RequestKey;
use crate::transport::Transport;

wire_enum! {
    /// How the cache and the network are combined for a request.
    ///
    /// | Policy | Warm cache | Cold cache |
    /// |--------|------------|------------|
    /// | `cache-first` | deliver the entry, no network | network |
    /// | `cache-and-network` | deliver the entry, then the network outcome | network |
    /// | `network-only` | network | network |
    /// | `cache-only` | deliver the entry | cache-miss error, no network |
    FetchPolicy as "fetchPolicy" {
        CacheFirst => "cache-first",
        CacheAndNetwork => "cache-and-network",
        NetworkOnly => "network-only",
        CacheOnly => "cache-only",
    }
}

impl FetchPolicy {
    /// `cache-first` for read methods (GET, HEAD, OPTIONS), `network-only` otherwise.
    pub fn default_for(method: &Method) -> Self {
        if method.is_read() {
            Self::CacheFirst
        } else {
            Self::NetworkOnly
        }
    }
}

/// Resolves requests against one cache, one registry and one transport.
///
/// Cloning is cheap; clones share all three.
#[derive(Clone)]
pub struct PolicyEngine {
    cache: ResponseCache,
    registry: InFlightRegistry,
    transport: Arc<dyn Transport>,
}

impl PolicyEngine {
    pub fn new(transport: Arc<dyn Transport>, cache: ResponseCache, registry: InFlightRegistry) -> Self {
        Self {
            cache,
            registry,
            transport,
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    /// Resolves `descriptor` under `policy`.
    ///
    /// Every result is also handed to `observer.deliver`, so `cache-and-network`
    /// against a warm entry delivers twice. The returned value is the last
    /// delivery. A `cache-only` miss never touches the network and fires no
    /// fetch hooks.
    pub async fn resolve(
        &self,
        descriptor: &RequestDescriptor,
        key: &RequestKey,
        policy: FetchPolicy,
        observer: &dyn Observer,
    ) -> Result<ResponseEnvelope, FetchError> {
        match (policy, self.cache.get(key.as_str())) {
            (FetchPolicy::CacheFirst | FetchPolicy::CacheOnly, Some(hit)) => {
                debug!(request_key = %key, ?policy, "cache hit");
                observer.deliver(&Delivery::cached(&hit, false));
                Ok(hit)
            }
            (FetchPolicy::CacheOnly, None) => {
                debug!(request_key = %key, ?policy, "cache miss");
                let error = FetchError::CacheMiss {
                    name: descriptor.request_name().to_owned(),
                };
                observer.deliver(&Delivery::failed(Source::Engine, error.clone(), None));
                Err(error)
            }
            (FetchPolicy::CacheAndNetwork, Some(stale)) => {
                debug!(request_key = %key, ?policy, "cache hit, revalidating");
                observer.deliver(&Delivery::cached(&stale, true));
                self.fetch(descriptor, key, Some(stale), observer).await
            }
            (policy, _) => {
                debug!(request_key = %key, ?policy, "going to network");
                self.fetch(descriptor, key, None, observer).await
            }
        }
    }

    async fn fetch(
        &self,
        descriptor: &RequestDescriptor,
        key: &RequestKey,
        stale: Option<ResponseEnvelope>,
        observer: &dyn Observer,
    ) -> Result<ResponseEnvelope, FetchError> {
        let before = BeforeFetchInfo {
            url: descriptor.url().to_owned(),
            request_init: descriptor.init().clone(),
            request_key: key.clone(),
        };
        observer.before_fetch(&before);

        let call = self.network_call(descriptor, key);
        let flight = if descriptor.dedupe() {
            self.registry.execute(key.clone(), call)
        } else {
            self.registry.execute_private(call)
        };

        match flight.await {
            Ok(envelope) => {
                let info = AfterFetchInfo::new(&before, None, Some(envelope.clone()), envelope.data.clone());
                observer.after_fetch(&info);
                observer.deliver(&Delivery::network(&envelope));
                Ok(envelope)
            }
            Err(e) => {
                let error = FetchError::Network(e);
                // A failed revalidation keeps showing what the cache had.
                let data = stale.and_then(|envelope| envelope.data);
                let info = AfterFetchInfo::new(&before, Some(error.clone()), None, data.clone());
                observer.after_fetch(&info);
                observer.deliver(&Delivery::failed(Source::Network, error.clone(), data));
                Err(error)
            }
        }
    }

    /// The future the registry runs for a new flight: call, decode once, cache.
    ///
    /// Nothing happens until it is polled, so a joined flight never reaches the
    /// transport.
    fn network_call(
        &self,
        descriptor: &RequestDescriptor,
        key: &RequestKey,
    ) -> impl Future<Output = FlightResult> + Send + 'static {
        let transport = Arc::clone(&self.transport);
        let url = descriptor.url().to_owned();
        let init = descriptor.init().clone();
        let response_type = descriptor.response_type().clone();
        let cache = descriptor.should_cache_response().then(|| self.cache.clone());
        let key = key.clone();

        async move {
            let raw = transport.perform_network_call(&url, &init).await?;
            let envelope = ResponseEnvelope::decode(raw, &response_type);
            if let Some(cache) = cache {
                cache.set(key, envelope.clone());
            }
            Ok(envelope)
        }
    }
}

impl fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("cache", &self.cache)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
