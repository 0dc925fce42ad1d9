//! Hook dispatch: observer callbacks around network attempts and deliveries.
//!
//! | Hook | Fires |
//! |------|-------|
//! | `before_fetch` | once per real network attempt, right before the call is issued |
//! | `after_fetch` | once per network attempt that settles (or is cancelled) while still owned |
//! | `on_result` | once per delivery, from cache or network |
//!
//! Pure cache hits and `cache-only` misses never fire `before_fetch` or
//! `after_fetch`.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::FetchError;
use crate::http::{Data, RequestInit, ResponseEnvelope};
use crate::key::RequestKey;

/// Payload of `before_fetch`.
#[derive(Debug, Clone)]
pub struct BeforeFetchInfo {
    pub url: String,
    pub request_init: RequestInit,
    pub request_key: RequestKey,
}

/// Payload of `after_fetch`.
#[derive(Debug, Clone)]
pub struct AfterFetchInfo {
    pub url: String,
    pub request_init: RequestInit,
    pub request_key: RequestKey,
    pub error: Option<FetchError>,
    /// `error.is_some() || !response.ok`.
    pub failed: bool,
    pub response: Option<ResponseEnvelope>,
    pub data: Option<Data>,
    /// Set when the attempt ended because its session was torn down.
    pub did_unmount: bool,
}

impl AfterFetchInfo {
    pub fn new(
        before: &BeforeFetchInfo,
        error: Option<FetchError>,
        response: Option<ResponseEnvelope>,
        data: Option<Data>,
    ) -> Self {
        let failed = error.is_some() || response.as_ref().is_some_and(|r| !r.ok);
        Self {
            url: before.url.clone(),
            request_init: before.request_init.clone(),
            request_key: before.request_key.clone(),
            error,
            failed,
            response,
            data,
            did_unmount: false,
        }
    }

    #[must_use]
    pub fn unmounted(mut self) -> Self {
        self.did_unmount = true;
        self
    }
}

/// Where a delivered result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Network,
    /// A miss or a synthesized cancellation; nothing was read or fetched.
    Engine,
}

/// One result handed to a consumer.
///
/// `cache-and-network` delivers twice: first the cached entry with
/// `fetching = true`, then the network outcome.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub source: Source,
    /// `true` while a network call for this request is still pending.
    pub fetching: bool,
    pub error: Option<FetchError>,
    pub response: Option<ResponseEnvelope>,
    pub data: Option<Data>,
}

impl Delivery {
    pub fn cached(envelope: &ResponseEnvelope, fetching: bool) -> Self {
        Self {
            source: Source::Cache,
            fetching,
            error: None,
            response: Some(envelope.clone()),
            data: envelope.data.clone(),
        }
    }

    pub fn network(envelope: &ResponseEnvelope) -> Self {
        Self {
            source: Source::Network,
            fetching: false,
            error: None,
            response: Some(envelope.clone()),
            data: envelope.data.clone(),
        }
    }

    /// A failed delivery. `data` carries whatever was known before the failure.
    pub fn failed(source: Source, error: FetchError, data: Option<Data>) -> Self {
        Self {
            source,
            fetching: false,
            error: Some(error),
            response: None,
            data,
        }
    }
}

/// The seam between the policy engine and whoever is listening.
///
/// [`Hooks`] implements it directly; sessions wrap it to drop events for
/// requests they no longer own.
pub trait Observer: Send + Sync {
    fn before_fetch(&self, info: &BeforeFetchInfo);
    fn after_fetch(&self, info: &AfterFetchInfo);
    fn deliver(&self, delivery: &Delivery);
}

type BeforeFetchFn = Arc<dyn Fn(&BeforeFetchInfo) + Send + Sync>;
type AfterFetchFn = Arc<dyn Fn(&AfterFetchInfo) + Send + Sync>;
type OnResultFn = Arc<dyn Fn(Option<&FetchError>, Option<&ResponseEnvelope>) + Send + Sync>;

/// Callbacks registered when a session is created. Each defaults to a no-op.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use refetch::hooks::Hooks;
///
/// let results = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&results);
/// let hooks = Hooks::new()
///     .on_before_fetch(|info| println!("fetching {}", info.url))
///     .on_result(move |_error, _response| {
///         counter.fetch_add(1, Ordering::SeqCst);
///     });
/// # let _ = hooks;
/// ```
#[derive(Clone, Default)]
pub struct Hooks {
    before_fetch: Option<BeforeFetchFn>,
    after_fetch: Option<AfterFetchFn>,
    on_result: Option<OnResultFn>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_before_fetch<F>(mut self, hook: F) -> Self
    where
        F: Fn(&BeforeFetchInfo) + Send + Sync + 'static,
    {
        self.before_fetch = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_after_fetch<F>(mut self, hook: F) -> Self
    where
        F: Fn(&AfterFetchInfo) + Send + Sync + 'static,
    {
        self.after_fetch = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_result<F>(mut self, hook: F) -> Self
    where
        F: Fn(Option<&FetchError>, Option<&ResponseEnvelope>) + Send + Sync + 'static,
    {
        self.on_result = Some(Arc::new(hook));
        self
    }
}

impl Observer for Hooks {
    fn before_fetch(&self, info: &BeforeFetchInfo) {
        if let Some(hook) = &self.before_fetch {
            trace!(request_key = %info.request_key, "dispatching before_fetch");
            hook(info);
        }
    }

    fn after_fetch(&self, info: &AfterFetchInfo) {
        if let Some(hook) = &self.after_fetch {
            trace!(request_key = %info.request_key, failed = info.failed, "dispatching after_fetch");
            hook(info);
        }
    }

    fn deliver(&self, delivery: &Delivery) {
        if let Some(hook) = &self.on_result {
            trace!(source = ?delivery.source, "dispatching on_result");
            hook(delivery.error.as_ref(), delivery.response.as_ref());
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_fetch", &self.before_fetch.is_some())
            .field("after_fetch", &self.after_fetch.is_some())
            .field("on_result", &self.on_result.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::http::{RawResponse, ResponseType};
    use parking_lot::Mutex;

    fn before() -> BeforeFetchInfo {
        BeforeFetchInfo {
            url: "/p/1".into(),
            request_init: RequestInit::default(),
            request_key: "k".into(),
        }
    }

    #[test]
    fn failed_flag_covers_errors_and_non_ok_responses() {
        let not_found = ResponseEnvelope::decode(
            RawResponse::builder(404).build(),
            &ResponseType::Text,
        );
        let info = AfterFetchInfo::new(&before(), None, Some(not_found), None);
        assert!(info.failed);

        let err = FetchError::Network(NetworkError::new("down"));
        let info = AfterFetchInfo::new(&before(), Some(err), None, None);
        assert!(info.failed);
        assert!(!info.did_unmount);
        assert!(info.unmounted().did_unmount);

        let ok = ResponseEnvelope::decode(RawResponse::builder(200).build(), &ResponseType::Text);
        assert!(!AfterFetchInfo::new(&before(), None, Some(ok), None).failed);
    }

    #[test]
    fn default_hooks_are_no_ops() {
        let hooks = Hooks::new();
        hooks.before_fetch(&before());
        hooks.deliver(&Delivery::failed(
            Source::Engine,
            FetchError::CacheMiss { name: "x".into() },
            None,
        ));
    }

    #[test]
    fn on_result_receives_error_and_response() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hooks = Hooks::new().on_result(move |error, response| {
            sink.lock()
                .push((error.map(ToString::to_string), response.map(|r| r.status.as_u16())));
        });

        let ok = ResponseEnvelope::decode(RawResponse::builder(200).build(), &ResponseType::Text);
        hooks.deliver(&Delivery::cached(&ok, true));
        hooks.deliver(&Delivery::failed(
            Source::Network,
            FetchError::Network(NetworkError::new("Network error")),
            None,
        ));

        let seen = seen.lock();
        assert_eq!(seen[0], (None, Some(200)));
        assert_eq!(seen[1], (Some("Network error".to_owned()), None));
    }
}
