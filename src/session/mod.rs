//! Consumer sessions: the `request()` entry point.
//!
//! A [`Session`] stands for one consumer whose requests come and go over time.
//! It ties the lifecycle controller, the consumer's hooks and the policy
//! engine together, and keeps a [`RequestState`] view of the latest result.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::FetchError;
use crate::hooks::{AfterFetchInfo, BeforeFetchInfo, Delivery, Hooks, Observer, Source};
use crate::http::{Data, DataTransform, RequestDescriptor, ResponseEnvelope};
use crate::key::{RequestKey, build_key};
use crate::lifecycle::{Interrupted, Lifecycle, Ticket};
use crate::policy::{FetchPolicy, PolicyEngine};

/// What a consumer currently knows about its request.
#[derive(Debug, Clone, Default)]
pub struct RequestState {
    /// `true` while a network call for the owned request is pending.
    pub fetching: bool,
    /// Last decoded data. Kept across error deliveries that carry none.
    pub data: Option<Data>,
    pub error: Option<FetchError>,
    pub response: Option<ResponseEnvelope>,
    pub request_key: Option<RequestKey>,
}

impl RequestState {
    fn apply(&mut self, delivery: &Delivery) {
        self.fetching = delivery.fetching;
        self.error = delivery.error.clone();
        self.response = delivery.response.clone();
        if delivery.data.is_some() || delivery.error.is_none() {
            self.data = delivery.data.clone();
        }
    }
}

struct Inner {
    engine: PolicyEngine,
    hooks: Hooks,
    lifecycle: Lifecycle,
    view: Mutex<RequestState>,
}

/// One consumer of the engine. Created by [`Client::session`](crate::Client::session).
///
/// Clones refer to the same session. Issuing a request while the previous
/// one is still pending cancels the previous one for this session only:
///
/// ```
/// # use refetch::{Client, FetchError, transport};
/// # use refetch::http::RawResponse;
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// # let client = Client::builder(transport::from_fn(|url, _| async move {
/// #     Ok(RawResponse::builder(200).url(url).body("{}").build())
/// # })).isolated().build();
/// let session = client.session_default();
/// let (first, second) = tokio::join!(session.request("/p/1"), session.request("/p/2"));
///
/// match first {
///     Err(FetchError::Cancelled(e)) => assert_eq!(e.message(), "New fetch initiated"),
///     other => panic!("unexpected {other:?}"),
/// }
/// assert!(second.is_ok());
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub(crate) fn new(engine: PolicyEngine, hooks: Hooks) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                hooks,
                lifecycle: Lifecycle::new(),
                view: Mutex::new(RequestState::default()),
            }),
        }
    }

    /// Issues `descriptor` under its effective policy.
    pub async fn request(
        &self,
        descriptor: impl Into<RequestDescriptor>,
    ) -> Result<ResponseEnvelope, FetchError> {
        let descriptor = descriptor.into();
        let policy = descriptor.effective_policy();
        self.run(descriptor, policy).await
    }

    /// Issues `descriptor` under `policy`, overriding the descriptor's own.
    pub async fn request_with_policy(
        &self,
        descriptor: impl Into<RequestDescriptor>,
        policy: FetchPolicy,
    ) -> Result<ResponseEnvelope, FetchError> {
        self.run(descriptor.into(), policy).await
    }

    async fn run(
        &self,
        descriptor: RequestDescriptor,
        policy: FetchPolicy,
    ) -> Result<ResponseEnvelope, FetchError> {
        let inner = &*self.inner;
        let key = build_key(&descriptor);
        let begun = match inner.lifecycle.begin(key.clone()) {
            Ok(begun) => begun,
            Err(error) => {
                debug!(request_key = %key, "request on a torn-down session");
                return Err(error.into());
            }
        };
        if let Some(superseded) = begun.superseded {
            inner.superseded(superseded);
        }
        inner.view.lock().request_key = Some(key.clone());

        let ticket = begun.ticket;
        let mut cancelled = begun.cancelled;
        let dispatch = Dispatch {
            inner,
            ticket,
            transform: descriptor.data_transform(),
        };
        let result = tokio::select! {
            biased;
            Ok(error) = &mut cancelled => Err(FetchError::Cancelled(error)),
            result = inner.engine.resolve(&descriptor, &key, policy, &dispatch) => result,
        };
        inner.lifecycle.settle(ticket);
        result
    }

    /// Stops listening for good.
    ///
    /// An unsettled network attempt gets a final `after_fetch` with
    /// `did_unmount` set; its pending `request()` resolves with
    /// `"Component unmounted"`. Later requests fail the same way and fire no
    /// hooks.
    pub fn teardown(&self) {
        let Some(interrupted) = self.inner.lifecycle.teardown() else {
            return;
        };
        debug!(request_key = %interrupted.key, "unsettled request interrupted by teardown");
        if let Some(before) = interrupted.network {
            let error = FetchError::Cancelled(interrupted.error);
            let info = AfterFetchInfo::new(&before, Some(error), None, None).unmounted();
            self.inner.hooks.after_fetch(&info);
        }
    }

    /// A snapshot of the latest delivered result.
    pub fn state(&self) -> RequestState {
        self.inner.view.lock().clone()
    }

    /// The key of the most recently begun request.
    pub fn owned_key(&self) -> Option<RequestKey> {
        self.inner.lifecycle.owned_key()
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.lifecycle.is_torn_down()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("lifecycle", &self.inner.lifecycle)
            .field("hooks", &self.inner.hooks)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn superseded(&self, interrupted: Interrupted) {
        debug!(request_key = %interrupted.key, "superseded by a new request");
        let delivery = Delivery::failed(Source::Engine, interrupted.error.into(), None);
        self.view.lock().apply(&delivery);
        self.hooks.deliver(&delivery);
    }
}

/// Forwards engine events to the session's hooks while `ticket` is current.
struct Dispatch<'a> {
    inner: &'a Inner,
    ticket: Ticket,
    transform: Option<&'a DataTransform>,
}

impl Observer for Dispatch<'_> {
    fn before_fetch(&self, info: &BeforeFetchInfo) {
        if !self.inner.lifecycle.record_network(self.ticket, info) {
            return;
        }
        self.inner.view.lock().fetching = true;
        self.inner.hooks.before_fetch(info);
    }

    fn after_fetch(&self, info: &AfterFetchInfo) {
        if self.inner.lifecycle.is_current(self.ticket) {
            self.inner.hooks.after_fetch(info);
        }
    }

    fn deliver(&self, delivery: &Delivery) {
        if !self.inner.lifecycle.is_current(self.ticket) {
            return;
        }
        match (self.transform, &delivery.data) {
            (Some(transform), Some(data)) => {
                let shaped = Delivery {
                    data: Some(transform.apply(data.clone())),
                    ..delivery.clone()
                };
                self.inner.view.lock().apply(&shaped);
                self.inner.hooks.deliver(&shaped);
            }
            _ => {
                self.inner.view.lock().apply(delivery);
                self.inner.hooks.deliver(delivery);
            }
        }
    }
}
