//! Outgoing request descriptions.
//!
//! A [`RequestDescriptor`] is everything a consumer says about one call. The
//! engine derives a request key from it, decides on a policy, and, when it has to
//! go to the network, lowers it to the [`RequestInit`] handed to the transport.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Data, Headers, Method, ResponseType};
use crate::cancel::CancellationToken;
use crate::error::UnknownValue;
use crate::policy::FetchPolicy;

/// Name used in cache-miss messages when the descriptor does not carry one.
pub const DEFAULT_REQUEST_NAME: &str = "anonymousRequest";

/// Declares a string-valued option enum: serde names and `FromStr`/`Display` all
/// use the exact wire strings.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident as $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $wire)] $variant ),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$variant => $wire ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $wire => Ok(Self::$variant), )+
                    other => Err(UnknownValue::new($kind, other)),
                }
            }
        }
    };
}

pub(crate) use wire_enum;

wire_enum! {
    /// Whether the transport should send credentials (cookies, auth).
    Credentials as "credentials" {
        Omit => "omit",
        SameOrigin => "same-origin",
        Include => "include",
    }
}

wire_enum! {
    RequestMode as "mode" {
        SameOrigin => "same-origin",
        Cors => "cors",
        NoCors => "no-cors",
        Navigate => "navigate",
        Websocket => "websocket",
    }
}

wire_enum! {
    /// Transport-level HTTP cache mode. Unrelated to the engine's response cache.
    CacheMode as "cache" {
        Default => "default",
        NoStore => "no-store",
        Reload => "reload",
        NoCache => "no-cache",
        ForceCache => "force-cache",
        OnlyIfCached => "only-if-cached",
    }
}

wire_enum! {
    Redirect as "redirect" {
        Manual => "manual",
        Follow => "follow",
        Error => "error",
    }
}

wire_enum! {
    ReferrerPolicy as "referrerPolicy" {
        /// The empty policy, meaning "use the transport's default".
        Unset => "",
        NoReferrer => "no-referrer",
        NoReferrerWhenDowngrade => "no-referrer-when-downgrade",
        Origin => "origin",
        OriginWhenCrossOrigin => "origin-when-cross-origin",
        UnsafeUrl => "unsafe-url",
    }
}

impl Default for ReferrerPolicy {
    fn default() -> Self {
        Self::Unset
    }
}

/// The request as the transport sees it.
///
/// Everything in here is passed through untouched; the engine never interprets
/// transport options.
#[derive(Clone)]
pub struct RequestInit {
    pub method: Method,
    pub headers: Headers,
    pub body: Option<String>,
    pub credentials: Option<Credentials>,
    pub mode: Option<RequestMode>,
    pub cache: Option<CacheMode>,
    pub redirect: Option<Redirect>,
    pub referrer: String,
    pub referrer_policy: ReferrerPolicy,
    pub integrity: String,
    pub keepalive: bool,
    pub signal: Option<Arc<dyn CancellationToken>>,
}

impl Default for RequestInit {
    fn default() -> Self {
        Self {
            method: Method::Get,
            headers: Headers::new(),
            body: None,
            credentials: None,
            mode: None,
            cache: None,
            redirect: None,
            referrer: "about:client".to_owned(),
            referrer_policy: ReferrerPolicy::Unset,
            integrity: String::new(),
            keepalive: false,
            signal: None,
        }
    }
}

impl fmt::Debug for RequestInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestInit")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("credentials", &self.credentials)
            .field("mode", &self.mode)
            .field("cache", &self.cache)
            .field("redirect", &self.redirect)
            .field("referrer", &self.referrer)
            .field("referrer_policy", &self.referrer_policy)
            .field("integrity", &self.integrity)
            .field("keepalive", &self.keepalive)
            .field("signal", &self.signal.as_ref().map(|s| s.is_canceled()))
            .finish()
    }
}

/// A description of one HTTP call.
///
/// Immutable once built. Plain GETs convert straight from a URL; everything
/// else goes through [`RequestDescriptor::builder`]:
///
/// ```
/// use refetch::http::{Method, RequestDescriptor, ResponseType};
/// use refetch::FetchPolicy;
///
/// let descriptor = RequestDescriptor::builder("/api/books")
///     .method("post")
///     .body(r#"{"title":"Dune"}"#)
///     .header("Content-Type", "application/json")
///     .response_type(ResponseType::Text)
///     .build();
///
/// assert_eq!(descriptor.method(), &Method::Post);
/// assert!(!descriptor.should_cache_response());
/// assert_eq!(descriptor.effective_policy(), FetchPolicy::NetworkOnly);
/// assert_eq!(descriptor.request_name(), "anonymousRequest");
/// ```
type TransformFn = dyn Fn(Data) -> Data + Send + Sync;

/// Reshapes decoded data on its way into a session.
///
/// Applies to the session's [`RequestState`](crate::RequestState) only; the
/// cached envelope keeps the raw value for every other consumer.
#[derive(Clone)]
pub struct DataTransform(Arc<TransformFn>);

impl DataTransform {
    pub fn new<F>(transform: F) -> Self
    where
        F: Fn(Data) -> Data + Send + Sync + 'static,
    {
        Self(Arc::new(transform))
    }

    pub fn apply(&self, data: Data) -> Data {
        (self.0)(data)
    }
}

impl fmt::Debug for DataTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataTransform")
    }
}

#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    url: String,
    request_key: Option<String>,
    request_name: Option<String>,
    response_type: ResponseType,
    dedupe: bool,
    cache_response: Option<bool>,
    fetch_policy: Option<FetchPolicy>,
    transform_data: Option<DataTransform>,
    init: RequestInit,
}

impl RequestDescriptor {
    /// Starts a `GET` descriptor for `url` with every other field defaulted.
    pub fn builder(url: impl Into<String>) -> RequestDescriptorBuilder {
        RequestDescriptorBuilder {
            inner: Self {
                url: url.into(),
                request_key: None,
                request_name: None,
                response_type: ResponseType::Json,
                dedupe: true,
                cache_response: None,
                fetch_policy: None,
                transform_data: None,
                init: RequestInit::default(),
            },
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.init.method
    }

    pub fn body(&self) -> Option<&str> {
        self.init.body.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.init.headers
    }

    pub fn response_type(&self) -> &ResponseType {
        &self.response_type
    }

    /// The caller-supplied key override, if any.
    pub fn explicit_key(&self) -> Option<&str> {
        self.request_key.as_deref()
    }

    pub fn request_name(&self) -> &str {
        self.request_name.as_deref().unwrap_or(DEFAULT_REQUEST_NAME)
    }

    pub fn dedupe(&self) -> bool {
        self.dedupe
    }

    /// Whether a successful network response is written to the response cache.
    ///
    /// Defaults to `true` for read methods only.
    pub fn should_cache_response(&self) -> bool {
        self.cache_response
            .unwrap_or_else(|| self.init.method.is_read())
    }

    /// The explicit policy if one was set, otherwise the per-method default.
    pub fn effective_policy(&self) -> FetchPolicy {
        self.fetch_policy
            .unwrap_or_else(|| FetchPolicy::default_for(&self.init.method))
    }

    pub fn data_transform(&self) -> Option<&DataTransform> {
        self.transform_data.as_ref()
    }

    /// The transport-facing part of the descriptor.
    pub fn init(&self) -> &RequestInit {
        &self.init
    }
}

impl From<&str> for RequestDescriptor {
    fn from(url: &str) -> Self {
        RequestDescriptor::builder(url).build()
    }
}

impl From<String> for RequestDescriptor {
    fn from(url: String) -> Self {
        RequestDescriptor::builder(url).build()
    }
}

impl From<RequestDescriptorBuilder> for RequestDescriptor {
    fn from(builder: RequestDescriptorBuilder) -> Self {
        builder.build()
    }
}

/// Fluent builder for [`RequestDescriptor`].
#[derive(Debug, Clone)]
pub struct RequestDescriptorBuilder {
    inner: RequestDescriptor,
}

impl RequestDescriptorBuilder {
    #[must_use]
    pub fn method(mut self, method: impl Into<Method>) -> Self {
        self.inner.init.method = method.into().normalized();
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.inner.init.body = Some(body.into());
        self
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.init.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.inner.init.headers = headers;
        self
    }

    #[must_use]
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.inner.response_type = response_type;
        self
    }

    /// Overrides the derived request key. Used verbatim for caching and dedupe.
    #[must_use]
    pub fn request_key(mut self, key: impl Into<String>) -> Self {
        self.inner.request_key = Some(key.into());
        self
    }

    /// Human-readable name, used in cache-miss errors.
    #[must_use]
    pub fn request_name(mut self, name: impl Into<String>) -> Self {
        self.inner.request_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn dedupe(mut self, dedupe: bool) -> Self {
        self.inner.dedupe = dedupe;
        self
    }

    /// Forces network responses to be cached (or not), regardless of method.
    #[must_use]
    pub fn cache_response(mut self, cache: bool) -> Self {
        self.inner.cache_response = Some(cache);
        self
    }

    #[must_use]
    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.inner.fetch_policy = Some(policy);
        self
    }

    /// Runs `transform` over decoded data before it lands in the session's
    /// state, for cached and network results alike. The identity when unset.
    #[must_use]
    pub fn transform_data<F>(mut self, transform: F) -> Self
    where
        F: Fn(Data) -> Data + Send + Sync + 'static,
    {
        self.inner.transform_data = Some(DataTransform::new(transform));
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.inner.init.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.inner.init.mode = Some(mode);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: CacheMode) -> Self {
        self.inner.init.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn redirect(mut self, redirect: Redirect) -> Self {
        self.inner.init.redirect = Some(redirect);
        self
    }

    #[must_use]
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.inner.init.referrer = referrer.into();
        self
    }

    #[must_use]
    pub fn referrer_policy(mut self, policy: ReferrerPolicy) -> Self {
        self.inner.init.referrer_policy = policy;
        self
    }

    #[must_use]
    pub fn integrity(mut self, integrity: impl Into<String>) -> Self {
        self.inner.init.integrity = integrity.into();
        self
    }

    #[must_use]
    pub fn keepalive(mut self, keepalive: bool) -> Self {
        self.inner.init.keepalive = keepalive;
        self
    }

    /// Attaches a cancellation token for transports that can abort.
    #[must_use]
    pub fn signal(mut self, signal: impl CancellationToken + 'static) -> Self {
        self.inner.init.signal = Some(Arc::new(signal));
        self
    }

    pub fn build(self) -> RequestDescriptor {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_method() {
        let get = RequestDescriptor::from("/p/1");
        assert!(get.should_cache_response());
        assert_eq!(get.effective_policy(), FetchPolicy::CacheFirst);
        assert!(get.dedupe());
        assert_eq!(get.init().referrer, "about:client");

        let delete = RequestDescriptor::builder("/p/1").method("delete");
        assert!(!delete.clone().build().should_cache_response());
        assert_eq!(delete.clone().build().effective_policy(), FetchPolicy::NetworkOnly);

        let opted_in = delete.cache_response(true).build();
        assert!(opted_in.should_cache_response());
        assert_eq!(opted_in.method(), &Method::Delete);
    }

    #[test]
    fn wire_strings_round_trip() {
        assert_eq!("same-origin".parse::<Credentials>().ok(), Some(Credentials::SameOrigin));
        assert_eq!("".parse::<ReferrerPolicy>().ok(), Some(ReferrerPolicy::Unset));
        assert_eq!(CacheMode::OnlyIfCached.to_string(), "only-if-cached");

        let err = "sometimes".parse::<Redirect>().unwrap_err();
        assert_eq!(err.to_string(), "unknown redirect value: \"sometimes\"");
    }

    #[test]
    fn serde_uses_wire_names() {
        let mode: RequestMode = serde_json::from_str("\"no-cors\"").unwrap();
        assert_eq!(mode, RequestMode::NoCors);
        assert_eq!(
            serde_json::to_string(&ReferrerPolicy::NoReferrerWhenDowngrade).unwrap(),
            "\"no-referrer-when-downgrade\""
        );
    }
}
