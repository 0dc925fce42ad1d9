//! Request identity.
//!
//! The same key drives both the response cache and in-flight deduplication.

use std::borrow::Borrow;
use std::fmt;

use crate::http::RequestDescriptor;

const SEPARATOR: &str = "||";

/// Deterministic identity of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for RequestKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for RequestKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RequestKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Derives the key for `descriptor`.
///
/// An explicit `request_key` wins verbatim. Otherwise the key is
/// `url || METHOD || body || responseType`, with a missing body contributing an
/// empty segment. Headers and transport options never take part.
///
/// ```
/// use refetch::http::RequestDescriptor;
/// use refetch::key::build_key;
///
/// let a = build_key(&RequestDescriptor::builder("/p/1").method("get").build());
/// let b = build_key(&RequestDescriptor::from("/p/1"));
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "/p/1||GET||||json");
///
/// let pinned = RequestDescriptor::builder("/p/2").request_key("books").build();
/// assert_eq!(build_key(&pinned).as_str(), "books");
/// ```
pub fn build_key(descriptor: &RequestDescriptor) -> RequestKey {
    if let Some(explicit) = descriptor.explicit_key() {
        return RequestKey::from(explicit);
    }

    let response_type = descriptor.response_type().key_token();
    let parts = [
        descriptor.url(),
        descriptor.method().as_str(),
        descriptor.body().unwrap_or(""),
        &response_type,
    ];
    RequestKey(parts.join(SEPARATOR))
}
