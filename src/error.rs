//! Error types shared across the engine.
//!
//! Only three kinds ever reach a consumer: [`NetworkError`] from the transport,
//! the cache miss of a `cache-only` request, and the [`CancellationError`]
//! synthesized when a session stops listening. Decode failures are absorbed
//! into `data = None`.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

type BoxedSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A transport failure, propagated verbatim from the network primitive.
///
/// Cloneable so one failed flight can be handed to every waiter.
#[derive(Debug, Clone)]
pub struct NetworkError {
    message: String,
    source: Option<BoxedSource>,
}

impl NetworkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an underlying error; the message is taken from its `Display`.
    pub fn from_source<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: source.to_string(),
            source: Some(Arc::new(source)),
        }
    }

    /// The error a transport reports when its abort signal fired.
    pub fn aborted() -> Self {
        Self::new("The operation was aborted")
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        Self::from_source(err)
    }
}

/// What made a session stop listening to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The session began another request before this one settled.
    Superseded,
    /// The session was torn down.
    TornDown,
}

impl CancelReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::Superseded => "New fetch initiated",
            Self::TornDown => "Component unmounted",
        }
    }
}

/// A logical cancellation. The underlying wire call is never aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{}", .reason.message())]
pub struct CancellationError {
    reason: CancelReason,
}

impl CancellationError {
    pub const NAME: &'static str = "AbortError";

    pub fn new(reason: CancelReason) -> Self {
        Self { reason }
    }

    /// Always `"AbortError"`.
    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn message(&self) -> &'static str {
        self.reason.message()
    }

    pub fn reason(&self) -> CancelReason {
        self.reason
    }
}

/// Everything a request can resolve with besides a response.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Response for \"{name}\" not found in cache.")]
    CacheMiss { name: String },

    #[error(transparent)]
    Cancelled(#[from] CancellationError),
}

impl FetchError {
    /// A short classification, mirroring the `name` of an error object.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Network(_) => "NetworkError",
            Self::CacheMiss { .. } => "Error",
            Self::Cancelled(e) => e.name(),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Why a body accessor on [`RawResponse`](crate::http::RawResponse) failed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("body has already been consumed")]
    BodyUsed,

    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("body is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("cannot decode {content_type} as form data")]
    UnsupportedForm { content_type: String },
}

/// A string that does not name any variant of an option enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownValue {
    kind: &'static str,
    value: String,
}

impl UnknownValue {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn cancellation_shape() {
        let err = CancellationError::new(CancelReason::Superseded);
        assert_eq!(err.name(), "AbortError");
        assert_eq!(err.to_string(), "New fetch initiated");
        assert_eq!(
            CancellationError::new(CancelReason::TornDown).message(),
            "Component unmounted"
        );
    }

    #[test]
    fn cache_miss_message() {
        let err = FetchError::CacheMiss {
            name: "books".into(),
        };
        assert_eq!(err.to_string(), "Response for \"books\" not found in cache.");
        assert_eq!(err.name(), "Error");
    }

    #[test]
    fn network_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = FetchError::from(NetworkError::from(io));
        assert_eq!(err.to_string(), "refused");
        assert_eq!(err.name(), "NetworkError");
        assert!(err.source().is_some());
    }
}
