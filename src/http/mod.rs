//! HTTP protocol types seen from the client side.
//!
//! This module provides the core HTTP primitives used by the engine:
//! [`Method`], [`StatusCode`], [`Headers`], the outgoing [`RequestDescriptor`]
//! and [`RequestInit`], and the incoming [`RawResponse`] / [`ResponseEnvelope`].

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod headers;
pub mod request;
pub mod response;

pub use headers::Headers;
pub use request::{
    CacheMode, Credentials, DataTransform, Redirect, ReferrerPolicy, RequestDescriptor,
    RequestDescriptorBuilder, RequestInit, RequestMode,
};
pub use response::{Data, RawResponse, RawResponseBuilder, ResponseEnvelope, ResponseType};

/// An HTTP response status code.
///
/// Unlike a server, a client must accept whatever code the peer sends, so this
/// is a thin wrapper over the numeric value rather than a closed enum.
///
/// # Examples
///
/// ```
/// use refetch::http::StatusCode;
///
/// let status = StatusCode::new(200);
/// assert_eq!(status.as_u16(), 200);
/// assert_eq!(status.canonical_reason(), "OK");
/// assert!(status.is_success());
/// assert!(!StatusCode::new(404).is_success());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);

    /// Wraps a raw status code.
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric status code as a `u16`.
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns `true` for 2xx codes. This is the `ok` flag of a response.
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 <= 299
    }

    /// Returns the canonical reason phrase, or `""` for codes without one.
    pub fn canonical_reason(self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            409 => "Conflict",
            410 => "Gone",
            413 => "Payload Too Large",
            415 => "Unsupported Media Type",
            422 => "Unprocessable Entity",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.canonical_reason())
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> u16 {
        code.as_u16()
    }
}

/// An HTTP request method.
///
/// Parsing is case-insensitive; the canonical form is always uppercase, which
/// is what ends up in request keys.
///
/// # Examples
///
/// ```
/// use refetch::http::Method;
///
/// let method: Method = "get".parse().unwrap();
/// assert_eq!(method, Method::Get);
/// assert_eq!(method.as_str(), "GET");
/// assert!(method.is_read());
/// assert!(!Method::Post.is_read());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    /// A non-standard extension method. Built from a string it is stored
    /// uppercased; see [`Method::normalized`] for hand-built values.
    Custom(String),
}

impl Method {
    /// Returns the method as an uppercase string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Folds a hand-built [`Method::Custom`] into canonical form.
    ///
    /// `Custom("get")` becomes `Get` and `Custom("purge")` becomes
    /// `Custom("PURGE")`. Descriptors store methods in this form.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::Custom(name) => Self::from(name.as_str()),
            known => known,
        }
    }

    /// Returns `true` for the "read" methods: GET, HEAD and OPTIONS.
    ///
    /// Read requests default to `cache-first` and have their responses cached;
    /// everything else defaults to `network-only` and is not cached.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Ok(match upper.as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            _ => Self::Custom(upper),
        })
    }
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(method) => method,
            Err(never) => match never {},
        }
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!(Method::from("post"), Method::Post);
        assert_eq!(Method::from("Options"), Method::Options);
        assert_eq!(Method::from("purge"), Method::Custom("PURGE".into()));
        assert_eq!(Method::from("purge").as_str(), "PURGE");
    }

    #[test]
    fn normalized_folds_custom_spellings() {
        assert_eq!(Method::Custom("get".into()).normalized(), Method::Get);
        assert!(Method::Custom("Head".into()).normalized().is_read());
        assert_eq!(Method::Custom("purge".into()).normalized().as_str(), "PURGE");
        assert_eq!(Method::Patch.normalized(), Method::Patch);
    }

    #[test]
    fn read_methods() {
        for m in ["GET", "head", "OPTIONS"] {
            assert!(Method::from(m).is_read(), "{m} should be a read method");
        }
        for m in ["POST", "put", "PATCH", "DELETE", "PURGE"] {
            assert!(!Method::from(m).is_read(), "{m} should be a write method");
        }
    }

    #[test]
    fn status_ok_flag() {
        assert!(StatusCode::new(204).is_success());
        assert!(!StatusCode::new(301).is_success());
        assert!(!StatusCode::new(500).is_success());
        assert_eq!(StatusCode::new(599).canonical_reason(), "");
        assert_eq!(StatusCode::NOT_FOUND.to_string(), "404 Not Found");
    }
}
