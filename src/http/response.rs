//! Incoming responses and body decoding.
//!
//! A transport resolves with a [`RawResponse`] whose body can be consumed at
//! most once. The engine consumes it exactly once, centrally, according to the
//! descriptor's [`ResponseType`], and keeps the outcome in a [`ResponseEnvelope`]
//! that is cheap to share between every waiter of a deduplicated call.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use super::{Headers, StatusCode};
use crate::error::{DecodeError, UnknownValue};

/// A decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Json(serde_json::Value),
    Text(String),
    /// Output of both `blob` and `arrayBuffer`.
    Bytes(Bytes),
    /// Ordered `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
}

impl Data {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Data::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Data::Text(text) => Some(text),
            _ => None,
        }
    }
}

type DecodeFn = dyn Fn(&RawResponse) -> Option<Data> + Send + Sync;

/// How the engine decodes a response body.
#[derive(Clone)]
pub enum ResponseType {
    Json,
    Text,
    Blob,
    ArrayBuffer,
    FormData,
    /// A caller-supplied decoder. The name takes part in the request key.
    Custom { name: String, decode: Arc<DecodeFn> },
}

impl ResponseType {
    /// Wraps a decoding function. The function is responsible for consuming the body.
    ///
    /// ```
    /// use refetch::http::{Data, RawResponse, ResponseType};
    ///
    /// let length = ResponseType::custom("length", |res: &RawResponse| {
    ///     let body = res.bytes().ok()?;
    ///     Some(Data::Json(body.len().into()))
    /// });
    /// let raw = RawResponse::builder(200).body("four").build();
    /// assert_eq!(length.decode(&raw), Some(Data::Json(4.into())));
    /// ```
    pub fn custom<F>(name: impl Into<String>, decode: F) -> Self
    where
        F: Fn(&RawResponse) -> Option<Data> + Send + Sync + 'static,
    {
        Self::Custom {
            name: name.into(),
            decode: Arc::new(decode),
        }
    }

    /// The token this response type contributes to a derived request key.
    ///
    /// Custom decoders are namespaced as `custom:<name>`, so they never share
    /// a key with a built-in type.
    pub fn key_token(&self) -> Cow<'_, str> {
        match self {
            Self::Json => Cow::Borrowed("json"),
            Self::Text => Cow::Borrowed("text"),
            Self::Blob => Cow::Borrowed("blob"),
            Self::ArrayBuffer => Cow::Borrowed("arrayBuffer"),
            Self::FormData => Cow::Borrowed("formData"),
            Self::Custom { name, .. } => Cow::Owned(format!("custom:{name}")),
        }
    }

    /// Consumes the body of `raw` and decodes it.
    ///
    /// Returns `None` when the body is not decodable as requested; decoding
    /// failures never surface as errors.
    pub fn decode(&self, raw: &RawResponse) -> Option<Data> {
        let decoded = match self {
            Self::Json => raw.json().map(Data::Json),
            Self::Text => raw.text().map(Data::Text),
            Self::Blob | Self::ArrayBuffer => raw.bytes().map(Data::Bytes),
            Self::FormData => raw.form().map(Data::Form),
            Self::Custom { decode, .. } => return decode(raw),
        };
        match decoded {
            Ok(data) => Some(data),
            Err(e) => {
                trace!(url = %raw.url(), response_type = %self.key_token(), error = %e, "body not decodable");
                None
            }
        }
    }
}

impl fmt::Debug for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom { name, .. } => f.debug_tuple("Custom").field(name).finish(),
            other => f.write_str(&other.key_token()),
        }
    }
}

impl std::str::FromStr for ResponseType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "blob" => Ok(Self::Blob),
            "arrayBuffer" => Ok(Self::ArrayBuffer),
            "formData" => Ok(Self::FormData),
            other => Err(UnknownValue::new("responseType", other)),
        }
    }
}

/// A response as resolved by a transport.
///
/// # Examples
///
/// ```
/// use refetch::http::RawResponse;
///
/// let raw = RawResponse::builder(200)
///     .header("Content-Type", "application/json")
///     .body(r#"{"books":[1,42,150]}"#)
///     .build();
///
/// assert!(raw.ok());
/// assert_eq!(raw.status_text(), "OK");
/// assert_eq!(raw.json().unwrap()["books"][1], 42);
/// assert!(raw.body_used());
/// assert!(raw.text().is_err());
/// ```
pub struct RawResponse {
    url: String,
    status: StatusCode,
    status_text: String,
    headers: Headers,
    body: Mutex<Option<Bytes>>,
}

impl RawResponse {
    /// Starts a response with the canonical status text and an empty body.
    pub fn builder(status: impl Into<StatusCode>) -> RawResponseBuilder {
        let status = status.into();
        RawResponseBuilder {
            url: String::new(),
            status,
            status_text: status.canonical_reason().to_owned(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// `true` for a 2xx status.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// `true` once one of the body accessors has run.
    pub fn body_used(&self) -> bool {
        self.body.lock().is_none()
    }

    fn take_body(&self) -> Result<Bytes, DecodeError> {
        self.body.lock().take().ok_or(DecodeError::BodyUsed)
    }

    /// Consumes the body as raw bytes.
    pub fn bytes(&self) -> Result<Bytes, DecodeError> {
        self.take_body()
    }

    /// Consumes the body as text. Invalid UTF-8 is replaced, as browsers do.
    pub fn text(&self) -> Result<String, DecodeError> {
        let body = self.take_body()?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Consumes the body and parses it as JSON.
    pub fn json(&self) -> Result<serde_json::Value, DecodeError> {
        let body = self.take_body()?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Consumes the body as `application/x-www-form-urlencoded` pairs.
    pub fn form(&self) -> Result<Vec<(String, String)>, DecodeError> {
        if let Some(content_type) = self.headers.content_type() {
            if content_type != "application/x-www-form-urlencoded" {
                return Err(DecodeError::UnsupportedForm { content_type });
            }
        }
        let body = self.take_body()?;
        let text = std::str::from_utf8(&body)?;
        Ok(parse_urlencoded(text))
    }
}

/// Builder for [`RawResponse`], used by transports and test doubles.
#[derive(Debug)]
pub struct RawResponseBuilder {
    url: String,
    status: StatusCode,
    status_text: String,
    headers: Headers,
    body: Bytes,
}

impl RawResponseBuilder {
    #[must_use]
    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Appends a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> RawResponse {
        RawResponse {
            url: self.url,
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            body: Mutex::new(Some(self.body)),
        }
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("url", &self.url)
            .field("status", &self.status.as_u16())
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .field("body_used", &self.body_used())
            .finish()
    }
}

/// A transport response together with its decoded body.
///
/// This is what the response cache stores and what every waiter of a flight
/// receives; the raw response is shared, not copied.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub ok: bool,
    pub status: StatusCode,
    pub status_text: String,
    pub raw: Arc<RawResponse>,
    /// `None` when the body could not be decoded as requested.
    pub data: Option<Data>,
}

impl ResponseEnvelope {
    /// Decodes `raw` once according to `response_type`.
    pub fn decode(raw: RawResponse, response_type: &ResponseType) -> Self {
        let data = response_type.decode(&raw);
        Self {
            ok: raw.ok(),
            status: raw.status(),
            status_text: raw.status_text().to_owned(),
            raw: Arc::new(raw),
            data,
        }
    }
}

/// Parses `key=value&key2=value2` into ordered pairs, decoding `+` and `%XX`.
fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = percent_decode(parts.next().unwrap_or(""));
            let value = percent_decode(parts.next().unwrap_or(""));
            (key, value)
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_on_plain_text_degrades_to_none() {
        let raw = RawResponse::builder(200).body("This is some text lol").build();
        let envelope = ResponseEnvelope::decode(raw, &ResponseType::Json);
        assert!(envelope.ok);
        assert_eq!(envelope.data, None);
        assert!(envelope.raw.body_used());
    }

    #[test]
    fn text_decoding() {
        let raw = RawResponse::builder(200).body("hi").build();
        let envelope = ResponseEnvelope::decode(raw, &ResponseType::Text);
        assert_eq!(envelope.data, Some(Data::Text("hi".into())));
    }

    #[test]
    fn body_is_consumable_once() {
        let raw = RawResponse::builder(200).body("abc").build();
        assert_eq!(raw.bytes().unwrap(), Bytes::from_static(b"abc"));
        assert!(matches!(raw.bytes(), Err(DecodeError::BodyUsed)));
    }

    #[test]
    fn form_decoding() {
        let raw = RawResponse::builder(200)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body("name=J+R+R%20Tolkien&born=1892&empty=")
            .build();
        let pairs = raw.form().unwrap();
        assert_eq!(
            pairs,
            vec![
                ("name".to_owned(), "J R R Tolkien".to_owned()),
                ("born".to_owned(), "1892".to_owned()),
                ("empty".to_owned(), String::new()),
            ]
        );
    }

    #[test]
    fn multipart_form_is_not_decoded() {
        let raw = RawResponse::builder(200)
            .header("Content-Type", "multipart/form-data; boundary=x")
            .body("--x--")
            .build();
        let envelope = ResponseEnvelope::decode(raw, &ResponseType::FormData);
        assert_eq!(envelope.data, None);
    }

    #[test]
    fn percent_decode_keeps_malformed_escapes() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("%41b"), "Ab");
    }

    #[test]
    fn status_text_defaults_to_canonical_reason() {
        let raw = RawResponse::builder(404).build();
        assert!(!raw.ok());
        assert_eq!(raw.status_text(), "Not Found");
        let raw = RawResponse::builder(404).status_text("Nope").build();
        assert_eq!(raw.status_text(), "Nope");
    }
}
