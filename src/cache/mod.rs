//! The last known response per request key.
//!
//! A dumb last-write-wins map: no eviction, no expiry, no notion of staleness.
//! Fetch policies decide what "fresh enough" means.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::trace;

use crate::http::ResponseEnvelope;
use crate::key::RequestKey;

static GLOBAL: OnceLock<ResponseCache> = OnceLock::new();

/// Shared handle to a response cache. Clones share the same entries.
///
/// # Examples
///
/// ```
/// use refetch::cache::ResponseCache;
/// use refetch::http::{RawResponse, ResponseEnvelope, ResponseType};
///
/// let cache = ResponseCache::new();
/// let raw = RawResponse::builder(200).body("[1,2]").build();
/// cache.set("/books".into(), ResponseEnvelope::decode(raw, &ResponseType::Json));
///
/// assert!(cache.get("/books").is_some());
/// cache.reset_all();
/// assert!(cache.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResponseCache {
    entries: Arc<Mutex<HashMap<RequestKey, ResponseEnvelope>>>,
}

impl ResponseCache {
    /// Creates an isolated, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance, created on first access.
    pub fn global() -> Self {
        GLOBAL.get_or_init(ResponseCache::new).clone()
    }

    pub fn get(&self, key: &str) -> Option<ResponseEnvelope> {
        self.entries.lock().get(key).cloned()
    }

    /// Stores `envelope`, overwriting any previous entry for `key`.
    pub fn set(&self, key: RequestKey, envelope: ResponseEnvelope) {
        trace!(request_key = %key, status = envelope.status.as_u16(), "response cached");
        self.entries.lock().insert(key, envelope);
    }

    /// Drops every entry. Meant for test isolation, not invalidation.
    pub fn reset_all(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
