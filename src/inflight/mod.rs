//! At most one live network call per request key.
//!
//! The first caller for a key starts a *flight*: the network future is spawned
//! onto the runtime and the key is marked busy. Later callers for the same key
//! join the flight instead of issuing their own call. When the call settles, the
//! key is cleared *before* any waiter is woken, so a waiter that immediately
//! fetches again starts a fresh flight rather than rejoining the finished one.
//!
//! Flights run on their own task. A waiter that stops listening never stops the
//! call for the others.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::NetworkError;
use crate::http::ResponseEnvelope;
use crate::key::RequestKey;

/// The outcome every waiter of a flight receives.
pub type FlightResult = Result<ResponseEnvelope, NetworkError>;

static GLOBAL: std::sync::OnceLock<InFlightRegistry> = std::sync::OnceLock::new();

struct Entry {
    generation: u64,
    waiters: Vec<oneshot::Sender<FlightResult>>,
}

#[derive(Default)]
struct Inner {
    flights: Mutex<HashMap<RequestKey, Entry>>,
    next_generation: AtomicU64,
}

/// Shared handle to an in-flight registry. Clones share the same flights.
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<Inner>,
}

impl InFlightRegistry {
    /// Creates an isolated, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance, created on first access.
    pub fn global() -> Self {
        GLOBAL.get_or_init(InFlightRegistry::new).clone()
    }

    /// Returns `true` while a call for `key` is executing.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.flights.lock().contains_key(key)
    }

    /// Number of waiters currently registered for `key`.
    pub fn waiter_count(&self, key: &str) -> usize {
        self.inner
            .flights
            .lock()
            .get(key)
            .map_or(0, |entry| entry.waiters.len())
    }

    /// Registers a new waiter on the flight for `key`.
    ///
    /// Returns `None` when nothing is in flight for `key`.
    pub fn join(&self, key: &str) -> Option<Flight> {
        let mut flights = self.inner.flights.lock();
        let entry = flights.get_mut(key)?;
        let (tx, rx) = oneshot::channel();
        entry.waiters.push(tx);
        debug!(request_key = %key, waiters = entry.waiters.len(), "joined in-flight request");
        Some(Flight { rx })
    }

    /// Joins the flight for `key`, or starts one by spawning `call`.
    ///
    /// `call` is dropped unpolled when a flight already exists. Must be called
    /// from within a Tokio runtime.
    pub fn execute<F>(&self, key: RequestKey, call: F) -> Flight
    where
        F: Future<Output = FlightResult> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut flights = self.inner.flights.lock();
            if let Some(entry) = flights.get_mut(key.as_str()) {
                entry.waiters.push(tx);
                debug!(request_key = %key, waiters = entry.waiters.len(), "joined in-flight request");
                return Flight { rx };
            }
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            flights.insert(
                key.clone(),
                Entry {
                    generation,
                    waiters: vec![tx],
                },
            );
            generation
        };

        debug!(request_key = %key, generation, "starting network request");
        let guard = SettleGuard {
            registry: self.clone(),
            key,
            generation,
        };
        tokio::spawn(async move {
            let result = call.await;
            let waiters = guard.settle();
            debug!(
                request_key = %guard.key,
                waiters = waiters.len(),
                ok = result.is_ok(),
                "network request settled"
            );
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        });
        Flight { rx }
    }

    /// Runs `call` in a private single-waiter slot that nobody else can join.
    ///
    /// Used for `dedupe: false` requests; the registry map is never touched.
    pub fn execute_private<F>(&self, call: F) -> Flight
    where
        F: Future<Output = FlightResult> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(call.await);
        });
        Flight { rx }
    }

    /// Forgets every flight. Current waiters resolve with a [`NetworkError`];
    /// the calls themselves keep running but their outcome is discarded.
    pub fn reset(&self) {
        let dropped = std::mem::take(&mut *self.inner.flights.lock());
        debug!(flights = dropped.len(), "in-flight registry reset");
    }

    // Removes and returns the waiters of `key`, but only if the entry still
    // belongs to `generation`; a reset may have let a newer flight take the key.
    fn take_waiters(&self, key: &RequestKey, generation: u64) -> Vec<oneshot::Sender<FlightResult>> {
        let mut flights = self.inner.flights.lock();
        match flights.get(key.as_str()) {
            Some(entry) if entry.generation == generation => flights
                .remove(key.as_str())
                .map(|entry| entry.waiters)
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Debug for InFlightRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightRegistry")
            .field("flights", &self.inner.flights.lock().len())
            .finish()
    }
}

/// Clears the entry for a flight even if its task panics or is cancelled,
/// so later callers for the key are not stuck joining a dead flight.
struct SettleGuard {
    registry: InFlightRegistry,
    key: RequestKey,
    generation: u64,
}

impl SettleGuard {
    fn settle(&self) -> Vec<oneshot::Sender<FlightResult>> {
        self.registry.take_waiters(&self.key, self.generation)
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        // No-op after a normal settle; dropping the senders wakes waiters with an error otherwise.
        drop(self.settle());
    }
}

/// A waiter's view of a flight. Resolves with the shared outcome.
#[must_use = "a flight does nothing for this waiter unless awaited"]
pub struct Flight {
    rx: oneshot::Receiver<FlightResult>,
}

impl Future for Flight {
    type Output = FlightResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(NetworkError::new("in-flight request was discarded")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{RawResponse, ResponseType};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn delayed_ok(
        calls: &Arc<AtomicUsize>,
        body: &'static str,
    ) -> impl Future<Output = FlightResult> + Send + 'static {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let raw = RawResponse::builder(200).body(body).build();
            Ok(ResponseEnvelope::decode(raw, &ResponseType::Text))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_shares_one_call() {
        let registry = InFlightRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let a = registry.execute("k".into(), delayed_ok(&calls, "one"));
        let b = registry.execute("k".into(), delayed_ok(&calls, "two"));
        assert!(registry.is_in_flight("k"));
        assert_eq!(registry.waiter_count("k"), 2);

        let (a, b) = tokio::join!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a.raw, &b.raw));
        assert!(!registry.is_in_flight("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_run_separately() {
        let registry = InFlightRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let a = registry.execute("a".into(), delayed_ok(&calls, "a"));
        let b = registry.execute("b".into(), delayed_ok(&calls, "b"));
        let _ = tokio::join!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn private_slots_are_never_joined() {
        let registry = InFlightRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = registry.execute("k".into(), delayed_ok(&calls, "shared"));
        let private = registry.execute_private(delayed_ok(&calls, "private"));
        assert_eq!(registry.waiter_count("k"), 1);

        let (shared, private) = tokio::join!(shared, private);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&shared.unwrap().raw, &private.unwrap().raw));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_is_cleared_before_waiters_wake() {
        let registry = InFlightRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let flight = registry.execute("k".into(), delayed_ok(&calls, "x"));
        flight.await.unwrap();
        assert!(!registry.is_in_flight("k"));

        // A follow-up request starts a new call rather than reusing the old one.
        registry.execute("k".into(), delayed_ok(&calls, "y")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_fan_out() {
        let registry = InFlightRegistry::new();
        let call = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err(NetworkError::new("Network error"))
        };
        let a = registry.execute("k".into(), call);
        let b = registry.join("k").expect("flight should be joinable");
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap_err().message(), "Network error");
        assert_eq!(b.unwrap_err().message(), "Network error");
    }

    #[tokio::test]
    async fn join_without_flight_is_none() {
        assert!(InFlightRegistry::new().join("nothing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_does_not_let_old_flights_steal_new_waiters() {
        let registry = InFlightRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let old = registry.execute("k".into(), delayed_ok(&calls, "old"));
        registry.reset();
        assert!(old.await.is_err());

        let slow = {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                let raw = RawResponse::builder(200).body("new").build();
                Ok(ResponseEnvelope::decode(raw, &ResponseType::Text))
            }
        };
        let fresh = registry.execute("k".into(), slow);
        let envelope = fresh.await.unwrap();
        assert_eq!(envelope.data.and_then(|d| d.as_text().map(str::to_owned)), Some("new".into()));
    }
}
