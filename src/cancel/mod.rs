//! Cancellation tokens handed to transports.
//!
//! A [`RequestInit`](crate::http::RequestInit) may carry a signal that the
//! caller flips to ask the transport to give up. The engine itself never
//! aborts a wire call; this is purely a passthrough for transports that can.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;

type Callback = Box<dyn FnOnce() + Send>;

/// Future returned by [`CancellationToken::cancelled`].
pub type Cancelled = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Anything a transport can poll or subscribe to for cancellation.
pub trait CancellationToken: Send + Sync {
    /// Returns `true` once cancellation has been requested.
    fn is_canceled(&self) -> bool;

    /// Registers `callback` to run once on cancellation.
    ///
    /// Runs immediately if the token is already canceled.
    fn on_cancel(&self, callback: Box<dyn FnOnce() + Send>);

    /// Resolves once cancellation has been requested.
    fn cancelled(&self) -> Cancelled;
}

/// The observing half of an [`AbortController`].
///
/// A thin layer over [`tokio_util::sync::CancellationToken`] that also runs
/// plain callbacks. Cheap to clone; all clones observe the same state.
///
/// # Examples
///
/// ```
/// use refetch::cancel::{AbortController, CancellationToken};
///
/// let controller = AbortController::new();
/// let signal = controller.signal();
/// assert!(!signal.is_canceled());
///
/// controller.abort();
/// assert!(signal.is_canceled());
/// ```
#[derive(Clone, Default)]
pub struct AbortSignal {
    token: tokio_util::sync::CancellationToken,
    callbacks: Arc<Mutex<Vec<Callback>>>,
}

impl AbortSignal {
    /// The underlying tokio token, for `select!`-style waiting.
    pub fn token(&self) -> &tokio_util::sync::CancellationToken {
        &self.token
    }
}

impl CancellationToken for AbortSignal {
    fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn on_cancel(&self, callback: Callback) {
        let mut callbacks = self.callbacks.lock();
        // `abort` cancels before draining, so a check under the lock cannot miss it.
        if self.token.is_cancelled() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(callback);
        }
    }

    fn cancelled(&self) -> Cancelled {
        Box::pin(self.token.clone().cancelled_owned())
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_canceled())
            .finish()
    }
}

/// Owner of an [`AbortSignal`].
#[derive(Debug, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to this controller's signal.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Cancels the signal and runs every registered callback. Idempotent.
    pub fn abort(&self) {
        self.signal.token.cancel();
        let callbacks = std::mem::take(&mut *self.signal.callbacks.lock());
        for callback in callbacks {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn callbacks_run_once_on_abort() {
        let controller = AbortController::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        controller.signal().on_cancel(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));

        controller.abort();
        controller.abort();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_registration_runs_immediately() {
        let controller = AbortController::new();
        controller.abort();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        controller.signal().on_cancel(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_future_wakes_on_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let waiting = tokio::spawn(signal.cancelled());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!waiting.is_finished());
        controller.abort();
        waiting.await.unwrap();
        assert!(signal.token().is_cancelled());
    }
}
