//! Per-session ownership bookkeeping.
//!
//! A session owns at most one request at a time. Beginning a new request while
//! the previous one is unsettled cancels the previous one *logically*: its
//! waiter is told to stop listening, but the network call it may share with
//! other sessions keeps running. Tearing a session down cancels whatever it
//! still owns and makes it inert for good.

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{CancelReason, CancellationError};
use crate::hooks::BeforeFetchInfo;
use crate::key::RequestKey;

/// Identifies one `begin` call within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

struct Owned {
    ticket: Ticket,
    key: RequestKey,
    settled: bool,
    /// Set once the request reaches the network.
    network: Option<BeforeFetchInfo>,
    cancel: Option<oneshot::Sender<CancellationError>>,
}

#[derive(Default)]
struct State {
    owned: Option<Owned>,
    next_ticket: u64,
    torn_down: bool,
}

/// A request that was cancelled before it settled.
#[derive(Debug)]
pub struct Interrupted {
    pub key: RequestKey,
    pub error: CancellationError,
    /// The network attempt it had started, if any.
    pub network: Option<BeforeFetchInfo>,
}

/// The result of [`Lifecycle::begin`].
#[derive(Debug)]
pub struct Begun {
    pub ticket: Ticket,
    /// Resolves with the cancellation if this request is superseded or torn down.
    pub cancelled: oneshot::Receiver<CancellationError>,
    /// The previous request, if it had not settled yet.
    pub superseded: Option<Interrupted>,
}

/// Ownership state of one consumer session.
#[derive(Default)]
pub struct Lifecycle {
    state: Mutex<State>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `key`, cancelling the previous request if it is
    /// still unsettled.
    ///
    /// Fails with `"Component unmounted"` once the session is torn down.
    pub fn begin(&self, key: RequestKey) -> Result<Begun, CancellationError> {
        let mut state = self.state.lock();
        if state.torn_down {
            return Err(CancellationError::new(CancelReason::TornDown));
        }

        let superseded = state
            .owned
            .take()
            .and_then(|previous| interrupt(previous, CancelReason::Superseded));

        let ticket = Ticket(state.next_ticket);
        state.next_ticket += 1;
        let (tx, rx) = oneshot::channel();
        state.owned = Some(Owned {
            ticket,
            key,
            settled: false,
            network: None,
            cancel: Some(tx),
        });

        Ok(Begun {
            ticket,
            cancelled: rx,
            superseded,
        })
    }

    /// Marks the request behind `ticket` as settled. Stale tickets are ignored.
    pub fn settle(&self, ticket: Ticket) {
        let mut state = self.state.lock();
        if let Some(owned) = state.owned.as_mut().filter(|o| o.ticket == ticket) {
            owned.settled = true;
            owned.cancel = None;
        }
    }

    /// Makes the session inert, cancelling the owned request if it is unsettled.
    ///
    /// Only the first call can return an [`Interrupted`].
    pub fn teardown(&self) -> Option<Interrupted> {
        let mut state = self.state.lock();
        if state.torn_down {
            return None;
        }
        state.torn_down = true;
        debug!("session torn down");
        state
            .owned
            .take()
            .and_then(|owned| interrupt(owned, CancelReason::TornDown))
    }

    /// `true` while `ticket` is owned, unsettled, and the session is live.
    ///
    /// Results for any other ticket must be dropped.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        let state = self.state.lock();
        !state.torn_down
            && state
                .owned
                .as_ref()
                .is_some_and(|o| o.ticket == ticket && !o.settled)
    }

    /// Notes that the request behind `ticket` reached the network.
    ///
    /// Returns `false`, recording nothing, if `ticket` is no longer current.
    pub fn record_network(&self, ticket: Ticket, info: &BeforeFetchInfo) -> bool {
        let mut state = self.state.lock();
        if state.torn_down {
            return false;
        }
        match state.owned.as_mut() {
            Some(owned) if owned.ticket == ticket && !owned.settled => {
                owned.network = Some(info.clone());
                true
            }
            _ => false,
        }
    }

    pub fn owned_key(&self) -> Option<RequestKey> {
        self.state.lock().owned.as_ref().map(|o| o.key.clone())
    }

    /// `true` when nothing is owned or the owned request has settled.
    pub fn has_settled(&self) -> bool {
        self.state.lock().owned.as_ref().is_none_or(|o| o.settled)
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.lock().torn_down
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Lifecycle")
            .field("owned_key", &state.owned.as_ref().map(|o| &o.key))
            .field("settled", &state.owned.as_ref().map(|o| o.settled))
            .field("torn_down", &state.torn_down)
            .finish()
    }
}

fn interrupt(owned: Owned, reason: CancelReason) -> Option<Interrupted> {
    if owned.settled {
        return None;
    }
    let error = CancellationError::new(reason);
    debug!(request_key = %owned.key, reason = error.message(), "cancellation synthesized");
    if let Some(cancel) = owned.cancel {
        let _ = cancel.send(error);
    }
    Some(Interrupted {
        key: owned.key,
        error,
        network: owned.network,
    })
}
