//! Cooperative cancellation for linked streaming operations.
//!
//! What this module provides
//! - `Canceller`, the owner handle created once per logical request
//! - `CancelSignal`, the read-only indicator handed to nested operations
//! - `link_signals` for one-way parent-to-child propagation with an
//!   explicit unlink
//! - `CancellableStream`, the downstream handle a coordinator forwards
//!   cancellation to
//!
//! Cancellation is idempotent: the first `cancel` records the reason,
//! invokes every listener exactly once in registration order, then forwards
//! to every still-live linked stream; later calls are silent no-ops. A
//! listener registered after cancellation fires immediately. Linked streams
//! are held weakly — the coordinator forwards cancellation but does not own
//! their lifetime.
//!
//! Listener dispatch happens outside the state lock, so a listener that
//! registers further listeners or links further streams sees the cancelled
//! state and is handled immediately rather than dropped.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{Result, SafetyError};

/// Why a request was cancelled. Cheap to clone and share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason(Arc<str>);

impl CancelReason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(Arc::from(reason.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new("operation cancelled")
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CancelReason {
    fn from(reason: &str) -> Self {
        Self::new(reason)
    }
}

impl From<String> for CancelReason {
    fn from(reason: String) -> Self {
        Self::new(reason)
    }
}

/// A downstream operation that can be told to stop.
pub trait CancellableStream: Send + Sync {
    fn cancel(&self, reason: &CancelReason);
}

type Listener = Box<dyn FnOnce(&CancelReason) + Send>;

#[derive(Default)]
struct State {
    reason: Option<CancelReason>,
    listeners: Vec<(u64, Listener)>,
    streams: Vec<Weak<dyn CancellableStream>>,
    next_listener_id: u64,
}

struct Inner {
    id: Uuid,
    state: Mutex<State>,
    cancelled_tx: watch::Sender<bool>,
}

impl Inner {
    fn cancel(&self, reason: CancelReason) {
        let (listeners, streams) = {
            let mut state = self.state.lock().unwrap();
            if state.reason.is_some() {
                return;
            }
            state.reason = Some(reason.clone());
            (
                mem::take(&mut state.listeners),
                mem::take(&mut state.streams),
            )
        };
        self.cancelled_tx.send_replace(true);
        tracing::debug!(
            request = %self.id,
            %reason,
            listeners = listeners.len(),
            streams = streams.len(),
            "request cancelled"
        );
        for (_, listener) in listeners {
            listener(&reason);
        }
        for stream in streams {
            if let Some(stream) = stream.upgrade() {
                stream.cancel(&reason);
            }
        }
    }

}

fn register_listener(inner: &Arc<Inner>, listener: Listener) -> ListenerGuard {
    let reason = {
        let mut state = inner.state.lock().unwrap();
        match state.reason.clone() {
            Some(reason) => reason,
            None => {
                let id = state.next_listener_id;
                state.next_listener_id += 1;
                state.listeners.push((id, listener));
                return ListenerGuard {
                    inner: Arc::downgrade(inner),
                    id,
                };
            }
        }
    };
    listener(&reason);
    ListenerGuard {
        inner: Weak::new(),
        id: 0,
    }
}

/// Removes a registered listener when consumed. Dropping the guard leaves
/// the listener in place.
pub struct ListenerGuard {
    inner: Weak<Inner>,
    id: u64,
}

impl ListenerGuard {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .state
                .lock()
                .unwrap()
                .listeners
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Owner handle for one logical request's cancellation.
///
/// Created per request and never reused. The matching [`CancelSignal`] is
/// freely cloned into nested operations.
pub struct Canceller {
    inner: Arc<Inner>,
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}

impl Canceller {
    pub fn new() -> Self {
        let (cancelled_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                state: Mutex::new(State::default()),
                cancelled_tx,
            }),
        }
    }

    /// A coordinator that mirrors `parent`: when the parent cancels, this
    /// one cancels with the same reason. The link is torn down as soon as
    /// this coordinator cancels, whichever side initiated.
    pub fn with_parent(parent: &CancelSignal) -> Self {
        let child = Self::new();
        let link = link_signals(&child, parent);
        let _ = child.on_cancel(move |_| link.unlink());
        child
    }

    /// Identifier for this request, stable across the coordinator's life.
    pub fn request_id(&self) -> Uuid {
        self.inner.id
    }

    /// The read-only signal for this coordinator.
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Cancel the request. Idempotent: only the first call records a reason
    /// and dispatches to listeners and linked streams.
    pub fn cancel(&self, reason: impl Into<CancelReason>) {
        self.inner.cancel(reason.into());
    }

    /// Register a listener invoked exactly once on cancellation; fires
    /// immediately if the request is already cancelled.
    pub fn on_cancel(&self, listener: impl FnOnce(&CancelReason) + Send + 'static) -> ListenerGuard {
        register_listener(&self.inner, Box::new(listener))
    }

    /// Forward cancellation to a downstream stream handle, held weakly. An
    /// already-cancelled coordinator cancels the stream on the spot.
    pub fn link_stream<S: CancellableStream + 'static>(&self, stream: &Arc<S>) {
        let reason = {
            let mut state = self.inner.state.lock().unwrap();
            match state.reason.clone() {
                Some(reason) => reason,
                None => {
                    let stream: Arc<dyn CancellableStream> = stream.clone();
                    let weak: Weak<dyn CancellableStream> = Arc::downgrade(&stream);
                    state.streams.push(weak);
                    return;
                }
            }
        };
        stream.cancel(&reason);
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal().is_cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.signal().reason()
    }

    /// Error with [`SafetyError::Cancelled`] if already cancelled.
    pub fn check(&self) -> Result<()> {
        self.signal().check()
    }
}

/// Read-only cancellation indicator for one logical request.
#[derive(Clone)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled_tx.borrow()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.state.lock().unwrap().reason.clone()
    }

    /// Error with [`SafetyError::Cancelled`] if already cancelled. The
    /// polling point long-running operations use to exit early.
    pub fn check(&self) -> Result<()> {
        match self.reason() {
            Some(reason) => Err(SafetyError::Cancelled { reason }),
            None => Ok(()),
        }
    }

    /// Resolve once the request is cancelled. Usable from any number of
    /// tasks concurrently.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let mut rx = self.inner.cancelled_tx.subscribe();
        // wait_for checks the current value first, so a cancel between the
        // check above and here is not missed. The sender lives in `inner`,
        // so the channel cannot close while we hold it.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Register a listener invoked exactly once on cancellation; fires
    /// immediately if the request is already cancelled.
    pub fn on_cancel(&self, listener: impl FnOnce(&CancelReason) + Send + 'static) -> ListenerGuard {
        register_listener(&self.inner, Box::new(listener))
    }

    pub fn request_id(&self) -> Uuid {
        self.inner.id
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller")
            .field("id", &self.inner.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("id", &self.inner.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Tears down a [`link_signals`] propagation when consumed.
pub struct Unlink {
    guard: ListenerGuard,
}

impl Unlink {
    /// Remove the link. A parent cancelling afterwards no longer reaches
    /// the child.
    pub fn unlink(self) {
        self.guard.unsubscribe();
    }
}

/// Propagate cancellation one way, from `parent` to `child`.
///
/// An already-cancelled parent cancels the child immediately. The returned
/// [`Unlink`] removes the propagation when called before the parent
/// cancels; the parent holds the child only weakly either way.
pub fn link_signals(child: &Canceller, parent: &CancelSignal) -> Unlink {
    let target = Arc::downgrade(&child.inner);
    let guard = parent.on_cancel(move |reason| {
        if let Some(inner) = target.upgrade() {
            inner.cancel(reason.clone());
        }
    });
    Unlink { guard }
}
