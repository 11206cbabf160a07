//! A single lifecycle-tracked cache entry.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::StoreKey;
use crate::types::ErrorDetail;

/// Lifecycle phase of a [`ResourceStore`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    /// Never loaded.
    New,
    /// First load (or a retry after an error) in flight.
    Loading,
    /// Holding data.
    Ready,
    /// Last load failed.
    Error,
    /// Refreshing data that is still being exposed.
    Reloading,
}

impl LoadPhase {
    /// Get the phase name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Reloading => "reloading",
        }
    }
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a [`ResourceStore`].
///
/// Data is only reachable in `Ready` and `Reloading`; error detail only in
/// `Error`. The shape makes any other combination unrepresentable.
#[derive(Debug)]
pub enum StoreState<T> {
    /// Never loaded.
    New,
    /// First load (or a retry after an error) in flight.
    Loading,
    /// Holding the result of the last successful load.
    Ready {
        /// Loaded payload.
        data: Arc<T>,
    },
    /// Last load failed.
    Error {
        /// Failure reported by the fetcher.
        error: ErrorDetail,
    },
    /// Refresh in flight; `data` is the last known good value.
    Reloading {
        /// Payload being refreshed.
        data: Arc<T>,
    },
}

impl<T> Clone for StoreState<T> {
    fn clone(&self) -> Self {
        match self {
            Self::New => Self::New,
            Self::Loading => Self::Loading,
            Self::Ready { data } => Self::Ready {
                data: Arc::clone(data),
            },
            Self::Error { error } => Self::Error {
                error: error.clone(),
            },
            Self::Reloading { data } => Self::Reloading {
                data: Arc::clone(data),
            },
        }
    }
}

impl<T> StoreState<T> {
    /// Phase of this state.
    #[must_use]
    pub const fn phase(&self) -> LoadPhase {
        match self {
            Self::New => LoadPhase::New,
            Self::Loading => LoadPhase::Loading,
            Self::Ready { .. } => LoadPhase::Ready,
            Self::Error { .. } => LoadPhase::Error,
            Self::Reloading { .. } => LoadPhase::Reloading,
        }
    }

    /// Current payload, if any.
    #[must_use]
    pub const fn data(&self) -> Option<&Arc<T>> {
        match self {
            Self::Ready { data } | Self::Reloading { data } => Some(data),
            _ => None,
        }
    }

    /// Failure detail, if the last load failed.
    #[must_use]
    pub const fn error(&self) -> Option<&ErrorDetail> {
        match self {
            Self::Error { error } => Some(error),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::New)
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    #[must_use]
    pub const fn is_reloading(&self) -> bool {
        matches!(self, Self::Reloading { .. })
    }

    /// Whether a fetch is currently dispatched.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        matches!(self, Self::Loading | Self::Reloading { .. })
    }

    /// State entered when a load is dispatched from this one.
    ///
    /// Returns `None` when a load is already in flight.
    fn begin(&self) -> Option<Self> {
        match self {
            Self::New | Self::Error { .. } => Some(Self::Loading),
            Self::Ready { data } => Some(Self::Reloading {
                data: Arc::clone(data),
            }),
            Self::Loading | Self::Reloading { .. } => None,
        }
    }

    /// State entered when a dispatched load completes.
    ///
    /// A failed refresh discards the stale data instead of reverting to it.
    fn settled(outcome: Result<T, ErrorDetail>) -> Self {
        match outcome {
            Ok(data) => Self::Ready {
                data: Arc::new(data),
            },
            Err(error) => Self::Error { error },
        }
    }
}

/// Owned projection of a store for the rendering layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreView<T> {
    pub key: StoreKey,
    pub state: LoadPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub is_new: bool,
    pub is_loading: bool,
    pub is_ready: bool,
    pub is_error: bool,
    pub is_reloading: bool,
}

/// Cached, lifecycle-tracked holder of one remotely fetched value.
///
/// At most one fetch is dispatched per store at any time. A `load` issued
/// while another is in flight does not call its fetcher; it waits for the
/// in-flight load to settle and returns that outcome.
pub struct ResourceStore<T> {
    key: StoreKey,
    state: watch::Sender<StoreState<T>>,
    /// Count of dispatched loads dropped before completing.
    abandoned: AtomicU64,
}

impl<T> ResourceStore<T>
where
    T: Send + Sync,
{
    /// Create a store in the `New` state.
    #[must_use]
    pub fn new(key: StoreKey) -> Self {
        let (state, _) = watch::channel(StoreState::New);
        Self {
            key,
            state,
            abandoned: AtomicU64::new(0),
        }
    }

    /// Key this store is registered under.
    #[must_use]
    pub const fn key(&self) -> &StoreKey {
        &self.key
    }

    /// Load or refresh the value using `fetcher`.
    ///
    /// From `New` or `Error` the store enters `Loading`; from `Ready` it
    /// enters `Reloading` and keeps exposing the previous data. On success
    /// the store becomes `Ready` with the new data, on failure `Error`.
    ///
    /// If the returned future is dropped before the fetch completes, the
    /// store reverts to the state it was in before the load was dispatched.
    /// A `load` waiting on that abandoned fetch then dispatches its own
    /// fetcher, so every returned state is the outcome of a fetch.
    pub async fn load<F, Fut>(&self, fetcher: F) -> StoreState<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ErrorDetail>>,
    {
        let previous = loop {
            let receiver = self.state.subscribe();

            let mut previous = None;
            let mut abandoned = 0;
            self.state.send_if_modified(|state| {
                abandoned = self.abandoned.load(Ordering::Acquire);
                match state.begin() {
                    Some(next) => {
                        previous = Some(std::mem::replace(state, next));
                        true
                    }
                    None => false,
                }
            });

            if let Some(previous) = previous {
                break previous;
            }

            debug!(key = %self.key, "load already in flight, awaiting its outcome");
            let state = self.settled(receiver).await;
            if self.abandoned.load(Ordering::Acquire) == abandoned {
                return state;
            }
            debug!(key = %self.key, "awaited load was abandoned, dispatching again");
        };

        debug!(
            key = %self.key,
            from = %previous.phase(),
            to = %self.phase(),
            "load dispatched"
        );

        let guard = InFlight {
            store: self,
            previous: Some(previous),
        };
        let outcome = fetcher().await;
        guard.complete(outcome)
    }

    async fn settled(&self, mut receiver: watch::Receiver<StoreState<T>>) -> StoreState<T> {
        match receiver.wait_for(|state| !state.is_in_flight()).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Subscribe to lifecycle changes.
    ///
    /// View bindings hold the receiver and re-render on `changed()`.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StoreState<T>> {
        self.state.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> StoreState<T> {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn phase(&self) -> LoadPhase {
        self.state.borrow().phase()
    }

    /// Current payload, present in `Ready` and `Reloading`.
    #[must_use]
    pub fn data(&self) -> Option<Arc<T>> {
        self.state.borrow().data().cloned()
    }

    /// Failure detail, present in `Error`.
    #[must_use]
    pub fn error(&self) -> Option<ErrorDetail> {
        self.state.borrow().error().cloned()
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.state.borrow().is_new()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.state.borrow().is_error()
    }

    #[must_use]
    pub fn is_reloading(&self) -> bool {
        self.state.borrow().is_reloading()
    }

    /// Owned projection for the rendering layer.
    #[must_use]
    pub fn view(&self) -> StoreView<T>
    where
        T: Clone,
    {
        let state = self.state.borrow();
        StoreView {
            key: self.key.clone(),
            state: state.phase(),
            data: state.data().map(|data| T::clone(data)),
            error: state.error().cloned(),
            is_new: state.is_new(),
            is_loading: state.is_loading(),
            is_ready: state.is_ready(),
            is_error: state.is_error(),
            is_reloading: state.is_reloading(),
        }
    }
}

impl<T> fmt::Debug for ResourceStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceStore")
            .field("key", &self.key)
            .field("state", &self.state.borrow().phase())
            .finish_non_exhaustive()
    }
}

/// Tracks a dispatched load so that an abandoned one releases the store.
struct InFlight<'a, T> {
    store: &'a ResourceStore<T>,
    previous: Option<StoreState<T>>,
}

impl<T> InFlight<'_, T> {
    fn complete(mut self, outcome: Result<T, ErrorDetail>) -> StoreState<T> {
        let previous = self.previous.take();
        let next = StoreState::settled(outcome);

        match (&next, previous.as_ref().map(StoreState::phase)) {
            (StoreState::Error { error }, Some(LoadPhase::Ready)) => {
                warn!(key = %self.store.key, error = %error, "refresh failed, stale data discarded");
            }
            (StoreState::Error { error }, _) => {
                warn!(key = %self.store.key, error = %error, "load failed");
            }
            _ => debug!(key = %self.store.key, "load completed"),
        }

        self.store.state.send_replace(next.clone());
        next
    }
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            warn!(
                key = %self.store.key,
                restored = %previous.phase(),
                "load abandoned before completion"
            );
            self.store.abandoned.fetch_add(1, Ordering::AcqRel);
            self.store.state.send_replace(previous);
        }
    }
}
