//! Single-flight hand-off between the refresh loop and the lookup service.
//!
//! The refresh loop runs one record at a time, but lookups complete
//! asynchronously, possibly on another thread. [`SearchCoordinator`] makes
//! sure only one lookup is outstanding and carries the record being refreshed
//! across the lookup and back:
//!
//! ```text
//!  refresh loop                      lookup service
//!  ────────────                      ──────────────
//!  dispatch(query, context) ──────▶ search(query, CompletionHandle{context})
//!        │                                   │
//!  InFlightSearch                            │  complete(data, cancelled)
//!        │                                   ▼
//!  await_completion() ◀──── oneshot ── Completion{context, outcome}
//! ```
//!
//! The [`SearchContext`] (snapshot plus per-record policies) is moved into the
//! [`CompletionHandle`] at dispatch and comes back inside the [`Completion`],
//! so the loop cannot touch or drop it while the lookup is running. Setting
//! the state to `Signaled` and handing the context over happen under one lock.
//!
//! State per coordinator: `Idle → Dispatched → AwaitingSignal → Signaled →
//! Idle`. A completion that arrives before the loop starts waiting goes
//! straight from `Dispatched` to `Signaled`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::lookup::{LookupService, SearchQuery};
use crate::models::{FetchedData, RecordSnapshot};
use crate::policy::FieldUsages;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    Dispatched,
    AwaitingSignal,
    Signaled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("a lookup is already in flight (state {0:?})")]
    Busy(SearchState),
    #[error("lookup completion was lost")]
    Dropped,
}

/// Record-scoped state that travels with one lookup.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub snapshot: RecordSnapshot,
    pub usages: FieldUsages,
}

/// How a lookup ended.
#[derive(Debug)]
pub enum LookupOutcome {
    Found(FetchedData),
    NotFound,
    Cancelled,
}

/// Delivered to the refresh loop when a lookup completes.
#[derive(Debug)]
pub struct Completion {
    pub context: SearchContext,
    pub outcome: LookupOutcome,
}

type SharedState = Arc<Mutex<SearchState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, SearchState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts lookups and enforces that at most one is outstanding.
pub struct SearchCoordinator {
    service: Arc<dyn LookupService>,
    state: SharedState,
}

impl SearchCoordinator {
    pub fn new(service: Arc<dyn LookupService>) -> Self {
        Self {
            service,
            state: Arc::new(Mutex::new(SearchState::Idle)),
        }
    }

    pub fn state(&self) -> SearchState {
        *lock(&self.state)
    }

    /// Start a lookup for the record described by `context`.
    ///
    /// Fails with [`CoordinatorError::Busy`] if a previous lookup has not been
    /// awaited yet.
    pub fn dispatch(
        &self,
        query: SearchQuery,
        context: SearchContext,
    ) -> Result<InFlightSearch, CoordinatorError> {
        {
            let mut state = lock(&self.state);
            if *state != SearchState::Idle {
                return Err(CoordinatorError::Busy(*state));
            }
            *state = SearchState::Dispatched;
        }

        let row_id = context.snapshot.row_id;
        let (tx, rx) = oneshot::channel();
        let handle = CompletionHandle {
            inner: Some((tx, context)),
            state: self.state.clone(),
        };
        tracing::debug!(row_id, isbn = %query.isbn, title = %query.title, "dispatching lookup");
        self.service.search(query, handle);

        Ok(InFlightSearch {
            rx,
            state: self.state.clone(),
            row_id,
            finished: false,
        })
    }
}

/// Token for the one outstanding lookup.
#[derive(Debug)]
pub struct InFlightSearch {
    rx: oneshot::Receiver<Completion>,
    state: SharedState,
    row_id: i64,
    finished: bool,
}

impl InFlightSearch {
    pub fn row_id(&self) -> i64 {
        self.row_id
    }

    /// Wait until the lookup service has completed this lookup.
    pub async fn await_completion(mut self) -> Result<Completion, CoordinatorError> {
        {
            let mut state = lock(&self.state);
            if *state == SearchState::Dispatched {
                *state = SearchState::AwaitingSignal;
            }
        }

        let result = (&mut self.rx).await;
        *lock(&self.state) = SearchState::Idle;
        self.finished = true;
        tracing::debug!(row_id = self.row_id, "lookup signaled");
        result.map_err(|_| CoordinatorError::Dropped)
    }
}

impl Drop for InFlightSearch {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Abandoned without waiting. A completion that already arrived is
        // discarded here; a later one sees the closed channel and resets the
        // state itself.
        self.rx.close();
        let mut state = lock(&self.state);
        if *state == SearchState::Signaled {
            *state = SearchState::Idle;
        }
    }
}

/// Given to the lookup service; completing it signals the waiting loop.
///
/// Completion happens exactly once: [`complete`](CompletionHandle::complete)
/// consumes the handle, and a handle dropped without completing reports the
/// lookup as not found.
pub struct CompletionHandle {
    inner: Option<(oneshot::Sender<Completion>, SearchContext)>,
    state: SharedState,
}

impl CompletionHandle {
    /// The record this lookup is for.
    pub fn row_id(&self) -> Option<i64> {
        self.inner.as_ref().map(|(_, ctx)| ctx.snapshot.row_id)
    }

    /// Report the lookup result. `cancelled` wins over any fetched data.
    pub fn complete(mut self, fetched: Option<FetchedData>, cancelled: bool) {
        let outcome = match (fetched, cancelled) {
            (_, true) => LookupOutcome::Cancelled,
            (Some(data), false) => LookupOutcome::Found(data),
            (None, false) => LookupOutcome::NotFound,
        };
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: LookupOutcome) {
        let Some((tx, context)) = self.inner.take() else {
            return;
        };
        let mut state = lock(&self.state);
        match tx.send(Completion { context, outcome }) {
            Ok(()) => *state = SearchState::Signaled,
            Err(_) => *state = SearchState::Idle,
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        self.finish(LookupOutcome::NotFound);
    }
}
