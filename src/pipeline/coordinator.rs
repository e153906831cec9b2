//! Per-key deduplication of in-flight executions.
//!
//! At most one [`Execution`] exists per [`RequestKey`] while it is active.
//! Every requester holds a [`Waiter`]; the execution's result is stored in a
//! slot before waiters are notified, so a requester that joins after
//! completion but before [`release`](RequestCoordinator::release) still gets
//! the result.
//!
//! Dropping the last waiter of an unfinished execution cancels it: the cancel
//! token is set, the task running it is aborted, and the key is freed for a
//! fresh execution.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::LoadError;
use crate::request::RequestKey;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Execution
// =============================================================================

struct ExecutionState<T> {
    result: Option<Result<T, LoadError>>,
    waiters: usize,
    abort: Option<AbortHandle>,
}

/// One in-flight load shared by every requester of a key.
pub struct Execution<T> {
    id: u64,
    key: RequestKey,
    state: Mutex<ExecutionState<T>>,
    notify: Notify,
    cancel: CancelToken,
}

impl<T: Clone> Execution<T> {
    fn new(id: u64, key: RequestKey) -> Self {
        Self {
            id,
            key,
            state: Mutex::new(ExecutionState {
                result: None,
                waiters: 0,
                abort: None,
            }),
            notify: Notify::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Token checked by the work at each checkpoint.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_complete(&self) -> bool {
        lock(&self.state).result.is_some()
    }

    pub fn waiters(&self) -> usize {
        lock(&self.state).waiters
    }

    /// Attach the task running this execution so cancellation can abort it.
    pub fn set_abort_handle(&self, handle: AbortHandle) {
        let mut state = lock(&self.state);
        if self.cancel.is_cancelled() {
            handle.abort();
        } else {
            state.abort = Some(handle);
        }
    }

    /// Publish the result and wake every waiter. Only the first call counts.
    pub fn complete(&self, result: Result<T, LoadError>) -> bool {
        {
            let mut state = lock(&self.state);
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result);
            state.abort = None;
        }
        self.notify.notify_waiters();
        true
    }

    fn result(&self) -> Option<Result<T, LoadError>> {
        lock(&self.state).result.clone()
    }
}

impl<T> fmt::Debug for Execution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Outcome of [`RequestCoordinator::join_or_register`].
#[derive(Debug)]
pub enum Registration<T: Clone> {
    /// An execution was already running; wait for it
    Joined(Waiter<T>),
    /// A new execution was registered; the caller must run it
    Leader(Waiter<T>),
}

impl<T: Clone> Registration<T> {
    pub fn is_leader(&self) -> bool {
        matches!(self, Registration::Leader(_))
    }

    pub fn into_waiter(self) -> Waiter<T> {
        match self {
            Registration::Joined(waiter) | Registration::Leader(waiter) => waiter,
        }
    }
}

/// Map of active executions, keyed by request key.
pub struct RequestCoordinator<T> {
    executions: Arc<Mutex<HashMap<RequestKey, Arc<Execution<T>>>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for RequestCoordinator<T> {
    fn clone(&self) -> Self {
        Self {
            executions: self.executions.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<T: Clone> Default for RequestCoordinator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> RequestCoordinator<T> {
    pub fn new() -> Self {
        Self {
            executions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn waiter(&self, execution: &Arc<Execution<T>>) -> Waiter<T> {
        lock(&execution.state).waiters += 1;
        Waiter {
            execution: execution.clone(),
            coordinator: self.clone(),
            received: false,
        }
    }

    /// Join the active execution for `key`, if any.
    pub fn join(&self, key: &RequestKey) -> Option<Waiter<T>> {
        let executions = lock(&self.executions);
        executions
            .get(key)
            .filter(|e| !e.cancel.is_cancelled())
            .map(|e| self.waiter(e))
    }

    /// Join the active execution for `key` or register a new one, atomically.
    pub fn join_or_register(&self, key: &RequestKey) -> Registration<T> {
        let mut executions = lock(&self.executions);
        if let Some(existing) = executions.get(key).filter(|e| !e.cancel.is_cancelled()) {
            return Registration::Joined(self.waiter(existing));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let execution = Arc::new(Execution::new(id, key.clone()));
        executions.insert(key.clone(), execution.clone());
        debug!(key = %key, id, "Registered execution");
        Registration::Leader(self.waiter(&execution))
    }

    /// Unregister execution `id` for `key`. Releasing twice, or releasing
    /// after a newer execution took the key, does nothing.
    pub fn release(&self, key: &RequestKey, id: u64) -> bool {
        let mut executions = lock(&self.executions);
        if executions.get(key).map(|e| e.id) == Some(id) {
            executions.remove(key);
            true
        } else {
            false
        }
    }

    /// Number of active executions.
    pub fn in_flight(&self) -> usize {
        lock(&self.executions).len()
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        lock(&self.executions).contains_key(key)
    }
}

impl<T> fmt::Debug for RequestCoordinator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("in_flight", &lock(&self.executions).len())
            .finish()
    }
}

// =============================================================================
// Waiter
// =============================================================================

/// One requester's membership in an execution.
///
/// Dropping a waiter before it received the result withdraws it; if it was
/// the last one, the execution is cancelled.
pub struct Waiter<T: Clone> {
    execution: Arc<Execution<T>>,
    coordinator: RequestCoordinator<T>,
    received: bool,
}

impl<T: Clone> Waiter<T> {
    pub fn execution(&self) -> &Arc<Execution<T>> {
        &self.execution
    }

    /// Suspend until the execution publishes its result.
    pub async fn wait(mut self) -> Result<T, LoadError> {
        loop {
            let notified = self.execution.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking the slot
            notified.as_mut().enable();

            if let Some(result) = self.execution.result() {
                self.received = true;
                return result;
            }
            notified.await;
        }
    }
}

impl<T: Clone> Drop for Waiter<T> {
    fn drop(&mut self) {
        let mut executions = lock(&self.coordinator.executions);
        let mut state = lock(&self.execution.state);
        state.waiters = state.waiters.saturating_sub(1);

        if self.received || state.waiters > 0 || state.result.is_some() {
            return;
        }

        self.execution.cancel.cancel();
        if let Some(handle) = state.abort.take() {
            handle.abort();
        }
        let key = &self.execution.key;
        if executions.get(key).map(|e| e.id) == Some(self.execution.id) {
            executions.remove(key);
        }
        debug!(key = %key, id = self.execution.id, "Last waiter left, execution cancelled");
    }
}

impl<T: Clone> fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("execution", &self.execution)
            .field("received", &self.received)
            .finish()
    }
}
