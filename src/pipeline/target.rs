//! Fire-and-forget loading with callbacks.

use std::fmt;

use tokio::task::JoinHandle;
use tracing::{trace, warn};

use super::engine::ImageEngine;
use super::ImageResult;
use crate::cancel::CancelToken;
use crate::error::LoadError;
use crate::request::ImageRequest;

/// Receives the outcome of an enqueued request.
///
/// Exactly one of `on_success` or `on_error` is called, unless the request is
/// cancelled first, in which case neither is.
pub trait Target: Send + 'static {
    fn on_start(&mut self) {}

    fn on_success(&mut self, result: ImageResult);

    fn on_error(&mut self, error: LoadError);
}

/// Handle on an enqueued request.
pub struct RequestHandle {
    task: JoinHandle<()>,
    cancel: CancelToken,
}

impl RequestHandle {
    /// Withdraw this request. Other requests sharing its execution are not
    /// affected; the execution stops only when its last requester leaves.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.task.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the target has been notified (or the request cancelled).
    ///
    /// A panic raised by the target is logged and not propagated.
    pub async fn join(self) {
        match self.task.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => warn!(error = %e, "Target panicked while handling a result"),
            // Cancelled: nothing was delivered
            Err(_) => {}
        }
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

pub(super) fn spawn<T: Target>(engine: ImageEngine, request: ImageRequest, mut target: T) -> RequestHandle {
    let cancel = CancelToken::new();
    let task_cancel = cancel.clone();

    let task = tokio::spawn(async move {
        if task_cancel.is_cancelled() {
            return;
        }
        target.on_start();

        let key = request.key().clone();
        let outcome = engine.execute(request).await;
        if task_cancel.is_cancelled() {
            trace!(key = %key, "Dropping result of cancelled request");
            return;
        }
        match outcome {
            Ok(result) => target.on_success(result),
            Err(LoadError::Cancelled) => {}
            Err(e) => target.on_error(e),
        }
    });

    RequestHandle { task, cancel }
}
