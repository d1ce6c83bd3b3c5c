use std::sync::{
    Arc, Weak,
    atomic::{AtomicU8, Ordering},
};

use {
    dbhq_common::{Error, RestResponse},
    tokio::sync::oneshot,
};

use crate::{action::ActionId, error::ActionError, queue::Inner};

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

/// Lifecycle flag shared between a handle and its queued action.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle(AtomicU8);

impl Lifecycle {
    /// Claim the action for execution. Fails if it was cancelled first.
    pub(crate) fn start(&self) -> bool {
        self.0
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn cancel(&self) -> bool {
        self.0
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire) == CANCELLED
    }
}

/// Successful terminal outcome.
#[derive(Debug, Clone)]
pub struct ActionReceipt {
    pub id: ActionId,
    pub attempts: u32,
    pub response: RestResponse,
}

pub(crate) type Outcome = Result<ActionReceipt, ActionError>;

/// Resolves once with the action's terminal outcome.
///
/// Dropping the handle does not cancel the action.
#[derive(Debug)]
pub struct ActionHandle {
    id: ActionId,
    resource: String,
    lifecycle: Arc<Lifecycle>,
    rx: oneshot::Receiver<Outcome>,
    queue: Weak<Inner>,
}

impl ActionHandle {
    pub(crate) fn new(
        id: ActionId,
        resource: String,
        lifecycle: Arc<Lifecycle>,
        rx: oneshot::Receiver<Outcome>,
        queue: Weak<Inner>,
    ) -> Self {
        Self {
            id,
            resource,
            lifecycle,
            rx,
            queue,
        }
    }

    #[must_use]
    pub fn id(&self) -> ActionId {
        self.id
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Cancel the action if it has not started. Returns `false` once the
    /// action is in flight or finished.
    pub fn cancel(&self) -> bool {
        if !self.lifecycle.cancel() {
            return false;
        }
        if let Some(queue) = self.queue.upgrade() {
            queue.forget(&self.resource, self.id);
        }
        true
    }

    pub async fn wait(self) -> Outcome {
        if self.lifecycle.is_cancelled() {
            return Err(ActionError::new(self.id, 0, Error::Cancelled));
        }
        match self.rx.await {
            Ok(outcome) => outcome,
            // The queue went away without resolving; only happens when the
            // runtime is torn down under it.
            Err(_) => Err(ActionError::new(self.id, 0, Error::ShuttingDown)),
        }
    }
}
