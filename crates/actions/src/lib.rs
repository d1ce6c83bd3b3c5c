//! Outbound write operations and the queue that runs them.
//!
//! Actions sharing a resource key run one at a time in submission order;
//! different keys run concurrently up to the worker pool size. Every action
//! resolves its [`ActionHandle`] exactly once.

mod action;
mod error;
mod handle;
mod queue;

pub use {
    action::{Action, ActionId, ActionKind},
    error::ActionError,
    handle::{ActionHandle, ActionReceipt},
    queue::{ActionQueue, QueueConfig},
};
