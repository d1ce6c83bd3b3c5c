use dbhq_common::{Error, ErrorKind};

use crate::action::ActionId;

/// Terminal failure of an action.
#[derive(Debug, thiserror::Error)]
#[error("action {id} failed after {attempts} attempt(s): {source}")]
pub struct ActionError {
    pub id: ActionId,
    /// Remote calls made; 0 if the action never started.
    pub attempts: u32,
    #[source]
    pub source: Error,
}

impl ActionError {
    #[must_use]
    pub fn new(id: ActionId, attempts: u32, source: Error) -> Self {
        Self {
            id,
            attempts,
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}
