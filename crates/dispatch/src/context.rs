use std::sync::Arc;

use {
    dbhq_actions::{Action, ActionHandle, ActionQueue},
    dbhq_cache::CacheView,
    dbhq_common::{Envelope, EventPayload, Snowflake},
};

use crate::{
    command::ParsedCommand,
    registry::{CommandInfo, HandlerRegistry},
};

/// Everything a handler gets: the event, a read-only cache view and a way to
/// submit actions. Cheap to clone.
#[derive(Clone, Debug)]
pub struct HandlerContext {
    envelope: Arc<Envelope>,
    command: Option<Arc<ParsedCommand>>,
    cache: CacheView,
    actions: ActionQueue,
    registry: Arc<HandlerRegistry>,
}

impl HandlerContext {
    pub(crate) fn new(
        envelope: Arc<Envelope>,
        command: Option<Arc<ParsedCommand>>,
        cache: CacheView,
        actions: ActionQueue,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            envelope,
            command,
            cache,
            actions,
            registry,
        }
    }

    #[must_use]
    pub fn event(&self) -> &Envelope {
        &self.envelope
    }

    #[must_use]
    pub fn payload(&self) -> &EventPayload {
        &self.envelope.payload
    }

    /// The parsed prefix command, for message events that carry one.
    #[must_use]
    pub fn command(&self) -> Option<&ParsedCommand> {
        self.command.as_deref()
    }

    #[must_use]
    pub fn cache(&self) -> &CacheView {
        &self.cache
    }

    pub fn submit(&self, action: impl Into<Action>) -> ActionHandle {
        self.actions.submit(action)
    }

    /// Send `content` to the channel the event came from. `None` for events
    /// without a channel.
    pub fn reply(&self, content: impl Into<String>) -> Option<ActionHandle> {
        let channel_id: Snowflake = self.envelope.payload.channel_id()?;
        Some(self.actions.submit(Action::send_message(channel_id, content)))
    }

    /// Registered prefix commands.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandInfo> {
        self.registry.commands()
    }
}
