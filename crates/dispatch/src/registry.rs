//! Handler registry.
//!
//! Registrations are kept in an immutable list that is swapped on every
//! change. Dispatch takes a snapshot, so `unregister` never waits for (or
//! interrupts) handlers that are already running.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc, RwLock, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    anyhow::Result,
    async_trait::async_trait,
    dbhq_common::{Envelope, EventKind, EventPayload, Snowflake},
    tracing::{info, warn},
};

use crate::{command::ParsedCommand, context::HandlerContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Behaviour attached to events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Human-readable name, used in logs and failure telemetry.
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &HandlerContext) -> Result<()>;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &HandlerContext) -> Result<()> {
        (self.f)(ctx.clone()).await
    }
}

/// Narrows which events of the registered kind reach a handler.
#[derive(Clone)]
pub enum EventMatcher {
    Any,
    /// A prefix command with this (lower-case) name.
    Command(String),
    Guild(Snowflake),
    Channel(Snowflake),
    Custom(Arc<dyn Fn(&Envelope) -> bool + Send + Sync>),
}

impl fmt::Debug for EventMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Command(name) => f.debug_tuple("Command").field(name).finish(),
            Self::Guild(id) => f.debug_tuple("Guild").field(id).finish(),
            Self::Channel(id) => f.debug_tuple("Channel").field(id).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl EventMatcher {
    fn matches(&self, envelope: &Envelope, command: Option<&ParsedCommand>) -> bool {
        match self {
            Self::Any => true,
            Self::Command(name) => command.is_some_and(|c| &c.name == name),
            Self::Guild(id) => guild_of(&envelope.payload) == Some(*id),
            Self::Channel(id) => envelope.payload.channel_id() == Some(*id),
            Self::Custom(predicate) => predicate(envelope),
        }
    }
}

pub(crate) fn guild_of(payload: &EventPayload) -> Option<Snowflake> {
    match payload {
        EventPayload::GuildCreate(s) => Some(s.guild_id),
        EventPayload::GuildUpdate { guild_id, .. }
        | EventPayload::GuildDelete { guild_id, .. }
        | EventPayload::RoleDelete { guild_id, .. }
        | EventPayload::MemberLeft { guild_id, .. } => Some(*guild_id),
        EventPayload::ChannelCreate { channel, .. } | EventPayload::ChannelUpdate { channel, .. } => {
            channel.guild_id
        },
        EventPayload::RoleCreate { role, .. } | EventPayload::RoleUpdate { role, .. } => {
            Some(role.guild_id)
        },
        EventPayload::MemberJoined(m) | EventPayload::MemberUpdated(m) => Some(m.guild_id),
        EventPayload::MessageCreated { message, .. }
        | EventPayload::MessageUpdated { message, .. } => message.guild_id,
        EventPayload::MessageDeleted { guild_id, .. } => *guild_id,
        EventPayload::ReactionAdded(r) | EventPayload::ReactionRemoved(r) => r.guild_id,
        EventPayload::ChannelDelete { .. }
        | EventPayload::Unknown { .. }
        | EventPayload::Malformed { .. } => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
}

pub(crate) struct Registration {
    pub(crate) id: HandlerId,
    /// `None` matches every kind.
    kind: Option<EventKind>,
    matcher: EventMatcher,
    pub(crate) handler: Arc<dyn EventHandler>,
    description: Option<String>,
}

impl Registration {
    pub(crate) fn is_command(&self) -> bool {
        matches!(self.matcher, EventMatcher::Command(_))
    }

    fn is_command_named(&self, name: &str) -> bool {
        matches!(&self.matcher, EventMatcher::Command(n) if n == name)
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<Arc<Vec<Arc<Registration>>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for events of `kind` accepted by `matcher`. Handlers
    /// matching one event run in registration order.
    pub fn register(
        &self,
        kind: EventKind,
        matcher: EventMatcher,
        handler: Arc<dyn EventHandler>,
    ) -> HandlerId {
        self.insert(&mut self.write(), Some(kind), matcher, handler, None)
    }

    /// Add a handler for every event, including unknown ones.
    pub fn register_any(&self, matcher: EventMatcher, handler: Arc<dyn EventHandler>) -> HandlerId {
        self.insert(&mut self.write(), None, matcher, handler, None)
    }

    /// Add a prefix command. Names are case-insensitive. A second command
    /// with the same name is refused and the first one kept.
    pub fn register_command(
        &self,
        name: &str,
        description: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Option<HandlerId> {
        let name = name.to_lowercase();
        let mut entries = self.write();
        if entries.iter().any(|r| r.is_command_named(&name)) {
            warn!(command = %name, "duplicate command registration ignored");
            return None;
        }
        Some(self.insert(
            &mut entries,
            Some(EventKind::MessageCreated),
            EventMatcher::Command(name),
            handler,
            Some(description.into()),
        ))
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<Vec<Arc<Registration>>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(
        &self,
        entries: &mut Arc<Vec<Arc<Registration>>>,
        kind: Option<EventKind>,
        matcher: EventMatcher,
        handler: Arc<dyn EventHandler>,
        description: Option<String>,
    ) -> HandlerId {
        let matcher = match matcher {
            EventMatcher::Command(name) => EventMatcher::Command(name.to_lowercase()),
            other => other,
        };
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        info!(handler = handler.name(), %id, ?kind, ?matcher, "handler registered");
        let registration = Arc::new(Registration {
            id,
            kind,
            matcher,
            handler,
            description,
        });

        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push(registration);
        *entries = Arc::new(next);
        id
    }

    /// Remove a handler. Invocations already running finish normally.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut entries = self.write();
        if !entries.iter().any(|r| r.id == id) {
            return false;
        }
        let next: Vec<_> = entries.iter().filter(|r| r.id != id).cloned().collect();
        *entries = Arc::new(next);
        info!(%id, "handler unregistered");
        true
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Registration>>> {
        Arc::clone(&self.entries.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Registrations matching `envelope`, in registration order.
    pub(crate) fn resolve(
        &self,
        envelope: &Envelope,
        command: Option<&ParsedCommand>,
    ) -> Vec<Arc<Registration>> {
        let kind = envelope.kind();
        self.snapshot()
            .iter()
            .filter(|r| r.kind.is_none_or(|k| k == kind))
            .filter(|r| r.matcher.matches(envelope, command))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn has_command(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.snapshot().iter().any(|r| r.is_command_named(&name))
    }

    /// Registered commands with their descriptions, in registration order.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandInfo> {
        self.snapshot()
            .iter()
            .filter_map(|r| match &r.matcher {
                EventMatcher::Command(name) => Some(CommandInfo {
                    name: name.clone(),
                    description: r.description.clone().unwrap_or_default(),
                }),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        dbhq_common::entity::MessageData,
    };

    fn noop(name: &str) -> Arc<dyn EventHandler> {
        Arc::new(FnHandler::new(name, |_ctx| async { Ok::<_, anyhow::Error>(()) }))
    }

    fn message(guild: Option<u64>, content: &str) -> Envelope {
        Envelope::new(1, 1, EventPayload::MessageCreated {
            message_id: Snowflake(100),
            message: MessageData {
                channel_id: Snowflake(7),
                guild_id: guild.map(Snowflake),
                author_id: Snowflake(42),
                author_bot: false,
                content: content.into(),
            },
        })
    }

    fn names(resolved: &[Arc<Registration>]) -> Vec<String> {
        resolved.iter().map(|r| r.handler.name().to_string()).collect()
    }

    #[test]
    fn resolves_in_registration_order() {
        let registry = HandlerRegistry::new();
        registry.register(EventKind::MessageCreated, EventMatcher::Any, noop("a"));
        registry.register(EventKind::MemberJoined, EventMatcher::Any, noop("other-kind"));
        registry.register_any(EventMatcher::Any, noop("b"));
        registry.register(EventKind::MessageCreated, EventMatcher::Guild(Snowflake(1)), noop("c"));

        let resolved = registry.resolve(&message(Some(1), "hello"), None);
        assert_eq!(names(&resolved), ["a", "b", "c"]);

        let dm = registry.resolve(&message(None, "hello"), None);
        assert_eq!(names(&dm), ["a", "b"]);
    }

    #[test]
    fn command_matcher_needs_a_parsed_command() {
        let registry = HandlerRegistry::new();
        registry.register_command("Ping", "Replies with pong", noop("ping"));
        let envelope = message(Some(1), "!ping");

        assert!(registry.resolve(&envelope, None).is_empty());
        let cmd = ParsedCommand::parse("!ping", "!").unwrap();
        assert_eq!(names(&registry.resolve(&envelope, Some(&cmd))), ["ping"]);
        assert!(registry.has_command("ping"));
    }

    #[test]
    fn duplicate_command_keeps_the_first() {
        let registry = HandlerRegistry::new();
        assert!(registry.register_command("help", "first", noop("a")).is_some());
        assert!(registry.register_command("HELP", "second", noop("b")).is_none());
        assert_eq!(registry.commands(), [CommandInfo {
            name: "help".into(),
            description: "first".into(),
        }]);
    }

    #[test]
    fn command_matcher_names_are_case_insensitive() {
        let registry = HandlerRegistry::new();
        registry.register(
            EventKind::MessageCreated,
            EventMatcher::Command("Roll".into()),
            noop("roll"),
        );
        let cmd = ParsedCommand::parse("!ROLL d20", "!").unwrap();
        assert_eq!(names(&registry.resolve(&message(Some(1), "!ROLL d20"), Some(&cmd))), ["roll"]);
        assert!(registry.has_command("Roll"));
    }

    #[test]
    fn concurrent_duplicate_commands_register_once() {
        let registry = Arc::new(HandlerRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry
                        .register_command("ping", format!("copy {i}"), noop("ping"))
                        .is_some()
                })
            })
            .collect();
        let accepted = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|registered| *registered)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(registry.commands().len(), 1);
    }

    #[test]
    fn unregister_removes_only_that_handler() {
        let registry = HandlerRegistry::new();
        let a = registry.register_any(EventMatcher::Any, noop("a"));
        registry.register_any(EventMatcher::Any, noop("b"));

        let before = registry.snapshot();
        assert!(registry.unregister(a));
        assert!(!registry.unregister(a));
        assert_eq!(names(&registry.resolve(&message(None, "x"), None)), ["b"]);
        // A snapshot taken earlier is unaffected.
        assert_eq!(before.len(), 2);
    }

    #[test]
    fn custom_matcher() {
        let registry = HandlerRegistry::new();
        registry.register(
            EventKind::MessageCreated,
            EventMatcher::Custom(Arc::new(|e: &Envelope| e.sequence % 2 == 1)),
            noop("odd"),
        );
        assert_eq!(registry.resolve(&message(None, "x"), None).len(), 1);
    }
}
