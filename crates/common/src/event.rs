//! Typed gateway events.

use {
    serde::{Deserialize, Serialize},
    std::fmt,
};

use crate::{
    entity::{ChannelData, GuildData, MemberData, MessageData, RoleData, Version},
    ids::{EntityKey, Snowflake},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSnapshot {
    pub guild_id: Snowflake,
    pub guild: GuildData,
    pub channels: Vec<(Snowflake, ChannelData)>,
    pub roles: Vec<(Snowflake, RoleData)>,
    pub members: Vec<MemberData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emoji {
    pub id: Option<Snowflake>,
    pub name: Option<String>,
}

impl fmt::Display for Emoji {
    /// Renders the form the REST API expects in reaction routes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.id) {
            (Some(name), Some(id)) => write!(f, "{name}:{id}"),
            (Some(name), None) => f.write_str(name),
            (None, Some(id)) => write!(f, "_:{id}"),
            (None, None) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub user_id: Snowflake,
    pub emoji: Emoji,
}

/// Payload of a dispatched gateway event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    GuildCreate(GuildSnapshot),
    GuildUpdate {
        guild_id: Snowflake,
        guild: GuildData,
    },
    GuildDelete {
        guild_id: Snowflake,
        /// Outage rather than removal; the guild is kept.
        unavailable: bool,
    },
    ChannelCreate {
        channel_id: Snowflake,
        channel: ChannelData,
    },
    ChannelUpdate {
        channel_id: Snowflake,
        channel: ChannelData,
    },
    ChannelDelete {
        channel_id: Snowflake,
    },
    RoleCreate {
        role_id: Snowflake,
        role: RoleData,
    },
    RoleUpdate {
        role_id: Snowflake,
        role: RoleData,
    },
    RoleDelete {
        guild_id: Snowflake,
        role_id: Snowflake,
    },
    MemberJoined(MemberData),
    MemberUpdated(MemberData),
    MemberLeft {
        guild_id: Snowflake,
        user_id: Snowflake,
    },
    MessageCreated {
        message_id: Snowflake,
        message: MessageData,
    },
    MessageUpdated {
        message_id: Snowflake,
        message: MessageData,
    },
    MessageDeleted {
        channel_id: Snowflake,
        message_id: Snowflake,
        guild_id: Option<Snowflake>,
    },
    ReactionAdded(Reaction),
    ReactionRemoved(Reaction),
    /// An event name this build does not model. Routed to `Any` handlers only.
    Unknown {
        name: String,
    },
    /// A known event whose body failed to decode. Logged and skipped.
    Malformed {
        name: String,
        reason: String,
    },
}

/// Field-less discriminant of [`EventPayload`], used for handler matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    GuildCreate,
    GuildUpdate,
    GuildDelete,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    RoleCreate,
    RoleUpdate,
    RoleDelete,
    MemberJoined,
    MemberUpdated,
    MemberLeft,
    MessageCreated,
    MessageUpdated,
    MessageDeleted,
    ReactionAdded,
    ReactionRemoved,
    Unknown,
    Malformed,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GuildCreate => "guild_create",
            Self::GuildUpdate => "guild_update",
            Self::GuildDelete => "guild_delete",
            Self::ChannelCreate => "channel_create",
            Self::ChannelUpdate => "channel_update",
            Self::ChannelDelete => "channel_delete",
            Self::RoleCreate => "role_create",
            Self::RoleUpdate => "role_update",
            Self::RoleDelete => "role_delete",
            Self::MemberJoined => "member_joined",
            Self::MemberUpdated => "member_updated",
            Self::MemberLeft => "member_left",
            Self::MessageCreated => "message_created",
            Self::MessageUpdated => "message_updated",
            Self::MessageDeleted => "message_deleted",
            Self::ReactionAdded => "reaction_added",
            Self::ReactionRemoved => "reaction_removed",
            Self::Unknown => "unknown",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EventPayload {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::GuildCreate(_) => EventKind::GuildCreate,
            Self::GuildUpdate { .. } => EventKind::GuildUpdate,
            Self::GuildDelete { .. } => EventKind::GuildDelete,
            Self::ChannelCreate { .. } => EventKind::ChannelCreate,
            Self::ChannelUpdate { .. } => EventKind::ChannelUpdate,
            Self::ChannelDelete { .. } => EventKind::ChannelDelete,
            Self::RoleCreate { .. } => EventKind::RoleCreate,
            Self::RoleUpdate { .. } => EventKind::RoleUpdate,
            Self::RoleDelete { .. } => EventKind::RoleDelete,
            Self::MemberJoined(_) => EventKind::MemberJoined,
            Self::MemberUpdated(_) => EventKind::MemberUpdated,
            Self::MemberLeft { .. } => EventKind::MemberLeft,
            Self::MessageCreated { .. } => EventKind::MessageCreated,
            Self::MessageUpdated { .. } => EventKind::MessageUpdated,
            Self::MessageDeleted { .. } => EventKind::MessageDeleted,
            Self::ReactionAdded(_) => EventKind::ReactionAdded,
            Self::ReactionRemoved(_) => EventKind::ReactionRemoved,
            Self::Unknown { .. } => EventKind::Unknown,
            Self::Malformed { .. } => EventKind::Malformed,
        }
    }

    /// The entity this event primarily concerns, for log context.
    #[must_use]
    pub fn primary_key(&self) -> Option<EntityKey> {
        match self {
            Self::GuildCreate(s) => Some(EntityKey::guild(s.guild_id)),
            Self::GuildUpdate { guild_id, .. } | Self::GuildDelete { guild_id, .. } => {
                Some(EntityKey::guild(*guild_id))
            },
            Self::ChannelCreate { channel_id, .. }
            | Self::ChannelUpdate { channel_id, .. }
            | Self::ChannelDelete { channel_id } => Some(EntityKey::channel(*channel_id)),
            Self::RoleCreate { role_id, .. }
            | Self::RoleUpdate { role_id, .. }
            | Self::RoleDelete { role_id, .. } => Some(EntityKey::role(*role_id)),
            Self::MemberJoined(m) | Self::MemberUpdated(m) => {
                Some(EntityKey::member(m.guild_id, m.user_id))
            },
            Self::MemberLeft { guild_id, user_id } => Some(EntityKey::member(*guild_id, *user_id)),
            Self::MessageCreated { message_id, .. }
            | Self::MessageUpdated { message_id, .. }
            | Self::MessageDeleted { message_id, .. } => Some(EntityKey::message(*message_id)),
            Self::ReactionAdded(r) | Self::ReactionRemoved(r) => {
                Some(EntityKey::message(r.message_id))
            },
            Self::Unknown { .. } | Self::Malformed { .. } => None,
        }
    }

    /// Channel to reply into, for message-like events.
    #[must_use]
    pub fn channel_id(&self) -> Option<Snowflake> {
        match self {
            Self::MessageCreated { message, .. } | Self::MessageUpdated { message, .. } => {
                Some(message.channel_id)
            },
            Self::MessageDeleted { channel_id, .. } => Some(*channel_id),
            Self::ReactionAdded(r) | Self::ReactionRemoved(r) => Some(r.channel_id),
            Self::ChannelCreate { channel_id, .. }
            | Self::ChannelUpdate { channel_id, .. }
            | Self::ChannelDelete { channel_id } => Some(*channel_id),
            _ => None,
        }
    }
}

/// A dispatched event stamped with its connection epoch and sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub epoch: u64,
    pub sequence: u64,
    pub payload: EventPayload,
}

impl Envelope {
    #[must_use]
    pub fn new(epoch: u64, sequence: u64, payload: EventPayload) -> Self {
        Self {
            epoch,
            sequence,
            payload,
        }
    }

    #[must_use]
    pub fn version(&self) -> Version {
        Version::new(self.epoch, self.sequence)
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Idempotency key used for duplicate suppression after a resume.
    #[must_use]
    pub fn idempotency_key(&self) -> (u64, u64) {
        (self.epoch, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_route_form() {
        let unicode = Emoji {
            id: None,
            name: Some("👍".into()),
        };
        let custom = Emoji {
            id: Some(Snowflake(599772724029685760)),
            name: Some("hof".into()),
        };
        assert_eq!(unicode.to_string(), "👍");
        assert_eq!(custom.to_string(), "hof:599772724029685760");
    }

    #[test]
    fn member_left_targets_scoped_member() {
        let payload = EventPayload::MemberLeft {
            guild_id: Snowflake(1),
            user_id: Snowflake(42),
        };
        assert_eq!(payload.kind(), EventKind::MemberLeft);
        assert_eq!(
            payload.primary_key(),
            Some(EntityKey::member(1u64, 42u64))
        );
    }
}
