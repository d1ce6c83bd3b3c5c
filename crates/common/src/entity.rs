//! Cached snapshots of remote entities.

use {
    serde::{Deserialize, Serialize},
    std::fmt,
};

use crate::ids::{EntityKey, EntityKind, Snowflake};

/// Ordering marker for last-writer-wins.
///
/// `epoch` counts fresh gateway sessions; `sequence` is the gateway sequence
/// number within that session. Ordering is lexicographic, so every event from a
/// newer session beats every event from an older one even though sequence
/// numbers restart at 1.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
    pub epoch: u64,
    pub sequence: u64,
}

impl Version {
    pub const ZERO: Version = Version {
        epoch: 0,
        sequence: 0,
    };

    #[must_use]
    pub const fn new(epoch: u64, sequence: u64) -> Self {
        Self { epoch, sequence }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.epoch, self.sequence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildData {
    pub name: String,
    pub owner_id: Option<Snowflake>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelData {
    pub guild_id: Option<Snowflake>,
    pub name: Option<String>,
    /// Platform channel type code (text, voice, DM, thread, ...).
    pub channel_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberData {
    pub guild_id: Snowflake,
    pub user_id: Snowflake,
    pub username: String,
    pub nick: Option<String>,
    pub roles: Vec<Snowflake>,
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleData {
    pub guild_id: Snowflake,
    pub name: String,
    pub position: i64,
    pub permissions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub author_id: Snowflake,
    pub author_bot: bool,
    pub content: String,
}

/// Typed attributes of an entity, one variant per [`EntityKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityData {
    Guild(GuildData),
    Channel(ChannelData),
    Member(MemberData),
    Role(RoleData),
    Message(MessageData),
}

impl EntityData {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Guild(_) => EntityKind::Guild,
            Self::Channel(_) => EntityKind::Channel,
            Self::Member(_) => EntityKind::Member,
            Self::Role(_) => EntityKind::Role,
            Self::Message(_) => EntityKind::Message,
        }
    }
}

/// A versioned snapshot of remote truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub key: EntityKey,
    pub version: Version,
    pub data: EntityData,
}

impl Entity {
    #[must_use]
    pub fn new(key: EntityKey, version: Version, data: EntityData) -> Self {
        Self { key, version, data }
    }

    pub fn guild(id: Snowflake, version: Version, data: GuildData) -> Self {
        Self::new(EntityKey::guild(id), version, EntityData::Guild(data))
    }

    pub fn channel(id: Snowflake, version: Version, data: ChannelData) -> Self {
        Self::new(EntityKey::channel(id), version, EntityData::Channel(data))
    }

    pub fn member(version: Version, data: MemberData) -> Self {
        Self::new(
            EntityKey::member(data.guild_id, data.user_id),
            version,
            EntityData::Member(data),
        )
    }

    pub fn role(id: Snowflake, version: Version, data: RoleData) -> Self {
        Self::new(EntityKey::role(id), version, EntityData::Role(data))
    }

    pub fn message(id: Snowflake, version: Version, data: MessageData) -> Self {
        Self::new(EntityKey::message(id), version, EntityData::Message(data))
    }

    #[must_use]
    pub fn as_member(&self) -> Option<&MemberData> {
        match &self.data {
            EntityData::Member(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_message(&self) -> Option<&MessageData> {
        match &self.data {
            EntityData::Message(m) => Some(m),
            _ => None,
        }
    }
}
