use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Platform-issued identifier. Travels as a decimal string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Snowflake(pub u64);

impl Snowflake {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for Snowflake {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Int(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Int(n) => Ok(Self(n)),
        }
    }
}

/// The kinds of remote entity mirrored by the state cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Guild,
    Channel,
    Member,
    Role,
    Message,
}

impl EntityKind {
    pub const ALL: &'static [EntityKind] = &[
        Self::Guild,
        Self::Channel,
        Self::Member,
        Self::Role,
        Self::Message,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guild => "guild",
            Self::Channel => "channel",
            Self::Member => "member",
            Self::Role => "role",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cached entity.
///
/// Members are the only guild-scoped kind: the same user in two guilds is two
/// entities, so `scope` carries the guild ID. Everything else has `scope: None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: Snowflake,
    pub scope: Option<Snowflake>,
}

impl EntityKey {
    #[must_use]
    pub fn guild(id: impl Into<Snowflake>) -> Self {
        Self::unscoped(EntityKind::Guild, id.into())
    }

    #[must_use]
    pub fn channel(id: impl Into<Snowflake>) -> Self {
        Self::unscoped(EntityKind::Channel, id.into())
    }

    #[must_use]
    pub fn role(id: impl Into<Snowflake>) -> Self {
        Self::unscoped(EntityKind::Role, id.into())
    }

    #[must_use]
    pub fn message(id: impl Into<Snowflake>) -> Self {
        Self::unscoped(EntityKind::Message, id.into())
    }

    #[must_use]
    pub fn member(guild_id: impl Into<Snowflake>, user_id: impl Into<Snowflake>) -> Self {
        Self {
            kind: EntityKind::Member,
            id: user_id.into(),
            scope: Some(guild_id.into()),
        }
    }

    fn unscoped(kind: EntityKind, id: Snowflake) -> Self {
        Self {
            kind,
            id,
            scope: None,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            Some(scope) => write!(f, "{}:{}/{}", self.kind, scope, self.id),
            None => write!(f, "{}:{}", self.kind, self.id),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_accepts_string_and_integer() {
        let a: Snowflake = serde_json::from_str("\"80351110224678912\"").unwrap();
        let b: Snowflake = serde_json::from_str("80351110224678912").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"80351110224678912\"");
    }

    #[test]
    fn members_are_scoped_by_guild() {
        assert_ne!(EntityKey::member(1u64, 42u64), EntityKey::member(2u64, 42u64));
        assert_eq!(EntityKey::member(1u64, 42u64).to_string(), "member:1/42");
        assert_eq!(EntityKey::channel(7u64).to_string(), "channel:7");
    }
}
