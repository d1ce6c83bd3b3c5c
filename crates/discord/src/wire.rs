//! Discord JSON shapes, as received, and their mapping onto the entity model.
//!
//! Only the fields the cache and dispatcher use are modeled; serde ignores the
//! rest.

use {
    dbhq_common::{
        Snowflake,
        entity::{ChannelData, GuildData, MemberData, MessageData, RoleData},
        event::GuildSnapshot,
    },
    serde::{Deserialize, Deserializer, de},
};

/// Gateway envelope: `{"op", "d", "s", "t"}`.
#[derive(Debug, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: serde_json::Value,
    pub s: Option<u64>,
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Deserialize)]
pub struct Ready {
    pub session_id: String,
    pub resume_gateway_url: Option<String>,
    pub user: User,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    #[serde(default)]
    pub name: Option<String>,
    pub owner_id: Option<Snowflake>,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub members: Vec<Member>,
}

impl Guild {
    /// The full snapshot a `GUILD_CREATE` carries. `None` for an unavailable
    /// guild, which has no name or contents.
    pub fn into_snapshot(self) -> Option<GuildSnapshot> {
        let guild_id = self.id;
        let name = self.name.filter(|_| !self.unavailable)?;
        Some(GuildSnapshot {
            guild_id,
            guild: GuildData {
                name,
                owner_id: self.owner_id,
            },
            // Channels and members embedded in a guild omit their guild_id.
            channels: self
                .channels
                .into_iter()
                .map(|c| {
                    let id = c.id;
                    let mut data = c.into_data();
                    data.guild_id = Some(guild_id);
                    (id, data)
                })
                .collect(),
            roles: self
                .roles
                .into_iter()
                .map(|r| (r.id, r.into_data(guild_id)))
                .collect(),
            members: self
                .members
                .into_iter()
                .filter_map(|m| m.into_data(guild_id))
                .collect(),
        })
    }
}

/// Body of `GUILD_UPDATE` and `GET /guilds/{id}`.
#[derive(Debug, Deserialize)]
pub struct GuildInfo {
    pub id: Snowflake,
    pub name: String,
    pub owner_id: Option<Snowflake>,
}

impl GuildInfo {
    pub fn into_data(self) -> GuildData {
        GuildData {
            name: self.name,
            owner_id: self.owner_id,
        }
    }
}

/// Body of `GUILD_DELETE`.
#[derive(Debug, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Deserialize)]
pub struct Channel {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: u8,
    pub guild_id: Option<Snowflake>,
    pub name: Option<String>,
}

impl Channel {
    pub fn into_data(self) -> ChannelData {
        ChannelData {
            guild_id: self.guild_id,
            name: self.name,
            channel_type: self.kind,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Role {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default, deserialize_with = "permissions")]
    pub permissions: u64,
}

impl Role {
    pub fn into_data(self, guild_id: Snowflake) -> RoleData {
        RoleData {
            guild_id,
            name: self.name,
            position: self.position,
            permissions: self.permissions,
        }
    }
}

/// Body of `GUILD_ROLE_CREATE` and `GUILD_ROLE_UPDATE`.
#[derive(Debug, Deserialize)]
pub struct RoleEvent {
    pub guild_id: Snowflake,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct RoleDelete {
    pub guild_id: Snowflake,
    pub role_id: Snowflake,
}

/// Guild member. `GUILD_MEMBER_*` events add `guild_id`; members embedded in
/// a guild or fetched by REST do not carry it.
#[derive(Debug, Deserialize)]
pub struct Member {
    pub guild_id: Option<Snowflake>,
    pub user: Option<User>,
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

impl Member {
    pub fn into_data(self, guild_id: Snowflake) -> Option<MemberData> {
        let user = self.user?;
        Some(MemberData {
            guild_id: self.guild_id.unwrap_or(guild_id),
            user_id: user.id,
            username: user.username,
            nick: self.nick,
            roles: self.roles,
            bot: user.bot,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct MemberRemove {
    pub guild_id: Snowflake,
    pub user: User,
}

/// Message as created, or as updated. Updates triggered by embed unfurls
/// arrive without `author` and `content`.
#[derive(Debug, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub author: Option<User>,
    pub content: Option<String>,
}

impl Message {
    pub fn into_data(self) -> Option<(Snowflake, MessageData)> {
        let author = self.author?;
        let content = self.content?;
        Some((
            self.id,
            MessageData {
                channel_id: self.channel_id,
                guild_id: self.guild_id,
                author_id: author.id,
                author_bot: author.bot,
                content,
            },
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageDelete {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
}

/// `GET /gateway/bot`.
#[derive(Debug, Deserialize)]
pub struct GatewayBot {
    pub url: String,
}

/// Permission bitsets are sent as decimal strings.
fn permissions<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(de::Error::custom),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn guild_snapshot_fills_in_guild_ids() {
        let guild: Guild = serde_json::from_value(json!({
            "id": "1",
            "name": "home",
            "owner_id": "9",
            "channels": [{ "id": "2", "type": 0, "name": "general" }],
            "roles": [{ "id": "3", "name": "mod", "position": 2, "permissions": "8" }],
            "members": [
                { "user": { "id": "9", "username": "owner" }, "roles": ["3"] },
                { "nick": "no user object" }
            ]
        }))
        .unwrap();

        let snapshot = guild.into_snapshot().unwrap();
        assert_eq!(snapshot.guild.name, "home");
        assert_eq!(snapshot.channels[0].1.guild_id, Some(Snowflake(1)));
        assert_eq!(snapshot.roles[0].1.permissions, 8);
        assert_eq!(snapshot.members.len(), 1);
        assert_eq!(snapshot.members[0].guild_id, Snowflake(1));
        assert_eq!(snapshot.members[0].roles, vec![Snowflake(3)]);
    }

    #[test]
    fn unavailable_guild_has_no_snapshot() {
        let guild: Guild =
            serde_json::from_value(json!({ "id": "1", "unavailable": true })).unwrap();
        assert!(guild.into_snapshot().is_none());
    }

    #[test]
    fn partial_message_update_has_no_data() {
        let message: Message = serde_json::from_value(json!({
            "id": "5",
            "channel_id": "6",
            "embeds": []
        }))
        .unwrap();
        assert!(message.into_data().is_none());
    }

    #[test]
    fn numeric_permissions_are_accepted() {
        let role: Role =
            serde_json::from_value(json!({ "id": "3", "name": "r", "permissions": 16 })).unwrap();
        assert_eq!(role.permissions, 16);
    }
}
