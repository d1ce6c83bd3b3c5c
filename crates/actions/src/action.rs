use std::fmt;

use {
    dbhq_common::{EntityKey, Method, RestRequest, RouteKey, Snowflake, event::Emoji},
    serde_json::json,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    SendMessage {
        channel_id: Snowflake,
        content: String,
        reply_to: Option<Snowflake>,
    },
    DeleteMessage {
        channel_id: Snowflake,
        message_id: Snowflake,
    },
    KickMember {
        guild_id: Snowflake,
        user_id: Snowflake,
    },
    BanMember {
        guild_id: Snowflake,
        user_id: Snowflake,
        delete_message_seconds: u32,
    },
    AddRole {
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    },
    RemoveRole {
        guild_id: Snowflake,
        user_id: Snowflake,
        role_id: Snowflake,
    },
    AddReaction {
        channel_id: Snowflake,
        message_id: Snowflake,
        emoji: Emoji,
    },
    /// Any other request. The caller picks the resource key to serialize on.
    Raw {
        request: RestRequest,
        resource: String,
        target: Option<EntityKey>,
    },
}

/// A pending outbound operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    /// Audit-log reason for moderation actions.
    pub reason: Option<String>,
}

impl From<ActionKind> for Action {
    fn from(kind: ActionKind) -> Self {
        Self { kind, reason: None }
    }
}

impl Action {
    #[must_use]
    pub fn send_message(channel_id: impl Into<Snowflake>, content: impl Into<String>) -> Self {
        ActionKind::SendMessage {
            channel_id: channel_id.into(),
            content: content.into(),
            reply_to: None,
        }
        .into()
    }

    #[must_use]
    pub fn reply(
        channel_id: impl Into<Snowflake>,
        message_id: impl Into<Snowflake>,
        content: impl Into<String>,
    ) -> Self {
        ActionKind::SendMessage {
            channel_id: channel_id.into(),
            content: content.into(),
            reply_to: Some(message_id.into()),
        }
        .into()
    }

    #[must_use]
    pub fn delete_message(channel_id: impl Into<Snowflake>, message_id: impl Into<Snowflake>) -> Self {
        ActionKind::DeleteMessage {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        }
        .into()
    }

    #[must_use]
    pub fn kick(guild_id: impl Into<Snowflake>, user_id: impl Into<Snowflake>) -> Self {
        ActionKind::KickMember {
            guild_id: guild_id.into(),
            user_id: user_id.into(),
        }
        .into()
    }

    #[must_use]
    pub fn ban(guild_id: impl Into<Snowflake>, user_id: impl Into<Snowflake>) -> Self {
        ActionKind::BanMember {
            guild_id: guild_id.into(),
            user_id: user_id.into(),
            delete_message_seconds: 0,
        }
        .into()
    }

    #[must_use]
    pub fn add_role(
        guild_id: impl Into<Snowflake>,
        user_id: impl Into<Snowflake>,
        role_id: impl Into<Snowflake>,
    ) -> Self {
        ActionKind::AddRole {
            guild_id: guild_id.into(),
            user_id: user_id.into(),
            role_id: role_id.into(),
        }
        .into()
    }

    #[must_use]
    pub fn remove_role(
        guild_id: impl Into<Snowflake>,
        user_id: impl Into<Snowflake>,
        role_id: impl Into<Snowflake>,
    ) -> Self {
        ActionKind::RemoveRole {
            guild_id: guild_id.into(),
            user_id: user_id.into(),
            role_id: role_id.into(),
        }
        .into()
    }

    #[must_use]
    pub fn add_reaction(
        channel_id: impl Into<Snowflake>,
        message_id: impl Into<Snowflake>,
        emoji: Emoji,
    ) -> Self {
        ActionKind::AddReaction {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
            emoji,
        }
        .into()
    }

    #[must_use]
    pub fn raw(request: RestRequest, resource: impl Into<String>) -> Self {
        ActionKind::Raw {
            request,
            resource: resource.into(),
            target: None,
        }
        .into()
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Short name used in logs and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match &self.kind {
            ActionKind::SendMessage { .. } => "send_message",
            ActionKind::DeleteMessage { .. } => "delete_message",
            ActionKind::KickMember { .. } => "kick_member",
            ActionKind::BanMember { .. } => "ban_member",
            ActionKind::AddRole { .. } => "add_role",
            ActionKind::RemoveRole { .. } => "remove_role",
            ActionKind::AddReaction { .. } => "add_reaction",
            ActionKind::Raw { .. } => "raw",
        }
    }

    /// Key the queue serializes on.
    ///
    /// Message operations share their channel's lane so a delete and a
    /// following send in the same channel cannot overtake each other. Member
    /// operations serialize per guild member.
    #[must_use]
    pub fn resource(&self) -> String {
        match &self.kind {
            ActionKind::SendMessage { channel_id, .. }
            | ActionKind::DeleteMessage { channel_id, .. }
            | ActionKind::AddReaction { channel_id, .. } => format!("channel:{channel_id}"),
            ActionKind::KickMember { guild_id, user_id, .. }
            | ActionKind::BanMember { guild_id, user_id, .. }
            | ActionKind::AddRole { guild_id, user_id, .. }
            | ActionKind::RemoveRole { guild_id, user_id, .. } => {
                format!("guild:{guild_id}/member:{user_id}")
            },
            ActionKind::Raw { resource, .. } => resource.clone(),
        }
    }

    /// Cached entity the action refers to. Pinned while the action is pending.
    #[must_use]
    pub fn target(&self) -> Option<EntityKey> {
        match &self.kind {
            ActionKind::SendMessage { channel_id, .. } => Some(EntityKey::channel(*channel_id)),
            ActionKind::DeleteMessage { message_id, .. }
            | ActionKind::AddReaction { message_id, .. } => Some(EntityKey::message(*message_id)),
            ActionKind::KickMember { guild_id, user_id }
            | ActionKind::BanMember { guild_id, user_id, .. }
            | ActionKind::AddRole { guild_id, user_id, .. }
            | ActionKind::RemoveRole { guild_id, user_id, .. } => {
                Some(EntityKey::member(*guild_id, *user_id))
            },
            ActionKind::Raw { target, .. } => *target,
        }
    }

    /// The REST call that performs this action.
    #[must_use]
    pub fn request(&self) -> RestRequest {
        let request = match &self.kind {
            ActionKind::SendMessage {
                channel_id,
                content,
                reply_to,
            } => {
                let mut body = json!({ "content": content });
                if let Some(message_id) = reply_to {
                    body["message_reference"] = json!({ "message_id": message_id });
                }
                let path = format!("/channels/{channel_id}/messages");
                RestRequest::new(Method::Post, &path, RouteKey::new(Method::Post, &path))
                    .with_body(body)
            },
            ActionKind::DeleteMessage {
                channel_id,
                message_id,
            } => RestRequest::new(
                Method::Delete,
                format!("/channels/{channel_id}/messages/{message_id}"),
                RouteKey::new(
                    Method::Delete,
                    format!("/channels/{channel_id}/messages/{{message_id}}"),
                ),
            ),
            ActionKind::KickMember { guild_id, user_id } => RestRequest::new(
                Method::Delete,
                format!("/guilds/{guild_id}/members/{user_id}"),
                RouteKey::new(Method::Delete, format!("/guilds/{guild_id}/members/{{user_id}}")),
            ),
            ActionKind::BanMember {
                guild_id,
                user_id,
                delete_message_seconds,
            } => RestRequest::new(
                Method::Put,
                format!("/guilds/{guild_id}/bans/{user_id}"),
                RouteKey::new(Method::Put, format!("/guilds/{guild_id}/bans/{{user_id}}")),
            )
            .with_body(json!({ "delete_message_seconds": delete_message_seconds })),
            ActionKind::AddRole {
                guild_id,
                user_id,
                role_id,
            } => member_role(Method::Put, *guild_id, *user_id, *role_id),
            ActionKind::RemoveRole {
                guild_id,
                user_id,
                role_id,
            } => member_role(Method::Delete, *guild_id, *user_id, *role_id),
            ActionKind::AddReaction {
                channel_id,
                message_id,
                emoji,
            } => RestRequest::new(
                Method::Put,
                format!("/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me"),
                RouteKey::new(
                    Method::Put,
                    format!("/channels/{channel_id}/messages/{{message_id}}/reactions/{{emoji}}/@me"),
                ),
            ),
            ActionKind::Raw { request, .. } => request.clone(),
        };
        match &self.reason {
            Some(reason) => request.with_reason(Some(reason.clone())),
            None => request,
        }
    }
}

fn member_role(method: Method, guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake) -> RestRequest {
    RestRequest::new(
        method,
        format!("/guilds/{guild_id}/members/{user_id}/roles/{role_id}"),
        RouteKey::new(
            method,
            format!("/guilds/{guild_id}/members/{{user_id}}/roles/{{role_id}}"),
        ),
    )
}
