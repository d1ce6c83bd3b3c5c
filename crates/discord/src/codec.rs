//! Translation between Discord gateway JSON and [`Frame`] / [`Command`].

use std::time::Duration;

use {
    dbhq_common::{Error, EventPayload, Result, event::Reaction},
    dbhq_gateway::{Command, Frame},
    secrecy::{ExposeSecret, Secret},
    serde::de::DeserializeOwned,
    serde_json::{Value, json},
    tracing::debug,
};

use crate::wire;

/// Gateway opcodes.
pub mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Credentials sent with `IDENTIFY` and `RESUME`.
#[derive(Clone)]
pub struct Identity {
    token: Secret<String>,
    intents: u64,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("token", &"[REDACTED]")
            .field("intents", &self.intents)
            .finish()
    }
}

impl Identity {
    #[must_use]
    pub fn new(token: impl Into<String>, intents: u64) -> Self {
        Self {
            token: Secret::new(token.into()),
            intents,
        }
    }
}

/// Decode one text frame. `Ok(None)` for opcodes the session does not act on.
pub fn decode(text: &str) -> Result<Option<Frame>> {
    let payload: wire::GatewayPayload = serde_json::from_str(text).map_err(Error::malformed)?;
    let frame = match payload.op {
        op::HELLO => {
            let hello: wire::Hello = parse(payload.d)?;
            Frame::Hello {
                heartbeat_interval: Duration::from_millis(hello.heartbeat_interval),
            }
        },
        op::HEARTBEAT_ACK => Frame::HeartbeatAck,
        op::HEARTBEAT => Frame::HeartbeatRequest,
        op::RECONNECT => Frame::Reconnect,
        op::INVALID_SESSION => Frame::InvalidSession {
            resumable: payload.d.as_bool().unwrap_or(false),
        },
        op::DISPATCH => {
            let name = payload
                .t
                .ok_or_else(|| Error::malformed("dispatch without event name"))?;
            match name.as_str() {
                "READY" => {
                    let ready: wire::Ready = parse(payload.d)?;
                    debug!(
                        user = %ready.user.username,
                        session_id = %ready.session_id,
                        "gateway ready"
                    );
                    Frame::Ready {
                        session_id: ready.session_id,
                        resume_url: ready.resume_gateway_url,
                    }
                },
                "RESUMED" => Frame::Resumed,
                _ => {
                    let sequence = payload
                        .s
                        .ok_or_else(|| Error::malformed(format!("{name} without sequence")))?;
                    Frame::Dispatch {
                        sequence,
                        payload: decode_event(&name, payload.d),
                    }
                },
            }
        },
        other => {
            debug!(op = other, "ignoring gateway opcode");
            return Ok(None);
        },
    };
    Ok(Some(frame))
}

/// Map a dispatch body onto an [`EventPayload`]. Bodies that fail to decode
/// become [`EventPayload::Malformed`]; names not modeled here become
/// [`EventPayload::Unknown`].
#[must_use]
pub fn decode_event(name: &str, data: Value) -> EventPayload {
    match try_decode_event(name, data) {
        Ok(payload) => payload,
        Err(e) => EventPayload::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        },
    }
}

fn try_decode_event(name: &str, data: Value) -> serde_json::Result<EventPayload> {
    let unknown = || EventPayload::Unknown {
        name: name.to_string(),
    };
    let payload = match name {
        "GUILD_CREATE" => from_value::<wire::Guild>(data)?
            .into_snapshot()
            .map_or_else(unknown, EventPayload::GuildCreate),
        "GUILD_UPDATE" => {
            let guild: wire::GuildInfo = from_value(data)?;
            EventPayload::GuildUpdate {
                guild_id: guild.id,
                guild: guild.into_data(),
            }
        },
        "GUILD_DELETE" => {
            let guild: wire::UnavailableGuild = from_value(data)?;
            EventPayload::GuildDelete {
                guild_id: guild.id,
                unavailable: guild.unavailable,
            }
        },
        "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
            let channel: wire::Channel = from_value(data)?;
            let channel_id = channel.id;
            let channel = channel.into_data();
            if name == "CHANNEL_CREATE" {
                EventPayload::ChannelCreate {
                    channel_id,
                    channel,
                }
            } else {
                EventPayload::ChannelUpdate {
                    channel_id,
                    channel,
                }
            }
        },
        "CHANNEL_DELETE" => EventPayload::ChannelDelete {
            channel_id: from_value::<wire::Channel>(data)?.id,
        },
        "GUILD_ROLE_CREATE" | "GUILD_ROLE_UPDATE" => {
            let event: wire::RoleEvent = from_value(data)?;
            let role_id = event.role.id;
            let role = event.role.into_data(event.guild_id);
            if name == "GUILD_ROLE_CREATE" {
                EventPayload::RoleCreate { role_id, role }
            } else {
                EventPayload::RoleUpdate { role_id, role }
            }
        },
        "GUILD_ROLE_DELETE" => {
            let event: wire::RoleDelete = from_value(data)?;
            EventPayload::RoleDelete {
                guild_id: event.guild_id,
                role_id: event.role_id,
            }
        },
        "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => {
            let member: wire::Member = from_value(data)?;
            let Some(guild_id) = member.guild_id else {
                return Err(de_error("member event without guild_id"));
            };
            let Some(member) = member.into_data(guild_id) else {
                return Err(de_error("member event without user"));
            };
            if name == "GUILD_MEMBER_ADD" {
                EventPayload::MemberJoined(member)
            } else {
                EventPayload::MemberUpdated(member)
            }
        },
        "GUILD_MEMBER_REMOVE" => {
            let event: wire::MemberRemove = from_value(data)?;
            EventPayload::MemberLeft {
                guild_id: event.guild_id,
                user_id: event.user.id,
            }
        },
        "MESSAGE_CREATE" => {
            let Some((message_id, message)) = from_value::<wire::Message>(data)?.into_data()
            else {
                return Err(de_error("message without author or content"));
            };
            EventPayload::MessageCreated {
                message_id,
                message,
            }
        },
        "MESSAGE_UPDATE" => from_value::<wire::Message>(data)?
            .into_data()
            .map_or_else(unknown, |(message_id, message)| {
                EventPayload::MessageUpdated {
                    message_id,
                    message,
                }
            }),
        "MESSAGE_DELETE" => {
            let event: wire::MessageDelete = from_value(data)?;
            EventPayload::MessageDeleted {
                channel_id: event.channel_id,
                message_id: event.id,
                guild_id: event.guild_id,
            }
        },
        "MESSAGE_REACTION_ADD" => EventPayload::ReactionAdded(from_value::<Reaction>(data)?),
        "MESSAGE_REACTION_REMOVE" => EventPayload::ReactionRemoved(from_value::<Reaction>(data)?),
        _ => unknown(),
    };
    Ok(payload)
}

/// Encode a session command as a text frame.
#[must_use]
pub fn encode(command: &Command, identity: &Identity) -> String {
    let token = identity.token.expose_secret();
    let payload = match command {
        Command::Identify => json!({
            "op": op::IDENTIFY,
            "d": {
                "token": token,
                "intents": identity.intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "dbhq",
                    "device": "dbhq",
                },
            },
        }),
        Command::Resume {
            session_id,
            sequence,
        } => json!({
            "op": op::RESUME,
            "d": { "token": token, "session_id": session_id, "seq": sequence },
        }),
        Command::Heartbeat { sequence } => json!({ "op": op::HEARTBEAT, "d": sequence }),
    };
    payload.to_string()
}

/// What a close frame means for the session.
///
/// Authentication and configuration rejections are fatal. An invalid
/// sequence or a timed-out session can only be recovered with a fresh
/// identify. Anything else is resumable.
pub fn close_to_frame(code: u16, reason: &str) -> Result<Option<Frame>> {
    match code {
        4004 => Err(Error::auth(format!("gateway rejected token: {reason}"))),
        4010..=4014 => Err(Error::auth(format!(
            "gateway refused session ({code}): {reason}"
        ))),
        4007 | 4009 => Ok(Some(Frame::InvalidSession { resumable: false })),
        _ => Ok(None),
    }
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(Error::malformed)
}

fn from_value<T: DeserializeOwned>(data: Value) -> serde_json::Result<T> {
    serde_json::from_value(data)
}

fn de_error(message: &str) -> serde_json::Error {
    serde::de::Error::custom(message)
}
