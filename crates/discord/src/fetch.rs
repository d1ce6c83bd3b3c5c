use std::sync::{OnceLock, Weak};

use {
    async_trait::async_trait,
    dbhq_cache::{EntityFetcher, StateCache},
    dbhq_common::{
        EntityData, EntityKey, EntityKind, Error, ErrorKind, Method, RestRequest, Result,
        RouteKey, Snowflake,
    },
    dbhq_ratelimit::LimitedRest,
    serde::de::DeserializeOwned,
    tracing::debug,
};

use crate::wire;

/// Reads entities back from the REST API for cache reconciliation and
/// resynchronization.
///
/// Messages are addressed by channel and roles are only listed per guild, so
/// those two kinds are located through the entry the cache already holds.
/// Call [`attach`](Self::attach) once the cache exists.
pub struct DiscordFetcher {
    rest: LimitedRest,
    cache: OnceLock<Weak<StateCache>>,
}

impl DiscordFetcher {
    #[must_use]
    pub fn new(rest: LimitedRest) -> Self {
        Self {
            rest,
            cache: OnceLock::new(),
        }
    }

    pub fn attach(&self, cache: Weak<StateCache>) {
        if self.cache.set(cache).is_err() {
            debug!("entity fetcher already attached to a cache");
        }
    }

    fn cached(&self, key: &EntityKey) -> Option<EntityData> {
        let cache = self.cache.get()?.upgrade()?;
        cache.get(key).map(|entity| entity.data.clone())
    }

    /// `Ok(None)` on 404.
    async fn get<T: DeserializeOwned>(&self, path: String, route: String) -> Result<Option<T>> {
        let request = RestRequest::new(Method::Get, path, RouteKey::new(Method::Get, route));
        match self.rest.send(&request).await {
            Ok(response) => serde_json::from_value(response.body)
                .map(Some)
                .map_err(Error::malformed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_guild(&self, id: Snowflake) -> Result<Option<EntityData>> {
        let guild: Option<wire::GuildInfo> = self
            .get(format!("/guilds/{id}"), format!("/guilds/{id}"))
            .await?;
        Ok(guild.map(|g| EntityData::Guild(g.into_data())))
    }

    async fn fetch_channel(&self, id: Snowflake) -> Result<Option<EntityData>> {
        let channel: Option<wire::Channel> = self
            .get(format!("/channels/{id}"), format!("/channels/{id}"))
            .await?;
        Ok(channel.map(|c| EntityData::Channel(c.into_data())))
    }

    async fn fetch_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<Option<EntityData>> {
        let member: Option<wire::Member> = self
            .get(
                format!("/guilds/{guild_id}/members/{user_id}"),
                format!("/guilds/{guild_id}/members/{{user_id}}"),
            )
            .await?;
        member
            .map(|m| {
                m.into_data(guild_id)
                    .map(EntityData::Member)
                    .ok_or_else(|| Error::malformed("member without user"))
            })
            .transpose()
    }

    async fn fetch_message(&self, key: &EntityKey) -> Result<Option<EntityData>> {
        let Some(EntityData::Message(cached)) = self.cached(key) else {
            return Err(Error::message(format!("no channel known for message {}", key.id)));
        };
        let channel_id = cached.channel_id;
        let message: Option<wire::Message> = self
            .get(
                format!("/channels/{channel_id}/messages/{}", key.id),
                format!("/channels/{channel_id}/messages/{{message_id}}"),
            )
            .await?;
        match message {
            None => Ok(None),
            Some(m) => m
                .into_data()
                .map(|(_, mut data)| {
                    // REST message objects omit guild_id.
                    data.guild_id = data.guild_id.or(cached.guild_id);
                    Some(EntityData::Message(data))
                })
                .ok_or_else(|| Error::malformed("message without author or content")),
        }
    }

    async fn fetch_role(&self, key: &EntityKey) -> Result<Option<EntityData>> {
        let Some(EntityData::Role(cached)) = self.cached(key) else {
            return Err(Error::message(format!("no guild known for role {}", key.id)));
        };
        let guild_id = cached.guild_id;
        let roles: Option<Vec<wire::Role>> = self
            .get(
                format!("/guilds/{guild_id}/roles"),
                format!("/guilds/{guild_id}/roles"),
            )
            .await?;
        Ok(roles.and_then(|roles| {
            roles
                .into_iter()
                .find(|r| r.id == key.id)
                .map(|r| EntityData::Role(r.into_data(guild_id)))
        }))
    }
}

#[async_trait]
impl EntityFetcher for DiscordFetcher {
    async fn fetch(&self, key: &EntityKey) -> Result<Option<EntityData>> {
        debug!(%key, "fetching entity");
        match (key.kind, key.scope) {
            (EntityKind::Guild, _) => self.fetch_guild(key.id).await,
            (EntityKind::Channel, _) => self.fetch_channel(key.id).await,
            (EntityKind::Member, Some(guild_id)) => self.fetch_member(guild_id, key.id).await,
            (EntityKind::Member, None) => Err(Error::message("member key without guild scope")),
            (EntityKind::Message, _) => self.fetch_message(key).await,
            (EntityKind::Role, _) => self.fetch_role(key).await,
        }
    }
}
