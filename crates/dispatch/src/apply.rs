use {
    dbhq_cache::StateCache,
    dbhq_common::{Entity, EntityKey, Envelope, EventPayload},
};

/// Apply an event's entity changes to the cache, last-writer-wins by the
/// envelope's version. Returns how many entries changed.
pub fn apply_to_cache(cache: &StateCache, envelope: &Envelope) -> usize {
    let v = envelope.version();
    let upsert = |entity: Entity| usize::from(cache.upsert(entity).applied());
    let remove = |key: EntityKey| usize::from(cache.remove(&key, v));

    match &envelope.payload {
        EventPayload::GuildCreate(snapshot) => {
            let mut changed = upsert(Entity::guild(snapshot.guild_id, v, snapshot.guild.clone()));
            for (id, channel) in &snapshot.channels {
                changed += upsert(Entity::channel(*id, v, channel.clone()));
            }
            for (id, role) in &snapshot.roles {
                changed += upsert(Entity::role(*id, v, role.clone()));
            }
            for member in &snapshot.members {
                changed += upsert(Entity::member(v, member.clone()));
            }
            changed
        },
        EventPayload::GuildUpdate { guild_id, guild } => {
            upsert(Entity::guild(*guild_id, v, guild.clone()))
        },
        // An outage, not a removal.
        EventPayload::GuildDelete {
            unavailable: true, ..
        } => 0,
        EventPayload::GuildDelete { guild_id, .. } => {
            let children = cache.guild_children(*guild_id);
            remove(EntityKey::guild(*guild_id)) + children.into_iter().map(remove).sum::<usize>()
        },
        EventPayload::ChannelCreate {
            channel_id,
            channel,
        }
        | EventPayload::ChannelUpdate {
            channel_id,
            channel,
        } => upsert(Entity::channel(*channel_id, v, channel.clone())),
        EventPayload::ChannelDelete { channel_id } => {
            let messages = cache.channel_messages(*channel_id);
            remove(EntityKey::channel(*channel_id)) + messages.into_iter().map(remove).sum::<usize>()
        },
        EventPayload::RoleCreate { role_id, role } | EventPayload::RoleUpdate { role_id, role } => {
            upsert(Entity::role(*role_id, v, role.clone()))
        },
        EventPayload::RoleDelete { role_id, .. } => remove(EntityKey::role(*role_id)),
        EventPayload::MemberJoined(member) | EventPayload::MemberUpdated(member) => {
            upsert(Entity::member(v, member.clone()))
        },
        EventPayload::MemberLeft { guild_id, user_id } => {
            remove(EntityKey::member(*guild_id, *user_id))
        },
        EventPayload::MessageCreated {
            message_id,
            message,
        }
        | EventPayload::MessageUpdated {
            message_id,
            message,
        } => upsert(Entity::message(*message_id, v, message.clone())),
        EventPayload::MessageDeleted { message_id, .. } => remove(EntityKey::message(*message_id)),
        EventPayload::ReactionAdded(_)
        | EventPayload::ReactionRemoved(_)
        | EventPayload::Unknown { .. }
        | EventPayload::Malformed { .. } => 0,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        dbhq_common::{
            EntityKind, Snowflake,
            entity::{ChannelData, GuildData, MemberData, MessageData},
            event::GuildSnapshot,
            testing::RecordingSink,
        },
        std::sync::Arc,
    };

    fn cache() -> StateCache {
        StateCache::new(None, Arc::new(RecordingSink::new()))
    }

    fn member(user: u64) -> MemberData {
        MemberData {
            guild_id: Snowflake(1),
            user_id: Snowflake(user),
            username: format!("u{user}"),
            nick: None,
            roles: Vec::new(),
            bot: false,
        }
    }

    fn guild_create(seq: u64) -> Envelope {
        Envelope::new(1, seq, EventPayload::GuildCreate(GuildSnapshot {
            guild_id: Snowflake(1),
            guild: GuildData {
                name: "dbhq".into(),
                owner_id: None,
            },
            channels: vec![(Snowflake(7), ChannelData {
                guild_id: Some(Snowflake(1)),
                name: Some("general".into()),
                channel_type: 0,
            })],
            roles: Vec::new(),
            members: vec![member(42), member(43)],
        }))
    }

    #[test]
    fn guild_create_populates_everything() {
        let cache = cache();
        assert_eq!(apply_to_cache(&cache, &guild_create(1)), 4);
        assert_eq!(cache.len(EntityKind::Member), 2);
        assert_eq!(cache.len(EntityKind::Channel), 1);
    }

    fn posted(seq: u64) -> Envelope {
        Envelope::new(1, seq, EventPayload::MessageCreated {
            message_id: Snowflake(100),
            message: MessageData {
                channel_id: Snowflake(7),
                guild_id: Some(Snowflake(1)),
                author_id: Snowflake(42),
                author_bot: false,
                content: "hello".into(),
            },
        })
    }

    #[test]
    fn guild_delete_removes_children() {
        let cache = cache();
        apply_to_cache(&cache, &guild_create(1));
        apply_to_cache(&cache, &posted(2));
        let delete = Envelope::new(1, 3, EventPayload::GuildDelete {
            guild_id: Snowflake(1),
            unavailable: false,
        });
        assert_eq!(apply_to_cache(&cache, &delete), 5);
        assert!(cache.is_empty());
        assert!(cache.is_tombstoned(&EntityKey::message(100u64)));
    }

    #[test]
    fn channel_delete_removes_its_messages() {
        let cache = cache();
        apply_to_cache(&cache, &guild_create(1));
        apply_to_cache(&cache, &posted(2));
        let delete = Envelope::new(1, 3, EventPayload::ChannelDelete {
            channel_id: Snowflake(7),
        });
        assert_eq!(apply_to_cache(&cache, &delete), 2);
        assert_eq!(cache.len(EntityKind::Message), 0);
        assert_eq!(cache.len(EntityKind::Member), 2);
    }

    #[test]
    fn unavailable_guild_is_kept() {
        let cache = cache();
        apply_to_cache(&cache, &guild_create(1));
        let outage = Envelope::new(1, 2, EventPayload::GuildDelete {
            guild_id: Snowflake(1),
            unavailable: true,
        });
        assert_eq!(apply_to_cache(&cache, &outage), 0);
        assert!(cache.get(&EntityKey::guild(1u64)).is_some());
    }

    #[test]
    fn member_left_out_of_order() {
        let cache = cache();
        let joined = Envelope::new(1, 5, EventPayload::MemberJoined(member(42)));
        let left = Envelope::new(1, 4, EventPayload::MemberLeft {
            guild_id: Snowflake(1),
            user_id: Snowflake(42),
        });
        assert_eq!(apply_to_cache(&cache, &joined), 1);
        assert_eq!(apply_to_cache(&cache, &left), 0);
        assert!(cache.get(&EntityKey::member(1u64, 42u64)).is_some());
    }
}
