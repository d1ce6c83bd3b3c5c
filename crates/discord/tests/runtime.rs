#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    dbhq_common::{
        EntityData, EntityKey, Error, ErrorKind, EventKind, EventPayload, Method, RestResponse, Snowflake,
        Version,
        entity::{Entity, MessageData, RoleData},
        testing::{RecordingSink, ScriptedRest},
    },
    dbhq_config::DbhqConfig,
    dbhq_discord::BotRuntime,
    dbhq_dispatch::{EventMatcher, FnHandler, HandlerContext, HandlerRegistry},
    dbhq_gateway::{
        SessionState,
        testing::{ConnectionScript, ScriptedTransport},
    },
    serde_json::json,
    tokio_util::sync::CancellationToken,
};

struct Harness {
    rest: Arc<ScriptedRest>,
    transport: Arc<ScriptedTransport>,
    runtime: Arc<BotRuntime>,
}

fn harness(registry: HandlerRegistry) -> Harness {
    harness_with(DbhqConfig::default(), registry)
}

fn harness_with(config: DbhqConfig, registry: HandlerRegistry) -> Harness {
    let rest = Arc::new(ScriptedRest::new());
    let transport = Arc::new(ScriptedTransport::new());
    let runtime = Arc::new(BotRuntime::with_parts(
        config,
        Arc::new(registry),
        Arc::new(RecordingSink::new()),
        rest.clone(),
        transport.clone(),
    ));
    Harness {
        rest,
        transport,
        runtime,
    }
}

fn message(content: &str) -> EventPayload {
    EventPayload::MessageCreated {
        message_id: Snowflake(100),
        message: MessageData {
            channel_id: Snowflake(7),
            guild_id: Some(Snowflake(1)),
            author_id: Snowflake(55),
            author_bot: false,
            content: content.into(),
        },
    }
}

#[tokio::test(start_paused = true)]
async fn command_round_trip() {
    let registry = HandlerRegistry::new();
    registry.register_command(
        "ping",
        "Replies with pong",
        Arc::new(FnHandler::new("ping", |ctx: HandlerContext| async move {
            let _ = ctx.reply("pong");
            Ok::<(), anyhow::Error>(())
        })),
    );
    let h = harness(registry);
    h.transport.push(
        ConnectionScript::new()
            .hello(Duration::from_secs(45))
            .auto_ack()
            .ready("s1")
            .dispatch(1, message("!ping")),
    );

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let runtime = Arc::clone(&h.runtime);
        let cancel = cancel.clone();
        async move { runtime.run(cancel).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    cancel.cancel();
    task.await.unwrap().unwrap();

    let replies: Vec<_> = h
        .rest
        .calls()
        .into_iter()
        .filter(|c| c.request.method == Method::Post && c.request.path == "/channels/7/messages")
        .collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].request.body.as_ref().unwrap()["content"], "pong");
    assert!(h.runtime.cache().get(&EntityKey::message(100u64)).is_some());
    assert_eq!(h.runtime.session().state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn buffered_events_are_handled_before_stopping() {
    let handled = Arc::new(AtomicUsize::new(0));
    let registry = HandlerRegistry::new();
    registry.register(
        EventKind::MessageCreated,
        EventMatcher::Any,
        Arc::new(FnHandler::new("slow-echo", {
            let handled = Arc::clone(&handled);
            move |ctx: HandlerContext| {
                let handled = Arc::clone(&handled);
                async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    handled.fetch_add(1, Ordering::SeqCst);
                    let _ = ctx.reply("seen");
                    Ok::<(), anyhow::Error>(())
                }
            }
        })),
    );
    // One worker, so later events wait in the channel behind the first.
    let mut config = DbhqConfig::default();
    config.core.handler_worker_pool_size = 1;
    let h = harness_with(config, registry);

    let mut script = ConnectionScript::new()
        .hello(Duration::from_secs(45))
        .auto_ack()
        .ready("s1");
    for seq in 1..=4u64 {
        script = script.dispatch(seq, EventPayload::MessageCreated {
            message_id: Snowflake(100 + seq),
            message: MessageData {
                channel_id: Snowflake(7),
                guild_id: Some(Snowflake(1)),
                author_id: Snowflake(55),
                author_bot: false,
                content: format!("hello {seq}"),
            },
        });
    }
    h.transport.push(script);

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let runtime = Arc::clone(&h.runtime);
        let cancel = cancel.clone();
        async move { runtime.run(cancel).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handled.load(Ordering::SeqCst), 0);
    cancel.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(handled.load(Ordering::SeqCst), 4);
    let replies = h
        .rest
        .calls()
        .into_iter()
        .filter(|c| c.request.method == Method::Post && c.request.path == "/channels/7/messages")
        .count();
    assert_eq!(replies, 4);
}

#[tokio::test(start_paused = true)]
async fn rejected_token_fails_the_run() {
    let h = harness(HandlerRegistry::new());
    h.transport.push_error(Error::auth("authentication failed"));

    let err = h.runtime.run(CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailure);
    assert_eq!(h.runtime.session().state(), SessionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn verify_reports_the_bot_account() {
    let h = harness(HandlerRegistry::new());
    h.rest.respond(
        Method::Get,
        "/users/@me",
        RestResponse::new(200).with_body(json!({ "id": "42", "username": "dbhq", "bot": true })),
    );

    let identity = h.runtime.verify().await.unwrap();
    assert_eq!(identity.id, Snowflake(42));
    assert_eq!(identity.username, "dbhq");
    assert_eq!(
        identity.invite_url(),
        "https://discord.com/oauth2/authorize?client_id=42&scope=bot"
    );
}

#[tokio::test(start_paused = true)]
async fn verify_rejects_a_bad_token() {
    let h = harness(HandlerRegistry::new());
    h.rest.respond(
        Method::Get,
        "/users/@me",
        RestResponse::new(401).with_body(json!({ "message": "401: Unauthorized" })),
    );

    let err = h.runtime.verify().await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn reconcile_drops_a_message_deleted_remotely() {
    let h = harness(HandlerRegistry::new());
    let cache = h.runtime.cache();
    let outcome = cache.upsert(Entity::message(
        Snowflake(100),
        Version::new(1, 1),
        MessageData {
            channel_id: Snowflake(7),
            guild_id: Some(Snowflake(1)),
            author_id: Snowflake(55),
            author_bot: false,
            content: "old".into(),
        },
    ));
    assert!(outcome.applied());
    h.rest.respond(
        Method::Get,
        "/channels/7/messages/100",
        RestResponse::new(404).with_body(json!({ "message": "Unknown Message" })),
    );

    assert!(cache.reconcile(&EntityKey::message(100u64)).await.unwrap().is_none());
    assert!(cache.is_tombstoned(&EntityKey::message(100u64)));
}

#[tokio::test(start_paused = true)]
async fn member_is_fetched_through_on_a_miss() {
    let h = harness(HandlerRegistry::new());
    h.rest.respond(
        Method::Get,
        "/guilds/1/members/5",
        RestResponse::new(200).with_body(json!({
            "user": { "id": "5", "username": "five" },
            "nick": "V",
            "roles": ["3"]
        })),
    );

    let entity = h
        .runtime
        .cache()
        .fetch_through(&EntityKey::member(1u64, 5u64))
        .await
        .unwrap()
        .unwrap();
    let EntityData::Member(member) = &entity.data else {
        panic!("expected member, got {:?}", entity.data);
    };
    assert_eq!(member.nick.as_deref(), Some("V"));
    assert_eq!(member.roles, vec![Snowflake(3)]);
}

#[tokio::test(start_paused = true)]
async fn role_is_found_in_its_guild_listing() {
    let h = harness(HandlerRegistry::new());
    let cache = h.runtime.cache();
    let outcome = cache.upsert(Entity::role(
        Snowflake(3),
        Version::new(1, 1),
        RoleData {
            guild_id: Snowflake(1),
            name: "old".into(),
            position: 1,
            permissions: 0,
        },
    ));
    assert!(outcome.applied());
    h.rest.respond(
        Method::Get,
        "/guilds/1/roles",
        RestResponse::new(200).with_body(json!([
            { "id": "2", "name": "everyone", "position": 0, "permissions": "0" },
            { "id": "3", "name": "mods", "position": 4, "permissions": "8" }
        ])),
    );

    let entity = cache.reconcile(&EntityKey::role(3u64)).await.unwrap().unwrap();
    let EntityData::Role(role) = &entity.data else {
        panic!("expected role");
    };
    assert_eq!(role.name, "mods");
    assert_eq!(role.permissions, 8);
}
