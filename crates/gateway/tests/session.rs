#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use {
    dbhq_cache::{StateCache, testing::MemoryFetcher},
    dbhq_common::{
        CoreEvent, Entity, EntityData, EntityKey, Envelope, Error, ErrorKind, EventPayload,
        Result, Snowflake, Version,
        entity::MemberData,
        testing::RecordingSink,
    },
    dbhq_gateway::{
        Command, Frame, GatewaySession, SessionConfig, SessionState,
        testing::{ConnectionScript, ScriptedTransport},
    },
    dbhq_ratelimit::ExponentialBackoff,
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
};

const HEARTBEAT: Duration = Duration::from_secs(1);

fn member(user: u64) -> MemberData {
    MemberData {
        guild_id: Snowflake(1),
        user_id: Snowflake(user),
        username: format!("user{user}"),
        nick: None,
        roles: Vec::new(),
        bot: false,
    }
}

fn joined(user: u64) -> EventPayload {
    EventPayload::MemberJoined(member(user))
}

struct Harness {
    transport: Arc<ScriptedTransport>,
    session: Arc<GatewaySession>,
    sink: Arc<RecordingSink>,
    cancel: CancellationToken,
}

fn harness_with(cache: Option<Arc<StateCache>>, sink: Arc<RecordingSink>) -> Harness {
    let transport = Arc::new(ScriptedTransport::new());
    let config = SessionConfig {
        backoff: ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(5))
            .without_jitter(),
        ..SessionConfig::default()
    };
    let mut session = GatewaySession::new(transport.clone(), config, sink.clone());
    if let Some(cache) = cache {
        session = session.with_cache(cache);
    }
    Harness {
        transport,
        session: Arc::new(session),
        sink,
        cancel: CancellationToken::new(),
    }
}

fn harness() -> Harness {
    harness_with(None, Arc::new(RecordingSink::new()))
}

impl Harness {
    fn start(&self) -> (mpsc::Receiver<Envelope>, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(64);
        let session = Arc::clone(&self.session);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move { session.run(tx, cancel).await });
        (rx, task)
    }

    async fn stop(&self, task: JoinHandle<Result<()>>) {
        self.cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(self.session.state(), SessionState::Disconnected);
    }

    fn transitions(&self) -> Vec<(&'static str, &'static str)> {
        self.sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                CoreEvent::SessionStateChanged { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    fn reconnects(&self) -> Vec<(u32, Duration, bool)> {
        self.sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                CoreEvent::Reconnect {
                    attempt,
                    delay,
                    resume,
                } => Some((attempt, delay, resume)),
                _ => None,
            })
            .collect()
    }
}

async fn next(rx: &mut mpsc::Receiver<Envelope>) -> (u64, u64) {
    let envelope = rx.recv().await.expect("session stopped");
    envelope.idempotency_key()
}

#[tokio::test(start_paused = true)]
async fn fresh_session_identifies_and_stamps_epoch() {
    let h = harness();
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .ready("abc")
            .dispatch(1, joined(1))
            .dispatch(2, joined(2))
            .auto_ack(),
    );
    let (mut rx, task) = h.start();

    assert_eq!(next(&mut rx).await, (1, 1));
    assert_eq!(next(&mut rx).await, (1, 2));
    assert_eq!(h.session.state(), SessionState::Connected);
    assert_eq!(h.transport.handshake(0), [Command::Identify]);

    let point = h.session.resume_point().unwrap();
    assert_eq!(point.session_id, "abc");
    assert_eq!(point.sequence, 2);
    assert_eq!(point.resume_url.as_deref(), Some("wss://resume.test/abc"));

    h.stop(task).await;
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_resumes_from_last_sequence() {
    let h = harness();
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .ready("abc")
            .dispatch(1, joined(1))
            .dispatch(2, joined(2))
            .dispatch(3, joined(3))
            .then_close(),
    );
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .dispatch(4, joined(4))
            .resumed()
            .auto_ack(),
    );
    let (mut rx, task) = h.start();

    for seq in 1..=4 {
        assert_eq!(next(&mut rx).await, (1, seq));
    }
    assert_eq!(h.transport.handshake(1), [Command::Resume {
        session_id: "abc".into(),
        sequence: 3,
    }]);

    let attempts = h.transport.attempts();
    assert_eq!(attempts[0].resume_url, None);
    assert_eq!(attempts[1].resume_url.as_deref(), Some("wss://resume.test/abc"));
    assert!(attempts[1].at - attempts[0].at >= Duration::from_millis(100));
    assert_eq!(h.reconnects(), [(1, Duration::from_millis(100), true)]);
    assert_eq!(h.session.epoch(), 1);

    h.stop(task).await;
}

#[tokio::test(start_paused = true)]
async fn expired_session_starts_new_epoch_and_resyncs_cache() {
    let sink = Arc::new(RecordingSink::new());
    let fetcher = Arc::new(MemoryFetcher::new());
    let cache = Arc::new(StateCache::new(None, sink.clone()).with_fetcher(fetcher.clone()));
    let key = EntityKey::member(1u64, 7u64);
    assert!(cache.upsert(Entity::member(Version::new(1, 1), member(7))).applied());
    let mut renamed = member(7);
    renamed.nick = Some("seven".into());
    fetcher.set(key, EntityData::Member(renamed));
    let departed = EntityKey::member(1u64, 8u64);
    assert!(cache.remove(&departed, Version::new(1, 1)));

    let h = harness_with(Some(Arc::clone(&cache)), sink);
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .ready("abc")
            .dispatch(1, joined(1))
            .then_close(),
    );
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .frame(Frame::InvalidSession { resumable: false }),
    );
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .ready("def")
            .dispatch(1, joined(9))
            .auto_ack(),
    );
    let (mut rx, task) = h.start();

    assert_eq!(next(&mut rx).await, (1, 1));
    // Sequence numbers restart; the epoch keeps versions ordered.
    assert_eq!(next(&mut rx).await, (2, 1));
    assert_eq!(h.session.epoch(), 2);
    assert_eq!(h.transport.handshake(1), [Command::Resume {
        session_id: "abc".into(),
        sequence: 1,
    }]);
    assert_eq!(h.transport.handshake(2), [Command::Identify]);
    assert!(!cache.is_tombstoned(&departed));

    for _ in 0..50 {
        if fetcher.fetches(&key) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(fetcher.fetches(&key), 1);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let refreshed = cache.get(&key).unwrap();
    assert_eq!(refreshed.as_member().unwrap().nick.as_deref(), Some("seven"));

    h.stop(task).await;
}

#[tokio::test(start_paused = true)]
async fn stopping_the_session_abandons_a_running_resync() {
    let sink = Arc::new(RecordingSink::new());
    let fetcher = Arc::new(MemoryFetcher::new().with_latency(Duration::from_secs(3600)));
    let cache = Arc::new(StateCache::new(None, sink.clone()).with_fetcher(fetcher.clone()));
    let key = EntityKey::member(1u64, 7u64);
    assert!(cache.upsert(Entity::member(Version::new(1, 1), member(7))).applied());
    let mut renamed = member(7);
    renamed.nick = Some("seven".into());
    fetcher.set(key, EntityData::Member(renamed));

    let h = harness_with(Some(Arc::clone(&cache)), sink);
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .frame(Frame::InvalidSession { resumable: false }),
    );
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .ready("def")
            .dispatch(1, joined(9))
            .auto_ack(),
    );
    let (mut rx, task) = h.start();
    assert_eq!(next(&mut rx).await, (2, 1));
    for _ in 0..50 {
        if fetcher.fetches(&key) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(fetcher.fetches(&key), 1);

    h.stop(task).await;
    tokio::time::sleep(Duration::from_secs(7200)).await;
    assert_eq!(cache.get(&key).unwrap().as_member().unwrap().nick, None);
}

#[tokio::test(start_paused = true)]
async fn two_missed_heartbeats_force_a_reconnect() {
    let h = harness();
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .ready("abc")
            .dispatch(1, joined(1)),
    );
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .resumed()
            .dispatch(2, joined(2))
            .auto_ack(),
    );
    let (mut rx, task) = h.start();

    assert_eq!(next(&mut rx).await, (1, 1));
    assert_eq!(next(&mut rx).await, (1, 2));

    let heartbeats = h
        .transport
        .sent()
        .into_iter()
        .filter(|s| s.connection == 0 && matches!(s.command, Command::Heartbeat { .. }))
        .count();
    assert_eq!(heartbeats, 2);
    assert_eq!(h.transitions(), [
        ("disconnected", "connecting"),
        ("connecting", "connected"),
        ("connected", "degraded"),
        ("degraded", "reconnecting"),
        ("reconnecting", "connected"),
    ]);

    // The acknowledged connection stays up.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.session.state(), SessionState::Connected);
    assert_eq!(h.transport.attempts().len(), 2);

    h.stop(task).await;
}

#[tokio::test(start_paused = true)]
async fn late_ack_recovers_from_degraded() {
    let h = harness();
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .ready("abc")
            .dispatch(1, joined(1))
            .sleep(Duration::from_millis(2500))
            .frame(Frame::HeartbeatAck)
            .dispatch(2, joined(2)),
    );
    let (mut rx, task) = h.start();

    assert_eq!(next(&mut rx).await, (1, 1));
    assert_eq!(next(&mut rx).await, (1, 2));
    assert_eq!(h.session.state(), SessionState::Connected);
    assert_eq!(h.transitions(), [
        ("disconnected", "connecting"),
        ("connecting", "connected"),
        ("connected", "degraded"),
        ("degraded", "connected"),
    ]);
    assert!(h.reconnects().is_empty());

    h.stop(task).await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_carries_last_sequence() {
    let h = harness();
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .ready("abc")
            .dispatch(5, joined(1))
            .frame(Frame::HeartbeatRequest)
            .auto_ack(),
    );
    let (mut rx, task) = h.start();
    assert_eq!(next(&mut rx).await, (1, 5));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let sent = h.transport.sent();
    assert!(sent.iter().any(|s| s.command == Command::Heartbeat { sequence: Some(5) }));

    h.stop(task).await;
}

#[tokio::test(start_paused = true)]
async fn auth_failure_is_terminal() {
    let h = harness();
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .then_fail(Error::auth("invalid token")),
    );
    let (_rx, task) = h.start();

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailure);
    assert_eq!(h.session.state(), SessionState::Failed);
    assert_eq!(h.transport.attempts().len(), 1);
    assert!(h.reconnects().is_empty());
    assert_eq!(h.transitions(), [
        ("disconnected", "connecting"),
        ("connecting", "failed"),
    ]);

    // A failed session cannot be restarted.
    let (tx, _rx) = mpsc::channel(1);
    assert!(h.session.run(tx, CancellationToken::new()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn connect_failures_back_off_exponentially() {
    let h = harness();
    h.transport.push_error(Error::transient("connection refused"));
    h.transport.push_error(Error::transient("connection refused"));
    h.transport
        .push(ConnectionScript::new().hello(HEARTBEAT).ready("abc").auto_ack());
    let mut state = h.session.subscribe();
    let (_rx, task) = h.start();

    state
        .wait_for(|s| *s == SessionState::Connected)
        .await
        .unwrap();

    let attempts = h.transport.attempts();
    assert_eq!(attempts.len(), 3);
    assert!(attempts[1].at - attempts[0].at >= Duration::from_millis(100));
    assert!(attempts[2].at - attempts[1].at >= Duration::from_millis(200));
    assert_eq!(h.reconnects(), [
        (1, Duration::from_millis(100), false),
        (2, Duration::from_millis(200), false),
    ]);

    h.stop(task).await;
}

#[tokio::test(start_paused = true)]
async fn missing_hello_times_out() {
    let h = harness();
    h.transport.push(ConnectionScript::new());
    h.transport
        .push(ConnectionScript::new().hello(HEARTBEAT).ready("abc").auto_ack());
    let mut state = h.session.subscribe();
    let (_rx, task) = h.start();

    state
        .wait_for(|s| *s == SessionState::Connected)
        .await
        .unwrap();
    let attempts = h.transport.attempts();
    assert!(attempts[1].at - attempts[0].at >= Duration::from_secs(30));

    h.stop(task).await;
}

#[tokio::test(start_paused = true)]
async fn closed_event_receiver_stops_the_session() {
    let h = harness();
    h.transport.push(
        ConnectionScript::new()
            .hello(HEARTBEAT)
            .ready("abc")
            .dispatch(1, joined(1)),
    );
    let (rx, task) = h.start();
    drop(rx);

    task.await.unwrap().unwrap();
    assert_eq!(h.session.state(), SessionState::Disconnected);
}
