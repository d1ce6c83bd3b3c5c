use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    dbhq_cache::StateCache,
    dbhq_common::{CoreEvent, Envelope, Error, Result, TelemetrySink},
    dbhq_ratelimit::ExponentialBackoff,
    tokio::{
        sync::{mpsc, watch},
        time::{Instant, MissedTickBehavior},
    },
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, error, info, warn},
};

use crate::{
    frame::{Command, Frame},
    state::SessionState,
    transport::{GatewayConnection, GatewayTransport},
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay between consecutive failed connection attempts.
    pub backoff: ExponentialBackoff,
    pub hello_timeout: Duration,
    /// Consecutive unacknowledged heartbeats that force a reconnect.
    pub max_missed_heartbeats: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backoff: ExponentialBackoff::default(),
            hello_timeout: Duration::from_secs(30),
            max_missed_heartbeats: 2,
        }
    }
}

/// Enough to resume a session on a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub session_id: String,
    /// Last sequence number handed to the dispatcher.
    pub sequence: u64,
    pub resume_url: Option<String>,
}

#[derive(Debug, Default)]
struct Tracking {
    session_id: Option<String>,
    resume_url: Option<String>,
    sequence: Option<u64>,
}

enum Exit {
    /// Cancelled, or nobody is listening for events any more.
    Stop,
    /// Connection lost; reconnect after backoff and resume if possible.
    Reconnect,
    Fatal(Error),
}

/// One logical gateway connection that survives transport failures.
///
/// Every fresh (identified, not resumed) session bumps the connection epoch;
/// envelopes carry it so versions stay ordered across sequence restarts.
pub struct GatewaySession {
    transport: Arc<dyn GatewayTransport>,
    cache: Option<Arc<StateCache>>,
    config: SessionConfig,
    sink: Arc<dyn TelemetrySink>,
    state: watch::Sender<SessionState>,
    epoch: AtomicU64,
    tracking: Mutex<Tracking>,
    /// Cache resyncs started by this session.
    tasks: TaskTracker,
}

impl GatewaySession {
    #[must_use]
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        config: SessionConfig,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            transport,
            cache: None,
            config,
            sink,
            state: watch::Sender::new(SessionState::Disconnected),
            epoch: AtomicU64::new(0),
            tracking: Mutex::new(Tracking::default()),
            tasks: TaskTracker::new(),
        }
    }

    /// Resynchronize `cache` whenever a session had to be started afresh.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<StateCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Epoch of the current session; 0 before the first identify.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn resume_point(&self) -> Option<ResumePoint> {
        let tracking = self.tracking();
        Some(ResumePoint {
            session_id: tracking.session_id.clone()?,
            sequence: tracking.sequence?,
            resume_url: tracking.resume_url.clone(),
        })
    }

    /// Keep a session alive until `cancel` fires, `events` is closed, or a
    /// fatal error occurs. Only the last case returns an error, after the
    /// state has moved to [`SessionState::Failed`].
    pub async fn run(&self, events: mpsc::Sender<Envelope>, cancel: CancellationToken) -> Result<()> {
        if self.state().is_terminal() {
            return Err(Error::message("gateway session already failed"));
        }
        self.transition(SessionState::Connecting);

        // Also stops background work when the session ends on its own.
        let cancel = cancel.child_token();
        let mut attempt: u32 = 0;
        let result = loop {
            if attempt > 0 {
                let delay = self.config.backoff.delay(attempt - 1);
                self.sink.emit(&CoreEvent::Reconnect {
                    attempt,
                    delay,
                    resume: self.resume_point().is_some(),
                });
                self.transition(SessionState::Reconnecting);
                tokio::select! {
                    () = cancel.cancelled() => break Ok(()),
                    () = tokio::time::sleep(delay) => {},
                }
            }

            match self.connection(&events, &cancel, &mut attempt).await {
                Exit::Stop => break Ok(()),
                Exit::Reconnect => attempt = attempt.saturating_add(1),
                Exit::Fatal(e) => break Err(e),
            }
        };

        cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();

        match &result {
            Ok(()) => {
                info!("gateway session stopped");
                self.transition(SessionState::Disconnected);
            },
            Err(e) => {
                error!(error = %e, "gateway session failed");
                self.transition(SessionState::Failed);
            },
        }
        result
    }

    /// Connect once and serve the connection until it ends.
    async fn connection(
        &self,
        events: &mpsc::Sender<Envelope>,
        cancel: &CancellationToken,
        attempt: &mut u32,
    ) -> Exit {
        let resume = self.resume_point();
        let url = resume.as_ref().and_then(|r| r.resume_url.clone());
        debug!(resume = resume.is_some(), url = ?url, "connecting to gateway");

        let mut conn = tokio::select! {
            () = cancel.cancelled() => return Exit::Stop,
            conn = self.transport.connect(url.as_deref()) => match conn {
                Ok(conn) => conn,
                Err(e) => return classify(e),
            },
        };
        let exit = self
            .serve(conn.as_mut(), resume, events, cancel, attempt)
            .await;
        conn.close().await;
        exit
    }

    async fn serve(
        &self,
        conn: &mut dyn GatewayConnection,
        resume: Option<ResumePoint>,
        events: &mpsc::Sender<Envelope>,
        cancel: &CancellationToken,
        attempt: &mut u32,
    ) -> Exit {
        let interval = tokio::select! {
            () = cancel.cancelled() => return Exit::Stop,
            hello = tokio::time::timeout(self.config.hello_timeout, wait_for_hello(conn)) => {
                match hello {
                    Ok(Ok(interval)) => interval,
                    Ok(Err(e)) => return classify(e),
                    Err(_) => return classify(Error::transient("timed out waiting for hello")),
                }
            },
        };

        let fresh = resume.is_none();
        let command = match resume {
            Some(point) => {
                info!(session_id = %point.session_id, sequence = point.sequence, "resuming gateway session");
                Command::Resume {
                    session_id: point.session_id,
                    sequence: point.sequence,
                }
            },
            None => {
                let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
                info!(epoch, "identifying new gateway session");
                *self.tracking() = Tracking::default();
                Command::Identify
            },
        };
        if let Err(e) = conn.send(command).await {
            return classify(e);
        }
        let epoch = self.epoch();

        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut awaiting_ack = false;
        let mut missed: u32 = 0;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Exit::Stop,
                _ = heartbeat.tick() => {
                    if awaiting_ack {
                        missed += 1;
                        warn!(missed, "heartbeat not acknowledged");
                        if missed >= self.config.max_missed_heartbeats {
                            warn!("gateway connection is unresponsive, reconnecting");
                            return Exit::Reconnect;
                        }
                        self.transition(SessionState::Degraded);
                    }
                    if let Err(e) = self.heartbeat(conn).await {
                        return classify(e);
                    }
                    awaiting_ack = true;
                },
                frame = conn.recv() => {
                    let frame = match frame {
                        Ok(Some(frame)) => frame,
                        Ok(None) => {
                            info!("gateway closed the connection");
                            return Exit::Reconnect;
                        },
                        Err(e) => return classify(e),
                    };
                    match frame {
                        Frame::Dispatch { sequence, payload } => {
                            self.tracking().sequence = Some(sequence);
                            if events.send(Envelope::new(epoch, sequence, payload)).await.is_err() {
                                info!("event receiver dropped, stopping gateway session");
                                return Exit::Stop;
                            }
                        },
                        Frame::HeartbeatAck => {
                            awaiting_ack = false;
                            missed = 0;
                            if self.state() == SessionState::Degraded {
                                info!("heartbeat acknowledged again");
                                self.transition(SessionState::Connected);
                            }
                        },
                        Frame::HeartbeatRequest => {
                            if let Err(e) = self.heartbeat(conn).await {
                                return classify(e);
                            }
                        },
                        Frame::Ready { session_id, resume_url } => {
                            info!(%session_id, epoch, "gateway session ready");
                            {
                                let mut tracking = self.tracking();
                                tracking.session_id = Some(session_id);
                                tracking.resume_url = resume_url;
                            }
                            *attempt = 0;
                            self.transition(SessionState::Connected);
                            if fresh && epoch > 1 {
                                self.resync(epoch, cancel);
                            }
                        },
                        Frame::Resumed => {
                            info!(epoch, "gateway session resumed");
                            *attempt = 0;
                            self.transition(SessionState::Connected);
                        },
                        Frame::Reconnect => {
                            info!("gateway requested a reconnect");
                            return Exit::Reconnect;
                        },
                        Frame::InvalidSession { resumable } => {
                            warn!(resumable, "gateway session invalidated");
                            if !resumable {
                                *self.tracking() = Tracking::default();
                            }
                            return Exit::Reconnect;
                        },
                        Frame::Hello { .. } => debug!("ignoring repeated hello"),
                    }
                },
            }
        }
    }

    async fn heartbeat(&self, conn: &mut dyn GatewayConnection) -> Result<()> {
        let sequence = self.tracking().sequence;
        debug!(sequence = ?sequence, "sending heartbeat");
        conn.send(Command::Heartbeat { sequence }).await
    }

    /// Events may have been missed between the old session and this one.
    fn resync(&self, epoch: u64, cancel: &CancellationToken) {
        let Some(cache) = self.cache.clone() else {
            return;
        };
        info!(epoch, "session could not be resumed, resynchronizing cache");
        cache.prune_tombstones(epoch);
        let cancel = cancel.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => debug!(epoch, "cache resync abandoned"),
                report = cache.resync_all() => info!(
                    epoch,
                    refreshed = report.refreshed,
                    removed = report.removed,
                    failed = report.failed,
                    "cache resynchronized"
                ),
            }
        });
    }

    fn transition(&self, next: SessionState) {
        let mut from = None;
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(next) {
                warn!(from = %current, to = %next, "ignoring invalid session state transition");
                return false;
            }
            from = Some(*current);
            *current = next;
            true
        });
        if let Some(from) = from {
            self.sink.emit(&CoreEvent::SessionStateChanged {
                from: from.as_str(),
                to: next.as_str(),
            });
        }
    }

    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn wait_for_hello(conn: &mut dyn GatewayConnection) -> Result<Duration> {
    loop {
        match conn.recv().await? {
            Some(Frame::Hello { heartbeat_interval }) if heartbeat_interval.is_zero() => {
                return Err(Error::malformed("hello with a zero heartbeat interval"));
            },
            Some(Frame::Hello { heartbeat_interval }) => return Ok(heartbeat_interval),
            Some(other) => debug!(frame = other.name(), "ignoring frame before hello"),
            None => return Err(Error::transient("connection closed before hello")),
        }
    }
}

fn classify(e: Error) -> Exit {
    if e.is_fatal() {
        return Exit::Fatal(e);
    }
    warn!(error = %e, "gateway connection lost");
    Exit::Reconnect
}
