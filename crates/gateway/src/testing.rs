//! Scripted [`GatewayTransport`] for tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    dbhq_common::{Error, EventPayload, Result},
    tokio::time::Instant,
};

use crate::{
    frame::{Command, Frame},
    transport::{GatewayConnection, GatewayTransport},
};

#[derive(Debug)]
enum Step {
    Frame(Frame),
    Sleep(Duration),
}

#[derive(Debug)]
enum End {
    /// Stay open without sending anything else.
    Hang,
    Close,
    Fail(Error),
}

/// What one connection will deliver, in order.
#[derive(Debug)]
pub struct ConnectionScript {
    steps: VecDeque<Step>,
    end: End,
    auto_ack: bool,
}

impl Default for ConnectionScript {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionScript {
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: VecDeque::new(),
            end: End::Hang,
            auto_ack: false,
        }
    }

    #[must_use]
    pub fn frame(mut self, frame: Frame) -> Self {
        self.steps.push_back(Step::Frame(frame));
        self
    }

    #[must_use]
    pub fn hello(self, heartbeat_interval: Duration) -> Self {
        self.frame(Frame::Hello { heartbeat_interval })
    }

    #[must_use]
    pub fn ready(self, session_id: &str) -> Self {
        self.frame(Frame::Ready {
            session_id: session_id.into(),
            resume_url: Some(format!("wss://resume.test/{session_id}")),
        })
    }

    #[must_use]
    pub fn resumed(self) -> Self {
        self.frame(Frame::Resumed)
    }

    #[must_use]
    pub fn dispatch(self, sequence: u64, payload: EventPayload) -> Self {
        self.frame(Frame::Dispatch { sequence, payload })
    }

    /// Deliver nothing for `duration` before the next step.
    #[must_use]
    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push_back(Step::Sleep(duration));
        self
    }

    /// Answer every heartbeat with an ACK.
    #[must_use]
    pub fn auto_ack(mut self) -> Self {
        self.auto_ack = true;
        self
    }

    /// Close (resumably) once every step was delivered.
    #[must_use]
    pub fn then_close(mut self) -> Self {
        self.end = End::Close;
        self
    }

    /// Fail with `error` once every step was delivered.
    #[must_use]
    pub fn then_fail(mut self, error: Error) -> Self {
        self.end = End::Fail(error);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    /// Index of the connection, in connect order.
    pub connection: usize,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAttempt {
    pub resume_url: Option<String>,
    pub at: Instant,
}

/// Hands out scripted connections in order. Once the scripts run out every
/// connect gets a connection that never says hello.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Result<ConnectionScript>>>,
    attempts: Mutex<Vec<ConnectAttempt>>,
    sent: Arc<Mutex<Vec<SentCommand>>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: ConnectionScript) {
        lock(&self.scripts).push_back(Ok(script));
    }

    /// Make the next connect attempt fail.
    pub fn push_error(&self, error: Error) {
        lock(&self.scripts).push_back(Err(error));
    }

    #[must_use]
    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        lock(&self.attempts).clone()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentCommand> {
        lock(&self.sent).clone()
    }

    /// Commands sent on connection `index`, heartbeats excluded.
    #[must_use]
    pub fn handshake(&self, index: usize) -> Vec<Command> {
        lock(&self.sent)
            .iter()
            .filter(|s| s.connection == index)
            .filter(|s| !matches!(s.command, Command::Heartbeat { .. }))
            .map(|s| s.command.clone())
            .collect()
    }
}

#[async_trait]
impl GatewayTransport for ScriptedTransport {
    async fn connect(&self, resume_url: Option<&str>) -> Result<Box<dyn GatewayConnection>> {
        let index = {
            let mut attempts = lock(&self.attempts);
            attempts.push(ConnectAttempt {
                resume_url: resume_url.map(str::to_owned),
                at: Instant::now(),
            });
            attempts.len() - 1
        };
        let script = lock(&self.scripts)
            .pop_front()
            .unwrap_or_else(|| Ok(ConnectionScript::new()))?;
        Ok(Box::new(ScriptedConnection {
            index,
            steps: script.steps,
            end: Some(script.end),
            auto_ack: script.auto_ack,
            pending_acks: 0,
            sleep_until: None,
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct ScriptedConnection {
    index: usize,
    steps: VecDeque<Step>,
    end: Option<End>,
    auto_ack: bool,
    pending_acks: usize,
    sleep_until: Option<Instant>,
    sent: Arc<Mutex<Vec<SentCommand>>>,
}

#[async_trait]
impl GatewayConnection for ScriptedConnection {
    async fn send(&mut self, command: Command) -> Result<()> {
        if self.auto_ack && matches!(command, Command::Heartbeat { .. }) {
            self.pending_acks += 1;
        }
        lock(&self.sent).push(SentCommand {
            connection: self.index,
            command,
        });
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        loop {
            if self.pending_acks > 0 {
                self.pending_acks -= 1;
                return Ok(Some(Frame::HeartbeatAck));
            }
            match self.steps.front() {
                Some(Step::Sleep(duration)) => {
                    let duration = *duration;
                    // The deadline survives a cancelled `recv`.
                    let deadline = *self
                        .sleep_until
                        .get_or_insert_with(|| Instant::now() + duration);
                    tokio::time::sleep_until(deadline).await;
                    self.sleep_until = None;
                    self.steps.pop_front();
                },
                Some(Step::Frame(_)) => {
                    if let Some(Step::Frame(frame)) = self.steps.pop_front() {
                        return Ok(Some(frame));
                    }
                },
                None => break,
            }
        }

        match self.end.take() {
            Some(End::Close) => {
                self.end = Some(End::Close);
                Ok(None)
            },
            Some(End::Fail(error)) => Err(error),
            Some(End::Hang) | None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.end = Some(End::Close);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
