use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    dbhq_actions::{Action, ActionQueue},
    dbhq_cache::{CacheView, StateCache},
    dbhq_common::{CoreEvent, Envelope, EventPayload, Snowflake, TelemetrySink},
    futures::FutureExt,
    tokio::sync::{Semaphore, mpsc},
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, info, warn},
};

use crate::{
    apply::apply_to_cache,
    command::ParsedCommand,
    context::HandlerContext,
    cooldown::{CommandCooldown, CooldownCheck},
    dedup::DedupWindow,
    registry::{HandlerRegistry, Registration},
};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub prefix: String,
    pub cooldown: Duration,
    pub dedup_window: usize,
    /// Events whose handlers may run at the same time.
    pub handler_pool_size: usize,
    pub reply_unknown_command: bool,
    pub reply_on_handler_error: bool,
    /// `{name}` is replaced by the command name.
    pub unknown_command_reply: String,
    pub handler_error_reply: String,
    /// `{seconds}` is replaced by the cooldown length.
    pub cooldown_reply: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            prefix: "!".into(),
            cooldown: Duration::from_secs(5),
            dedup_window: 4096,
            handler_pool_size: 16,
            reply_unknown_command: true,
            reply_on_handler_error: true,
            unknown_command_reply: "Command not found: {name}".into(),
            handler_error_reply: "An error occurred while executing the command.".into(),
            cooldown_reply:
                "You're being rate-limited. Please wait {seconds} seconds before trying again."
                    .into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Accepted { name: String },
    Unknown { name: String },
    CoolingDown { name: String, notified: bool },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub cache_changes: usize,
    /// Handlers scheduled for this event.
    pub handlers: usize,
    pub command: Option<CommandStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Already seen within the dedup window.
    Duplicate,
    Skipped { reason: String },
    Dispatched(DispatchReport),
}

/// Applies events to the cache and hands them to matching handlers.
///
/// `dispatch` is called in arrival order by one task. Cache updates happen
/// inline; handlers run on a pool bounded by `handler_pool_size`, and a full
/// pool makes `dispatch` wait rather than queue unboundedly.
pub struct Dispatcher {
    cache: Arc<StateCache>,
    actions: ActionQueue,
    registry: Arc<HandlerRegistry>,
    config: DispatcherConfig,
    dedup: Mutex<DedupWindow>,
    cooldown: CommandCooldown,
    pool: Arc<Semaphore>,
    tracker: TaskTracker,
    sink: Arc<dyn TelemetrySink>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        cache: Arc<StateCache>,
        actions: ActionQueue,
        registry: Arc<HandlerRegistry>,
        config: DispatcherConfig,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            dedup: Mutex::new(DedupWindow::new(config.dedup_window)),
            cooldown: CommandCooldown::new(config.cooldown),
            pool: Arc::new(Semaphore::new(config.handler_pool_size.max(1))),
            tracker: TaskTracker::new(),
            cache,
            actions,
            registry,
            config,
            sink,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub async fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        let (epoch, sequence) = envelope.idempotency_key();
        let kind = envelope.kind();
        self.sink.emit(&CoreEvent::EventReceived {
            epoch,
            sequence,
            kind,
        });

        let fresh = self
            .dedup
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((epoch, sequence));
        if !fresh {
            debug!(epoch, sequence, event = %kind, "duplicate event dropped");
            self.sink
                .emit(&CoreEvent::EventDuplicate { epoch, sequence });
            return DispatchOutcome::Duplicate;
        }

        if let EventPayload::Malformed { name, reason } = &envelope.payload {
            warn!(epoch, sequence, event = %name, reason = %reason, "skipping malformed event");
            let reason = format!("{name}: {reason}");
            self.sink.emit(&CoreEvent::EventSkipped {
                epoch,
                sequence,
                reason: reason.clone(),
            });
            return DispatchOutcome::Skipped { reason };
        }

        let cache_changes = apply_to_cache(&self.cache, &envelope);
        let (command, status) = self.gate_command(&envelope);
        let handlers = self.registry.resolve(&envelope, command.as_deref());
        let mut report = DispatchReport {
            cache_changes,
            handlers: handlers.len(),
            command: status,
        };
        if handlers.is_empty() {
            return DispatchOutcome::Dispatched(report);
        }

        let Ok(permit) = Arc::clone(&self.pool).acquire_owned().await else {
            report.handlers = 0;
            return DispatchOutcome::Dispatched(report);
        };
        let ctx = HandlerContext::new(
            Arc::new(envelope),
            command,
            CacheView::new(Arc::clone(&self.cache)),
            self.actions.clone(),
            Arc::clone(&self.registry),
        );
        let sink = Arc::clone(&self.sink);
        let error_reply = self
            .config
            .reply_on_handler_error
            .then(|| self.config.handler_error_reply.clone());
        self.tracker.spawn(async move {
            run_handlers(&ctx, handlers, sink.as_ref(), error_reply.as_deref()).await;
            drop(permit);
        });

        DispatchOutcome::Dispatched(report)
    }

    /// Parse a prefix command out of a message and apply the cooldown.
    /// Returns the command only if its handlers should run.
    fn gate_command(&self, envelope: &Envelope) -> (Option<Arc<ParsedCommand>>, Option<CommandStatus>) {
        let EventPayload::MessageCreated { message, .. } = &envelope.payload else {
            return (None, None);
        };
        if message.author_bot {
            return (None, None);
        }
        let Some(cmd) = ParsedCommand::parse(&message.content, &self.config.prefix) else {
            return (None, None);
        };

        match self.cooldown.check(message.author_id, message.guild_id) {
            CooldownCheck::Rejected { notify, remaining } => {
                debug!(
                    user = %message.author_id,
                    command = %cmd.name,
                    remaining_ms = remaining.as_millis() as u64,
                    "command rejected by cooldown"
                );
                if notify {
                    let seconds = self.cooldown.period().as_secs().to_string();
                    let text = self.config.cooldown_reply.replace("{seconds}", &seconds);
                    self.send(message.channel_id, text);
                }
                (None, Some(CommandStatus::CoolingDown {
                    name: cmd.name,
                    notified: notify,
                }))
            },
            CooldownCheck::Accepted if self.registry.has_command(&cmd.name) => {
                let status = CommandStatus::Accepted {
                    name: cmd.name.clone(),
                };
                (Some(Arc::new(cmd)), Some(status))
            },
            CooldownCheck::Accepted => {
                debug!(command = %cmd.name, "unknown command");
                if self.config.reply_unknown_command {
                    let text = self.config.unknown_command_reply.replace("{name}", &cmd.name);
                    self.send(message.channel_id, text);
                }
                (None, Some(CommandStatus::Unknown { name: cmd.name }))
            },
        }
    }

    fn send(&self, channel_id: Snowflake, content: String) {
        // Fire and forget; the queue reports the outcome.
        let _ = self.actions.submit(Action::send_message(channel_id, content));
    }

    /// Dispatch everything from `events` until it closes or `cancel` fires.
    pub async fn run(&self, mut events: mpsc::Receiver<Envelope>, cancel: CancellationToken) {
        info!("dispatcher started");
        loop {
            let envelope = tokio::select! {
                () = cancel.cancelled() => break,
                next = events.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.dispatch(envelope).await;
        }
        info!("dispatcher stopped");
    }

    /// Wait up to `grace` for running handlers. Returns how many were still
    /// running when it gave up.
    pub async fn drain(&self, grace: Duration) -> usize {
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_ok() {
            return 0;
        }
        let running = self.tracker.len();
        warn!(running, "handlers still running after drain grace");
        running
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Run matched handlers one after another. A failing or panicking handler is
/// logged and the next one still runs.
async fn run_handlers(
    ctx: &HandlerContext,
    handlers: Vec<Arc<Registration>>,
    sink: &dyn TelemetrySink,
    error_reply: Option<&str>,
) {
    let envelope = ctx.event();
    let kind = envelope.kind();
    for registration in handlers {
        let name = registration.handler.name().to_string();
        let result = AssertUnwindSafe(registration.handler.handle(ctx))
            .catch_unwind()
            .await;
        let (error, panicked) = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => (format!("{e:#}"), false),
            Err(payload) => (panic_message(payload.as_ref()), true),
        };

        warn!(
            handler = %name,
            event = %kind,
            epoch = envelope.epoch,
            sequence = envelope.sequence,
            panicked,
            error = %error,
            "handler failed"
        );
        sink.emit(&CoreEvent::HandlerFailed {
            handler: name,
            kind,
            error,
            panicked,
        });
        if registration.is_command()
            && let Some(reply) = error_reply
        {
            let _ = ctx.reply(reply);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
