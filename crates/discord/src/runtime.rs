//! Wires the core components into a running bot.

use std::{sync::Arc, time::Duration};

use {
    dbhq_actions::{ActionQueue, QueueConfig},
    dbhq_cache::StateCache,
    dbhq_common::{
        Error, Method, RestClient, RestRequest, Result, RouteKey, Snowflake, TelemetrySink,
    },
    dbhq_config::DbhqConfig,
    dbhq_dispatch::{Dispatcher, DispatcherConfig, HandlerRegistry},
    dbhq_gateway::{GatewaySession, GatewayTransport, SessionConfig},
    dbhq_ratelimit::{ExponentialBackoff, LimitedRest, RateLimitConfig, RateLimiter},
    tokio::{sync::mpsc, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    codec::Identity, fetch::DiscordFetcher, rest::HttpRestClient, transport::WsTransport, wire,
};

/// The bot's own account, as returned by `GET /users/@me`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: Snowflake,
    pub username: String,
}

impl BotIdentity {
    /// OAuth2 URL that adds the bot to a guild.
    #[must_use]
    pub fn invite_url(&self) -> String {
        format!(
            "https://discord.com/oauth2/authorize?client_id={}&scope=bot",
            self.id
        )
    }
}

/// Everything one bot process runs: cache, action queue, dispatcher and
/// gateway session, sharing one rate limiter and one telemetry sink.
pub struct BotRuntime {
    config: DbhqConfig,
    rest: LimitedRest,
    cache: Arc<StateCache>,
    actions: ActionQueue,
    dispatcher: Arc<Dispatcher>,
    session: Arc<GatewaySession>,
}

impl BotRuntime {
    /// Build against the real Discord API and gateway.
    pub fn new(
        config: DbhqConfig,
        registry: Arc<HandlerRegistry>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self> {
        let token = config
            .discord
            .token()
            .ok_or_else(|| Error::auth("no bot token configured"))?
            .to_string();
        let http: Arc<dyn RestClient> = Arc::new(HttpRestClient::new(&config.discord)?);
        let rest = LimitedRest::new(http, limiter(&config, Arc::clone(&sink)));
        let transport = Arc::new(WsTransport::new(
            Identity::new(token, config.discord.intents),
            config.discord.gateway_url.clone(),
            rest.clone(),
        ));
        Ok(Self::assemble(config, registry, sink, rest, transport))
    }

    /// Build with a caller-supplied REST client and gateway transport.
    #[must_use]
    pub fn with_parts(
        config: DbhqConfig,
        registry: Arc<HandlerRegistry>,
        sink: Arc<dyn TelemetrySink>,
        client: Arc<dyn RestClient>,
        transport: Arc<dyn GatewayTransport>,
    ) -> Self {
        let rest = LimitedRest::new(client, limiter(&config, Arc::clone(&sink)));
        Self::assemble(config, registry, sink, rest, transport)
    }

    fn assemble(
        config: DbhqConfig,
        registry: Arc<HandlerRegistry>,
        sink: Arc<dyn TelemetrySink>,
        rest: LimitedRest,
        transport: Arc<dyn GatewayTransport>,
    ) -> Self {
        let core = &config.core;
        let backoff = ExponentialBackoff::new(core.backoff_base(), core.backoff_cap());

        let fetcher = Arc::new(DiscordFetcher::new(rest.clone()));
        let cache = Arc::new(
            StateCache::new(core.cache_limit(), Arc::clone(&sink))
                .with_fetcher(fetcher.clone()),
        );
        fetcher.attach(Arc::downgrade(&cache));

        let actions = ActionQueue::new(
            rest.clone(),
            Some(Arc::clone(&cache)),
            QueueConfig {
                max_retries: core.max_retries,
                backoff,
                max_retry_delay: core.rate_limit_timeout(),
                workers: core.action_worker_pool_size,
            },
            Arc::clone(&sink),
        );

        let commands = &config.commands;
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&cache),
            actions.clone(),
            registry,
            DispatcherConfig {
                prefix: commands.prefix.clone(),
                cooldown: commands.cooldown(),
                dedup_window: core.dedup_window,
                handler_pool_size: core.handler_worker_pool_size,
                reply_unknown_command: commands.reply_unknown_command,
                reply_on_handler_error: commands.reply_on_handler_error,
                unknown_command_reply: commands.unknown_command_reply.clone(),
                handler_error_reply: commands.handler_error_reply.clone(),
                cooldown_reply: commands.cooldown_reply.clone(),
            },
            Arc::clone(&sink),
        ));

        let session = Arc::new(
            GatewaySession::new(
                transport,
                SessionConfig {
                    backoff,
                    ..SessionConfig::default()
                },
                sink,
            )
            .with_cache(Arc::clone(&cache)),
        );

        Self {
            config,
            rest,
            cache,
            actions,
            dispatcher,
            session,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    #[must_use]
    pub fn actions(&self) -> &ActionQueue {
        &self.actions
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn session(&self) -> &Arc<GatewaySession> {
        &self.session
    }

    /// Check the token against `GET /users/@me`. An invalid token fails with
    /// an authentication error before the gateway is ever contacted.
    pub async fn verify(&self) -> Result<BotIdentity> {
        let request = RestRequest::new(
            Method::Get,
            "/users/@me",
            RouteKey::new(Method::Get, "/users/@me"),
        );
        let response = self.rest.send(&request).await?;
        let user: wire::User = serde_json::from_value(response.body).map_err(Error::malformed)?;
        let identity = BotIdentity {
            id: user.id,
            username: user.username,
        };
        info!(
            username = %identity.username,
            user_id = %identity.id,
            invite_url = %identity.invite_url(),
            "bot account verified"
        );
        Ok(identity)
    }

    /// Run the gateway session and the dispatcher until `cancel` fires or the
    /// session fails, then drain buffered events, handlers and actions.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let (events, receiver) = mpsc::channel(self.config.core.event_buffer.max(1));

        let dispatcher = Arc::clone(&self.dispatcher);
        let dispatch_stop = CancellationToken::new();
        let mut dispatching = tokio::spawn({
            let stop = dispatch_stop.clone();
            async move { dispatcher.run(receiver, stop).await }
        });

        // The session owns the sender; once it returns the dispatcher works
        // through what is buffered and then sees the channel close.
        let result = self.session.run(events, cancel).await;

        let grace = self.config.core.shutdown_grace();
        let started = Instant::now();
        let joined = match tokio::time::timeout(grace, &mut dispatching).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "event backlog not drained in time, dropping the rest"
                );
                dispatch_stop.cancel();
                dispatching.await
            },
        };
        if let Err(e) = joined {
            warn!(error = %e, "dispatcher task ended abnormally");
        }

        self.shutdown_within(grace.saturating_sub(started.elapsed()))
            .await;
        result
    }

    /// Wait for running handlers, then for queued actions, within `grace`
    /// overall.
    async fn shutdown_within(&self, grace: Duration) {
        let started = Instant::now();
        let handlers = self.dispatcher.drain(grace).await;
        let remaining = grace.saturating_sub(started.elapsed());
        let actions = self.actions.shutdown(remaining).await;
        info!(
            abandoned_handlers = handlers,
            abandoned_actions = actions,
            "bot runtime stopped"
        );
    }
}

impl std::fmt::Debug for BotRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotRuntime")
            .field("session", &self.session)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

fn limiter(config: &DbhqConfig, sink: Arc<dyn TelemetrySink>) -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(
        RateLimitConfig {
            global_per_second: config.core.global_requests_per_second,
            acquire_timeout: config.core.rate_limit_timeout(),
            ..RateLimitConfig::default()
        },
        sink,
    ))
}
