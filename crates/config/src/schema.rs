use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Gateway intent bits.
pub mod intents {
    pub const GUILDS: u64 = 1 << 0;
    pub const GUILD_MEMBERS: u64 = 1 << 1;
    pub const GUILD_MESSAGES: u64 = 1 << 9;
    pub const GUILD_MESSAGE_REACTIONS: u64 = 1 << 10;
    pub const DIRECT_MESSAGES: u64 = 1 << 12;
    pub const DIRECT_MESSAGE_REACTIONS: u64 = 1 << 13;
    pub const MESSAGE_CONTENT: u64 = 1 << 15;

    /// Everything the bot subscribes to by default.
    pub const DEFAULT: u64 = GUILDS
        | GUILD_MEMBERS
        | GUILD_MESSAGES
        | GUILD_MESSAGE_REACTIONS
        | DIRECT_MESSAGES
        | DIRECT_MESSAGE_REACTIONS
        | MESSAGE_CONTENT;
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DbhqConfig {
    pub discord: DiscordConfig,
    pub core: CoreConfig,
    pub commands: CommandConfig,
    pub metrics: MetricsConfig,
}

/// Connection settings for the Discord gateway and REST API.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token. `DISCORD_TOKEN` overrides this.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
    pub intents: u64,
    pub api_url: String,
    /// Skip the `GET /gateway/bot` lookup and connect here directly.
    pub gateway_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("intents", &self.intents)
            .field("api_url", &self.api_url)
            .field("gateway_url", &self.gateway_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            intents: intents::DEFAULT,
            api_url: "https://discord.com/api/v10".into(),
            gateway_url: None,
            request_timeout_secs: 30,
        }
    }
}

impl DiscordConfig {
    /// The token, if one is configured and non-blank.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token
            .as_ref()
            .map(|t| t.expose_secret().as_str())
            .filter(|t| !t.trim().is_empty())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Tuning for the dispatch, cache, action and rate-limit core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Attempts after the first before an action is failed.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// LRU bound per entity kind. Absent or 0 means unbounded.
    pub cache_max_entries_per_type: Option<usize>,
    pub action_worker_pool_size: usize,
    pub handler_worker_pool_size: usize,
    pub rate_limit_timeout_ms: u64,
    pub global_requests_per_second: u32,
    /// Number of recent (epoch, sequence) keys remembered for deduplication.
    pub dedup_window: usize,
    /// Capacity of the session-to-dispatcher event channel.
    pub event_buffer: usize,
    /// How long shutdown waits for in-flight actions and handlers.
    pub shutdown_grace_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_base_ms: 500,
            backoff_cap_ms: 30_000,
            cache_max_entries_per_type: None,
            action_worker_pool_size: 8,
            handler_worker_pool_size: 16,
            rate_limit_timeout_ms: 30_000,
            global_requests_per_second: 50,
            dedup_window: 4096,
            event_buffer: 1024,
            shutdown_grace_ms: 5000,
        }
    }
}

impl CoreConfig {
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    #[must_use]
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    #[must_use]
    pub fn rate_limit_timeout(&self) -> Duration {
        Duration::from_millis(self.rate_limit_timeout_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// The LRU bound with 0 folded into "unbounded".
    #[must_use]
    pub fn cache_limit(&self) -> Option<usize> {
        self.cache_max_entries_per_type.filter(|n| *n > 0)
    }
}

/// Prefix command behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub prefix: String,
    /// Minimum gap between two accepted commands from one user in one guild.
    pub cooldown_ms: u64,
    pub reply_unknown_command: bool,
    pub reply_on_handler_error: bool,
    /// `{name}` is replaced by the command name.
    pub unknown_command_reply: String,
    pub handler_error_reply: String,
    /// `{seconds}` is replaced by the cooldown length.
    pub cooldown_reply: String,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            prefix: "!".into(),
            cooldown_ms: 5000,
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

impl CommandConfig {
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Scrape endpoint address, e.g. `127.0.0.1:9464`.
    pub listen: Option<String>,
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = DbhqConfig::default();
        assert_eq!(cfg.core.max_retries, 5);
        assert_eq!(cfg.core.backoff_base_ms, 500);
        assert_eq!(cfg.core.backoff_cap_ms, 30_000);
        assert_eq!(cfg.core.action_worker_pool_size, 8);
        assert_eq!(cfg.core.handler_worker_pool_size, 16);
        assert_eq!(cfg.commands.prefix, "!");
        assert_eq!(cfg.discord.intents, intents::DEFAULT);
        assert!(cfg.core.cache_limit().is_none());
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = DiscordConfig {
            token: Some(Secret::new("super-secret-token".into())),
            ..Default::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("super-secret-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let cfg = DiscordConfig {
            token: Some(Secret::new("   ".into())),
            ..Default::default()
        };
        assert!(cfg.token().is_none());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg: DbhqConfig = serde_yaml::from_str("core:\n  max_retries: 2\n").unwrap();
        assert_eq!(cfg.core.max_retries, 2);
        assert_eq!(cfg.core.dedup_window, 4096);
        assert_eq!(cfg.commands.cooldown_ms, 5000);
    }

    #[test]
    fn zero_cache_limit_is_unbounded() {
        let core = CoreConfig {
            cache_max_entries_per_type: Some(0),
            ..Default::default()
        };
        assert!(core.cache_limit().is_none());
    }
}
