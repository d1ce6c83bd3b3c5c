//! Configuration validation.
//!
//! [`validate`] checks semantic constraints on a parsed config;
//! [`validate_file`] also reports keys the schema does not know, which is
//! how misspelled options show up.

use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use serde_json::Value;

use crate::{
    env_subst::substitute_env,
    error::Error,
    loader::parse_config_value,
    schema::DbhqConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "missing", "range"
    pub category: &'static str,
    /// Dotted path, e.g. "core.event_buffer"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}] {}: {}", self.severity, self.category, self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, category: &'static str, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

/// Check a parsed config for values the bot cannot run with.
#[must_use]
pub fn validate(config: &DbhqConfig) -> ValidationResult {
    use Severity::{Error, Info, Warning};

    let mut result = ValidationResult::default();

    match config.discord.token() {
        None => result.push(
            Error,
            "missing",
            "discord.token",
            "no bot token configured (set discord.token or DISCORD_TOKEN)",
        ),
        Some(token) if token.contains("${") => result.push(
            Error,
            "missing",
            "discord.token",
            "token still contains an unresolved ${...} placeholder",
        ),
        Some(_) => {},
    }
    if !config.discord.api_url.starts_with("https://") && !config.discord.api_url.starts_with("http://") {
        result.push(Error, "range", "discord.api_url", "must be an http(s) URL");
    }
    if config.discord.request_timeout_secs == 0 {
        result.push(Error, "range", "discord.request_timeout_secs", "must be greater than 0");
    }

    let core = &config.core;
    for (path, value) in [
        ("core.action_worker_pool_size", core.action_worker_pool_size),
        ("core.handler_worker_pool_size", core.handler_worker_pool_size),
        ("core.event_buffer", core.event_buffer),
        ("core.dedup_window", core.dedup_window),
    ] {
        if value == 0 {
            result.push(Error, "range", path, "must be greater than 0");
        }
    }
    if core.global_requests_per_second == 0 {
        result.push(Error, "range", "core.global_requests_per_second", "must be greater than 0");
    }
    if core.backoff_base_ms > core.backoff_cap_ms {
        result.push(
            Warning,
            "range",
            "core.backoff_base_ms",
            format!(
                "base delay {}ms exceeds cap {}ms; every retry will wait the cap",
                core.backoff_base_ms, core.backoff_cap_ms
            ),
        );
    }
    if core.max_retries == 0 {
        result.push(Info, "range", "core.max_retries", "actions will not be retried");
    }

    if config.commands.prefix.trim().is_empty() {
        result.push(Error, "range", "commands.prefix", "must not be empty");
    }

    if let Some(listen) = &config.metrics.listen
        && listen.parse::<SocketAddr>().is_err()
    {
        result.push(Error, "range", "metrics.listen", format!("not a socket address: {listen}"));
    }

    result
}

/// Validate a config file on disk: syntax, unknown keys, then [`validate`].
#[must_use]
pub fn validate_file(path: &Path) -> ValidationResult {
    let mut result = ValidationResult {
        diagnostics: Vec::new(),
        config_path: Some(path.to_path_buf()),
    };

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => substitute_env(&raw),
        Err(e) => {
            result.push(Severity::Error, "syntax", "", format!("cannot read file: {e}"));
            return result;
        },
    };

    match parse_config_value(&raw, path) {
        Ok(value) => check_unknown_keys(&value, &schema_map(), "", &mut result),
        Err(Error::Parse { message, .. }) => {
            result.push(Severity::Error, "syntax", "", message);
            return result;
        },
        Err(e) => {
            result.push(Severity::Error, "syntax", "", e.to_string());
            return result;
        },
    }

    match crate::loader::load_config(path) {
        Ok(mut config) => {
            crate::loader::apply_env_overrides(&mut config);
            result.diagnostics.extend(validate(&config).diagnostics);
        },
        Err(e) => result.push(Severity::Error, "syntax", "", e.to_string()),
    }
    result
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

fn schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    let leaves = |keys: &[&'static str]| Struct(keys.iter().map(|k| (*k, Leaf)).collect());

    Struct(HashMap::from([
        (
            "discord",
            leaves(&["token", "intents", "api_url", "gateway_url", "request_timeout_secs"]),
        ),
        (
            "core",
            leaves(&[
                "max_retries",
                "backoff_base_ms",
                "backoff_cap_ms",
                "cache_max_entries_per_type",
                "action_worker_pool_size",
                "handler_worker_pool_size",
                "rate_limit_timeout_ms",
                "global_requests_per_second",
                "dedup_window",
                "event_buffer",
                "shutdown_grace_ms",
            ]),
        ),
        (
            "commands",
            leaves(&[
                "prefix",
                "cooldown_ms",
                "reply_unknown_command",
                "reply_on_handler_error",
                "unknown_command_reply",
                "handler_error_reply",
                "cooldown_reply",
            ]),
        ),
        ("metrics", leaves(&["enabled", "listen"])),
    ]))
}

fn check_unknown_keys(value: &Value, schema: &KnownKeys, prefix: &str, result: &mut ValidationResult) {
    let (KnownKeys::Struct(fields), Value::Object(map)) = (schema, value) else {
        return;
    };
    for (key, child) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => check_unknown_keys(child, child_schema, &path, result),
            None => result.push(Severity::Warning, "unknown-field", &path, "unknown key (ignored)"),
        }
    }
}
