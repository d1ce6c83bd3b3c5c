//! Configuration loading, validation and env substitution.
//!
//! Config files: `dbhq.yaml`, `dbhq.toml`, `dbhq.json`, or the legacy
//! `config.yml`. Searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        LoadedConfig, apply_env_overrides, config_dir, discover_and_load, find_config_file,
        load_config,
    },
    schema::{CommandConfig, CoreConfig, DbhqConfig, DiscordConfig, MetricsConfig, intents},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_file},
};
