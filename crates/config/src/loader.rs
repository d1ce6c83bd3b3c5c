use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, info},
};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::DbhqConfig,
};

/// Standard config file names, checked in order. `config.yml` is the name
/// older deployments used.
const CONFIG_FILENAMES: &[&str] = &[
    "dbhq.yaml",
    "dbhq.yml",
    "dbhq.toml",
    "dbhq.json",
    "config.yml",
];

/// A parsed config and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DbhqConfig,
    /// `None` when no file was found and defaults are in use.
    pub path: Option<PathBuf>,
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<DbhqConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Load `explicit` if given, otherwise the first file found in the standard
/// locations, otherwise defaults. Environment overrides are applied last.
///
/// Search order:
/// 1. `./dbhq.{yaml,yml,toml,json}`, then `./config.yml`
/// 2. the same names under the user config directory
///
/// A file that exists but fails to parse is an error; only a missing file
/// falls back to defaults.
pub fn discover_and_load(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    let mut config = match &path {
        Some(p) => {
            debug!(path = %p.display(), "loading config");
            load_config(p)?
        },
        None => {
            info!("no config file found, using defaults");
            DbhqConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    Ok(LoadedConfig { config, path })
}

/// Find the first config file in standard locations.
#[must_use]
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/dbhq/` on Linux).
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "dbhq").map(|d| d.config_dir().to_path_buf())
}

/// Apply environment overrides. `DISCORD_TOKEN` replaces the configured token.
pub fn apply_env_overrides(config: &mut DbhqConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut DbhqConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(token) = lookup("DISCORD_TOKEN").filter(|t| !t.trim().is_empty()) {
        debug!("discord token taken from DISCORD_TOKEN");
        config.discord.token = Some(Secret::new(token));
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<DbhqConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("yaml");
    let parse_err = |message: String| Error::Parse {
        path: path.to_path_buf(),
        message,
    };

    match ext {
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "toml" => toml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "json" => serde_json::from_str(raw).map_err(|e| parse_err(e.to_string())),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}

/// Parse into a generic JSON value, for key-level validation.
pub(crate) fn parse_config_value(raw: &str, path: &Path) -> Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("yaml");
    let parse_err = |message: String| Error::Parse {
        path: path.to_path_buf(),
        message,
    };

    match ext {
        "yaml" | "yml" => serde_yaml::from_str::<serde_yaml::Value>(raw)
            .map_err(|e| parse_err(e.to_string()))
            .and_then(|v| serde_json::to_value(v).map_err(|e| parse_err(e.to_string()))),
        "toml" => toml::from_str::<toml::Value>(raw)
            .map_err(|e| parse_err(e.to_string()))
            .and_then(|v| serde_json::to_value(v).map_err(|e| parse_err(e.to_string()))),
        "json" => serde_json::from_str(raw).map_err(|e| parse_err(e.to_string())),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "dbhq.yaml",
            "discord:\n  token: abc\ncommands:\n  prefix: \"?\"\n",
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.discord.token(), Some("abc"));
        assert_eq!(cfg.commands.prefix, "?");
    }

    #[test]
    fn loads_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = write_file(&dir, "dbhq.toml", "[core]\nmax_retries = 3\n");
        assert_eq!(load_config(&toml_path).unwrap().core.max_retries, 3);

        let json_path = write_file(&dir, "dbhq.json", r#"{"core": {"dedup_window": 16}}"#);
        assert_eq!(load_config(&json_path).unwrap().core.dedup_window, 16);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "dbhq.ini", "x=1");
        assert!(matches!(
            load_config(&path),
            Err(Error::UnsupportedFormat(ext)) if ext == "ini"
        ));
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "dbhq.yaml", "core: [not, a, map");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("dbhq.yaml"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            discover_and_load(Some(&missing)),
            Err(Error::Read { .. })
        ));
    }

    #[test]
    fn env_token_overrides_file_token() {
        let mut cfg = DbhqConfig::default();
        cfg.discord.token = Some(Secret::new("from-file".into()));
        apply_env_overrides_with(&mut cfg, |name| {
            (name == "DISCORD_TOKEN").then(|| "from-env".to_string())
        });
        assert_eq!(cfg.discord.token(), Some("from-env"));
    }

    #[test]
    fn blank_env_token_is_ignored() {
        let mut cfg = DbhqConfig::default();
        cfg.discord.token = Some(Secret::new("from-file".into()));
        apply_env_overrides_with(&mut cfg, |_| Some("  ".to_string()));
        assert_eq!(cfg.discord.token(), Some("from-file"));
    }
}
