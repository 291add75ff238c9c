//! Config file discovery and layered loading.
//!
//! Load order, lowest precedence first:
//! 1. Embedded `defaults.toml`
//! 2. `~/.cordial/config.toml`
//! 3. The file passed by the caller, if any
//! 4. `CORDIAL_*` env fallbacks for fields no file set
//! 5. `${VAR}` references resolved, tree deserialized, then validated

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars, resolve_env_references};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge, record_leaves};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum accepted config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: usize = 1_048_576;

/// Load configuration from the standard locations plus `explicit`.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is unreadable or malformed, the
/// home directory cannot be found, or the merged config is invalid.
pub fn load(explicit: Option<&Path>) -> ConfigResult<Config> {
    let home = home_directory()?;
    load_from(explicit, Some(&home), &collect_env_vars())
}

/// Load configuration with an injectable home directory and environment.
///
/// `home` is the directory that contains `.cordial/`; `None` skips the
/// user layer. An `explicit` path that does not exist is an error.
///
/// # Errors
///
/// Same as [`load`].
pub fn load_from<S: std::hash::BuildHasher>(
    explicit: Option<&Path>,
    home: Option<&Path>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<Config> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut sources = FieldSources::new();
    record_leaves(&merged, "", ConfigLayer::Defaults, &mut sources);

    if let Some(home) = home {
        let user_path = user_config_path(home);
        if let Some(overlay) = try_load_file(&user_path)? {
            deep_merge(&mut merged, &overlay, "", ConfigLayer::User, &mut sources);
            info!(path = %user_path.display(), "loaded user config");
        }
    }

    if let Some(path) = explicit {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        deep_merge(&mut merged, &overlay, "", ConfigLayer::Explicit, &mut sources);
        info!(path = %path.display(), "loaded config file");
    }

    let applied = apply_env_fallbacks(&mut merged, &mut sources, env_vars);
    if applied > 0 {
        debug!(count = applied, "applied environment variable fallbacks");
    }

    resolve_env_references(&mut merged, env_vars);
    let config: Config = merged
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: "<merged config>".to_owned(),
            source: e,
        })?;

    validate::validate(&config)?;
    Ok(config)
}

/// Path of the per-user config file under `home`.
#[must_use]
pub fn user_config_path(home: &Path) -> PathBuf {
    home.join(".cordial").join("config.toml")
}

/// Read and parse a TOML file, returning `None` if it does not exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    toml::from_str(&content)
        .map(Some)
        .map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })
}

fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn embedded_defaults_match_default_impl() {
        let parsed: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn loads_defaults_without_files() {
        let config = load_from(None, None, &no_env()).unwrap();
        assert_eq!(config.gateway.backoff_floor_secs, 2);
        assert_eq!(config.gateway.backoff_ceiling_secs, 900);
        assert!(config.gateway.token.is_none());
    }

    #[test]
    fn explicit_file_beats_user_file() {
        let home = tempfile::tempdir().unwrap();
        write(
            &user_config_path(home.path()),
            "[gateway]\nlarge_threshold = 100\ncompress = false\n",
        );
        let explicit = home.path().join("run.toml");
        write(&explicit, "[gateway]\nlarge_threshold = 75\n");

        let config = load_from(Some(explicit.as_path()), Some(home.path()), &no_env()).unwrap();

        assert_eq!(config.gateway.large_threshold, 75);
        assert!(!config.gateway.compress);
    }

    #[test]
    fn env_fills_token_and_references_resolve() {
        let home = tempfile::tempdir().unwrap();
        write(
            &user_config_path(home.path()),
            "[gateway]\nproxy = \"http://${PROXY_HOST}:3128\"\n",
        );
        let env: HashMap<String, String> = [
            ("CORDIAL_TOKEN".to_owned(), "secret".to_owned()),
            ("PROXY_HOST".to_owned(), "squid".to_owned()),
        ]
        .into_iter()
        .collect();

        let config = load_from(None, Some(home.path()), &env).unwrap();

        assert_eq!(config.gateway.token.as_deref(), Some("secret"));
        assert_eq!(config.gateway.proxy.as_deref(), Some("http://squid:3128"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = load_from(Some(Path::new("/nonexistent/cordial.toml")), None, &no_env());
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn invalid_shard_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        write(&path, "[gateway]\nshard = [3, 2]\n");

        let result = load_from(Some(path.as_path()), None, &no_env());
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        write(&path, "[gateway\n");

        let result = load_from(Some(path.as_path()), None, &no_env());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn oversized_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&path, data).unwrap();

        let result = try_load_file(&path);
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn token_is_redacted_from_debug_and_serialization() {
        let mut config = Config::default();
        config.gateway.token = Some("super-secret".to_owned());

        let debug = format!("{:?}", config.gateway);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("has_token: true"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("super-secret"));
    }
}
