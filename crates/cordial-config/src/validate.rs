//! Validation rules applied after merging.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json", "full"];

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

/// Validate a fully merged config.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] naming the first bad field.
pub fn validate(config: &Config) -> ConfigResult<()> {
    let gateway = &config.gateway;

    if gateway.token.as_deref().is_some_and(str::is_empty) {
        return Err(invalid("gateway.token", "token must not be empty"));
    }

    if let Some([index, count]) = gateway.shard {
        if count < 2 {
            return Err(invalid(
                "gateway.shard",
                format!("shard count must be at least 2, got {count}"),
            ));
        }
        if index >= count {
            return Err(invalid(
                "gateway.shard",
                format!("shard index {index} must be below shard count {count}"),
            ));
        }
    }

    if !(50..=250).contains(&gateway.large_threshold) {
        return Err(invalid(
            "gateway.large_threshold",
            format!("must be within 50..=250, got {}", gateway.large_threshold),
        ));
    }

    if gateway.backoff_floor_secs == 0 {
        return Err(invalid("gateway.backoff_floor_secs", "must be positive"));
    }
    if gateway.backoff_floor_secs > gateway.backoff_ceiling_secs {
        return Err(invalid(
            "gateway.backoff_ceiling_secs",
            format!(
                "ceiling {} is below floor {}",
                gateway.backoff_ceiling_secs, gateway.backoff_floor_secs
            ),
        ));
    }

    if !gateway.api_url.starts_with("http://") && !gateway.api_url.starts_with("https://") {
        return Err(invalid("gateway.api_url", "must be an http(s) URL"));
    }
    if let Some(proxy) = &gateway.proxy
        && !proxy.starts_with("http://")
    {
        return Err(invalid("gateway.proxy", "only http:// proxies are supported"));
    }

    let level = config.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!("unknown level '{}'", config.logging.level),
        ));
    }
    let format = config.logging.format.to_ascii_lowercase();
    if !LOG_FORMATS.contains(&format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!("unknown format '{}'", config.logging.format),
        ));
    }

    Ok(())
}
