//! Conversion from the file-backed [`Config`] to runtime types.
//!
//! `cordial-config` depends on no other cordial crate, so the mapping into
//! gateway and telemetry types lives here, in one place.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use cordial_config::Config;
use cordial_gateway::GatewayConfig;
use cordial_telemetry::{LogConfig, LogFormat, LogTarget};

/// Convert config to [`GatewayConfig`].
///
/// # Errors
///
/// Fails when no token is configured or the shard pair is invalid.
pub fn to_gateway_config(cfg: &Config) -> Result<GatewayConfig> {
    let section = &cfg.gateway;
    let Some(token) = section.token.as_deref().filter(|t| !t.trim().is_empty()) else {
        bail!("no token configured: set gateway.token, CORDIAL_TOKEN or --token");
    };

    let mut gateway = GatewayConfig::new(token).with_api_url(&section.api_url);
    if let Some(proxy) = &section.proxy {
        gateway = gateway.with_proxy(proxy);
    }
    if let Some([index, count]) = section.shard {
        gateway = gateway
            .with_shard(index, count)
            .with_context(|| format!("invalid shard {index}/{count}"))?;
    }

    gateway.client_name.clone_from(&section.client_name);
    gateway.large_threshold = section.large_threshold;
    gateway.compress = section.compress;
    gateway.auto_reconnect = section.auto_reconnect;
    gateway.audio_enabled = section.audio;
    gateway.backoff_floor = Duration::from_secs(section.backoff_floor_secs);
    gateway.backoff_ceiling = Duration::from_secs(section.backoff_ceiling_secs);
    Ok(gateway)
}

/// Convert config to [`LogConfig`].
#[must_use]
pub fn to_log_config(cfg: &Config) -> LogConfig {
    let format = cfg
        .logging
        .format
        .parse::<LogFormat>()
        .unwrap_or_default();

    let mut log_config = LogConfig::new(&cfg.logging.level).with_format(format);
    if let Some(dir) = &cfg.logging.directory {
        log_config = log_config.with_target(LogTarget::File(dir.clone()));
    }
    if !cfg.logging.ansi {
        log_config = log_config.without_ansi();
    }
    for directive in &cfg.logging.directives {
        log_config = log_config.with_directive(directive);
    }
    log_config
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn with_token() -> Config {
        let mut cfg = Config::default();
        cfg.gateway.token = Some("abc".into());
        cfg
    }

    #[test]
    fn missing_token_is_rejected() {
        assert!(to_gateway_config(&Config::default()).is_err());

        let mut cfg = Config::default();
        cfg.gateway.token = Some("   ".into());
        assert!(to_gateway_config(&cfg).is_err());
    }

    #[test]
    fn gateway_fields_are_carried_over() {
        let mut cfg = with_token();
        cfg.gateway.proxy = Some("http://127.0.0.1:3128".into());
        cfg.gateway.shard = Some([1, 4]);
        cfg.gateway.audio = false;
        cfg.gateway.backoff_floor_secs = 5;

        let gateway = to_gateway_config(&cfg).unwrap();
        assert_eq!(gateway.token, "abc");
        assert_eq!(gateway.proxy.as_deref(), Some("http://127.0.0.1:3128"));
        let shard = gateway.shard.unwrap();
        assert_eq!((shard.index, shard.count), (1, 4));
        assert!(!gateway.audio_enabled);
        assert_eq!(gateway.backoff_floor, Duration::from_secs(5));
        assert_eq!(gateway.backoff_ceiling, Duration::from_secs(900));
    }

    #[test]
    fn bad_shard_is_rejected() {
        let mut cfg = with_token();
        cfg.gateway.shard = Some([3, 3]);
        assert!(to_gateway_config(&cfg).is_err());
    }

    #[test]
    fn log_config_maps_format_and_directory() {
        let mut cfg = Config::default();
        cfg.logging.format = "json".into();
        cfg.logging.directory = Some(PathBuf::from("/tmp/cordial-logs"));
        cfg.logging.ansi = false;
        cfg.logging.directives = vec!["cordial_gateway=trace".into()];

        let log = to_log_config(&cfg);
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.target, LogTarget::File(PathBuf::from("/tmp/cordial-logs")));
        assert!(!log.ansi);
        assert_eq!(log.directives, vec!["cordial_gateway=trace".to_string()]);
    }

    #[test]
    fn unknown_log_format_falls_back_to_compact() {
        let mut cfg = Config::default();
        cfg.logging.format = "fancy".into();
        assert_eq!(to_log_config(&cfg).format, LogFormat::Compact);
    }
}
