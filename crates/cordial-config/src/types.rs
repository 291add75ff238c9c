//! Configuration struct definitions.
//!
//! Every section uses `#[serde(default)]` so a partial file only needs
//! the keys it changes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway connection settings.
    pub gateway: GatewaySection,
    /// Log output settings.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// `[gateway]` section.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// Bearer token. Never serialized back out.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// REST API base used for token validation and gateway discovery.
    pub api_url: String,
    /// Optional HTTP forward proxy (`http://host:port`).
    pub proxy: Option<String>,
    /// Shard `[index, count]` pair.
    pub shard: Option<[u32; 2]>,
    /// Value reported as `$browser` in the identify properties.
    pub client_name: String,
    /// Member count above which guilds are sent without offline members.
    pub large_threshold: u32,
    /// Ask the gateway for compressed dispatch frames.
    pub compress: bool,
    /// Reconnect automatically after an unexpected disconnect.
    pub auto_reconnect: bool,
    /// Track voice-channel signaling.
    pub audio: bool,
    /// First reconnect delay, in seconds.
    pub backoff_floor_secs: u64,
    /// Upper bound on the reconnect delay, in seconds.
    pub backoff_ceiling_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://discordapp.com/api".to_owned(),
            proxy: None,
            shard: None,
            client_name: "cordial".to_owned(),
            large_threshold: 250,
            compress: true,
            auto_reconnect: true,
            audio: true,
            backoff_floor_secs: 2,
            backoff_ceiling_secs: 900,
        }
    }
}

impl std::fmt::Debug for GatewaySection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySection")
            .field("has_token", &self.token.is_some())
            .field("api_url", &self.api_url)
            .field("proxy", &self.proxy)
            .field("shard", &self.shard)
            .field("client_name", &self.client_name)
            .field("large_threshold", &self.large_threshold)
            .field("compress", &self.compress)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("audio", &self.audio)
            .field("backoff_floor_secs", &self.backoff_floor_secs)
            .field("backoff_ceiling_secs", &self.backoff_ceiling_secs)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Base level filter.
    pub level: String,
    /// `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// Write rolling log files here instead of stderr.
    pub directory: Option<PathBuf>,
    /// Use ANSI colors on terminal output.
    pub ansi: bool,
    /// Extra per-target directives.
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directory: None,
            ansi: true,
            directives: Vec::new(),
        }
    }
}
