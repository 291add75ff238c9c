//! Runtime configuration for the gateway client.

use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};

/// Shard assignment sent in the identify payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardInfo {
    /// Zero-based shard index.
    pub index: u32,
    /// Total number of shards.
    pub count: u32,
}

impl ShardInfo {
    /// Build a shard pair, rejecting `count < 2` and `index >= count`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidArgument`] for an invalid pair.
    pub fn new(index: u32, count: u32) -> GatewayResult<Self> {
        if count < 2 {
            return Err(GatewayError::InvalidArgument(format!(
                "shard count must be at least 2, got {count}"
            )));
        }
        if index >= count {
            return Err(GatewayError::InvalidArgument(format!(
                "shard index {index} must be below shard count {count}"
            )));
        }
        Ok(Self { index, count })
    }
}

/// Configuration for a [`GatewayClient`](crate::GatewayClient).
#[derive(Clone)]
pub struct GatewayConfig {
    /// Bearer token sent in identify/resume and bootstrap requests.
    pub token: String,
    /// REST API base for bootstrap requests.
    pub api_url: String,
    /// Optional HTTP forward proxy (`http://host:port`).
    pub proxy: Option<String>,
    /// Optional shard assignment.
    pub shard: Option<ShardInfo>,
    /// Reported as `$browser` in the identify properties.
    pub client_name: String,
    /// Large-guild threshold sent in identify.
    pub large_threshold: u32,
    /// Compression flag sent in identify.
    pub compress: bool,
    /// Reconnect after an unexpected disconnect.
    pub auto_reconnect: bool,
    /// Track voice-channel signaling.
    pub audio_enabled: bool,
    /// First reconnect delay.
    pub backoff_floor: Duration,
    /// Reconnect delay ceiling.
    pub backoff_ceiling: Duration,
}

impl GatewayConfig {
    /// Create a config with default settings for `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }

    /// Set the shard assignment.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidArgument`] for an invalid pair.
    pub fn with_shard(mut self, index: u32, count: u32) -> GatewayResult<Self> {
        self.shard = Some(ShardInfo::new(index, count)?);
        Ok(self)
    }

    /// Route the transport and bootstrap requests through `proxy`.
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Set the REST API base.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Check everything that can be checked before a request is made.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidArgument`] for an empty token, an
    /// invalid shard pair, or an inverted backoff range.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.token.trim().is_empty() {
            return Err(GatewayError::InvalidArgument(
                "token must not be empty".into(),
            ));
        }
        if let Some(shard) = self.shard {
            ShardInfo::new(shard.index, shard.count)?;
        }
        if self.backoff_floor.is_zero() || self.backoff_floor > self.backoff_ceiling {
            return Err(GatewayError::InvalidArgument(format!(
                "backoff floor {:?} must be positive and not above ceiling {:?}",
                self.backoff_floor, self.backoff_ceiling
            )));
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_url: "https://discordapp.com/api".to_string(),
            proxy: None,
            shard: None,
            client_name: "cordial".to_string(),
            large_threshold: 250,
            compress: true,
            auto_reconnect: true,
            audio_enabled: true,
            backoff_floor: Duration::from_secs(2),
            backoff_ceiling: Duration::from_secs(900),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"***")
            .field("api_url", &self.api_url)
            .field("proxy", &self.proxy)
            .field("shard", &self.shard)
            .field("client_name", &self.client_name)
            .field("large_threshold", &self.large_threshold)
            .field("compress", &self.compress)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("audio_enabled", &self.audio_enabled)
            .field("backoff_floor", &self.backoff_floor)
            .field("backoff_ceiling", &self.backoff_ceiling)
            .finish()
    }
}
