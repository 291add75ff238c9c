//! Pre-connection HTTP requests: token validation and endpoint discovery.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{GATEWAY_VERSION, GatewayUrlResponse};

/// Requests made before the first transport is opened.
#[async_trait]
pub trait Bootstrap: Send + Sync {
    /// Check that `token` is accepted by the API.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidToken`] when the token is rejected.
    async fn validate_token(&self, token: &str) -> GatewayResult<()>;

    /// Discover the gateway endpoint, including encoding and version.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::GatewayUnavailable`] when no endpoint could
    /// be obtained.
    async fn gateway_url(&self, token: &str) -> GatewayResult<String>;
}

/// [`Bootstrap`] over the REST API.
#[derive(Debug, Clone)]
pub struct HttpBootstrap {
    http: reqwest::Client,
    api_url: String,
}

impl HttpBootstrap {
    /// Build a requester for `api_url`, optionally routed through `proxy`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Http`] if the proxy URL is invalid or the
    /// client cannot be built.
    pub fn new(api_url: impl Into<String>, proxy: Option<&str>) -> GatewayResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            http: builder.build()?,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.api_url)
    }
}

#[async_trait]
impl Bootstrap for HttpBootstrap {
    async fn validate_token(&self, token: &str) -> GatewayResult<()> {
        let resp = self
            .http
            .get(self.endpoint("users/@me/guilds"))
            .header("Authorization", token)
            .send()
            .await?;

        if !resp.status().is_success() {
            debug!(status = %resp.status(), "Token rejected");
            return Err(GatewayError::InvalidToken);
        }
        Ok(())
    }

    async fn gateway_url(&self, token: &str) -> GatewayResult<String> {
        let resp = self
            .http
            .get(self.endpoint("gateway"))
            .header("Authorization", token)
            .send()
            .await
            .map_err(|e| GatewayError::GatewayUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GatewayError::GatewayUnavailable(format!(
                "gateway lookup returned {}",
                resp.status()
            )));
        }

        let body: GatewayUrlResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::GatewayUnavailable(e.to_string()))?;
        if body.url.is_empty() {
            return Err(GatewayError::GatewayUnavailable("empty gateway url".into()));
        }

        let url = format!("{}?encoding=json&v={GATEWAY_VERSION}", body.url);
        debug!(url, "Discovered gateway endpoint");
        Ok(url)
    }
}
