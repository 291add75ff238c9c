//! Error types for the gateway client.

/// Errors produced by the gateway client.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// `WebSocket` transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// HTTP error during a bootstrap request.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Socket or proxy I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A binary frame could not be inflated.
    #[error("Failed to decompress frame: {0}")]
    Decompress(String),

    /// An inflated frame was not valid UTF-8.
    #[error("Frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The token was rejected during bootstrap.
    #[error("The provided token is invalid")]
    InvalidToken,

    /// A caller-supplied argument was rejected before any request.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The gateway endpoint could not be discovered.
    #[error("Could not fetch gateway URL: {0}")]
    GatewayUnavailable(String),

    /// The forward proxy refused or mangled the tunnel.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// No transport is attached, so nothing can be sent.
    #[error("Not connected to the gateway")]
    NotConnected,

    /// An audio operation was requested while audio is disabled.
    #[error("Audio support is disabled")]
    AudioDisabled,

    /// A guild or channel id does not resolve in the registry.
    #[error("Unknown {kind}: {id}")]
    UnknownEntity {
        /// Entity kind (`guild`, `voice channel`, ...).
        kind: &'static str,
        /// The id that failed to resolve.
        id: String,
    },

    /// Shutdown was requested by the application.
    #[error("Shutdown requested")]
    Shutdown,

    /// A payload did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<flate2::DecompressError> for GatewayError {
    fn from(err: flate2::DecompressError) -> Self {
        Self::Decompress(err.to_string())
    }
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
