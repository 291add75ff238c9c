//! Layered configuration for the cordial gateway client.
//!
//! ```rust,no_run
//! use cordial_config::Config;
//!
//! let config = Config::load(None).unwrap();
//! println!("api: {}", config.gateway.api_url);
//! ```
//!
//! Precedence, highest first: explicit file, `~/.cordial/config.toml`,
//! `CORDIAL_*` environment variables (fallback only), embedded defaults.
//!
//! This crate depends on no other cordial crate. Conversion into the
//! gateway's runtime config happens in the binary.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Environment variable fallbacks.
pub mod env;
/// Configuration error types.
pub mod error;
/// File discovery and layered loading.
pub mod loader;
/// Tree merging with provenance.
pub mod merge;
/// Configuration structs.
pub mod types;
/// Validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::{Config, GatewaySection, LoggingSection};

impl Config {
    /// Load configuration with the full precedence chain.
    ///
    /// # Errors
    ///
    /// See [`loader::load`].
    pub fn load(explicit: Option<&std::path::Path>) -> ConfigResult<Self> {
        loader::load(explicit)
    }
}
