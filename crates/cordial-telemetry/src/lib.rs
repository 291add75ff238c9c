//! Cordial Telemetry - logging setup for the cordial gateway client.
//!
//! Wraps `tracing-subscriber` so the binary and the tests can install a
//! subscriber from a single [`LogConfig`].
//!
//! # Example
//!
//! ```rust,no_run
//! use cordial_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), cordial_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("cordial_gateway=trace");
//!
//! setup_logging(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
