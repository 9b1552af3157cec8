//! Shared foundations for the IoT identity service: settings, logging and
//! the core error type.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Driver, IssuanceMode, KeyAlgorithm, LogFormat, Settings, TrustedKey};
pub use error::{CoreError, CoreResult};
