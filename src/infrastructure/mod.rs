//! Infrastructure: configuration and logging.

pub mod config;
pub mod logging;

pub use config::{ConfigLoader, DEFAULT_CONFIG_YAML};
pub use logging::init_logging;
