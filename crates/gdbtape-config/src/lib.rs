pub mod config;
pub mod error;
pub mod load;
pub mod validate;

pub use config::{Config, HistoryConfig, LogConfig, LogLevel, Overrides, ReproducerSettings};
pub use error::ConfigError;
pub use load::{default_config_path, load_config, load_from_str, load_or_default, resolve};
