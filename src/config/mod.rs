pub mod cors;
pub mod redis;
pub mod settings;

pub use settings::{AppConfig, ConfigError, CorsSettings, RateLimitPolicy, RetrievalPolicy};
