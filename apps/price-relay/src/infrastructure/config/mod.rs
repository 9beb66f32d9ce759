//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    BackendSettings, CacheSettings, ConfigError, DEFAULT_BACKEND_URL, FunctionKey,
    FunctionSettings, RealtimeSettings, RelayConfig, ServerSettings,
};
