//! Core configuration and logging for opsflow.

mod config;
mod logging;

pub use config::{
    Config, EngineConfig, GatewayConfig, HumanInputPolicy, StoreConfig, UnknownStepPolicy,
    DEFAULT_API_KEY_ENV, DEFAULT_INTENT_THRESHOLD,
};
pub use logging::init_logging;
