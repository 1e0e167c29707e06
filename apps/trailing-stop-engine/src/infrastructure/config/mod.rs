//! Configuration Module
//!
//! Configuration loading for the engine.

mod settings;

pub use settings::{
    ConfigError, EndpointSettings, EngineConfig, FeedSettings, KiteCredentials,
    UpstoxCredentials,
};
