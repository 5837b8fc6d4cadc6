//! Shared configuration library for Tracklet.
//!
//! This crate centralizes `.env` loading, config defaults, and validation
//! rules. The server binary consumes `Config::from_env()` once at startup;
//! configuration is immutable for the life of the process (changes require
//! a restart, by design).

pub mod loader;
pub mod models;

pub use loader::ConfigLoadError;
pub use models::{
    AdminConfig, CacheSettings, CarrierCredentials, Config, DatabaseConfig,
    EmailSettings, LlmSettings, RateLimitSettings, SchedulerSettings,
    ServerConfig,
};
