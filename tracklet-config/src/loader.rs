//! Environment-driven configuration loading.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::models::{
    AdminConfig, CacheSettings, CarrierCredentials, Config, DatabaseConfig,
    EmailSettings, LlmSettings, RateLimitSettings, SchedulerSettings,
    ServerConfig,
};

/// USPS accepts at most this many tracking numbers per batched request.
pub const MAX_BATCH_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error(
        "ADMIN_API_KEY is required unless DISABLE_ADMIN_AUTH is set"
    )]
    MissingAdminKey,
}

impl Config {
    /// Load configuration from the process environment, consulting `.env`
    /// first. Every knob has a default except the admin key.
    pub fn from_env() -> Result<Config, ConfigLoadError> {
        // Missing .env is fine; a malformed one is not silently ignored.
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            warn!("failed to read .env file: {err}");
        }

        let server = ServerConfig {
            host: var_or("SERVER_HOST", "0.0.0.0"),
            port: parse_or("SERVER_PORT", 8080)?,
        };

        let database = DatabaseConfig {
            path: PathBuf::from(var_or("DB_PATH", "tracklet.db")),
        };

        let mut batch_size: usize =
            parse_or("AUTO_UPDATE_BATCH_SIZE", MAX_BATCH_SIZE)?;
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            warn!(
                batch_size,
                "AUTO_UPDATE_BATCH_SIZE out of range, clamping to {}",
                MAX_BATCH_SIZE
            );
            batch_size = MAX_BATCH_SIZE;
        }

        let scheduler = SchedulerSettings {
            enabled: flag_or("AUTO_UPDATE_ENABLED", true)?,
            update_interval: duration_or(
                "UPDATE_INTERVAL",
                Duration::from_secs(60 * 60),
            )?,
            cutoff_days: parse_or("AUTO_UPDATE_CUTOFF_DAYS", 30)?,
            batch_size,
            max_retries: parse_or("AUTO_UPDATE_MAX_RETRIES", 10)?,
        };

        let cache = CacheSettings {
            disabled: flag_or("DISABLE_CACHE", false)?,
            ttl: duration_or("CACHE_TTL", Duration::from_secs(5 * 60))?,
        };

        let rate_limit = RateLimitSettings {
            disabled: flag_or("DISABLE_RATE_LIMIT", false)?,
            window: duration_or(
                "RATE_LIMIT_WINDOW",
                Duration::from_secs(5 * 60),
            )?,
        };

        let admin = AdminConfig {
            auth_disabled: flag_or("DISABLE_ADMIN_AUTH", false)?,
            api_key: var_opt("ADMIN_API_KEY"),
        };
        if !admin.auth_disabled && admin.api_key.is_none() {
            return Err(ConfigLoadError::MissingAdminKey);
        }

        let carriers = CarrierCredentials {
            usps_api_key: var_opt("USPS_API_KEY"),
            fedex_api_key: var_opt("FEDEX_API_KEY"),
            fedex_api_secret: var_opt("FEDEX_API_SECRET"),
        };

        let email = match (
            var_opt("EMAIL_IMAP_HOST"),
            var_opt("EMAIL_USERNAME"),
            var_opt("EMAIL_PASSWORD"),
        ) {
            (Some(imap_host), Some(username), Some(password)) => {
                Some(EmailSettings {
                    imap_host,
                    imap_port: parse_or("EMAIL_IMAP_PORT", 993)?,
                    username,
                    password,
                    poll_interval: duration_or(
                        "EMAIL_POLL_INTERVAL",
                        Duration::from_secs(5 * 60),
                    )?,
                    scan_window_days: parse_or("EMAIL_SCAN_DAYS", 30)?,
                })
            }
            _ => None,
        };

        let llm = var_opt("LLM_ENDPOINT").map(|endpoint| LlmSettings {
            endpoint,
            model: var_or("LLM_MODEL", "llama3"),
            api_key: var_opt("LLM_API_KEY"),
        });

        Ok(Config {
            server,
            database,
            scheduler,
            cache,
            rate_limit,
            admin,
            carriers,
            email,
            llm,
            shutdown_timeout: duration_or(
                "SHUTDOWN_TIMEOUT",
                Duration::from_secs(30),
            )?,
        })
    }
}

fn var_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(key: &str, default: &str) -> String {
    var_opt(key).unwrap_or_else(|| default.to_string())
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    default: T,
) -> Result<T, ConfigLoadError>
where
    T::Err: std::fmt::Display,
{
    match var_opt(key) {
        Some(raw) => {
            raw.parse().map_err(|e| ConfigLoadError::InvalidValue {
                key,
                reason: format!("{e}"),
            })
        }
        None => Ok(default),
    }
}

fn flag_or(
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigLoadError> {
    match var_opt(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigLoadError::InvalidValue {
                key,
                reason: format!("expected a boolean, got {other:?}"),
            }),
        },
        None => Ok(default),
    }
}

/// Durations accept humantime strings ("5m", "1h 30m") or bare seconds.
fn duration_or(
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match var_opt(key) {
        Some(raw) => {
            if let Ok(secs) = raw.parse::<u64>() {
                return Ok(Duration::from_secs(secs));
            }
            humantime::parse_duration(&raw).map_err(|e| {
                ConfigLoadError::InvalidValue {
                    key,
                    reason: format!("{e}"),
                }
            })
        }
        None => Ok(default),
    }
}
