use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Immutable configuration snapshot captured at process start.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub admin: AdminConfig,
    pub carriers: CarrierCredentials,
    pub email: Option<EmailSettings>,
    pub llm: Option<LlmSettings>,
    /// Bound on graceful shutdown before in-flight work is abandoned.
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tracklet.db"),
        }
    }
}

/// Auto-update scheduler knobs.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Master switch; when off the scheduler starts in the Stopped state.
    pub enabled: bool,
    /// Tick interval.
    pub update_interval: Duration,
    /// Shipments older than this never auto-update.
    pub cutoff_days: i64,
    /// USPS batch ceiling; hard max 10.
    pub batch_size: usize,
    /// Per-shipment failure cap before the eligibility filter excludes it.
    pub max_retries: i64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval: Duration::from_secs(60 * 60),
            cutoff_days: 30,
            batch_size: 10,
            max_retries: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub disabled: bool,
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            disabled: false,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// The per-shipment manual-refresh window.
///
/// Defaults equal to the cache TTL; the two are separate settings that
/// happen to coincide.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub disabled: bool,
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            disabled: false,
            window: Duration::from_secs(5 * 60),
        }
    }
}

/// Admin-surface credentials. The key never appears in Debug output.
#[derive(Clone)]
pub struct AdminConfig {
    pub auth_disabled: bool,
    pub api_key: Option<String>,
}

impl fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminConfig")
            .field("auth_disabled", &self.auth_disabled)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

/// Optional per-carrier API credentials; presence selects the API strategy.
#[derive(Clone, Default)]
pub struct CarrierCredentials {
    pub usps_api_key: Option<String>,
    pub fedex_api_key: Option<String>,
    pub fedex_api_secret: Option<String>,
}

impl CarrierCredentials {
    pub fn has_usps_api(&self) -> bool {
        self.usps_api_key.is_some()
    }

    pub fn has_fedex_api(&self) -> bool {
        self.fedex_api_key.is_some() && self.fedex_api_secret.is_some()
    }
}

impl fmt::Debug for CarrierCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarrierCredentials")
            .field("usps_api", &self.has_usps_api())
            .field("fedex_api", &self.has_fedex_api())
            .finish()
    }
}

/// Mailbox polling settings; the email worker only runs when these exist.
#[derive(Clone)]
pub struct EmailSettings {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: String,
    pub poll_interval: Duration,
    /// Only messages received within the last N days are scanned.
    pub scan_window_days: i64,
}

impl fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSettings")
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("poll_interval", &self.poll_interval)
            .field("scan_window_days", &self.scan_window_days)
            .finish()
    }
}

/// LLM provider settings for the email extractor. Always optional; the
/// extractor degrades to regex-only without it.
#[derive(Clone)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}
