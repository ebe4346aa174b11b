//! Application configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file if present).

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub gateway: ServerConfig,
    pub jwt: JwtConfig,
    pub realtime: RealtimeConfig,
    pub rate_limit: RateLimitConfig,
    pub rooms: RoomsConfig,
    pub snowflake: SnowflakeConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

/// Gateway listen address
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// JWT configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: i64,
}

/// Tunables of the realtime core, all durations in milliseconds unless noted
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_edit_window_secs")]
    pub edit_window_secs: u64,
    #[serde(default = "default_presence_grace_ms")]
    pub presence_grace_ms: u64,
    #[serde(default = "default_typing_timeout_ms")]
    pub typing_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
    #[serde(default = "default_persist_retry_backoff_ms")]
    pub persist_retry_backoff_ms: u64,
    #[serde(default = "default_connection_buffer")]
    pub connection_buffer: usize,
}

impl RealtimeConfig {
    pub fn edit_window(&self) -> Duration {
        Duration::from_secs(self.edit_window_secs)
    }

    pub fn presence_grace(&self) -> Duration {
        Duration::from_millis(self.presence_grace_ms)
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn persist_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_retry_backoff_ms)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            edit_window_secs: default_edit_window_secs(),
            presence_grace_ms: default_presence_grace_ms(),
            typing_timeout_ms: default_typing_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            push_timeout_ms: default_push_timeout_ms(),
            persist_retry_backoff_ms: default_persist_retry_backoff_ms(),
            connection_buffer: default_connection_buffer(),
        }
    }
}

/// Fixed-window rate limiting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,
    #[serde(default = "default_max_typing")]
    pub max_typing: u32,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: default_rate_window_ms(),
            max_messages: default_max_messages(),
            max_typing: default_max_typing(),
        }
    }
}

/// A room created at startup if it does not exist yet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomSeed {
    pub name: String,
    pub max_users: usize,
}

/// Rooms bootstrapped at startup
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    #[serde(default = "default_rooms")]
    pub defaults: Vec<RoomSeed>,
}

impl RoomsConfig {
    /// Parse a `name:max_users,name:max_users` list
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let defaults = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (name, max) = entry
                    .split_once(':')
                    .ok_or_else(|| ConfigError::InvalidValue("DEFAULT_ROOMS", entry.to_string()))?;
                let max_users = max
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|m| *m > 0)
                    .ok_or_else(|| ConfigError::InvalidValue("DEFAULT_ROOMS", entry.to_string()))?;
                Ok(RoomSeed {
                    name: name.trim().to_string(),
                    max_users,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { defaults })
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            defaults: default_rooms(),
        }
    }
}

/// Snowflake ID generator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SnowflakeConfig {
    #[serde(default)]
    pub worker_id: u16,
}

// Default value functions
fn default_app_name() -> String {
    "chat-realtime".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_access_token_expiry() -> i64 {
    900 // 15 minutes
}

fn default_max_message_length() -> usize {
    2000
}

fn default_edit_window_secs() -> u64 {
    900
}

fn default_presence_grace_ms() -> u64 {
    5_000
}

fn default_typing_timeout_ms() -> u64 {
    5_000
}

fn default_heartbeat_interval_ms() -> u64 {
    45_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    90_000
}

fn default_push_timeout_ms() -> u64 {
    2_000
}

fn default_persist_retry_backoff_ms() -> u64 {
    250
}

fn default_connection_buffer() -> usize {
    256
}

fn default_rate_window_ms() -> u64 {
    10_000
}

fn default_max_messages() -> u32 {
    20
}

fn default_max_typing() -> u32 {
    120
}

fn default_rooms() -> Vec<RoomSeed> {
    vec![RoomSeed {
        name: "general".to_string(),
        max_users: 100,
    }]
}

/// Read an optional variable, falling back to `default` when unset
fn var_or<T: FromStr>(key: &'static str, default: fn() -> T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        Err(_) => Ok(default()),
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            app: AppSettings {
                name: env::var("APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: env::var("APP_ENV")
                    .ok()
                    .and_then(|s| match s.to_lowercase().as_str() {
                        "production" => Some(Environment::Production),
                        "staging" => Some(Environment::Staging),
                        "development" => Some(Environment::Development),
                        _ => None,
                    })
                    .unwrap_or_default(),
            },
            gateway: ServerConfig {
                host: env::var("GATEWAY_HOST").unwrap_or_else(|_| default_host()),
                port: env::var("GATEWAY_PORT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(ConfigError::MissingVar("GATEWAY_PORT"))?,
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").map_err(|_| ConfigError::MissingVar("JWT_SECRET"))?,
                access_token_expiry: var_or("JWT_ACCESS_TOKEN_EXPIRY", default_access_token_expiry)?,
            },
            realtime: RealtimeConfig {
                max_message_length: var_or("MAX_MESSAGE_LENGTH", default_max_message_length)?,
                edit_window_secs: var_or("EDIT_WINDOW_SECS", default_edit_window_secs)?,
                presence_grace_ms: var_or("PRESENCE_GRACE_MS", default_presence_grace_ms)?,
                typing_timeout_ms: var_or("TYPING_TIMEOUT_MS", default_typing_timeout_ms)?,
                heartbeat_interval_ms: var_or("HEARTBEAT_INTERVAL_MS", default_heartbeat_interval_ms)?,
                heartbeat_timeout_ms: var_or("HEARTBEAT_TIMEOUT_MS", default_heartbeat_timeout_ms)?,
                push_timeout_ms: var_or("PUSH_TIMEOUT_MS", default_push_timeout_ms)?,
                persist_retry_backoff_ms: var_or(
                    "PERSIST_RETRY_BACKOFF_MS",
                    default_persist_retry_backoff_ms,
                )?,
                connection_buffer: var_or("CONNECTION_BUFFER", default_connection_buffer)?,
            },
            rate_limit: RateLimitConfig {
                window_ms: var_or("RATE_LIMIT_WINDOW_MS", default_rate_window_ms)?,
                max_messages: var_or("RATE_LIMIT_MESSAGES", default_max_messages)?,
                max_typing: var_or("RATE_LIMIT_TYPING", default_max_typing)?,
            },
            rooms: match env::var("DEFAULT_ROOMS") {
                Ok(raw) => RoomsConfig::parse(&raw)?,
                Err(_) => RoomsConfig::default(),
            },
            snowflake: SnowflakeConfig {
                worker_id: var_or("WORKER_ID", || 0)?,
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
