//! Configuration structs

mod app_config;

pub use app_config::{
    AppConfig, AppSettings, ConfigError, Environment, JwtConfig, RateLimitConfig, RealtimeConfig,
    RoomSeed, RoomsConfig, ServerConfig, SnowflakeConfig,
};
