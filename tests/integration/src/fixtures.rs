//! Test fixtures and data generators
//!
//! Provides reusable configuration and identities for integration tests.

use std::time::Duration;

use chat_common::{
    AppConfig, AppSettings, Environment, JwtConfig, RateLimitConfig, RealtimeConfig, RoomSeed, RoomsConfig,
    ServerConfig, SnowflakeConfig,
};
use chat_core::Snowflake;

pub const ALICE: Snowflake = Snowflake::new(1001);
pub const BOB: Snowflake = Snowflake::new(1002);
pub const CAROL: Snowflake = Snowflake::new(1003);

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

/// Presence grace used by the hub fixtures
pub const GRACE: Duration = Duration::from_secs(5);

/// Typing indicator lifetime used by the hub fixtures
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// Realtime settings with short, round timings
pub fn realtime_config() -> RealtimeConfig {
    RealtimeConfig {
        presence_grace_ms: GRACE.as_millis() as u64,
        typing_timeout_ms: TYPING_TIMEOUT.as_millis() as u64,
        persist_retry_backoff_ms: 10,
        ..RealtimeConfig::default()
    }
}

/// Rate limits loose enough for scenario tests
pub fn rate_limit_config() -> RateLimitConfig {
    RateLimitConfig {
        window_ms: 10_000,
        max_messages: 20,
        max_typing: 120,
    }
}

/// Full application config for a gateway bound to localhost
pub fn test_config() -> AppConfig {
    AppConfig {
        app: AppSettings {
            name: "chat-gateway-it".to_string(),
            env: Environment::Development,
        },
        gateway: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        jwt: JwtConfig {
            secret: TEST_JWT_SECRET.to_string(),
            access_token_expiry: 3600,
        },
        realtime: realtime_config(),
        rate_limit: rate_limit_config(),
        rooms: RoomsConfig {
            defaults: vec![
                RoomSeed {
                    name: "general".to_string(),
                    max_users: 100,
                },
                RoomSeed {
                    name: "tiny".to_string(),
                    max_users: 2,
                },
            ],
        },
        snowflake: SnowflakeConfig { worker_id: 7 },
    }
}
