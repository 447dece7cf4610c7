use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::heartbeat::DEFAULT_ACK_TIMEOUT;
use crate::transport::DEFAULT_API_BASE;

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES
pub const DEFAULT_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Client description sent with IDENTIFY.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformMetadata {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for PlatformMetadata {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub platform: PlatformMetadata,
    pub intents: u64,
    /// Skips `GET /gateway` when set.
    pub gateway_url: Option<String>,
    pub heartbeat_ack_timeout: Duration,
    pub reconnect_delay: Duration,
    pub verbose_logging: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            platform: PlatformMetadata::default(),
            intents: DEFAULT_INTENTS,
            gateway_url: None,
            heartbeat_ack_timeout: DEFAULT_ACK_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            verbose_logging: true,
        }
    }
}

pub struct Config {
    pub api_base: String,
    pub token: Option<String>,
    pub gateway: GatewayConfig,
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = GatewayConfig::default();

        let gateway = GatewayConfig {
            intents: std::env::var("CORDLINK_INTENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.intents),
            gateway_url: env_non_empty("CORDLINK_GATEWAY_URL"),
            heartbeat_ack_timeout: env_millis("CORDLINK_HEARTBEAT_ACK_TIMEOUT_MS")
                .unwrap_or(defaults.heartbeat_ack_timeout),
            reconnect_delay: env_millis("CORDLINK_RECONNECT_DELAY_MS")
                .unwrap_or(defaults.reconnect_delay),
            verbose_logging: std::env::var("CORDLINK_VERBOSE")
                .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
                .unwrap_or(defaults.verbose_logging),
            ..defaults
        };

        Self {
            api_base: env_non_empty("CORDLINK_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            token: env_non_empty("CORDLINK_TOKEN"),
            gateway,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var("CORDLINK_API_BASE");
        std::env::remove_var("CORDLINK_GATEWAY_URL");
        std::env::remove_var("CORDLINK_TOKEN");
        std::env::remove_var("CORDLINK_INTENTS");
        std::env::remove_var("CORDLINK_HEARTBEAT_ACK_TIMEOUT_MS");
        std::env::remove_var("CORDLINK_RECONNECT_DELAY_MS");
        std::env::remove_var("CORDLINK_VERBOSE");
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.api_base, "https://discord.com");
        assert!(config.token.is_none());
        assert!(config.gateway.gateway_url.is_none());
        assert_eq!(config.gateway.intents, 4609);
        assert_eq!(config.gateway.heartbeat_ack_timeout, Duration::from_secs(10));
        assert_eq!(config.gateway.reconnect_delay, Duration::from_secs(5));
        assert!(config.gateway.verbose_logging);
        assert_eq!(config.gateway.platform.browser, "cordlink");
    }

    #[test]
    #[serial]
    fn test_values_from_env() {
        clear_env();
        std::env::set_var("CORDLINK_API_BASE", "http://127.0.0.1:8080");
        std::env::set_var("CORDLINK_GATEWAY_URL", "ws://127.0.0.1:8080/gateway");
        std::env::set_var("CORDLINK_TOKEN", "tok");
        std::env::set_var("CORDLINK_INTENTS", "513");
        std::env::set_var("CORDLINK_HEARTBEAT_ACK_TIMEOUT_MS", "2500");
        std::env::set_var("CORDLINK_RECONNECT_DELAY_MS", "100");
        std::env::set_var("CORDLINK_VERBOSE", "false");
        let config = Config::from_env();
        assert_eq!(config.api_base, "http://127.0.0.1:8080");
        assert_eq!(config.token.as_deref(), Some("tok"));
        assert_eq!(
            config.gateway.gateway_url.as_deref(),
            Some("ws://127.0.0.1:8080/gateway")
        );
        assert_eq!(config.gateway.intents, 513);
        assert_eq!(config.gateway.heartbeat_ack_timeout, Duration::from_millis(2500));
        assert_eq!(config.gateway.reconnect_delay, Duration::from_millis(100));
        assert!(!config.gateway.verbose_logging);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back_to_defaults() {
        clear_env();
        std::env::set_var("CORDLINK_INTENTS", "all");
        std::env::set_var("CORDLINK_HEARTBEAT_ACK_TIMEOUT_MS", "0");
        std::env::set_var("CORDLINK_RECONNECT_DELAY_MS", "-5");
        std::env::set_var("CORDLINK_TOKEN", "  ");
        let config = Config::from_env();
        assert_eq!(config.gateway.intents, DEFAULT_INTENTS);
        assert_eq!(config.gateway.heartbeat_ack_timeout, DEFAULT_ACK_TIMEOUT);
        assert_eq!(config.gateway.reconnect_delay, DEFAULT_RECONNECT_DELAY);
        assert!(config.token.is_none());
        clear_env();
    }
}
