use crate::sse::bridge::{BridgeConfig, DEFAULT_CHANNEL};
use crate::sse::hub::DEFAULT_QUEUE_CAPACITY;
use dotenvy::dotenv;
use resilience::BackoffConfig;
use serde::Serialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub app: AppConfig,
    pub log_format: LogFormat,
    /// `None` runs the service without a relay bridge
    pub redis: Option<RedisConfig>,
    pub sse: SseConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected text or json, got {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SseConfig {
    pub relay_channel: String,
    pub queue_capacity: usize,
    pub heartbeat_secs: u64,
    pub publish_timeout_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            relay_channel: DEFAULT_CHANNEL.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            heartbeat_secs: 25,
            publish_timeout_ms: 2000,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

impl SseConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            channel: self.relay_channel.clone(),
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            reconnect: BackoffConfig {
                initial: Duration::from_millis(self.reconnect_initial_ms),
                max: Duration::from_millis(self.reconnect_max_ms),
                ..BackoffConfig::default()
            },
        }
    }
}

impl Config {
    /// Load configuration from the process environment (and `.env` if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SseConfig::default();

        let redis = lookup("REDIS_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .map(|url| RedisConfig { url });

        let relay_channel = lookup("SSE_RELAY_CHANNEL")
            .filter(|channel| !channel.trim().is_empty())
            .unwrap_or(defaults.relay_channel);

        let queue_capacity: usize =
            parse_or(&lookup, "SSE_QUEUE_CAPACITY", defaults.queue_capacity)?;
        let heartbeat_secs: u64 = parse_or(&lookup, "SSE_HEARTBEAT_SECS", defaults.heartbeat_secs)?;
        at_least_one("SSE_QUEUE_CAPACITY", queue_capacity as u64)?;
        at_least_one("SSE_HEARTBEAT_SECS", heartbeat_secs)?;

        let reconnect_initial_ms =
            parse_or(&lookup, "SSE_RECONNECT_INITIAL_MS", defaults.reconnect_initial_ms)?;
        let reconnect_max_ms = parse_or(&lookup, "SSE_RECONNECT_MAX_MS", defaults.reconnect_max_ms)?;
        at_least_one("SSE_RECONNECT_INITIAL_MS", reconnect_initial_ms)?;
        if reconnect_max_ms < reconnect_initial_ms {
            return Err(ConfigError::Invalid {
                key: "SSE_RECONNECT_MAX_MS",
                value: reconnect_max_ms.to_string(),
                reason: "must not be below SSE_RECONNECT_INITIAL_MS".to_string(),
            });
        }

        Ok(Config {
            app: AppConfig {
                env: lookup("APP_ENV").unwrap_or_else(|| "development".to_string()),
                host: lookup("APP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "APP_PORT", 8000)?,
            },
            log_format: parse_or(&lookup, "LOG_FORMAT", LogFormat::Text)?,
            redis,
            sse: SseConfig {
                relay_channel,
                queue_capacity,
                heartbeat_secs,
                publish_timeout_ms: parse_or(
                    &lookup,
                    "SSE_PUBLISH_TIMEOUT_MS",
                    defaults.publish_timeout_ms,
                )?,
                reconnect_initial_ms,
                reconnect_max_ms,
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.app.host, self.app.port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    value: value.clone(),
                    reason: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

fn at_least_one(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}
