//! Environment-backed runtime configuration for `channel-smoke`.

use std::{env, time::Duration};

use channel_core::{ChannelConfig, DEFAULT_ENDPOINT, ReconnectPolicy, validate_endpoint};
use thiserror::Error;

const DEFAULT_HEARTBEAT_MS: u64 = 30_000;
const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Runtime configuration used by the smoke binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// Normalized endpoint to connect to.
    pub endpoint: String,
    /// Client tuning.
    pub channel: ChannelConfig,
    /// Application event types to log.
    pub subscribe: Vec<String>,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let raw_endpoint = optional_trimmed_env("CHANNEL_ENDPOINT", &mut lookup)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned());
        let endpoint =
            validate_endpoint(&raw_endpoint).map_err(|err| ConfigError::InvalidValue {
                key: "CHANNEL_ENDPOINT",
                value: raw_endpoint.clone(),
                reason: err.message,
            })?;

        let heartbeat_ms = parse_optional_u64("CHANNEL_HEARTBEAT_MS", &mut lookup)?
            .unwrap_or(DEFAULT_HEARTBEAT_MS);
        let reconnect_base_ms = parse_optional_u64("CHANNEL_RECONNECT_BASE_MS", &mut lookup)?
            .unwrap_or(DEFAULT_RECONNECT_BASE_MS);
        let reconnect_max_ms = parse_optional_u64("CHANNEL_RECONNECT_MAX_MS", &mut lookup)?
            .unwrap_or(DEFAULT_RECONNECT_MAX_MS);
        let reconnect_max_attempts =
            parse_optional_u32("CHANNEL_RECONNECT_MAX_ATTEMPTS", &mut lookup)?
                .unwrap_or(DEFAULT_RECONNECT_MAX_ATTEMPTS);
        let liveness_timeout_ms = parse_optional_u64("CHANNEL_LIVENESS_TIMEOUT_MS", &mut lookup)?;

        require_positive("CHANNEL_HEARTBEAT_MS", heartbeat_ms)?;
        require_positive("CHANNEL_RECONNECT_BASE_MS", reconnect_base_ms)?;
        if reconnect_max_ms < reconnect_base_ms {
            return Err(ConfigError::InvalidValue {
                key: "CHANNEL_RECONNECT_MAX_MS",
                value: reconnect_max_ms.to_string(),
                reason: format!("must be at least CHANNEL_RECONNECT_BASE_MS ({reconnect_base_ms})"),
            });
        }
        if let Some(timeout_ms) = liveness_timeout_ms {
            require_positive("CHANNEL_LIVENESS_TIMEOUT_MS", timeout_ms)?;
        }

        let subscribe = optional_trimmed_env("CHANNEL_SUBSCRIBE", &mut lookup)
            .map(|value| parse_event_types(&value))
            .unwrap_or_default();

        let channel = ChannelConfig::default()
            .with_default_endpoint(endpoint.clone())
            .with_heartbeat_interval(Duration::from_millis(heartbeat_ms))
            .with_reconnect(ReconnectPolicy::new(
                reconnect_base_ms,
                reconnect_max_ms,
                reconnect_max_attempts,
            ))
            .with_liveness_timeout(liveness_timeout_ms.map(Duration::from_millis));

        Ok(Self {
            endpoint,
            channel,
            subscribe,
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed or is out of range.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u32<F>(key: &'static str, lookup: &mut F) -> Result<Option<u32>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u32>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn require_positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: "0".to_owned(),
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}

/// Split a comma-separated list of event types, dropping blanks and
/// duplicates while keeping first-seen order.
fn parse_event_types(value: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for kind in value.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        if !out.iter().any(|existing| existing == kind) {
            out.push(kind.to_owned());
        }
    }
    out
}
