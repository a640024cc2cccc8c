use std::time::Duration;

use url::Url;

use crate::{
    error::{ChannelError, ChannelErrorCategory},
    retry::ReconnectPolicy,
};

/// Local development endpoint used when no address is supplied.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_LIFECYCLE_BUFFER: usize = 64;

/// Runtime tuning for a channel client instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Endpoint used by `connect_default`.
    pub default_endpoint: String,
    /// Period of outbound `ping` frames while connected.
    pub heartbeat_interval: Duration,
    /// Backoff and attempt budget for unexpected disconnects.
    pub reconnect: ReconnectPolicy,
    /// Treat the peer as dead when nothing arrives for this long.
    ///
    /// Checked on heartbeat ticks. `None` relies on the transport close event.
    pub liveness_timeout: Option<Duration>,
    /// Capacity of the lifecycle broadcast channel.
    pub lifecycle_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            default_endpoint: DEFAULT_ENDPOINT.to_owned(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect: ReconnectPolicy::default(),
            liveness_timeout: None,
            lifecycle_buffer: DEFAULT_LIFECYCLE_BUFFER,
        }
    }
}

impl ChannelConfig {
    pub fn with_default_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.default_endpoint = endpoint.into();
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_liveness_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.liveness_timeout = timeout;
        self
    }
}

/// Validate a channel endpoint and return its normalized form.
///
/// Only `ws://` and `wss://` URLs with a host are accepted.
pub fn validate_endpoint(raw: &str) -> Result<String, ChannelError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|err| {
        ChannelError::new(
            ChannelErrorCategory::Config,
            "invalid_endpoint",
            format!("invalid endpoint '{trimmed}': {err}"),
        )
    })?;

    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(ChannelError::new(
            ChannelErrorCategory::Config,
            "unsupported_scheme",
            format!("endpoint scheme must be ws or wss, got '{}'", parsed.scheme()),
        ));
    }
    if parsed.host_str().is_none() {
        return Err(ChannelError::new(
            ChannelErrorCategory::Config,
            "invalid_endpoint",
            format!("endpoint '{trimmed}' has no host"),
        ));
    }

    Ok(parsed.to_string())
}
