use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Broad error category used for listener-facing payloads and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelErrorCategory {
    /// Invalid endpoint, unsupported state, or other configuration issue.
    Config,
    /// Establishing the connection failed.
    Connect,
    /// Reading from or writing to an open connection failed.
    Transport,
    /// Inbound data did not follow the frame format.
    Protocol,
    /// A registered listener or handler failed.
    Listener,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload used across the channel client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChannelError {
    /// High-level error category.
    pub category: ChannelErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ChannelError {
    /// Construct a new channel error.
    pub fn new(
        category: ChannelErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Connection establishment failure.
    pub fn connect(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ChannelErrorCategory::Connect, code, message)
    }

    /// Failure on an already open connection.
    pub fn transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ChannelErrorCategory::Transport, code, message)
    }

    /// Malformed inbound data.
    pub fn protocol(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ChannelErrorCategory::Protocol, code, message)
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ConnectionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChannelErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while connection is in state {current:?}"),
        )
    }
}

/// Map HTTP status codes returned by a failed upgrade to error categories.
pub fn classify_http_status(status: u16) -> ChannelErrorCategory {
    match status {
        408 | 429 => ChannelErrorCategory::Connect,
        400..=499 => ChannelErrorCategory::Config,
        500..=599 => ChannelErrorCategory::Connect,
        _ => ChannelErrorCategory::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(401), ChannelErrorCategory::Config);
        assert_eq!(classify_http_status(403), ChannelErrorCategory::Config);
        assert_eq!(classify_http_status(408), ChannelErrorCategory::Connect);
        assert_eq!(classify_http_status(429), ChannelErrorCategory::Connect);
        assert_eq!(classify_http_status(404), ChannelErrorCategory::Config);
        assert_eq!(classify_http_status(503), ChannelErrorCategory::Connect);
        assert_eq!(classify_http_status(700), ChannelErrorCategory::Internal);
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err = ChannelError::invalid_state(ConnectionState::Disconnected, "on_connected");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, ChannelErrorCategory::Internal);
    }

    #[test]
    fn display_includes_category_and_code() {
        let err = ChannelError::connect("connect_timeout", "handshake timed out");
        assert_eq!(err.to_string(), "Connect:connect_timeout: handshake timed out");
    }
}
