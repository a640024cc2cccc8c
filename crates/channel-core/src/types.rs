use serde::{Deserialize, Serialize};

/// Event type used for locally generated connection status notifications.
pub const CONNECTION_EVENT: &str = "connection";
/// Event type used for locally generated transport/establishment errors.
pub const ERROR_EVENT: &str = "error";

/// Connection lifecycle state reported to collaborators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and nothing scheduled.
    Disconnected,
    /// A caller-initiated connection attempt is in flight.
    Connecting,
    /// Connection is open; heartbeats are running.
    Connected,
    /// Connection dropped unexpectedly; a reconnect is scheduled or in flight.
    Reconnecting,
}

/// Status payload delivered to `connection` listeners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting {
        /// 1-based number of the attempt about to run.
        attempt: u32,
        /// Delay before the attempt starts.
        delay_ms: u64,
    },
    ReconnectExhausted {
        /// Number of failed attempts before giving up.
        attempts: u32,
    },
}

/// Lifecycle event broadcast by the client on every state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Connection state transition.
    StateChanged {
        /// New connection state.
        state: ConnectionState,
    },
    /// A reconnect attempt was scheduled after a failure or unexpected close.
    ReconnectScheduled {
        /// 1-based attempt number.
        attempt: u32,
        /// Backoff delay before the attempt.
        delay_ms: u64,
    },
    /// The reconnect budget is spent; the client stays disconnected.
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Result of a best-effort `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame was handed to the active connection.
    Queued,
    /// Client was not connected; the frame was discarded.
    Dropped,
}
