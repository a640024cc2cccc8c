//! Core contract for the live dashboard channel.
//!
//! This crate defines the wire frame model, the listener registry used for
//! event fan-out, the connection lifecycle state machine, reconnect policy and
//! the common error/channel abstractions. It performs no I/O; transports plug
//! in through the [`transport`] traits.

/// Lifecycle broadcast and per-connection outbound queue primitives.
pub mod channel;
/// Client configuration and endpoint validation.
pub mod config;
/// Stable channel error types and HTTP classification helpers.
pub mod error;
/// Wire frames and system frame classification.
pub mod frame;
/// Status/error payloads delivered to local listeners.
pub mod normalization;
/// Listener and handler registries with isolated dispatch.
pub mod registry;
/// Backoff policy used by the reconnect loop.
pub mod retry;
/// Connection lifecycle state machine.
pub mod state_machine;
/// Transport traits implemented by concrete connection backends.
pub mod transport;
/// Public state and event types.
pub mod types;

pub use channel::{
    LifecycleChannel, LifecycleStream, OutboundReceiver, OutboundSender, outbound_queue,
};
pub use config::{ChannelConfig, DEFAULT_ENDPOINT, validate_endpoint};
pub use error::{ChannelError, ChannelErrorCategory, classify_http_status};
pub use frame::{Frame, FrameClass, SystemFrame};
pub use normalization::{connection_payload, error_payload, liveness_payload, now_ms};
pub use registry::{DispatchReport, EventRegistry, Handler, HandlerResult, Listener, Subscription};
pub use retry::ReconnectPolicy;
pub use state_machine::{ConnectionStateMachine, ReconnectDecision};
pub use transport::{Connection, Connector, TransportEvent};
pub use types::{
    CONNECTION_EVENT, ChannelEvent, ConnectionState, ConnectionStatus, ERROR_EVENT, SendOutcome,
};
