//! WebSocket-backed live channel client.
//!
//! [`ChannelClient`] owns one connection at a time, fans inbound application
//! frames out to registered listeners, answers and issues liveness pings, and
//! reconnects with exponential backoff after unexpected drops. The transport
//! is pluggable through [`channel_core::Connector`]; [`WsConnector`] is the
//! production implementation.

mod client;
mod transport;

#[cfg(test)]
mod test_support;

pub use client::ChannelClient;
pub use transport::{WsConnection, WsConnector};

pub use channel_core::{
    ChannelConfig, ChannelError, ChannelErrorCategory, ChannelEvent, ConnectionState,
    ConnectionStatus, Frame, Handler, HandlerResult, LifecycleStream, ReconnectPolicy,
    SendOutcome, Subscription,
};
