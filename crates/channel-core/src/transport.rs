use std::future::Future;

use crate::error::ChannelError;

/// Something that happened on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame.
    Text(String),
    /// The connection closed, cleanly or not.
    Closed { reason: Option<String> },
    /// The connection failed; it is unusable afterwards.
    Error(ChannelError),
}

/// Opens connections to an endpoint.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(
        &self,
        endpoint: &str,
    ) -> impl Future<Output = Result<Self::Connection, ChannelError>> + Send;
}

/// One open bidirectional text connection.
pub trait Connection: Send + 'static {
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Wait for the next event. Must be cancel-safe: dropping the future
    /// before it completes must not lose an event.
    fn next_event(&mut self) -> impl Future<Output = TransportEvent> + Send;

    /// Close the connection. Best-effort.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
