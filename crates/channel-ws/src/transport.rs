use std::time::Duration;

use channel_core::{
    ChannelError, ChannelErrorCategory, Connection, Connector, TransportEvent,
    classify_http_status,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message, client::IntoClientRequest},
};
use tracing::{debug, trace, warn};

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `ws://`/`wss://` connections with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

impl WsConnector {
    pub fn new(handshake_timeout: Duration) -> Self {
        install_crypto_provider();
        Self { handshake_timeout }
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }
}

impl Connector for WsConnector {
    type Connection = WsConnection;

    async fn connect(&self, endpoint: &str) -> Result<WsConnection, ChannelError> {
        let request = endpoint
            .into_client_request()
            .map_err(map_handshake_error)?;

        let handshake = tokio::time::timeout(self.handshake_timeout, connect_async(request))
            .await
            .map_err(|_| {
                ChannelError::connect(
                    "connect_timeout",
                    format!(
                        "websocket handshake with {endpoint} timed out after {}ms",
                        self.handshake_timeout.as_millis()
                    ),
                )
            })?;

        let (stream, response) = handshake.map_err(map_handshake_error)?;
        debug!(
            %endpoint,
            status = response.status().as_u16(),
            "websocket handshake complete"
        );
        Ok(WsConnection { stream })
    }
}

/// An open WebSocket connection.
pub struct WsConnection {
    stream: WsStream,
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection").finish_non_exhaustive()
    }
}

impl Connection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| ChannelError::transport("send_failed", err.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text.to_string()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return TransportEvent::Text(text),
                    Err(err) => {
                        warn!(error = %err, "dropping non-utf8 binary frame");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| format!("{}: {}", u16::from(f.code), &*f.reason));
                    return TransportEvent::Closed { reason };
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    trace!("websocket control frame");
                }
                Some(Err(err)) => {
                    return TransportEvent::Error(ChannelError::transport(
                        "receive_failed",
                        err.to_string(),
                    ));
                }
                None => return TransportEvent::Closed { reason: None },
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "websocket close was not clean");
        }
    }
}

/// `wss://` handshakes need a process-wide rustls provider. Another component
/// may have installed one already, which is fine.
fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn map_handshake_error(err: tungstenite::Error) -> ChannelError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            ChannelError::new(
                classify_http_status(status),
                "upgrade_rejected",
                format!("server rejected websocket upgrade with HTTP {status}"),
            )
        }
        tungstenite::Error::Url(err) => ChannelError::new(
            ChannelErrorCategory::Config,
            "invalid_endpoint",
            err.to_string(),
        ),
        other => ChannelError::connect("connect_failed", other.to_string()),
    }
}
