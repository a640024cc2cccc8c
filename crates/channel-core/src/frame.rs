use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::ChannelError, normalization::liveness_payload};

/// Reserved control frames handled inside the client and never delivered to
/// application listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemFrame {
    /// Liveness check (`ping`).
    Ping,
    /// Liveness acknowledgement (`pong`).
    Pong,
    /// Server request to tear down and re-establish the connection.
    Reconnect,
}

impl SystemFrame {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Reconnect => "reconnect",
        }
    }

    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "ping" => Some(Self::Ping),
            "pong" => Some(Self::Pong),
            "reconnect" => Some(Self::Reconnect),
            _ => None,
        }
    }
}

/// Classification of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    System(SystemFrame),
    Application,
}

/// One `(type, payload)` unit on the wire, encoded as
/// `{"type": "...", "payload": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Outbound liveness ping stamped with `timestamp_ms`.
    pub fn ping(timestamp_ms: u64) -> Self {
        Self::new(SystemFrame::Ping.as_str(), liveness_payload(timestamp_ms))
    }

    /// Reply to an inbound ping stamped with `timestamp_ms`.
    pub fn pong(timestamp_ms: u64) -> Self {
        Self::new(SystemFrame::Pong.as_str(), liveness_payload(timestamp_ms))
    }

    pub fn class(&self) -> FrameClass {
        match SystemFrame::from_type(&self.kind) {
            Some(system) => FrameClass::System(system),
            None => FrameClass::Application,
        }
    }

    pub fn encode(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self)
            .map_err(|err| ChannelError::protocol("frame_encode_error", err.to_string()))
    }

    /// Decode one text frame. A missing `payload` decodes as `null`; a missing
    /// or empty `type` is rejected.
    pub fn decode(text: &str) -> Result<Self, ChannelError> {
        let frame = serde_json::from_str::<Frame>(text)
            .map_err(|err| ChannelError::protocol("frame_decode_error", err.to_string()))?;
        if frame.kind.is_empty() {
            return Err(ChannelError::protocol(
                "frame_missing_type",
                "frame type must be a non-empty string",
            ));
        }
        Ok(frame)
    }
}
