use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};

use crate::{error::ChannelError, types::ConnectionStatus};

/// Milliseconds since the Unix epoch, used to stamp liveness frames.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

/// Payload carried by `ping`/`pong` frames.
pub fn liveness_payload(timestamp_ms: u64) -> Value {
    json!({ "timestamp": timestamp_ms })
}

/// Convert a connection status to the payload delivered to `connection`
/// listeners, for example `{"status": "connected"}`.
pub fn connection_payload(status: &ConnectionStatus) -> Value {
    serde_json::to_value(status).unwrap_or(Value::Null)
}

/// Convert an error into the payload delivered to `error` listeners.
pub fn error_payload(error: &ChannelError) -> Value {
    json!({
        "error": {
            "category": error.category,
            "code": error.code,
            "message": error.message,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_payload_is_bare_status() {
        assert_eq!(
            connection_payload(&ConnectionStatus::Connected),
            json!({ "status": "connected" })
        );
    }

    #[test]
    fn reconnect_statuses_carry_attempt_details() {
        assert_eq!(
            connection_payload(&ConnectionStatus::Reconnecting {
                attempt: 2,
                delay_ms: 2_000,
            }),
            json!({ "status": "reconnecting", "attempt": 2, "delay_ms": 2_000 })
        );
        assert_eq!(
            connection_payload(&ConnectionStatus::ReconnectExhausted { attempts: 5 }),
            json!({ "status": "reconnect_exhausted", "attempts": 5 })
        );
        assert_eq!(
            connection_payload(&ConnectionStatus::Disconnected),
            json!({ "status": "disconnected" })
        );
    }

    #[test]
    fn error_payload_uses_stable_code_and_snake_case_category() {
        let payload = error_payload(&ChannelError::connect("connect_failed", "refused"));
        assert_eq!(
            payload,
            json!({
                "error": {
                    "category": "connect",
                    "code": "connect_failed",
                    "message": "refused",
                }
            })
        );
    }

    #[test]
    fn clock_is_past_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
