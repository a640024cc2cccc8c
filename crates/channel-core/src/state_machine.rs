use std::time::Duration;

use crate::{
    error::ChannelError,
    retry::ReconnectPolicy,
    types::{ChannelEvent, ConnectionState},
};

/// What the session loop should do after a connection loss or a failed
/// reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Sleep for `delay`, then run attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Budget spent; the machine is already `Disconnected`.
    Exhausted { attempts: u32 },
}

/// Connection lifecycle and backoff counter.
///
/// Every transition returns the lifecycle events it produced so the caller
/// can publish them. Reconnects are only scheduled from `Connected` (an
/// unexpected close) or from `Reconnecting` (a failed attempt); a
/// caller-initiated connect that fails settles in `Disconnected`.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

impl ConnectionStateMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive failed reconnect attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Caller-initiated connect. Allowed from any state; replaces whatever
    /// attempt was pending.
    pub fn begin_connect(&mut self) -> Vec<ChannelEvent> {
        self.set_state(ConnectionState::Connecting)
    }

    /// The transport opened. Resets the backoff counter.
    pub fn on_connected(&mut self) -> Result<Vec<ChannelEvent>, ChannelError> {
        self.require_any_of(
            &[ConnectionState::Connecting, ConnectionState::Reconnecting],
            "on_connected",
        )?;
        self.attempts = 0;
        Ok(self.set_state(ConnectionState::Connected))
    }

    /// A caller-initiated connect failed. No reconnect is scheduled.
    pub fn on_connect_failed(&mut self) -> Result<Vec<ChannelEvent>, ChannelError> {
        self.require_any_of(&[ConnectionState::Connecting], "on_connect_failed")?;
        Ok(self.set_state(ConnectionState::Disconnected))
    }

    /// The open connection closed without `disconnect()` being called.
    pub fn on_connection_lost(
        &mut self,
    ) -> Result<(Vec<ChannelEvent>, ReconnectDecision), ChannelError> {
        self.require_any_of(&[ConnectionState::Connected], "on_connection_lost")?;
        Ok(self.schedule_reconnect())
    }

    /// A reconnect attempt failed.
    pub fn on_attempt_failed(
        &mut self,
    ) -> Result<(Vec<ChannelEvent>, ReconnectDecision), ChannelError> {
        self.require_any_of(&[ConnectionState::Reconnecting], "on_attempt_failed")?;
        Ok(self.schedule_reconnect())
    }

    /// The remote asked for a fresh connection. The next attempt starts
    /// immediately and does not consume the reconnect budget.
    pub fn on_reconnect_requested(&mut self) -> Result<Vec<ChannelEvent>, ChannelError> {
        self.require_any_of(&[ConnectionState::Connected], "on_reconnect_requested")?;
        Ok(self.set_state(ConnectionState::Reconnecting))
    }

    /// Explicit disconnect from any state. Idempotent.
    pub fn on_disconnect(&mut self) -> Vec<ChannelEvent> {
        self.set_state(ConnectionState::Disconnected)
    }

    fn schedule_reconnect(&mut self) -> (Vec<ChannelEvent>, ReconnectDecision) {
        if self.policy.is_exhausted(self.attempts) {
            let attempts = self.attempts;
            let mut events = self.set_state(ConnectionState::Disconnected);
            events.push(ChannelEvent::ReconnectExhausted { attempts });
            return (events, ReconnectDecision::Exhausted { attempts });
        }

        let delay = self.policy.delay_for_attempt(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        let attempt = self.attempts;

        let mut events = self.set_state(ConnectionState::Reconnecting);
        events.push(ChannelEvent::ReconnectScheduled {
            attempt,
            delay_ms: delay.as_millis().min(u128::from(u64::MAX)) as u64,
        });
        (events, ReconnectDecision::Retry { attempt, delay })
    }

    fn require_any_of(
        &self,
        expected: &[ConnectionState],
        action: &str,
    ) -> Result<(), ChannelError> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(ChannelError::invalid_state(self.state, action))
        }
    }

    fn set_state(&mut self, next: ConnectionState) -> Vec<ChannelEvent> {
        if self.state == next {
            return Vec::new();
        }
        self.state = next;
        vec![ChannelEvent::StateChanged { state: next }]
    }
}
