use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use channel_core::{
    CONNECTION_EVENT, ChannelConfig, ChannelError, ChannelEvent, Connection, ConnectionState,
    ConnectionStateMachine, ConnectionStatus, Connector, ERROR_EVENT, EventRegistry, Frame,
    FrameClass, Handler, LifecycleChannel, LifecycleStream, OutboundReceiver, OutboundSender,
    ReconnectDecision, SendOutcome, Subscription, SystemFrame, TransportEvent, connection_payload,
    error_payload, now_ms, outbound_queue, validate_endpoint,
};
use serde_json::Value;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use uuid::Uuid;

use crate::transport::WsConnector;

type ReadySender = oneshot::Sender<Result<(), ChannelError>>;

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Live channel client.
///
/// Owns at most one connection at a time. A background session task per
/// `connect()` call drives the connection: it dispatches inbound application
/// frames to listeners, writes outbound frames, sends heartbeats and runs the
/// reconnect loop after unexpected closes.
///
/// Clones share the same connection and registries. When the last clone is
/// dropped the session is cancelled.
pub struct ChannelClient<C: Connector = WsConnector> {
    inner: Arc<ClientInner<C>>,
    _owner: Arc<DropGuard>,
}

impl<C: Connector> Clone for ChannelClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _owner: Arc::clone(&self._owner),
        }
    }
}

impl<C: Connector> fmt::Debug for ChannelClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.inner.lock();
        f.debug_struct("ChannelClient")
            .field("state", &shared.machine.state())
            .field("reconnect_attempts", &shared.machine.attempts())
            .field("endpoint", &shared.endpoint)
            .finish_non_exhaustive()
    }
}

struct ClientInner<C> {
    connector: C,
    config: ChannelConfig,
    registry: EventRegistry,
    lifecycle: LifecycleChannel,
    root: CancellationToken,
    shared: Mutex<SharedState>,
}

struct SharedState {
    machine: ConnectionStateMachine,
    endpoint: Option<String>,
    outbound: Option<OutboundSender>,
    session: Option<RunningSession>,
    /// Local notifications waiting for dispatch, in transition order.
    notices: VecDeque<Notice>,
    /// Set while some caller is delivering `notices`.
    draining: bool,
}

struct Notice {
    kind: &'static str,
    payload: Value,
}

impl SharedState {
    fn queue_status(&mut self, status: &ConnectionStatus) {
        self.notices.push_back(Notice {
            kind: CONNECTION_EVENT,
            payload: connection_payload(status),
        });
    }

    fn queue_error(&mut self, err: &ChannelError) {
        self.notices.push_back(Notice {
            kind: ERROR_EVENT,
            payload: error_payload(err),
        });
    }
}

struct RunningSession {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl ChannelClient<WsConnector> {
    /// WebSocket client with the given configuration.
    pub fn with_config(config: ChannelConfig) -> Self {
        Self::new(WsConnector::default(), config)
    }
}

impl Default for ChannelClient<WsConnector> {
    fn default() -> Self {
        Self::with_config(ChannelConfig::default())
    }
}

impl<C: Connector> ChannelClient<C> {
    pub fn new(connector: C, config: ChannelConfig) -> Self {
        let root = CancellationToken::new();
        let inner = ClientInner {
            connector,
            registry: EventRegistry::new(),
            lifecycle: LifecycleChannel::new(config.lifecycle_buffer),
            root: root.clone(),
            shared: Mutex::new(SharedState {
                machine: ConnectionStateMachine::new(config.reconnect),
                endpoint: None,
                outbound: None,
                session: None,
                notices: VecDeque::new(),
                draining: false,
            }),
            config,
        };
        Self {
            inner: Arc::new(inner),
            _owner: Arc::new(root.drop_guard()),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Open a connection to `endpoint`.
    ///
    /// Replaces any connection or attempt already in progress. Resolves once
    /// the connection is open (`Ok`) or the attempt failed (`Err`). A failed
    /// attempt is reported to `error` listeners and is not retried.
    pub async fn connect(&self, endpoint: &str) -> Result<(), ChannelError> {
        let endpoint = match validate_endpoint(endpoint) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                warn!(error = %err, "rejecting channel endpoint");
                self.inner.notify_error(&err);
                return Err(err);
            }
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = self.inner.root.child_token();
        let events = {
            let mut shared = self.inner.lock();
            if let Some(previous) = shared.session.take() {
                debug!("replacing active channel session");
                previous.stop.cancel();
            }
            shared.outbound = None;
            shared.endpoint = Some(endpoint.clone());
            let events = shared.machine.begin_connect();

            let session = Session {
                inner: Arc::clone(&self.inner),
                endpoint,
                stop: stop.clone(),
                ready: Some(ready_tx),
            };
            let span = info_span!(
                "channel_session",
                session_id = %Uuid::new_v4(),
                endpoint = %session.endpoint
            );
            let task = tokio::spawn(session.run().instrument(span));
            shared.session = Some(RunningSession { stop, task });
            events
        };
        self.inner.lifecycle.emit_all(events);

        match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::connect(
                "connect_cancelled",
                "connection attempt was cancelled before it completed",
            )),
        }
    }

    /// `connect` to the configured default endpoint.
    pub async fn connect_default(&self) -> Result<(), ChannelError> {
        let endpoint = self.inner.config.default_endpoint.clone();
        self.connect(&endpoint).await
    }

    /// Drop the current connection and connect again to the last endpoint.
    pub async fn reconnect(&self) -> Result<(), ChannelError> {
        let endpoint = self
            .endpoint()
            .unwrap_or_else(|| self.inner.config.default_endpoint.clone());
        self.disconnect();
        self.connect(&endpoint).await
    }

    /// Close the connection and cancel heartbeats and any pending reconnect.
    /// Idempotent.
    pub fn disconnect(&self) {
        drop(self.stop_session());
    }

    /// Disconnect and wait for the session task to finish.
    pub async fn shutdown(&self) {
        let Some(task) = self.stop_session() else {
            return;
        };
        if let Err(err) = task.await
            && err.is_panic()
        {
            error!(error = %err, "channel session task panicked");
        }
    }

    /// Send a frame on the open connection.
    ///
    /// Frames sent while not connected are dropped with a warning.
    pub fn send(&self, kind: impl Into<String>, payload: Value) -> SendOutcome {
        let frame = Frame::new(kind, payload);
        let (state, outbound) = {
            let shared = self.inner.lock();
            let state = shared.machine.state();
            let outbound = match state {
                ConnectionState::Connected => shared.outbound.clone(),
                _ => None,
            };
            (state, outbound)
        };

        let Some(outbound) = outbound else {
            warn!(event_type = %frame.kind, ?state, "dropping outbound frame: not connected");
            return SendOutcome::Dropped;
        };
        match outbound.push(frame) {
            Ok(()) => SendOutcome::Queued,
            Err(frame) => {
                warn!(event_type = %frame.kind, "dropping outbound frame: connection closed");
                SendOutcome::Dropped
            }
        }
    }

    /// Register `listener` for frames of type `kind`.
    pub fn subscribe<F>(&self, kind: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(kind, listener)
    }

    /// Register a fallible handler. Returns `false` if it is already
    /// registered for `kind`.
    pub fn on(&self, kind: impl Into<String>, handler: Handler) -> bool {
        self.inner.registry.on(kind, handler)
    }

    /// Remove a handler registered with `on`.
    pub fn off(&self, kind: &str, handler: &Handler) -> bool {
        self.inner.registry.off(kind, handler)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().machine.state()
    }

    /// Failed reconnect attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().machine.attempts()
    }

    /// Endpoint of the last `connect` call.
    pub fn endpoint(&self) -> Option<String> {
        self.inner.lock().endpoint.clone()
    }

    pub fn lifecycle(&self) -> LifecycleStream {
        self.inner.lifecycle.subscribe()
    }

    fn stop_session(&self) -> Option<JoinHandle<()>> {
        let (task, events) = {
            let mut shared = self.inner.lock();
            let task = shared.session.take().map(|session| {
                session.stop.cancel();
                session.task
            });
            shared.outbound = None;
            let events = shared.machine.on_disconnect();
            if !events.is_empty() {
                shared.queue_status(&ConnectionStatus::Disconnected);
            }
            (task, events)
        };

        if !events.is_empty() {
            info!("channel disconnected by caller");
            self.inner.lifecycle.emit_all(events);
        }
        self.inner.flush_notices();
        task
    }
}

impl<C> ClientInner<C> {
    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_error(&self, err: &ChannelError) {
        self.lock().queue_error(err);
        self.flush_notices();
    }

    /// Deliver queued notices one at a time, in queue order.
    ///
    /// Only one caller drains at a time. A notice queued while another caller
    /// (or a listener further up this stack) is draining is delivered by that
    /// caller, after the notice it is currently dispatching.
    fn flush_notices(&self) {
        {
            let mut shared = self.lock();
            if shared.draining || shared.notices.is_empty() {
                return;
            }
            shared.draining = true;
        }

        loop {
            let notice = {
                let mut shared = self.lock();
                match shared.notices.pop_front() {
                    Some(notice) => notice,
                    None => {
                        shared.draining = false;
                        return;
                    }
                }
            };
            self.registry.dispatch(notice.kind, &notice.payload);
        }
    }
}

enum SessionEnd {
    Stopped,
    Lost(Option<ChannelError>),
    ReconnectRequested,
}

struct Session<C: Connector> {
    inner: Arc<ClientInner<C>>,
    endpoint: String,
    stop: CancellationToken,
    ready: Option<ReadySender>,
}

impl<C: Connector> Session<C> {
    async fn run(mut self) {
        loop {
            let attempt = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return,
                result = self.inner.connector.connect(&self.endpoint) => result,
            };

            let mut connection = match attempt {
                Ok(connection) => connection,
                Err(err) => {
                    let Some(decision) = self.on_connect_failed(err) else {
                        return;
                    };
                    if !self.wait(decision).await {
                        return;
                    }
                    continue;
                }
            };

            let Some(outbound) = self.mark_connected() else {
                connection.close().await;
                return;
            };

            let end = self.drive(&mut connection, outbound).await;
            connection.close().await;

            match end {
                SessionEnd::Stopped => return,
                SessionEnd::ReconnectRequested => {
                    let requested = self.transition(|shared| {
                        shared.outbound = None;
                        Ok((shared.machine.on_reconnect_requested()?, ()))
                    });
                    if requested.is_none() {
                        return;
                    }
                    self.notify_status(&ConnectionStatus::Disconnected);
                }
                SessionEnd::Lost(err) => {
                    if let Some(err) = &err {
                        self.notify_error(err);
                    }
                    let Some(decision) = self.transition(|shared| {
                        shared.outbound = None;
                        shared.machine.on_connection_lost()
                    }) else {
                        return;
                    };
                    self.notify_status(&ConnectionStatus::Disconnected);
                    if !self.wait(decision).await {
                        return;
                    }
                }
            }
        }
    }

    fn on_connect_failed(&mut self, err: ChannelError) -> Option<ReconnectDecision> {
        warn!(error = %err, "connection attempt failed");

        if let Some(ready) = self.ready.take() {
            if self
                .transition(|shared| Ok((shared.machine.on_connect_failed()?, ())))
                .is_some()
            {
                self.notify_error(&err);
            }
            let _ = ready.send(Err(err));
            return None;
        }

        let decision = self.transition(|shared| shared.machine.on_attempt_failed())?;
        self.notify_error(&err);
        Some(decision)
    }

    fn mark_connected(&mut self) -> Option<OutboundReceiver> {
        let (outbound_tx, outbound_rx) = outbound_queue();
        self.transition(move |shared| {
            let events = shared.machine.on_connected()?;
            shared.outbound = Some(outbound_tx);
            Ok((events, ()))
        })?;

        info!("channel connected");
        self.notify_status(&ConnectionStatus::Connected);
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Ok(()));
        }
        Some(outbound_rx)
    }

    /// Sleep out a reconnect delay. Returns `false` when the session should
    /// end instead.
    async fn wait(&self, decision: ReconnectDecision) -> bool {
        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                let delay_ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
                info!(attempt, delay_ms, "reconnect scheduled");
                self.notify_status(&ConnectionStatus::Reconnecting { attempt, delay_ms });
                tokio::select! {
                    biased;
                    _ = self.stop.cancelled() => false,
                    _ = sleep(delay) => true,
                }
            }
            ReconnectDecision::Exhausted { attempts } => {
                error!(attempts, "reconnect attempts exhausted; staying disconnected");
                self.notify_status(&ConnectionStatus::ReconnectExhausted { attempts });
                false
            }
        }
    }

    async fn drive(
        &self,
        connection: &mut C::Connection,
        mut outbound: OutboundReceiver,
    ) -> SessionEnd {
        let period = self.inner.config.heartbeat_interval.max(MIN_HEARTBEAT);
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return SessionEnd::Stopped,
                event = connection.next_event() => match event {
                    TransportEvent::Text(text) => {
                        last_inbound = Instant::now();
                        if let Some(end) = self.handle_inbound(connection, &text).await {
                            return end;
                        }
                    }
                    TransportEvent::Closed { reason } => {
                        info!(
                            reason = reason.as_deref().unwrap_or("none"),
                            "connection closed by peer"
                        );
                        return SessionEnd::Lost(None);
                    }
                    TransportEvent::Error(err) => {
                        warn!(error = %err, "connection failed");
                        return SessionEnd::Lost(Some(err));
                    }
                },
                Some(frame) = outbound.recv() => {
                    if let Err(err) = self.write(connection, &frame).await {
                        return SessionEnd::Lost(Some(err));
                    }
                }
                _ = heartbeat.tick() => {
                    if let Some(timeout) = self.inner.config.liveness_timeout
                        && last_inbound.elapsed() > timeout
                    {
                        let err = ChannelError::transport(
                            "liveness_timeout",
                            format!("no inbound traffic for {}ms", timeout.as_millis()),
                        );
                        warn!(error = %err, "peer considered dead");
                        return SessionEnd::Lost(Some(err));
                    }
                    trace!("sending heartbeat");
                    if let Err(err) = self.write(connection, &Frame::ping(now_ms())).await {
                        return SessionEnd::Lost(Some(err));
                    }
                }
            }
        }
    }

    async fn handle_inbound(
        &self,
        connection: &mut C::Connection,
        text: &str,
    ) -> Option<SessionEnd> {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping malformed inbound frame");
                return None;
            }
        };

        match frame.class() {
            FrameClass::System(SystemFrame::Ping) => {
                trace!("answering ping");
                if let Err(err) = self.write(connection, &Frame::pong(now_ms())).await {
                    return Some(SessionEnd::Lost(Some(err)));
                }
                None
            }
            FrameClass::System(SystemFrame::Pong) => {
                trace!("pong received");
                None
            }
            FrameClass::System(SystemFrame::Reconnect) => {
                info!("peer requested reconnect");
                Some(SessionEnd::ReconnectRequested)
            }
            FrameClass::Application => {
                let report = self.inner.registry.dispatch(&frame.kind, &frame.payload);
                if report.failed > 0 {
                    debug!(
                        event_type = %frame.kind,
                        delivered = report.delivered,
                        failed = report.failed,
                        "frame dispatched with failures"
                    );
                }
                None
            }
        }
    }

    async fn write(
        &self,
        connection: &mut C::Connection,
        frame: &Frame,
    ) -> Result<(), ChannelError> {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(err) => {
                warn!(event_type = %frame.kind, error = %err, "dropping unencodable frame");
                return Ok(());
            }
        };
        connection.send_text(text).await.inspect_err(|err| {
            warn!(event_type = %frame.kind, error = %err, "write failed");
        })
    }

    /// Apply a state transition unless this session was cancelled, then
    /// publish its lifecycle events.
    fn transition<T>(
        &self,
        apply: impl FnOnce(&mut SharedState) -> Result<(Vec<ChannelEvent>, T), ChannelError>,
    ) -> Option<T> {
        let applied = {
            let mut shared = self.inner.lock();
            if self.stop.is_cancelled() {
                return None;
            }
            apply(&mut shared)
        };

        match applied {
            Ok((events, value)) => {
                self.inner.lifecycle.emit_all(events);
                Some(value)
            }
            Err(err) => {
                warn!(error = %err, "ignoring out-of-order session transition");
                None
            }
        }
    }

    /// Publish a status unless this session was cancelled. The check runs
    /// under the state lock, so nothing from a stale session can be queued
    /// behind the `disconnected` notice of `disconnect()`.
    fn notify_status(&self, status: &ConnectionStatus) {
        {
            let mut shared = self.inner.lock();
            if self.stop.is_cancelled() {
                return;
            }
            shared.queue_status(status);
        }
        self.inner.flush_notices();
    }

    fn notify_error(&self, err: &ChannelError) {
        {
            let mut shared = self.inner.lock();
            if self.stop.is_cancelled() {
                return;
            }
            shared.queue_error(err);
        }
        self.inner.flush_notices();
    }
}
