use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use channel_core::{ChannelError, Connection, Connector, Frame, TransportEvent};
use tokio::{sync::mpsc, time::timeout};

/// Scripted result of one `connect` call.
pub(crate) enum FakeOutcome {
    Accept,
    Refuse(ChannelError),
    Hang,
}

/// In-memory connector. Every accepted connection hands its remote end to
/// the receiver returned by [`FakeConnector::new`]. Attempts past the end of
/// the script are accepted.
#[derive(Clone)]
pub(crate) struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

struct FakeState {
    script: VecDeque<FakeOutcome>,
    endpoints: Vec<String>,
    peer_tx: mpsc::UnboundedSender<FakePeer>,
}

impl FakeConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<FakePeer>) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(FakeState {
                script: VecDeque::new(),
                endpoints: Vec::new(),
                peer_tx,
            })),
        };
        (connector, peer_rx)
    }

    pub(crate) fn script(&self, outcomes: impl IntoIterator<Item = FakeOutcome>) {
        self.state
            .lock()
            .expect("fake connector lock")
            .script
            .extend(outcomes);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.state.lock().expect("fake connector lock").endpoints.len()
    }

    pub(crate) fn endpoints(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("fake connector lock")
            .endpoints
            .clone()
    }
}

impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self, endpoint: &str) -> Result<FakeConnection, ChannelError> {
        let (outcome, peer_tx) = {
            let mut state = self.state.lock().expect("fake connector lock");
            state.endpoints.push(endpoint.to_owned());
            let outcome = state.script.pop_front().unwrap_or(FakeOutcome::Accept);
            (outcome, state.peer_tx.clone())
        };

        match outcome {
            FakeOutcome::Accept => {
                let (connection, peer) = fake_pair();
                let _ = peer_tx.send(peer);
                Ok(connection)
            }
            FakeOutcome::Refuse(err) => Err(err),
            FakeOutcome::Hang => std::future::pending().await,
        }
    }
}

fn fake_pair() -> (FakeConnection, FakePeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        FakeConnection {
            inbound_rx,
            outbound_tx,
            closed: Arc::clone(&closed),
        },
        FakePeer {
            inbound_tx,
            outbound_rx,
            closed,
        },
    )
}

pub(crate) struct FakeConnection {
    inbound_rx: mpsc::UnboundedReceiver<TransportEvent>,
    outbound_tx: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

impl Connection for FakeConnection {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::transport("send_failed", "connection closed"));
        }
        self.outbound_tx
            .send(text)
            .map_err(|_| ChannelError::transport("send_failed", "peer gone"))
    }

    async fn next_event(&mut self) -> TransportEvent {
        self.inbound_rx
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed { reason: None })
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Remote end of a fake connection.
pub(crate) struct FakePeer {
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl FakePeer {
    pub(crate) fn push_text(&self, text: &str) {
        let _ = self.inbound_tx.send(TransportEvent::Text(text.to_owned()));
    }

    pub(crate) fn push_frame(&self, frame: &Frame) {
        self.push_text(&frame.encode().expect("test frame encodes"));
    }

    /// Simulate the remote closing the connection.
    pub(crate) fn close(&self) {
        let _ = self.inbound_tx.send(TransportEvent::Closed {
            reason: Some("closed by peer".to_owned()),
        });
    }

    pub(crate) fn fail(&self, err: ChannelError) {
        let _ = self.inbound_tx.send(TransportEvent::Error(err));
    }

    /// Next frame written by the client, waiting up to a minute.
    pub(crate) async fn recv_frame(&mut self) -> Frame {
        let text = timeout(Duration::from_secs(60), self.outbound_rx.recv())
            .await
            .expect("frame timeout")
            .expect("connection open");
        Frame::decode(&text).expect("client frame decodes")
    }

    pub(crate) fn try_recv_frame(&mut self) -> Option<Frame> {
        let text = self.outbound_rx.try_recv().ok()?;
        Some(Frame::decode(&text).expect("client frame decodes"))
    }

    /// `true` once the client closed its end.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
