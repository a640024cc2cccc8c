use tokio::sync::{broadcast, mpsc};

use crate::{frame::Frame, types::ChannelEvent};

/// Broadcast stream of lifecycle events used by collaborators that prefer
/// subscribing to polling `state()`.
pub type LifecycleStream = broadcast::Receiver<ChannelEvent>;

/// Lifecycle event fan-out shared by a client and its session task.
#[derive(Clone, Debug)]
pub struct LifecycleChannel {
    event_tx: broadcast::Sender<ChannelEvent>,
}

impl LifecycleChannel {
    pub fn new(buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(buffer.max(1));
        Self { event_tx }
    }

    pub fn subscribe(&self) -> LifecycleStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = ChannelEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Sending half of the outbound queue of one live connection.
///
/// A new queue is created for every successful connection and dropped with
/// it, so frames are never carried over to a later connection.
#[derive(Clone, Debug)]
pub struct OutboundSender {
    frame_tx: mpsc::UnboundedSender<Frame>,
}

/// Receiving half of the outbound queue, owned by the session loop.
#[derive(Debug)]
pub struct OutboundReceiver {
    frame_rx: mpsc::UnboundedReceiver<Frame>,
}

/// Create the outbound queue for one connection.
pub fn outbound_queue() -> (OutboundSender, OutboundReceiver) {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    (OutboundSender { frame_tx }, OutboundReceiver { frame_rx })
}

impl OutboundSender {
    /// Hand a frame to the connection. Returns the frame back when the
    /// connection is already gone.
    pub fn push(&self, frame: Frame) -> Result<(), Frame> {
        self.frame_tx.send(frame).map_err(|err| err.0)
    }
}

impl OutboundReceiver {
    /// Next frame to write; `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.frame_rx.recv().await
    }
}
