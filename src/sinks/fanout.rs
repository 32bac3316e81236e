use tokio::sync::broadcast;
use tracing::trace;

use super::{FanoutSink, ReadingUpdate};

/// In-process fan-out hub. Transports subscribe and forward updates.
#[derive(Debug, Clone)]
pub struct BroadcastFanout {
    sender: broadcast::Sender<ReadingUpdate>,
}

impl BroadcastFanout {
    // ---
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReadingUpdate> {
        self.sender.subscribe()
    }
}

impl FanoutSink for BroadcastFanout {
    fn broadcast(&self, update: ReadingUpdate) {
        // No receivers is the normal idle state, not a failure.
        if let Ok(receivers) = self.sender.send(update) {
            trace!(receivers, "Broadcast reading update");
        }
    }
}
