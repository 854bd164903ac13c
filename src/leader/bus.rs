// Bus - Pub/sub transport for election messages
use tokio::sync::broadcast;

use super::message::LeaderMessage;

/// Bus errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Bus closed")]
    Closed,
}

/// Broadcast transport shared by every instance on one replica
///
/// Subscribers also receive their own messages.
pub trait MessageBus: Send + Sync {
    fn publish(&self, message: LeaderMessage) -> Result<(), BusError>;

    fn subscribe(&self) -> broadcast::Receiver<LeaderMessage>;
}

/// Single-process bus over a tokio broadcast channel
pub struct InMemoryBus {
    sender: broadcast::Sender<LeaderMessage>,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, message: LeaderMessage) -> Result<(), BusError> {
        // No subscribers is not an error: nobody is listening yet
        let _ = self.sender.send(message);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<LeaderMessage> {
        self.sender.subscribe()
    }
}
