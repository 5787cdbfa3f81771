use tokio::sync::broadcast;
use crate::message::Message;

/// A small wrapper around a Tokio broadcast channel,
/// used to fan-out swarm events to live HTTP consumers.
#[derive(Clone)]
pub struct Context {
    pub tx: broadcast::Sender<Message>,
}

impl Context {
    /// Create a new Context with a channel of the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Send to whoever is listening; having no subscribers is not an error.
    pub fn publish(&self, msg: Message) {
        let _ = self.tx.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.tx.subscribe()
    }
}
