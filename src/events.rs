//! Small reusable event-bus used by every component that needs the
//! "observable transitions" behavior of spec §4.C/§4.D/§4.E/§4.F:
//! listeners may run arbitrary code (including driving the emitting
//! component itself) and must see events in emission order.

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// A multi-subscriber, single-producer broadcast of `T`. Cloning an
/// `EventBus` shares the same underlying channel (the sender side), so
/// every owner can emit.
#[derive(Debug)]
pub struct EventBus<T: Clone + Send + 'static> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Emit to every current subscriber. No-op (by design) if nobody is
    /// listening right now.
    pub fn emit(&self, event: T) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }
}
