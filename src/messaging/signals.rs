// Observer signals - fan-out of change notifications to control-side subscribers

use crossbeam_channel::{Receiver, Sender, unbounded};

/// A list of subscribers receiving a copy of every emitted signal
///
/// Control side only: emitting may allocate. Subscribers whose receiver was
/// dropped are pruned on the next emit.
#[derive(Debug)]
pub struct SignalBus<T> {
    subscribers: Vec<Sender<T>>,
}

impl<T: Clone> SignalBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&mut self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver a signal to every live subscriber
    pub fn emit(&mut self, signal: T) {
        if self.subscribers.is_empty() {
            return;
        }
        self.subscribers
            .retain(|subscriber| subscriber.send(signal.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T: Clone> Default for SignalBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
