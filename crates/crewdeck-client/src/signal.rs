use std::sync::Arc;

use tokio::sync::watch;

/// A typed observable cell.
///
/// `set` publishes only when the value actually changes, so a subscriber
/// watching one cell is never woken by writes to other cells or by no-op
/// writes to its own. Clones share the same underlying cell.
#[derive(Debug)]
pub struct Signal<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + PartialEq> Signal<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Publish `value` if it differs from the current one. Returns whether
    /// subscribers were notified.
    pub fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        })
    }

    /// A receiver that observes every published change; await
    /// `Receiver::changed` to react.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone + PartialEq + Default> Default for Signal<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Transport- and service-level availability, driven by the stream manager
/// and the health poll. Consumers read these; they never write them.
#[derive(Clone, Debug)]
pub struct ConnectionSignals {
    pub stream_connected: Signal<bool>,
    pub api_reachable: Signal<bool>,
}

impl ConnectionSignals {
    pub fn new() -> Self {
        Self {
            stream_connected: Signal::new(false),
            api_reachable: Signal::new(false),
        }
    }
}

impl Default for ConnectionSignals {
    fn default() -> Self {
        Self::new()
    }
}
