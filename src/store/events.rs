use serde_json::Value;
use std::marker::PhantomData;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub new_value: Value,
}

#[derive(Debug)]
pub struct ChangeFeed {
    sender: broadcast::Sender<StorageChange>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, change: StorageChange) {
        // No receivers is the normal case before any UI subscribes.
        let _ = self.sender.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.sender.subscribe()
    }
}

/// Typed view of one storage key's changes.
///
/// Each change is delivered at most once; changes made before subscribing are
/// never replayed. A subscriber that falls behind skips the changes it missed.
/// Dropping the subscription (or calling [`Subscription::unsubscribe`]) ends it.
pub struct Subscription<T> {
    receiver: broadcast::Receiver<StorageChange>,
    key: &'static str,
    decode: fn(Value) -> Option<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Subscription<T> {
    pub fn new(
        receiver: broadcast::Receiver<StorageChange>,
        key: &'static str,
        decode: fn(Value) -> Option<T>,
    ) -> Self {
        Self {
            receiver,
            key,
            decode,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Waits for the next decodable change to this key. `None` once the store is gone.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.key == self.key => {
                    if let Some(value) = (self.decode)(change.new_value) {
                        return Some(value);
                    }
                    tracing::warn!(key = self.key, "ignoring undecodable change notification");
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(key = self.key, skipped, "change subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
