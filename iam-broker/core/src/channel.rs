use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A receiver that may be shared by several consumers, each message being delivered to exactly
/// one of them.
#[derive(Debug)]
pub struct SharedRx<T>(Arc<Mutex<mpsc::Receiver<T>>>);

impl<T> SharedRx<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self(Arc::new(Mutex::new(rx)))
    }

    /// Waits for the next message.
    ///
    /// Returns `None` once all senders have been dropped and the buffer is drained. Cancel-safe.
    pub async fn recv(&self) -> Option<T> {
        self.0.lock().await.recv().await
    }

    /// Takes a buffered message, if one is available and no other consumer holds the receiver.
    pub fn try_recv(&self) -> Option<T> {
        self.0.try_lock().ok()?.try_recv().ok()
    }
}

impl<T> Clone for SharedRx<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
