//! Single-assignment result slot shared by racing completion sources.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

/// A result slot that accepts exactly one value.
///
/// Any number of producers may call [`settle`](Self::settle); only the first
/// call is delivered to the receiver returned by [`new`](Self::new).
pub struct Settlement<T> {
    slot: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Settlement<T> {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let settlement = Arc::new(Self {
            slot: Mutex::new(Some(tx)),
        });
        (settlement, rx)
    }

    /// Offer a value. Returns `true` if this call claimed the slot.
    pub fn settle(&self, value: T) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                // Receiver gone means the caller stopped waiting; the slot is
                // still claimed.
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
