//! Ordered, lock-free-for-callers delivery of listener notifications.
//!
//! Events are queued while the controller state lock is held, so queue order
//! is transition order. They are delivered after that lock is released by
//! whichever thread wins the dispatch lock; other threads leave their events
//! for it. A listener may therefore call back into the controller.

use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use super::source::{BufferEvent, BufferListener};

pub struct Notifier {
    tx: Sender<BufferEvent>,
    rx: Receiver<BufferEvent>,
    dispatching: Mutex<()>,
    listener: Arc<dyn BufferListener>,
}

impl Notifier {
    pub fn new(listener: Arc<dyn BufferListener>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            dispatching: Mutex::new(()),
            listener,
        }
    }

    /// Queue an event. Call with the state lock held.
    pub fn push(&self, event: BufferEvent) {
        // Receiver lives in self, send cannot fail
        let _ = self.tx.send(event);
    }

    /// Deliver queued events. Call after releasing the state lock.
    pub fn flush(&self) {
        loop {
            {
                let Ok(_guard) = self.dispatching.try_lock() else {
                    // Another thread (or an outer frame of this one) is draining
                    return;
                };
                while let Ok(event) = self.rx.try_recv() {
                    event.deliver(self.listener.as_ref());
                }
            }
            // An event pushed between the last try_recv and the unlock would
            // be stranded; re-check after releasing.
            if self.rx.is_empty() {
                return;
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
