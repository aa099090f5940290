use parking_lot::Mutex;
use tokio::sync::Notify;

/// Single-slot mailbox for control signals.
///
/// Posting never blocks and a newer value replaces an unconsumed older one,
/// so at most one signal is in flight. The receiver drains it at its next
/// safe point with [`Mailbox::take`], or parks on [`Mailbox::wait`].
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Returns `true` when an unconsumed value was overwritten.
    pub fn post(&self, value: T) -> bool {
        let replaced = self.slot.lock().replace(value).is_some();
        self.notify.notify_one();
        replaced
    }

    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub async fn wait(&self) -> T {
        loop {
            if let Some(value) = self.take() {
                return value;
            }
            self.notify.notified().await;
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("pending", &self.is_pending())
            .finish()
    }
}
