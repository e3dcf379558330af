use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Latch {
    Armed,
    Fired,
}

/// One-shot threshold notification with an explicit re-arm step.
///
/// While armed, [`BreachSignal::fire`] sends a single notification and moves to
/// fired. Further fires are coalesced until [`BreachSignal::rearm`] is called.
/// The notification itself holds at most one pending permit, so an unread
/// breach never queues up behind another.
#[derive(Debug)]
pub struct BreachSignal {
    latch: Mutex<Latch>,
    notify: Notify,
}

impl BreachSignal {
    pub fn new() -> Self {
        Self {
            latch: Mutex::new(Latch::Armed),
            notify: Notify::new(),
        }
    }

    /// Returns true if this call delivered the notification.
    pub(crate) fn fire(&self) -> bool {
        let mut latch = self.latch.lock();
        if *latch == Latch::Fired {
            return false;
        }
        *latch = Latch::Fired;
        self.notify.notify_one();
        true
    }

    pub(crate) fn rearm(&self) {
        *self.latch.lock() = Latch::Armed;
    }

    pub fn is_armed(&self) -> bool {
        *self.latch.lock() == Latch::Armed
    }

    /// Waits until a breach notification is available and consumes it.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Consumes a pending notification without waiting.
    pub fn try_recv(&self) -> bool {
        self.notify.notified().now_or_never().is_some()
    }
}

impl Default for BreachSignal {
    fn default() -> Self {
        Self::new()
    }
}
