use parking_lot::Mutex;
use tokio::sync::Notify;

/// Fixed-window admission limiter. The engine's ticker calls [`reset`] once
/// per window.
///
/// [`reset`]: Throttle::reset
#[derive(Debug)]
pub struct Throttle {
    limit: usize,
    remaining: Mutex<usize>,
    reset: Notify,
}

impl Throttle {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            remaining: Mutex::new(limit),
            reset: Notify::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.lock()
    }

    /// Take one slot from the current window. When the window is exhausted,
    /// wait for the next reset and return `false` so the caller re-evaluates
    /// whether it should still run.
    pub async fn check_limit(&self) -> bool {
        // Register before inspecting the count so a reset that lands between
        // the check and the await is not lost.
        let notified = self.reset.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let mut remaining = self.remaining.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }

        notified.await;
        false
    }

    /// Refill the window and wake every waiter.
    pub fn reset(&self) {
        *self.remaining.lock() = self.limit;
        self.reset.notify_waiters();
    }
}
