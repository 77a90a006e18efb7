//! Cooperative cancellation for monitor runs.
//!
//! A token is checked at every suspension point: the poller's inter-read
//! sleep and the return of each `wait_for_updates` call. Cancelling drops the
//! only sender of an internal channel, so every sleeper blocked on the
//! receiver wakes up at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{after, bounded, select, Receiver, Sender};

#[derive(Debug)]
struct Shared {
    cancelled: AtomicBool,
    // Taken (and dropped) on cancel.
    tx: Mutex<Option<Sender<()>>>,
}

/// Cloneable cancellation token.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
    rx: Receiver<()>,
}

/// Result of an interruptible sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sleep {
    /// The full duration elapsed.
    Elapsed,
    /// The token was cancelled first.
    Cancelled,
}

impl CancellationToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        Self {
            shared: Arc::new(Shared {
                cancelled: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if self.shared.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        // A poisoned lock still holds the sender; take it either way.
        let mut guard = match self.shared.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        drop(guard.take());
    }

    /// True once [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for `duration` unless cancelled first.
    #[must_use]
    pub fn sleep(&self, duration: Duration) -> Sleep {
        if self.is_cancelled() {
            return Sleep::Cancelled;
        }
        let timer = after(duration);
        select! {
            recv(self.rx) -> _ => Sleep::Cancelled,
            recv(timer) -> _ => Sleep::Elapsed,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn sleep_elapses_without_cancel() {
        let token = CancellationToken::new();
        assert_eq!(token.sleep(Duration::from_millis(5)), Sleep::Elapsed);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_visible_to_clones_and_idempotent() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.sleep(Duration::from_secs(60)), Sleep::Cancelled);
    }

    #[test]
    fn cancel_wakes_a_sleeping_thread() {
        let token = CancellationToken::new();
        let sleeper = token.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert_eq!(handle.join().unwrap(), Sleep::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
