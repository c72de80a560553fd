use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// A binary wait/signal primitive.
///
/// At most one signal is pending at a time: signalling an already signalled event is a no-op,
/// so any number of signals between two waits coalesce into a single wakeup.
#[derive(Debug, Default)]
pub struct SyncEvent {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl SyncEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.cond.notify_one();
    }

    /// Block until signalled, consuming the signal.
    pub fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.cond.wait(&mut signalled);
        }
        *signalled = false;
    }

    /// Block until signalled or until `deadline` passes; `None` waits without a deadline.
    ///
    /// Returns whether a signal was consumed.
    pub fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let Some(deadline) = deadline else {
            self.wait();
            return true;
        };

        let mut signalled = self.signalled.lock();
        while !*signalled {
            if self.cond.wait_until(&mut signalled, deadline).timed_out() {
                break;
            }
        }
        std::mem::take(&mut *signalled)
    }

    /// Consume a pending signal without blocking.
    pub fn try_wait(&self) -> bool {
        std::mem::take(&mut *self.signalled.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_before_wait_is_kept() {
        let event = SyncEvent::new();
        event.signal();
        assert!(event.wait_until(Some(Instant::now())));
        assert!(!event.try_wait());
    }

    #[test]
    fn test_signals_coalesce() {
        let event = SyncEvent::new();
        event.signal();
        event.signal();
        event.signal();

        assert!(event.try_wait());
        assert!(!event.try_wait());
    }

    #[test]
    fn test_wait_times_out() {
        let event = SyncEvent::new();
        let start = Instant::now();
        assert!(!event.wait_until(Some(start + Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_signal_from_other_thread() {
        let event = Arc::new(SyncEvent::new());
        let signaller = Arc::clone(&event);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaller.signal();
        });

        assert!(event.wait_until(Some(Instant::now() + Duration::from_secs(5))));
        handle.join().unwrap();
    }
}
