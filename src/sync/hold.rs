use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct HoldState {
    suspended: bool,
    released: bool,
    parked: usize,
}

/// Suspend/resume gate shared by all state sets of a program.
///
/// A state set that observes a suspend request [`park`](Self::park)s here, which both tells
/// the coordinator it is holding and blocks until [`resume`](Self::resume) or
/// [`release`](Self::release).
#[derive(Debug, Default)]
pub struct HoldGate {
    state: Mutex<HoldState>,
    changed: Condvar,
}

impl HoldGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suspend(&self) {
        self.state.lock().suspended = true;
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.suspended = false;
        self.changed.notify_all();
    }

    /// Permanently open the gate; used on termination.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.released = true;
        self.changed.notify_all();
    }

    pub fn is_suspended(&self) -> bool {
        let state = self.state.lock();
        state.suspended && !state.released
    }

    /// Number of callers currently blocked in [`park`](Self::park).
    pub fn parked(&self) -> usize {
        self.state.lock().parked
    }

    /// Hold here while suspended. Returns immediately if no suspend is pending.
    pub fn park(&self) {
        let mut state = self.state.lock();
        if !state.suspended || state.released {
            return;
        }

        state.parked += 1;
        self.changed.notify_all();
        while state.suspended && !state.released {
            self.changed.wait(&mut state);
        }
        state.parked -= 1;
        self.changed.notify_all();
    }

    /// Wait until at least `count` callers are parked, or `timeout` elapses.
    pub fn wait_parked(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.parked < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.parked >= count;
            }
        }
        true
    }
}
