//! Explicit waits from inside an action.
//!
//! A state body that has to block imperatively gets the same terminate, suspend and safe mode
//! handling as the transition loop: install a temporary event mask with
//! [`wait_init`](StateSetContext::wait_init), call [`wait`](StateSetContext::wait) until its
//! condition holds, then restore the state's own mask with
//! [`wait_finish`](StateSetContext::wait_finish).

use std::time::Instant;

use super::StateSetContext;
use crate::event_flag::Event;

/// Outcome of a wait. Every caller must check for [`Terminate`](WaitStatus::Terminate) and
/// unwind without further side effects.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Continue,
    Terminate,
}

impl WaitStatus {
    pub fn is_terminate(self) -> bool {
        self == WaitStatus::Terminate
    }
}

/// The timer baseline and event mask displaced by [`StateSetContext::wait_init`].
#[derive(Debug)]
#[must_use = "pass the frame to wait_finish to restore the state's event mask"]
pub struct WaitFrame {
    time_entered: Instant,
    mask: Vec<u64>,
}

impl StateSetContext {
    /// Install `events` as the event mask for an explicit wait, reset the timer baseline and
    /// deadline, and force the first [`wait`](Self::wait) to return immediately.
    pub fn wait_init(&mut self, events: &[Event]) -> WaitFrame {
        let num_flags = self.program().event_flags().len();
        let state_set = self.state_set();

        let frame = WaitFrame {
            time_entered: self.time_entered,
            mask: state_set.mask.to_words(),
        };

        state_set.mask.clear_all();
        for event in events {
            state_set.mask.set(event.number(num_flags));
        }
        state_set.sync.signal();

        self.time_entered = Instant::now();
        self.wakeup_time = None;
        frame
    }

    /// Block until signalled or the deadline set by [`delay`](Self::delay) passes.
    pub fn wait(&mut self) -> WaitStatus {
        let deadline = self.wakeup_time;
        self.state_set().sync.wait_until(deadline);
        self.after_wake()
    }

    /// Undo [`wait_init`](Self::wait_init).
    pub fn wait_finish(&mut self, frame: WaitFrame) {
        self.time_entered = frame.time_entered;
        self.state_set().mask.store_words(&frame.mask);
    }

    /// Wait on `events` until `condition` holds or the program terminates.
    ///
    /// `condition` may call [`delay`](Self::delay) to bound the wait; its timer baseline is the
    /// start of this call.
    pub fn wait_for<F>(&mut self, events: &[Event], mut condition: F) -> WaitStatus
    where
        F: FnMut(&mut StateSetContext) -> bool,
    {
        let frame = self.wait_init(events);
        let status = loop {
            if self.wait().is_terminate() {
                break WaitStatus::Terminate;
            }
            if condition(self) {
                break WaitStatus::Continue;
            }
        };
        self.wait_finish(frame);
        status
    }
}
