//! State sets: the automata of a program.
//!
//! A [`StateSet`] is the part of an automaton other threads may touch (dirty and monitored
//! bits, the event mask, the wakeup primitive). Everything else, including the private
//! variable snapshot, lives in the [`StateSetContext`] owned by the state set's own thread.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::bitmask::Bitmask;
use crate::channel::ChannelId;
use crate::program::spec::StateSpec;
use crate::sync::SyncEvent;

pub use self::context::StateSetContext;
pub use self::wait::{WaitFrame, WaitStatus};

pub mod context;
pub(crate) mod engine;
pub mod wait;

const NO_STATE: usize = usize::MAX;

/// Index of a state within its state set. The first state (index 0) is the initial state.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct StateId(pub usize);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The shared side of one automaton.
pub struct StateSet {
    index: usize,
    name: String,
    states: Vec<StateSpec>,
    /// Channels written since this state set last read them. Set by writers under the
    /// channel lock, cleared only by the owning thread.
    pub(crate) dirty: Bitmask,
    /// Channels this state set has an active interest in.
    pub(crate) monitored: Bitmask,
    /// Events the current state is waiting on.
    pub(crate) mask: Bitmask,
    pub(crate) sync: SyncEvent,
    pub(crate) dead: SyncEvent,
    current: AtomicUsize,
}

impl StateSet {
    pub(crate) fn new(
        index: usize,
        name: String,
        states: Vec<StateSpec>,
        num_channels: usize,
        num_events: usize,
    ) -> Self {
        Self {
            index,
            name,
            states,
            dirty: Bitmask::new(num_channels),
            monitored: Bitmask::new(num_channels),
            mask: Bitmask::new(num_events),
            sync: SyncEvent::new(),
            dead: SyncEvent::new(),
            current: AtomicUsize::new(NO_STATE),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[StateSpec] {
        &self.states
    }

    pub fn state_name(&self, state: StateId) -> Option<&str> {
        self.states.get(state.0).map(StateSpec::name)
    }

    /// The state the automaton is currently in, or `None` if it is not running.
    pub fn current_state(&self) -> Option<StateId> {
        match self.current.load(Ordering::Acquire) {
            NO_STATE => None,
            index => Some(StateId(index)),
        }
    }

    pub(crate) fn set_current_state(&self, state: Option<StateId>) {
        self.current
            .store(state.map_or(NO_STATE, |s| s.0), Ordering::Release);
    }

    pub fn is_dirty(&self, channel: ChannelId) -> bool {
        self.dirty.test(channel.index())
    }

    pub fn is_monitoring(&self, channel: ChannelId) -> bool {
        self.monitored.test(channel.index())
    }
}

impl fmt::Debug for StateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSet")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("states", &self.states.len())
            .field("current", &self.current_state())
            .field("dirty", &self.dirty)
            .field("mask", &self.mask)
            .finish_non_exhaustive()
    }
}
