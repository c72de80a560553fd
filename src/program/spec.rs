use std::fmt;
use std::sync::Arc;

use crate::channel::{ChannelId, ChannelSpec};
use crate::event_flag::EventFlagId;
use crate::program::Program;
use crate::state_set::{StateId, StateSetContext};

/// An entry or exit action, run by the state set's own thread.
pub type Action = Arc<dyn Fn(&mut StateSetContext) + Send + Sync>;

/// A state's transition predicate.
///
/// Returns the next state when a transition triggers. As a side effect it arms the state
/// set's deadline ([`StateSetContext::delay`]) and registers the events it waits on
/// ([`StateSetContext::watch`], [`StateSetContext::ef_test`]).
pub type Transition = Arc<dyn Fn(&mut StateSetContext) -> Option<StateId> + Send + Sync>;

/// Program initializer, run once before any channel is connected.
pub type InitFn = Arc<dyn Fn(&Program) + Send + Sync>;

/// Per-state options controlling self-transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateOptions {
    /// Run the entry action on a transition from the state to itself.
    pub entry_on_self: bool,
    /// Run the exit action on a transition from the state to itself.
    pub exit_on_self: bool,
    /// Keep the state's timer baseline on a transition to itself.
    pub keep_timers_on_self: bool,
}

pub struct StateSpec {
    pub(crate) name: String,
    pub(crate) entry: Option<Action>,
    pub(crate) exit: Option<Action>,
    pub(crate) transition: Transition,
    pub(crate) options: StateOptions,
}

impl StateSpec {
    pub fn new<F>(name: impl Into<String>, transition: F) -> Self
    where
        F: Fn(&mut StateSetContext) -> Option<StateId> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            entry: None,
            exit: None,
            transition: Arc::new(transition),
            options: StateOptions::default(),
        }
    }

    pub fn entry<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut StateSetContext) + Send + Sync + 'static,
    {
        self.entry = Some(Arc::new(action));
        self
    }

    pub fn exit<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut StateSetContext) + Send + Sync + 'static,
    {
        self.exit = Some(Arc::new(action));
        self
    }

    pub fn options(mut self, options: StateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for StateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSpec")
            .field("name", &self.name)
            .field("entry", &self.entry.is_some())
            .field("exit", &self.exit.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// One automaton of a program: an ordered list of states, the first being initial.
#[derive(Debug)]
pub struct StateSetSpec {
    pub(crate) name: String,
    pub(crate) states: Vec<StateSpec>,
}

impl StateSetSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
        }
    }

    pub fn state(mut self, state: StateSpec) -> Self {
        self.states.push(state);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[StateSpec] {
        &self.states
    }
}

/// The program table: everything a generated program hands to the runtime.
pub struct ProgramSpec {
    pub(crate) name: String,
    pub(crate) channels: Vec<ChannelSpec>,
    pub(crate) event_flags: Vec<String>,
    pub(crate) state_sets: Vec<StateSetSpec>,
    pub(crate) init: Option<InitFn>,
    pub(crate) entry: Option<Action>,
    pub(crate) exit: Option<Action>,
}

impl ProgramSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channels: Vec::new(),
            event_flags: Vec::new(),
            state_sets: Vec::new(),
            init: None,
            entry: None,
            exit: None,
        }
    }

    pub fn add_channel(&mut self, channel: ChannelSpec) -> ChannelId {
        self.channels.push(channel);
        ChannelId(self.channels.len() - 1)
    }

    pub fn add_event_flag(&mut self, name: impl Into<String>) -> EventFlagId {
        self.event_flags.push(name.into());
        EventFlagId(self.event_flags.len() - 1)
    }

    pub fn add_state_set(&mut self, state_set: StateSetSpec) -> &mut Self {
        self.state_sets.push(state_set);
        self
    }

    pub fn init<F>(&mut self, init: F) -> &mut Self
    where
        F: Fn(&Program) + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }

    /// Program entry action, run once in the primary state set's context before the other
    /// state sets are spawned.
    pub fn entry<F>(&mut self, action: F) -> &mut Self
    where
        F: Fn(&mut StateSetContext) + Send + Sync + 'static,
    {
        self.entry = Some(Arc::new(action));
        self
    }

    /// Program exit action, run once after every state set has terminated.
    pub fn exit<F>(&mut self, action: F) -> &mut Self
    where
        F: Fn(&mut StateSetContext) + Send + Sync + 'static,
    {
        self.exit = Some(Arc::new(action));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ProgramSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramSpec")
            .field("name", &self.name)
            .field("channels", &self.channels)
            .field("event_flags", &self.event_flags)
            .field("state_sets", &self.state_sets)
            .finish_non_exhaustive()
    }
}
