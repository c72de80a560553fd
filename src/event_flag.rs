use std::fmt;

use bitvec::prelude::*;

use crate::channel::ChannelId;

/// Index of an event flag in its program's event flag table.
///
/// Only meaningful for the program built from the [`ProgramSpec`](crate::ProgramSpec) that
/// handed it out; any other program panics when given it.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventFlagId(pub(crate) usize);

impl EventFlagId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EventFlagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ef{}", self.0)
    }
}

/// Something a state set can wait on.
///
/// Events are numbered from 1: first every event flag, then every channel. Number 0 is
/// reserved for the broadcast wakeup.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Event {
    Flag(EventFlagId),
    Channel(ChannelId),
}

impl Event {
    /// Bit number of this event in a state set's event mask.
    pub fn number(self, num_flags: usize) -> usize {
        match self {
            Event::Flag(flag) => 1 + flag.0,
            Event::Channel(channel) => 1 + num_flags + channel.0,
        }
    }
}

/// Target of a wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// Every state set, regardless of its event mask.
    All,
    /// Only state sets whose event mask contains the event.
    Event(Event),
}

/// A named condition signalled by the channels synced to it.
///
/// The set of synced channels is fixed once the program table is built.
#[derive(Debug)]
pub struct EventFlag {
    id: EventFlagId,
    name: String,
    synced: BitVec,
}

impl EventFlag {
    pub(crate) fn new(id: EventFlagId, name: String, num_channels: usize) -> Self {
        Self {
            id,
            name,
            synced: bitvec![0; num_channels],
        }
    }

    pub(crate) fn sync_channel(&mut self, channel: ChannelId) {
        self.synced.set(channel.0, true);
    }

    pub fn id(&self) -> EventFlagId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_synced(&self, channel: ChannelId) -> bool {
        self.synced.get(channel.0).is_some_and(|bit| *bit)
    }

    /// Channels synced to this flag, in index order.
    pub fn synced(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.synced.iter_ones().map(ChannelId)
    }
}
