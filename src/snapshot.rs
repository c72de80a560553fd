//! Read side of buffer synchronization: moving values from the shared channel buffers into a
//! state set's private snapshot.
//!
//! The write side is [`Program::write_channel`](crate::program::Program::write_channel).

use tracing::{error, trace};

use crate::channel::{Channel, ChannelId, PvMeta, TypedBuffer};
use crate::event_flag::EventFlag;
use crate::program::Program;
use crate::state_set::StateSet;

#[derive(Debug, Clone)]
struct Slot {
    value: TypedBuffer,
    meta: PvMeta,
}

/// A state set's private copy of every channel variable (safe mode only).
#[derive(Debug, Clone)]
pub struct Snapshot {
    slots: Vec<Slot>,
}

impl Snapshot {
    /// Copy the current shared value of every channel.
    pub(crate) fn capture(channels: &[Channel]) -> Self {
        let slots = channels
            .iter()
            .map(|channel| {
                let shared = channel.lock();
                Slot {
                    value: shared.value.clone(),
                    meta: shared.meta.clone(),
                }
            })
            .collect();
        Self { slots }
    }

    pub fn value(&self, channel: ChannelId) -> &TypedBuffer {
        &self.slots[channel.index()].value
    }

    pub(crate) fn value_mut(&mut self, channel: ChannelId) -> &mut TypedBuffer {
        &mut self.slots[channel.index()].value
    }

    pub fn meta(&self, channel: ChannelId) -> &PvMeta {
        &self.slots[channel.index()].meta
    }
}

/// Copy `channel`'s shared value and metadata into `snapshot` and clear the dirty bit.
///
/// With `dirty_only` this is a no-op when the dirty bit is clear. That check is made without
/// the channel lock: only writers set the bit (under the lock) and only the owning state set
/// clears it.
pub(crate) fn read_channel(
    state_set: &StateSet,
    snapshot: &mut Snapshot,
    channel: &Channel,
    dirty_only: bool,
) {
    let index = channel.id().index();
    if dirty_only && !state_set.dirty.test(index) {
        return;
    }

    let shared = channel.lock();
    let slot = &mut snapshot.slots[index];
    if let Err(e) = slot.value.copy_from(&shared.value, shared.live_count) {
        error!(channel = %channel.var_name(), error = %e, "Shared buffer does not match snapshot");
    }
    if !channel.is_anonymous() {
        slot.meta = shared.meta.clone();
    }
    state_set.dirty.clear(index);

    trace!(
        state_set = %state_set.name(),
        channel = %channel.var_name(),
        count = shared.live_count,
        "Read shared buffer"
    );
}

/// Refresh every dirty channel, in index order.
pub(crate) fn read_all_dirty(program: &Program, state_set: &StateSet, snapshot: &mut Snapshot) {
    for channel in program.channels() {
        read_channel(state_set, snapshot, channel, true);
    }
}

/// Refresh only the dirty channels synced to `event_flag`.
pub(crate) fn read_selective(
    program: &Program,
    state_set: &StateSet,
    snapshot: &mut Snapshot,
    event_flag: &EventFlag,
) {
    for channel in event_flag.synced() {
        read_channel(state_set, snapshot, program.channel(channel), true);
    }
}
