use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::wait::WaitStatus;
use super::{StateId, StateSet};
use crate::channel::{BufferError, ChannelId, Element, PvMeta, TypedBuffer};
use crate::event_flag::{Event, EventFlagId};
use crate::program::Program;
use crate::pv::PvError;
use crate::snapshot::{self, Snapshot};

/// Everything one state set's thread owns while it runs, handed to every action and
/// transition predicate.
pub struct StateSetContext {
    program: Arc<Program>,
    index: usize,
    snapshot: Option<Snapshot>,
    pub(crate) current: StateId,
    pub(crate) prev: Option<StateId>,
    pub(crate) next: Option<StateId>,
    pub(crate) time_entered: Instant,
    /// Earliest deadline at which conditions must be re-evaluated; `None` is infinite.
    pub(crate) wakeup_time: Option<Instant>,
}

impl StateSetContext {
    pub(crate) fn new(program: Arc<Program>, index: usize, snapshot: Option<Snapshot>) -> Self {
        Self {
            program,
            index,
            snapshot,
            current: StateId(0),
            prev: None,
            next: None,
            time_entered: Instant::now(),
            wakeup_time: None,
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn state_set(&self) -> &StateSet {
        self.program.state_set(self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current_state(&self) -> StateId {
        self.current
    }

    pub fn previous_state(&self) -> Option<StateId> {
        self.prev
    }

    pub fn next_state(&self) -> Option<StateId> {
        self.next
    }

    /// When the current state was entered (or last re-entered with timers reset).
    pub fn time_entered(&self) -> Instant {
        self.time_entered
    }

    pub fn wakeup_time(&self) -> Option<Instant> {
        self.wakeup_time
    }

    /// The private snapshot, present only in safe mode.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Read element 0 of a channel variable.
    pub fn get<T: Element>(&self, channel: ChannelId) -> Result<T, BufferError> {
        self.get_at(channel, 0)
    }

    /// Read element `index` of a channel variable: the private snapshot in safe mode, the
    /// shared buffer otherwise.
    pub fn get_at<T: Element>(&self, channel: ChannelId, index: usize) -> Result<T, BufferError> {
        match &self.snapshot {
            Some(snapshot) => snapshot.value(channel).get(index),
            None => self.program.channel(channel).lock().value.get(index),
        }
    }

    pub fn set<T: Element>(&mut self, channel: ChannelId, value: T) -> Result<(), BufferError> {
        self.set_at(channel, 0, value)
    }

    /// Assign element `index` of a channel variable. In safe mode only this state set sees the
    /// new value until it is published with [`pv_put`](Self::pv_put).
    pub fn set_at<T: Element>(
        &mut self,
        channel: ChannelId,
        index: usize,
        value: T,
    ) -> Result<(), BufferError> {
        match &mut self.snapshot {
            Some(snapshot) => snapshot.value_mut(channel).set(index, value),
            None => self.program.channel(channel).lock().value.set(index, value),
        }
    }

    /// A copy of the whole channel variable as this state set sees it.
    pub fn value(&self, channel: ChannelId) -> TypedBuffer {
        match &self.snapshot {
            Some(snapshot) => snapshot.value(channel).clone(),
            None => self.program.channel(channel).value(),
        }
    }

    /// Metadata of the channel as this state set sees it.
    pub fn meta(&self, channel: ChannelId) -> PvMeta {
        match &self.snapshot {
            Some(snapshot) => snapshot.meta(channel).clone(),
            None => self.program.channel(channel).meta(),
        }
    }

    /// Copy a channel from its shared buffer into the snapshot. No-op outside safe mode.
    pub fn read_channel(&mut self, channel: ChannelId, dirty_only: bool) {
        let program = Arc::clone(&self.program);
        if let Some(snapshot) = &mut self.snapshot {
            snapshot::read_channel(
                program.state_set(self.index),
                snapshot,
                program.channel(channel),
                dirty_only,
            );
        }
    }

    /// Pull every dirty channel into the snapshot. No-op outside safe mode.
    pub fn read_all_dirty(&mut self) {
        let program = Arc::clone(&self.program);
        if let Some(snapshot) = &mut self.snapshot {
            snapshot::read_all_dirty(&program, program.state_set(self.index), snapshot);
        }
    }

    /// Pull the dirty channels synced to `event_flag` into the snapshot. No-op outside safe
    /// mode.
    pub fn read_selective(&mut self, event_flag: EventFlagId) {
        let program = Arc::clone(&self.program);
        if let Some(snapshot) = &mut self.snapshot {
            snapshot::read_selective(
                &program,
                program.state_set(self.index),
                snapshot,
                program.event_flag(event_flag),
            );
        }
    }

    /// Register interest in `event` for the current state.
    ///
    /// Call before reading the values the condition depends on. In safe mode a channel that
    /// is already dirty forces another evaluation pass.
    pub fn watch(&self, event: Event) {
        let state_set = self.state_set();
        state_set
            .mask
            .set(event.number(self.program.event_flags().len()));

        if let Event::Channel(channel) = event {
            if self.snapshot.is_some() && state_set.dirty.test(channel.index()) {
                state_set.sync.signal();
            }
        }
    }

    /// Whether `delay` has elapsed since the state was entered. If not, arms the deadline so
    /// conditions are re-evaluated when it does.
    pub fn delay(&mut self, delay: Duration) -> bool {
        let expires = self.time_entered + delay;
        if Instant::now() >= expires {
            return true;
        }
        self.wakeup_time = Some(self.wakeup_time.map_or(expires, |t| t.min(expires)));
        false
    }

    /// Test an event flag, waiting on it for the current state. In safe mode the channels
    /// synced to the flag are refreshed.
    pub fn ef_test(&mut self, event_flag: EventFlagId) -> bool {
        self.watch(Event::Flag(event_flag));
        let is_set = self.program.ef_is_set(event_flag);
        self.read_selective(event_flag);
        is_set
    }

    /// Like [`ef_test`](Self::ef_test), but also clears the flag.
    pub fn ef_test_and_clear(&mut self, event_flag: EventFlagId) -> bool {
        self.watch(Event::Flag(event_flag));
        let was_set = self.program.flag_values().clear(event_flag.index());
        self.read_selective(event_flag);
        was_set
    }

    pub fn ef_set(&self, event_flag: EventFlagId) {
        self.program.ef_set(event_flag);
    }

    pub fn ef_clear(&self, event_flag: EventFlagId) -> bool {
        self.program.ef_clear(event_flag)
    }

    /// Publish this state set's value of `channel`.
    ///
    /// Anonymous channels are written straight to the shared buffer, marking them dirty for
    /// every monitoring state set. Process variables are handed to the data source; the new
    /// value comes back as a monitor update.
    pub fn pv_put(&mut self, channel: ChannelId) -> Result<(), PvError> {
        let value = self.value(channel);
        let ch = self.program.channel(channel);
        match ch.pv_name() {
            None => self
                .program
                .publish(channel, &value, None)
                .map_err(|source| PvError::Buffer {
                    pv: ch.var_name().to_string(),
                    source,
                }),
            Some(pv_name) => self.program.pv_system().put(pv_name, &value),
        }
    }

    /// Synchronously fetch `channel` from the data source into the shared buffer and this
    /// state set's snapshot. Anonymous channels are left as they are.
    pub fn pv_get(&mut self, channel: ChannelId) -> Result<(), PvError> {
        let program = Arc::clone(&self.program);
        let ch = program.channel(channel);
        let Some(pv_name) = ch.pv_name() else {
            return Ok(());
        };

        let (value, meta) = program.pv_system().get(pv_name)?;
        program
            .write_channel(channel, &value, Some(&meta), false)
            .map_err(|source| PvError::Buffer {
                pv: pv_name.to_string(),
                source,
            })?;
        self.read_channel(channel, false);
        Ok(())
    }

    pub fn pv_connected(&self, channel: ChannelId) -> bool {
        self.program.channel(channel).is_connected()
    }

    /// Element count of the live connection, or the declared count if not backed by a
    /// process variable.
    pub fn pv_count(&self, channel: ChannelId) -> usize {
        self.program.channel(channel).effective_count()
    }

    /// Start receiving dirty marks for `channel`.
    pub fn pv_monitor(&self, channel: ChannelId) {
        self.state_set().monitored.set(channel.index());
    }

    pub fn pv_stop_monitor(&self, channel: ChannelId) {
        self.state_set().monitored.clear(channel.index());
    }

    /// Common handling after every wakeup, from the main loop and from explicit waits.
    pub(crate) fn after_wake(&mut self) -> WaitStatus {
        if self.program.is_terminating() {
            return WaitStatus::Terminate;
        }

        if self.program.is_suspended() {
            debug!(state_set = %self.state_set().name(), "Holding");
            self.program.hold().park();
            if self.program.is_terminating() {
                return WaitStatus::Terminate;
            }
            debug!(state_set = %self.state_set().name(), "Resumed");
        }

        self.read_all_dirty();
        self.wakeup_time = None;
        WaitStatus::Continue
    }
}

impl std::fmt::Debug for StateSetContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSetContext")
            .field("program", &self.program.name())
            .field("state_set", &self.state_set().name())
            .field("current", &self.current)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .field("safe_mode", &self.snapshot.is_some())
            .finish_non_exhaustive()
    }
}
