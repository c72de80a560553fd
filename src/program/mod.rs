//! Program instances: the owner of every channel, event flag and state set of one running
//! program, and its lifecycle from startup to teardown.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::bitmask::Bitmask;
use crate::channel::{BufferError, Channel, ChannelId, PvMeta, TypedBuffer};
use crate::event_flag::{Event, EventFlag, EventFlagId, Wakeup};
use crate::pv::{ChannelLink, PvSystem};
use crate::registry::registry;
use crate::snapshot::Snapshot;
use crate::state_set::{StateSet, StateSetContext, engine};
use crate::sync::{HoldGate, SyncEvent};

pub use self::config::ProgramConfig;
pub use self::error::ProgramError;
pub use self::spec::{ProgramSpec, StateOptions, StateSetSpec, StateSpec};

use self::spec::{Action, InitFn};

pub mod config;
pub mod error;
pub mod spec;


/// One running instance of a program.
pub struct Program {
    name: String,
    instance: usize,
    config: ProgramConfig,
    channels: Vec<Channel>,
    event_flags: Vec<EventFlag>,
    flag_values: Bitmask,
    state_sets: Vec<StateSet>,
    init: Option<InitFn>,
    entry_action: Option<Action>,
    exit_action: Option<Action>,
    pv: Arc<dyn PvSystem>,
    terminating: AtomicBool,
    hold: HoldGate,
    /// Signalled when the last process variable connects, or on exit.
    ready: SyncEvent,
    /// Number of channels backed by a process variable.
    assigned: usize,
    connected: AtomicUsize,
    /// Secondary state set threads spawned and not yet joined.
    spawned: AtomicUsize,
    torn_down: AtomicBool,
    weak_self: Weak<Program>,
}

impl Program {
    /// Build a program instance from its table. Nothing runs until [`run`](Self::run) or
    /// [`spawn`](Self::spawn).
    pub fn new(
        spec: ProgramSpec,
        config: ProgramConfig,
        pv: Arc<dyn PvSystem>,
    ) -> Result<Arc<Program>, ProgramError> {
        let ProgramSpec {
            name,
            channels,
            event_flags,
            state_sets,
            init,
            entry,
            exit,
        } = spec;

        if state_sets.is_empty() {
            return Err(ProgramError::NoStateSets { program: name });
        }
        if let Some(empty) = state_sets.iter().find(|ss| ss.states.is_empty()) {
            return Err(ProgramError::EmptyStateSet {
                state_set: empty.name.clone(),
            });
        }

        let num_channels = channels.len();
        let mut event_flags: Vec<EventFlag> = event_flags
            .into_iter()
            .enumerate()
            .map(|(index, flag_name)| EventFlag::new(EventFlagId(index), flag_name, num_channels))
            .collect();

        let channels: Vec<Channel> = channels
            .into_iter()
            .enumerate()
            .map(|(index, channel_spec)| Channel::new(ChannelId(index), channel_spec))
            .collect();

        for channel in &channels {
            let Some(flag) = channel.sync() else {
                continue;
            };
            match event_flags.get_mut(flag.index()) {
                Some(event_flag) => event_flag.sync_channel(channel.id()),
                None => {
                    return Err(ProgramError::UnknownEventFlag {
                        channel: channel.var_name().to_string(),
                        flag: flag.index(),
                    });
                }
            }
        }

        let num_events = 1 + event_flags.len() + num_channels;
        let state_sets: Vec<StateSet> = state_sets
            .into_iter()
            .enumerate()
            .map(|(index, ss)| {
                let state_set = StateSet::new(index, ss.name, ss.states, num_channels, num_events);
                for channel in channels.iter().filter(|ch| ch.is_monitored()) {
                    state_set.monitored.set(channel.id().index());
                }
                state_set
            })
            .collect();

        let assigned = channels.iter().filter(|ch| !ch.is_anonymous()).count();
        let instance = registry().next_instance(&name);

        debug!(
            program = %name,
            instance,
            channels = num_channels,
            event_flags = event_flags.len(),
            state_sets = state_sets.len(),
            "Created program"
        );

        Ok(Arc::new_cyclic(|weak_self| Program {
            name,
            instance,
            config,
            flag_values: Bitmask::new(event_flags.len()),
            channels,
            event_flags,
            state_sets,
            init,
            entry_action: entry,
            exit_action: exit,
            pv,
            terminating: AtomicBool::new(false),
            hold: HoldGate::new(),
            ready: SyncEvent::new(),
            assigned,
            connected: AtomicUsize::new(0),
            spawned: AtomicUsize::new(0),
            torn_down: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instance number among programs created with the same name in this process.
    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    pub fn is_safe_mode(&self) -> bool {
        self.config.safe_mode
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// # Panics
    ///
    /// If `channel` was not handed out by the [`ProgramSpec`] this program was built from.
    pub fn channel(&self, channel: ChannelId) -> &Channel {
        &self.channels[channel.index()]
    }

    pub fn event_flags(&self) -> &[EventFlag] {
        &self.event_flags
    }

    /// # Panics
    ///
    /// If `event_flag` was not handed out by the [`ProgramSpec`] this program was built from.
    pub fn event_flag(&self, event_flag: EventFlagId) -> &EventFlag {
        &self.event_flags[event_flag.index()]
    }

    pub(crate) fn flag_values(&self) -> &Bitmask {
        &self.flag_values
    }

    pub fn state_sets(&self) -> &[StateSet] {
        &self.state_sets
    }

    pub fn state_set(&self, index: usize) -> &StateSet {
        &self.state_sets[index]
    }

    pub fn pv_system(&self) -> &Arc<dyn PvSystem> {
        &self.pv
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    pub fn is_suspended(&self) -> bool {
        self.hold.is_suspended()
    }

    pub(crate) fn hold(&self) -> &HoldGate {
        &self.hold
    }

    /// Number of process variables currently connected.
    pub fn connected_count(&self) -> usize {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of channels backed by a process variable.
    pub fn assigned_count(&self) -> usize {
        self.assigned
    }

    /// Copy `value` into the shared buffer of `channel`, replacing its metadata if given.
    ///
    /// With `mark_dirty` in safe mode, every state set monitoring the channel sees it as
    /// dirty. The copy is clipped to the channel's effective count.
    pub fn write_channel(
        &self,
        channel: ChannelId,
        value: &TypedBuffer,
        meta: Option<&PvMeta>,
        mark_dirty: bool,
    ) -> Result<(), BufferError> {
        let index = channel.index();
        let ch = &self.channels[index];

        let mut shared = ch.lock();
        let count = shared.live_count;
        shared.value.copy_from(value, count)?;
        if let Some(meta) = meta {
            shared.meta = meta.clone();
        }

        if mark_dirty && self.config.safe_mode {
            for state_set in &self.state_sets {
                if state_set.monitored.test(index) {
                    state_set.dirty.set(index);
                }
            }
        }

        trace!(program = %self.name, channel = %ch.var_name(), count, mark_dirty, "Wrote shared buffer");
        Ok(())
    }

    /// Wake state sets: all of them, or those whose event mask contains the event.
    pub fn wakeup(&self, wakeup: Wakeup) {
        let number = match wakeup {
            Wakeup::All => None,
            Wakeup::Event(event) => Some(event.number(self.event_flags.len())),
        };

        for state_set in &self.state_sets {
            if number.is_none_or(|n| state_set.mask.test(n)) {
                state_set.sync.signal();
            }
        }
    }

    /// Set an event flag and wake the state sets waiting on it.
    pub fn ef_set(&self, event_flag: EventFlagId) {
        self.flag_values.set(event_flag.index());
        self.wakeup(Wakeup::Event(Event::Flag(event_flag)));
    }

    /// Clear an event flag and wake the state sets waiting on it. Returns whether it was set.
    pub fn ef_clear(&self, event_flag: EventFlagId) -> bool {
        let was_set = self.flag_values.clear(event_flag.index());
        self.wakeup(Wakeup::Event(Event::Flag(event_flag)));
        was_set
    }

    pub fn ef_is_set(&self, event_flag: EventFlagId) -> bool {
        self.flag_values.test(event_flag.index())
    }

    /// Request termination. Every state set unwinds at its next wakeup, which this forces.
    pub fn exit(&self) {
        if !self.terminating.swap(true, Ordering::AcqRel) {
            info!(program = %self.name, instance = self.instance, "Stopping program");
        }
        self.ready.signal();
        self.hold.release();
        self.wakeup(Wakeup::All);
    }

    /// Ask every state set to hold at its next wakeup until [`resume`](Self::resume).
    pub fn suspend(&self) {
        debug!(program = %self.name, "Suspending");
        self.hold.suspend();
    }

    pub fn resume(&self) {
        debug!(program = %self.name, "Resuming");
        self.hold.resume();
    }

    /// Wait until at least `count` state sets are holding. Returns `false` on timeout.
    pub fn wait_suspended(&self, count: usize, timeout: Duration) -> bool {
        self.hold.wait_parked(count, timeout)
    }

    /// Run the program on the calling thread until it terminates.
    ///
    /// The calling thread hosts the first state set; every other state set gets its own
    /// thread. Teardown always runs before this returns, including on startup failure and
    /// when an action panics.
    pub fn run(self: &Arc<Self>) -> Result<(), ProgramError> {
        let thread_id = thread::current().id();
        if let Err(e) = registry().insert_program(thread_id, Arc::clone(self)) {
            warn!(program = %self.name, error = %e, "Could not register program thread");
        }
        let _guard = PrimaryGuard {
            program: self,
            thread_id,
        };

        info!(program = %self.name, instance = self.instance, "Starting program");

        let result = self.start_and_run();
        if let Err(e) = &result {
            error!(program = %self.name, instance = self.instance, error = %e, "Program aborted");
            self.terminating.store(true, Ordering::Release);
        }
        result
    }

    /// Run the program on a new thread named after it.
    pub fn spawn(self: &Arc<Self>) -> Result<JoinHandle<Result<(), ProgramError>>, ProgramError> {
        let thread_name = self
            .config
            .thread_name
            .clone()
            .unwrap_or_else(|| self.name.clone());

        let mut builder = thread::Builder::new().name(thread_name.clone());
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let program = Arc::clone(self);
        builder
            .spawn(move || program.run())
            .map_err(|source| ProgramError::Spawn {
                thread: thread_name,
                source,
            })
    }

    fn start_and_run(self: &Arc<Self>) -> Result<(), ProgramError> {
        if !self.pv.is_defined() {
            return Err(ProgramError::PvSystemUndefined {
                program: self.name.clone(),
            });
        }

        if let Some(init) = &self.init {
            init(self);
        }

        // Snapshots are taken before anything connects.
        let mut primary = self.context(0);
        let secondaries: Vec<StateSetContext> =
            (1..self.state_sets.len()).map(|index| self.context(index)).collect();

        self.pv.attach();
        self.connect_all()?;

        if self.config.safe_mode {
            self.seed_anonymous();
        }

        if let Some(entry) = &self.entry_action {
            entry(&mut primary);
        }

        let spawn_result = self.spawn_secondaries(secondaries);
        if spawn_result.is_ok() {
            engine::run(&mut primary);
        }

        self.join_secondaries();

        if let Some(exit) = &self.exit_action {
            exit(&mut primary);
        }

        spawn_result
    }

    fn context(self: &Arc<Self>, index: usize) -> StateSetContext {
        let snapshot = self
            .config
            .safe_mode
            .then(|| Snapshot::capture(&self.channels));
        StateSetContext::new(Arc::clone(self), index, snapshot)
    }

    /// Spawn a thread for every state set but the first, stopping at the first failure.
    fn spawn_secondaries(&self, secondaries: Vec<StateSetContext>) -> Result<(), ProgramError> {
        let base = self.config.thread_name.clone().unwrap_or_else(|| {
            thread::current()
                .name()
                .map_or_else(|| self.name.clone(), str::to_string)
        });

        for ctx in secondaries {
            let thread_name = format!("{base}_{}", ctx.index());
            let mut builder = thread::Builder::new().name(thread_name.clone());
            if let Some(stack_size) = self.config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            debug!(program = %self.name, thread = %thread_name, "Spawning state set thread");
            if let Err(source) = builder.spawn(move || engine::run_secondary(ctx)) {
                self.exit();
                return Err(ProgramError::Spawn {
                    thread: thread_name,
                    source,
                });
            }
            self.spawned.fetch_add(1, Ordering::AcqRel);
        }

        Ok(())
    }

    /// Wait for every spawned state set thread to report itself dead. Later calls return at
    /// once.
    fn join_secondaries(&self) {
        let spawned = self.spawned.swap(0, Ordering::AcqRel);
        if spawned == 0 {
            return;
        }

        debug!(program = %self.name, spawned, "Waiting for other state sets to exit");
        for state_set in &self.state_sets[1..=spawned] {
            state_set.dead.wait();
        }
    }

    /// Issue a connect request for every process variable, then optionally block until all
    /// of them are connected.
    fn connect_all(&self) -> Result<(), ProgramError> {
        for channel in &self.channels {
            let Some(link) = self.link(channel) else {
                continue;
            };
            self.pv
                .connect(link)
                .map_err(|source| ProgramError::ConnectFailed {
                    channel: channel.var_name().to_string(),
                    source,
                })?;
        }

        if !self.config.wait_for_connect || self.assigned == 0 {
            return Ok(());
        }

        info!(program = %self.name, channels = self.assigned, "Waiting for channels to connect");
        loop {
            let connected = self.connected_count();
            if connected >= self.assigned {
                info!(program = %self.name, "All channels connected");
                return Ok(());
            }
            if self.is_terminating() {
                return Err(ProgramError::ConnectAborted {
                    pending: self.assigned - connected,
                });
            }
            self.ready.wait();
        }
    }

    /// Emulate the first monitor update for anonymous channels, which never get one.
    fn seed_anonymous(&self) {
        for channel in self.channels.iter().filter(|ch| ch.is_anonymous()) {
            let index = channel.id().index();
            for state_set in &self.state_sets {
                if state_set.monitored.test(index) {
                    state_set.dirty.set(index);
                }
            }
            if let Some(flag) = channel.sync() {
                self.ef_set(flag);
            }
        }
    }

    fn link(&self, channel: &Channel) -> Option<ChannelLink> {
        let pv_name = channel.pv_name_arc()?;
        Some(ChannelLink::new(
            self.weak_self.clone(),
            channel.id(),
            pv_name,
            channel.element(),
            channel.count(),
            channel.is_monitored(),
        ))
    }

    /// Write a new value of `channel` and notify everyone interested in it.
    pub(crate) fn publish(
        &self,
        channel: ChannelId,
        value: &TypedBuffer,
        meta: Option<&PvMeta>,
    ) -> Result<(), BufferError> {
        self.write_channel(channel, value, meta, true)?;
        if let Some(flag) = self.channel(channel).sync() {
            self.ef_set(flag);
        }
        self.wakeup(Wakeup::Event(Event::Channel(channel)));
        Ok(())
    }

    pub(crate) fn on_monitor(
        &self,
        channel: ChannelId,
        value: &TypedBuffer,
        meta: &PvMeta,
    ) -> Result<(), BufferError> {
        trace!(program = %self.name, channel = %self.channel(channel).var_name(), "Monitor update");
        self.publish(channel, value, Some(meta))
    }

    pub(crate) fn on_connection(&self, channel: ChannelId, connected: bool, remote_count: usize) {
        let ch = self.channel(channel);
        if !ch.set_connected(connected, remote_count) {
            return;
        }

        if connected {
            let now_connected = self.connected.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(
                program = %self.name,
                channel = %ch.var_name(),
                count = ch.effective_count(),
                connected = now_connected,
                assigned = self.assigned,
                "Channel connected"
            );
            if now_connected >= self.assigned {
                self.ready.signal();
            }
        } else {
            self.connected.fetch_sub(1, Ordering::AcqRel);
            debug!(program = %self.name, channel = %ch.var_name(), "Channel disconnected");
        }

        self.wakeup(Wakeup::Event(Event::Channel(channel)));
    }

    /// Deregister the primary thread and disconnect every channel. Runs once.
    fn teardown(&self, thread_id: ThreadId) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = registry().remove_program(&thread_id) {
            warn!(program = %self.name, error = %e, "Program thread was not registered");
        }

        debug!(program = %self.name, "Disconnecting all channels");
        for channel in &self.channels {
            if let Some(link) = self.link(channel) {
                self.pv.disconnect(&link);
                if channel.set_connected(false, 0) {
                    self.connected.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }

        info!(
            program = %self.name,
            instance = self.instance,
            "Instance {} of program \"{}\" terminated",
            self.instance,
            self.name
        );
    }
}

/// Tears the program down when the primary thread leaves [`Program::run`], even when unwinding.
struct PrimaryGuard<'a> {
    program: &'a Arc<Program>,
    thread_id: ThreadId,
}

impl Drop for PrimaryGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(
                program = %self.program.name,
                instance = self.program.instance,
                "Primary state set panicked, stopping program"
            );
            self.program.exit();
            self.program.join_secondaries();
        }
        self.program.teardown(self.thread_id);
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("instance", &self.instance)
            .field("config", &self.config)
            .field("channels", &self.channels.len())
            .field("event_flags", &self.event_flags.len())
            .field("state_sets", &self.state_sets)
            .field("terminating", &self.is_terminating())
            .field("suspended", &self.is_suspended())
            .finish_non_exhaustive()
    }
}
