use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::event_flag::EventFlagId;

pub use self::buffer::{BufferError, Element, ElementType, MAX_STRING_SIZE, TypedBuffer};
pub use self::meta::{PvMeta, Severity};

pub mod buffer;
pub mod meta;

/// Index of a channel in its program's channel table.
///
/// Also the bit index addressing the channel in dirty and monitored vectors. Only meaningful
/// for the program built from the [`ProgramSpec`](crate::ProgramSpec) that handed it out; any
/// other program panics when given it.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) usize);

impl ChannelId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Table entry describing one channel variable of a program.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub var_name: String,
    /// Name of the process variable backing this channel; `None` for anonymous channels.
    pub pv_name: Option<String>,
    pub element: ElementType,
    pub count: usize,
    /// Whether every state set monitors this channel from program start.
    pub monitor: bool,
    /// Event flag set whenever a monitor update arrives for this channel.
    pub sync: Option<EventFlagId>,
}

impl ChannelSpec {
    pub fn new(var_name: impl Into<String>, element: ElementType, count: usize) -> Self {
        Self {
            var_name: var_name.into(),
            pv_name: None,
            element,
            count,
            monitor: false,
            sync: None,
        }
    }

    pub fn pv(mut self, pv_name: impl Into<String>) -> Self {
        self.pv_name = Some(pv_name.into());
        self
    }

    pub fn monitor(mut self) -> Self {
        self.monitor = true;
        self
    }

    pub fn sync(mut self, event_flag: EventFlagId) -> Self {
        self.sync = Some(event_flag);
        self
    }
}

/// The shared side of a channel: value, metadata and the element count of the live
/// connection. Only ever touched with the channel lock held.
#[derive(Debug)]
pub(crate) struct SharedSlot {
    pub value: TypedBuffer,
    pub meta: PvMeta,
    pub live_count: usize,
}

/// A program variable bound to a shared buffer and, optionally, to a process variable.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    var_name: String,
    pv_name: Option<Arc<str>>,
    element: ElementType,
    count: usize,
    monitor: bool,
    sync: Option<EventFlagId>,
    connected: AtomicBool,
    shared: Mutex<SharedSlot>,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, spec: ChannelSpec) -> Self {
        Self {
            id,
            pv_name: spec.pv_name.map(Arc::from),
            element: spec.element,
            count: spec.count,
            monitor: spec.monitor,
            sync: spec.sync,
            connected: AtomicBool::new(false),
            shared: Mutex::new(SharedSlot {
                value: TypedBuffer::new(spec.element, spec.count),
                meta: PvMeta::default(),
                live_count: spec.count,
            }),
            var_name: spec.var_name,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn var_name(&self) -> &str {
        &self.var_name
    }

    pub fn pv_name(&self) -> Option<&str> {
        self.pv_name.as_deref()
    }

    pub(crate) fn pv_name_arc(&self) -> Option<Arc<str>> {
        self.pv_name.clone()
    }

    /// An anonymous channel has no process variable and lives only inside the program.
    pub fn is_anonymous(&self) -> bool {
        self.pv_name.is_none()
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    /// Element count declared in the program table.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_monitored(&self) -> bool {
        self.monitor
    }

    pub fn sync(&self) -> Option<EventFlagId> {
        self.sync
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of elements copied on every read and write.
    ///
    /// For process variables this is the element count of the live connection, which may be
    /// smaller than the declared count.
    pub fn effective_count(&self) -> usize {
        self.shared.lock().live_count
    }

    /// A copy of the shared value.
    pub fn value(&self) -> TypedBuffer {
        self.shared.lock().value.clone()
    }

    pub fn meta(&self) -> PvMeta {
        self.shared.lock().meta.clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedSlot> {
        self.shared.lock()
    }

    /// Record a connection state change, returning whether the state actually changed.
    pub(crate) fn set_connected(&self, connected: bool, remote_count: usize) -> bool {
        if connected && !self.is_anonymous() {
            self.shared.lock().live_count = remote_count.min(self.count);
        }
        self.connected.swap(connected, Ordering::AcqRel) != connected
    }
}
