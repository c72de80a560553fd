//! Contract between the runtime and the external data source.
//!
//! The runtime issues connect, put, get and flush requests through [`PvSystem`]. The data
//! source reports back through the [`ChannelLink`] it was handed on connect: connection state
//! changes and monitor updates.

use std::sync::{Arc, Weak};

use thiserror::Error;

use crate::channel::{BufferError, ChannelId, ElementType, PvMeta, TypedBuffer};
use crate::program::Program;

pub use self::local::LocalPvSystem;

pub mod local;

/// Errors reported by a data source.
#[derive(Debug, Error)]
pub enum PvError {
    #[error("process variable '{0}' not found")]
    NotFound(String),

    #[error("process variable '{0}' is not connected")]
    Disconnected(String),

    #[error("process variable '{pv}' rejected the value")]
    Buffer {
        pv: String,
        #[source]
        source: BufferError,
    },

    #[error("data source error: {0}")]
    Other(String),
}

/// Errors raised when a data source reports through a [`ChannelLink`].
#[derive(Debug, Error)]
pub enum LinkError {
    /// The program owning the channel has been torn down.
    #[error("program for process variable '{pv}' is no longer running")]
    Closed { pv: String },

    #[error("monitor update for '{pv}' rejected")]
    Buffer {
        pv: String,
        #[source]
        source: BufferError,
    },
}

/// A data source client.
pub trait PvSystem: Send + Sync {
    /// Whether the data source handle is usable. Startup is aborted if not.
    fn is_defined(&self) -> bool {
        true
    }

    /// Attach the calling thread to the data source context.
    fn attach(&self) {}

    /// Start connecting the channel behind `link`. Completion is reported asynchronously via
    /// [`ChannelLink::connected`].
    fn connect(&self, link: ChannelLink) -> Result<(), PvError>;

    /// Stop delivering to `link`; called once per connected channel during teardown.
    fn disconnect(&self, link: &ChannelLink);

    fn put(&self, pv_name: &str, value: &TypedBuffer) -> Result<(), PvError>;

    /// Synchronously read the current value and metadata.
    fn get(&self, pv_name: &str) -> Result<(TypedBuffer, PvMeta), PvError>;

    /// Flush any buffered outbound requests.
    fn flush(&self) {}
}

/// Handle through which a data source reports on one channel of a running program.
///
/// Holds only a weak reference to the program, so an outstanding link never keeps a torn
/// down program alive.
#[derive(Clone)]
pub struct ChannelLink {
    program: Weak<Program>,
    channel: ChannelId,
    pv_name: Arc<str>,
    element: ElementType,
    count: usize,
    monitor: bool,
}

impl ChannelLink {
    pub(crate) fn new(
        program: Weak<Program>,
        channel: ChannelId,
        pv_name: Arc<str>,
        element: ElementType,
        count: usize,
        monitor: bool,
    ) -> Self {
        Self {
            program,
            channel,
            pv_name,
            element,
            count,
            monitor,
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn pv_name(&self) -> &str {
        &self.pv_name
    }

    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether the program wants monitor updates for this channel.
    pub fn wants_monitor(&self) -> bool {
        self.monitor
    }

    /// Report that the channel connected with `remote_count` elements.
    pub fn connected(&self, remote_count: usize) -> Result<(), LinkError> {
        self.program()?
            .on_connection(self.channel, true, remote_count);
        Ok(())
    }

    pub fn disconnected(&self) -> Result<(), LinkError> {
        self.program()?.on_connection(self.channel, false, 0);
        Ok(())
    }

    /// Deliver a monitor update.
    pub fn post(&self, value: &TypedBuffer, meta: &PvMeta) -> Result<(), LinkError> {
        self.program()?
            .on_monitor(self.channel, value, meta)
            .map_err(|source| LinkError::Buffer {
                pv: self.pv_name.to_string(),
                source,
            })
    }

    /// Whether both links report on the same channel of the same program.
    pub fn is_same(&self, other: &ChannelLink) -> bool {
        self.channel == other.channel && Weak::ptr_eq(&self.program, &other.program)
    }

    /// Whether the owning program is still alive.
    pub fn is_open(&self) -> bool {
        self.program.strong_count() > 0
    }

    fn program(&self) -> Result<Arc<Program>, LinkError> {
        self.program.upgrade().ok_or_else(|| LinkError::Closed {
            pv: self.pv_name.to_string(),
        })
    }
}

impl std::fmt::Debug for ChannelLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLink")
            .field("channel", &self.channel)
            .field("pv_name", &self.pv_name)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
