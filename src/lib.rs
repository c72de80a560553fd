//! Runtime for state-notation programs: concurrently running state sets that share channel
//! variables, wake on event flags, monitor updates and timeouts, and stop cooperatively.

pub mod bitmask;
pub mod channel;
pub mod event_flag;
pub mod program;
pub mod pv;
pub mod registry;
pub mod snapshot;
pub mod state_set;
pub mod sync;

pub use channel::{ChannelId, ChannelSpec, ElementType, PvMeta, TypedBuffer};
pub use event_flag::{Event, EventFlagId, Wakeup};
pub use program::{Program, ProgramConfig, ProgramError, ProgramSpec, StateSetSpec, StateSpec};
pub use pv::{ChannelLink, LocalPvSystem, PvSystem};
pub use state_set::{StateId, StateSetContext, WaitStatus};
