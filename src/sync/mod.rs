//! Blocking primitives the scheduler is built on.

pub mod event;
pub mod hold;

pub use event::SyncEvent;
pub use hold::HoldGate;
