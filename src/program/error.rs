use thiserror::Error;

use crate::pv::PvError;

/// Errors that abort a program before or during startup.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// The program table declares no state sets.
    #[error("program '{program}' has no state sets")]
    NoStateSets { program: String },

    /// A state set declares no states.
    #[error("state set '{state_set}' has no states")]
    EmptyStateSet { state_set: String },

    /// A channel is synced to an event flag that does not exist.
    #[error("channel '{channel}' is synced to unknown event flag {flag}")]
    UnknownEventFlag { channel: String, flag: usize },

    /// The data source handle could not be created or attached.
    #[error("data source for program '{program}' is not defined")]
    PvSystemUndefined { program: String },

    /// A connect request was rejected by the data source.
    #[error("failed to connect channel '{channel}'")]
    ConnectFailed {
        channel: String,
        #[source]
        source: PvError,
    },

    /// The program was stopped while waiting for its channels to connect.
    #[error("stopped while waiting for {pending} channel(s) to connect")]
    ConnectAborted { pending: usize },

    /// A state set thread could not be spawned.
    #[error("failed to spawn state set thread '{thread}'")]
    Spawn {
        thread: String,
        #[source]
        source: std::io::Error,
    },
}
