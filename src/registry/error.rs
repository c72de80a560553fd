use std::thread::ThreadId;

/// Indicates that a thread is already registered to a program.
#[derive(Debug, thiserror::Error)]
#[error("thread {thread_id:?} is already registered to program '{program}'")]
pub struct ProgramAlreadyRegistered {
    pub thread_id: ThreadId,
    pub program: String,
}

/// Indicates that no program is registered for a thread.
#[derive(Debug, thiserror::Error)]
#[error("no program registered for thread {thread_id:?}")]
pub struct ProgramNotRegistered {
    pub thread_id: ThreadId,
}
