use std::thread::ThreadId;

/// Indicates that a program lent out by the registry has since been torn down.
#[derive(Debug, thiserror::Error)]
#[error("the program registered for thread {thread_id:?} is no longer valid")]
pub struct ProgramRefInvalid {
    pub thread_id: ThreadId,
}
