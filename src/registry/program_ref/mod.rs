use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::{convert::Infallible, fmt};

use self::error::ProgramRefInvalid;
use crate::program::Program;

pub mod error;

/// A weak reference to a registered program that provides a scoped [`view`](Self::view).
pub struct ProgramRef {
    thread_id: ThreadId,
    weak_program: Weak<Program>,
}

impl ProgramRef {
    pub(super) fn new(thread_id: ThreadId, weak_program: Weak<Program>) -> ProgramRef {
        Self {
            thread_id,
            weak_program,
        }
    }

    /// The thread this reference was looked up by.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Scoped access via a `view_fn` to the program.
    ///
    /// If the program is still alive returns the value `R` computed from the `view_fn`, else
    /// returns a [`ProgramRefInvalid`] error.
    pub fn view<F: FnOnce(&Arc<Program>) -> R, R>(&self, view_fn: F) -> Result<R, ProgramRefInvalid> {
        Weak::upgrade(&self.weak_program)
            .map(|program| view_fn(&program))
            .ok_or(ProgramRefInvalid {
                thread_id: self.thread_id,
            })
    }
}

#[allow(clippy::missing_fields_in_debug, reason = "custom weak handling")]
impl fmt::Debug for ProgramRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.view(|program| {
            f.debug_struct("ProgramRef")
                .field("thread_id", &self.thread_id)
                .field("program", &Ok::<_, Infallible>(program.name()))
                .finish()
        })
        .unwrap_or_else(|err| {
            f.debug_struct("ProgramRef")
                .field("thread_id", &self.thread_id)
                .field("program", &Err::<Infallible, _>(err))
                .finish()
        })
    }
}

impl Clone for ProgramRef {
    fn clone(&self) -> Self {
        Self {
            thread_id: self.thread_id,
            weak_program: self.weak_program.clone(),
        }
    }
}
