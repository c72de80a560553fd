//! Process-wide registry of running programs, keyed by the threads their state sets run on.
//!
//! A program's primary thread is inserted when the program starts and every additional state
//! set thread inserts itself when it starts running. Secondary threads remove themselves
//! before reporting termination; the primary thread is removed first thing in teardown, so no
//! lookup can succeed once teardown has begun.

use std::sync::{Arc, LazyLock};
use std::thread::ThreadId;

use dashmap::{DashMap, Entry};
use tracing::info;

use self::{
    error::{ProgramAlreadyRegistered, ProgramNotRegistered},
    program_ref::ProgramRef,
};
use crate::program::Program;

pub mod error;
pub mod program_ref;

static REGISTRY: LazyLock<ProgramRegistry> = LazyLock::new(ProgramRegistry::new);

/// The registry shared by every program in this process.
pub fn registry() -> &'static ProgramRegistry {
    &REGISTRY
}

/// Ask the program running on `thread_id` to stop. Returns whether a program was found.
pub fn stop_program(thread_id: ThreadId) -> bool {
    registry()
        .get_program(&thread_id)
        .ok()
        .and_then(|program_ref| program_ref.view(|program| program.exit()).ok())
        .is_some()
}

/// A map of state set threads to the program they belong to.
///
/// Lookups only hand out [`ProgramRef`]s so a caller can never extend a program's lifetime
/// past its teardown.
#[derive(Debug)]
pub struct ProgramRegistry {
    programs: DashMap<ThreadId, Arc<Program>, ahash::RandomState>,
    instances: DashMap<String, usize, ahash::RandomState>,
}

impl ProgramRegistry {
    /// Construct a new empty [`ProgramRegistry`].
    pub fn new() -> ProgramRegistry {
        Self::default()
    }

    /// Register `program` as running on `thread_id`.
    pub fn insert_program(
        &self,
        thread_id: ThreadId,
        program: Arc<Program>,
    ) -> Result<(), ProgramAlreadyRegistered> {
        match self.programs.entry(thread_id) {
            Entry::Occupied(entry) => Err(ProgramAlreadyRegistered {
                thread_id,
                program: entry.get().name().to_string(),
            }),

            Entry::Vacant(slot) => {
                slot.insert(program);
                Ok(())
            }
        }
    }

    /// Remove the registration for `thread_id`.
    pub fn remove_program(&self, thread_id: &ThreadId) -> Result<(), ProgramNotRegistered> {
        self.programs
            .remove(thread_id)
            .ok_or(ProgramNotRegistered {
                thread_id: *thread_id,
            })?;

        Ok(())
    }

    /// Lend the program registered for `thread_id`.
    pub fn get_program(&self, thread_id: &ThreadId) -> Result<ProgramRef, ProgramNotRegistered> {
        self.programs
            .view(thread_id, |_, program| {
                ProgramRef::new(*thread_id, Arc::downgrade(program))
            })
            .ok_or(ProgramNotRegistered {
                thread_id: *thread_id,
            })
    }

    /// Lend every registered thread of the program called `name`.
    pub fn find_by_name(&self, name: &str) -> Vec<ProgramRef> {
        self.programs
            .iter()
            .filter(|entry| entry.value().name() == name)
            .map(|entry| ProgramRef::new(*entry.key(), Arc::downgrade(entry.value())))
            .collect()
    }

    /// Number of registered threads.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Allocate the next instance number for a program called `name`, starting at 0.
    pub fn next_instance(&self, name: &str) -> usize {
        let mut counter = self.instances.entry(name.to_string()).or_insert(0);
        let instance = *counter;
        *counter += 1;
        if instance > 0 {
            info!(program = %name, instance, "Creating additional program instance");
        }
        instance
    }
}

impl Default for ProgramRegistry {
    fn default() -> Self {
        Self {
            programs: DashMap::default(),
            instances: DashMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{ProgramConfig, ProgramSpec, StateSetSpec, StateSpec};
    use crate::pv::LocalPvSystem;
    use std::thread;

    fn program(name: &str) -> Arc<Program> {
        let mut spec = ProgramSpec::new(name);
        spec.add_state_set(StateSetSpec::new("ss").state(StateSpec::new("idle", |_| None)));
        Program::new(spec, ProgramConfig::default(), Arc::new(LocalPvSystem::new())).unwrap()
    }

    fn other_thread_id() -> ThreadId {
        thread::spawn(|| thread::current().id()).join().unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let registry = ProgramRegistry::new();
        let thread_id = other_thread_id();

        registry.insert_program(thread_id, program("tank")).unwrap();

        let program_ref = registry.get_program(&thread_id).unwrap();
        assert_eq!(program_ref.view(|p| p.name().to_string()).unwrap(), "tank");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_thread_error() {
        let registry = ProgramRegistry::new();
        let thread_id = other_thread_id();

        registry.insert_program(thread_id, program("tank")).unwrap();

        let result = registry.insert_program(thread_id, program("pump"));
        assert!(matches!(
            result.unwrap_err(),
            ProgramAlreadyRegistered { ref program, .. } if program == "tank"
        ));
    }

    #[test]
    fn test_remove_and_lookup_fails() {
        let registry = ProgramRegistry::new();
        let thread_id = other_thread_id();

        registry.insert_program(thread_id, program("tank")).unwrap();
        registry.remove_program(&thread_id).unwrap();

        assert!(registry.get_program(&thread_id).is_err());
        assert!(matches!(
            registry.remove_program(&thread_id).unwrap_err(),
            ProgramNotRegistered { .. }
        ));
    }

    #[test]
    fn test_ref_invalid_after_drop() {
        let registry = ProgramRegistry::new();
        let thread_id = other_thread_id();

        registry.insert_program(thread_id, program("tank")).unwrap();
        let program_ref = registry.get_program(&thread_id).unwrap();
        registry.remove_program(&thread_id).unwrap();

        assert!(program_ref.view(|_| ()).is_err());
    }

    #[test]
    fn test_find_by_name() {
        let registry = ProgramRegistry::new();
        let shared = program("tank");

        registry.insert_program(other_thread_id(), Arc::clone(&shared)).unwrap();
        registry.insert_program(other_thread_id(), shared).unwrap();
        registry.insert_program(other_thread_id(), program("pump")).unwrap();

        assert_eq!(registry.find_by_name("tank").len(), 2);
        assert_eq!(registry.find_by_name("pump").len(), 1);
        assert!(registry.find_by_name("none").is_empty());
    }

    #[test]
    fn test_instance_numbers() {
        let registry = ProgramRegistry::new();
        assert_eq!(registry.next_instance("tank"), 0);
        assert_eq!(registry.next_instance("tank"), 1);
        assert_eq!(registry.next_instance("pump"), 0);
    }
}
