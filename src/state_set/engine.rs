//! The per state set execution loop.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, error, trace, warn};

use super::wait::WaitStatus;
use super::{StateId, StateSetContext};
use crate::program::Program;
use crate::registry::registry;

/// Drive a state set from its initial state until the program terminates.
pub(crate) fn run(ctx: &mut StateSetContext) {
    let program = ctx.program().clone();
    let state_set = program.state_set(ctx.index());

    ctx.read_all_dirty();
    ctx.current = StateId(0);
    ctx.prev = None;
    ctx.next = None;
    state_set.set_current_state(Some(ctx.current));

    debug!(program = %program.name(), state_set = %state_set.name(), "Entering main loop");

    loop {
        let state = &state_set.states()[ctx.current.0];
        let changed = ctx.prev != Some(ctx.current);

        if changed || state.options.entry_on_self {
            if let Some(entry) = &state.entry {
                entry(ctx);
            }
        }

        state_set.mask.clear_all();
        program.pv_system().flush();

        if changed || !state.options.keep_timers_on_self {
            ctx.time_entered = Instant::now();
        }

        let Some(next) = await_transition(ctx) else {
            break;
        };

        if next.0 >= state_set.states().len() {
            error!(
                state_set = %state_set.name(),
                state = %state.name(),
                next = %next,
                "Transition to unknown state, stopping program"
            );
            program.exit();
            break;
        }

        ctx.next = Some(next);
        if next != ctx.current || state.options.exit_on_self {
            if let Some(exit) = &state.exit {
                exit(ctx);
            }
        }

        trace!(
            state_set = %state_set.name(),
            from = %state.name(),
            to = %state_set.states()[next.0].name(),
            "Transition"
        );

        ctx.prev = Some(ctx.current);
        ctx.current = next;
        ctx.next = None;
        state_set.set_current_state(Some(next));
    }

    state_set.set_current_state(None);
    debug!(program = %program.name(), state_set = %state_set.name(), "Left main loop");
}

/// Evaluate the current state's transition until it triggers. Returns `None` when the program
/// is terminating.
fn await_transition(ctx: &mut StateSetContext) -> Option<StateId> {
    let program = ctx.program().clone();
    let state_set = program.state_set(ctx.index());
    let transition = state_set.states()[ctx.current.0].transition.clone();

    ctx.wakeup_time = None;
    state_set.sync.signal();

    loop {
        state_set.sync.wait_until(ctx.wakeup_time);
        if ctx.after_wake() == WaitStatus::Terminate {
            return None;
        }
        if let Some(next) = transition(ctx) {
            return Some(next);
        }
    }
}

/// Deregisters a secondary state set thread and reports it dead, even when unwinding.
struct ThreadRegistration {
    program: Arc<Program>,
    index: usize,
}

impl Drop for ThreadRegistration {
    fn drop(&mut self) {
        let state_set = self.program.state_set(self.index);
        if thread::panicking() {
            error!(state_set = %state_set.name(), "State set panicked, stopping program");
            self.program.exit();
        }
        if let Err(e) = registry().remove_program(&thread::current().id()) {
            warn!(state_set = %state_set.name(), error = %e, "State set thread was not registered");
        }
        state_set.dead.signal();
    }
}

/// Entry point of every state set thread other than the primary one.
pub(crate) fn run_secondary(mut ctx: StateSetContext) {
    let program = ctx.program().clone();
    let _registration = ThreadRegistration {
        program: program.clone(),
        index: ctx.index(),
    };
    if let Err(e) = registry().insert_program(thread::current().id(), program.clone()) {
        warn!(error = %e, "Could not register state set thread");
    }
    program.pv_system().attach();

    run(&mut ctx);
}
