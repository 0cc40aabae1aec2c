//! Execution policies pairing a machine with a driver.
//!
//! A machine never schedules itself. [`SyncExecutor`] hands each dispatch
//! to the caller, one step at a time; [`ThreadedExecutor`] owns a worker
//! thread that blocks on the event queue and dispatches until the machine
//! terminates or is interrupted.

mod sync;
mod threaded;

pub use sync::SyncExecutor;
pub use threaded::ThreadedExecutor;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::Result;
use crate::event::Event;
use crate::machine::{Dispatch, Lifecycle, StateCell, Wait};
use crate::queue::EventQueue;
use crate::{Orthogonal, StateMachine};

/// Capability set an executor drives: lifecycle control plus one dispatch
/// iteration. Implemented by [`StateMachine`] and [`Orthogonal`], so either
/// can sit at the root under either policy.
pub trait Hsm: Send + 'static {
    fn name(&self) -> &str;

    fn queue(&self) -> &Arc<EventQueue>;

    fn lifecycle(&self) -> Lifecycle;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn reset(&mut self) -> Result<()>;

    fn dispatch(&mut self, wait: Wait) -> Result<Dispatch>;

    /// Shared flag distinguishing a requested shutdown from a stray queue
    /// interruption.
    fn interrupt_flag(&self) -> Arc<AtomicBool>;

    /// Cross-thread view of the current state.
    fn state_cell(&self) -> StateCell;

    fn send_event(&self, event: Event) {
        self.queue().add_back(event);
    }
}

impl Hsm for StateMachine {
    fn name(&self) -> &str {
        StateMachine::name(self)
    }

    fn queue(&self) -> &Arc<EventQueue> {
        StateMachine::queue(self)
    }

    fn lifecycle(&self) -> Lifecycle {
        StateMachine::lifecycle(self)
    }

    fn start(&mut self) -> Result<()> {
        StateMachine::start(self)
    }

    fn stop(&mut self) -> Result<()> {
        StateMachine::stop(self)
    }

    fn reset(&mut self) -> Result<()> {
        StateMachine::reset(self)
    }

    fn dispatch(&mut self, wait: Wait) -> Result<Dispatch> {
        StateMachine::dispatch(self, wait)
    }

    fn interrupt_flag(&self) -> Arc<AtomicBool> {
        StateMachine::interrupt_flag(self)
    }

    fn state_cell(&self) -> StateCell {
        StateMachine::state_cell(self)
    }
}

impl Hsm for Orthogonal {
    fn name(&self) -> &str {
        Orthogonal::name(self)
    }

    fn queue(&self) -> &Arc<EventQueue> {
        Orthogonal::queue(self)
    }

    fn lifecycle(&self) -> Lifecycle {
        Orthogonal::lifecycle(self)
    }

    fn start(&mut self) -> Result<()> {
        Orthogonal::start(self)
    }

    fn stop(&mut self) -> Result<()> {
        Orthogonal::stop(self)
    }

    fn reset(&mut self) -> Result<()> {
        Orthogonal::reset(self)
    }

    fn dispatch(&mut self, wait: Wait) -> Result<Dispatch> {
        Orthogonal::dispatch(self, wait)
    }

    fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Orthogonal::interrupt_flag(self)
    }

    fn state_cell(&self) -> StateCell {
        Orthogonal::state_cell(self)
    }
}
