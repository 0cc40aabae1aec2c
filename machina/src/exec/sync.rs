use crate::error::Result;
use crate::event::Event;
use crate::exec::Hsm;
use crate::machine::{Dispatch, StateCell, Wait};

/// Caller-driven execution.
///
/// No thread is created; the embedder calls [`step`](SyncExecutor::step)
/// from its own loop. A step performs exactly one dispatch iteration when
/// an event is waiting and returns immediately otherwise, which makes the
/// policy suitable for test harnesses and cooperative schedulers.
pub struct SyncExecutor<M: Hsm> {
    machine: M,
}

impl<M: Hsm> SyncExecutor<M> {
    pub fn new(machine: M) -> Self {
        SyncExecutor { machine }
    }

    pub fn start(&mut self) -> Result<()> {
        self.machine.start()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.machine.stop()
    }

    pub fn send_event(&self, event: Event) {
        self.machine.send_event(event);
    }

    /// Perform one dispatch iteration if the queue is non-empty; return
    /// [`Dispatch::Empty`] immediately otherwise. Never blocks.
    pub fn step(&mut self) -> Result<Dispatch> {
        if self.machine.queue().is_empty() {
            return Ok(Dispatch::Empty);
        }
        self.machine.dispatch(Wait::Poll)
    }

    /// Step until the queue drains or the machine terminates. Returns the
    /// number of dispatch iterations performed.
    pub fn run_to_idle(&mut self) -> Result<usize> {
        let mut steps = 0;
        loop {
            match self.step()? {
                Dispatch::Handled | Dispatch::Propagated => steps += 1,
                Dispatch::Empty | Dispatch::Terminated => return Ok(steps),
            }
        }
    }

    pub fn state_cell(&self) -> StateCell {
        self.machine.state_cell()
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    pub fn into_inner(self) -> M {
        self.machine
    }
}
