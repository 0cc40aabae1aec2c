use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::exec::Hsm;
use crate::machine::{Dispatch, Lifecycle, StateCell, Wait};
use crate::queue::EventQueue;
use crate::state::StateId;

type Notify = Box<dyn FnMut() + Send>;

/// Thread-driven execution.
///
/// [`start`](ThreadedExecutor::start) enters the machine's start state on
/// the caller's thread, then moves the machine onto a dedicated worker that
/// blocks on the event queue and dispatches until the machine terminates or
/// is interrupted. [`stop`](ThreadedExecutor::stop) sets the interrupt
/// flag, stops the queue, joins the worker and reclaims the machine, so
/// start/stop cycles can be repeated.
///
/// Dropping a running executor performs the same orderly shutdown with a
/// logged warning; prefer calling `stop` explicitly.
pub struct ThreadedExecutor<M: Hsm> {
    name: String,
    machine: Option<M>,
    worker: Option<JoinHandle<(M, Option<Notify>)>>,
    queue: Arc<EventQueue>,
    interrupt: Arc<AtomicBool>,
    current: StateCell,
    observer: Option<Notify>,
}

impl<M: Hsm> ThreadedExecutor<M> {
    pub fn new(machine: M) -> Self {
        let queue = machine.queue().clone();
        let interrupt = machine.interrupt_flag();
        let current = machine.state_cell();
        ThreadedExecutor {
            name: machine.name().to_owned(),
            machine: Some(machine),
            worker: None,
            queue,
            interrupt,
            current,
            observer: None,
        }
    }

    /// Like [`new`](ThreadedExecutor::new), with a callback invoked
    /// immediately before each blocking dequeue. Notification is
    /// best-effort: a panicking observer is logged and skipped, never
    /// fatal to the worker.
    pub fn with_observer(machine: M, notify: impl FnMut() + Send + 'static) -> Self {
        let mut executor = ThreadedExecutor::new(machine);
        executor.observer = Some(Box::new(notify));
        executor
    }

    /// Start the machine and spawn the worker thread.
    pub fn start(&mut self) -> Result<()> {
        let Some(mut machine) = self.machine.take() else {
            return Err(Error::InvalidLifecycle {
                machine: self.name.clone(),
                lifecycle: Lifecycle::Running,
                operation: "start",
            });
        };
        self.interrupt.store(false, Ordering::SeqCst);
        self.queue.reset();
        if let Err(err) = machine.start() {
            self.machine = Some(machine);
            return Err(err);
        }
        let mut notify = self.observer.take();
        let spawned = thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || {
                loop {
                    if let Some(notify) = notify.as_mut() {
                        if panic::catch_unwind(AssertUnwindSafe(|| notify())).is_err() {
                            warn!("observer panicked, notification skipped");
                        }
                    }
                    match machine.dispatch(Wait::Block) {
                        Ok(Dispatch::Terminated) => break,
                        Ok(_) => {}
                        Err(Error::Interrupted) => {
                            // Stopped queue without a requested shutdown.
                            error!(
                                machine = %machine.name(),
                                "queue interrupted without stop, worker exiting"
                            );
                            break;
                        }
                        Err(err) => {
                            error!(machine = %machine.name(), error = %err, "worker exiting");
                            break;
                        }
                    }
                }
                debug!(machine = %machine.name(), "worker finished");
                (machine, notify)
            });
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(source) => Err(Error::Spawn {
                machine: self.name.clone(),
                source,
            }),
        }
    }

    /// Interrupt the machine, stop the queue, join the worker and reclaim
    /// the machine for a later restart.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Err(Error::InvalidLifecycle {
                machine: self.name.clone(),
                lifecycle: Lifecycle::Idle,
                operation: "stop",
            });
        };
        self.interrupt.store(true, Ordering::SeqCst);
        self.queue.stop();
        match handle.join() {
            Ok((mut machine, notify)) => {
                // The worker may have exited on its own, e.g. through the
                // stop state; make sure the machine lands on idle. A
                // terminated machine is kept terminated for the embedder to
                // reset.
                if machine.lifecycle() == Lifecycle::Running {
                    let _ = machine.stop();
                }
                self.observer = notify;
                self.machine = Some(machine);
                Ok(())
            }
            Err(_) => Err(Error::WorkerPanic {
                machine: self.name.clone(),
            }),
        }
    }

    pub fn send_event(&self, event: Event) {
        self.queue.add_back(event);
    }

    /// Current state as mirrored by the dispatcher thread.
    pub fn current_state(&self) -> Option<StateId> {
        self.current.get()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// The wrapped machine, available while no worker owns it.
    pub fn machine(&self) -> Option<&M> {
        self.machine.as_ref()
    }

    pub fn machine_mut(&mut self) -> Option<&mut M> {
        self.machine.as_mut()
    }

    /// Shut down if needed and take the machine back. Returns `None` when a
    /// worker panicked and the machine was lost with it.
    pub fn into_inner(mut self) -> Option<M> {
        if self.worker.is_some() {
            let _ = self.stop();
        }
        self.machine.take()
    }
}

impl<M: Hsm> Drop for ThreadedExecutor<M> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            warn!(machine = %self.name, "executor dropped while running, shutting worker down");
            let _ = self.stop();
        }
    }
}
