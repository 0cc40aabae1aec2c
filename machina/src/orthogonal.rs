use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::machine::{Dispatch, Lifecycle, ParentRef, StateCell, Wait};
use crate::queue::EventQueue;
use crate::StateMachine;

/// Two peer machines composed over one event stream.
///
/// Both regions share the enclosing queue and name this composition as
/// their parent. Each dispatch iteration gives every region's current state
/// an execute pass, waits for the next event, and routes it by recognized
/// event set: the first region wins when both recognize an event, and an
/// event consumed by one region is never re-delivered to the other. Events
/// neither region recognizes propagate to the parent, or are logged and
/// discarded at the root.
pub struct Orthogonal {
    name: String,
    parent: Option<ParentRef>,
    queue: Arc<EventQueue>,
    interrupt: Arc<AtomicBool>,
    current_cell: StateCell,
    lifecycle: Lifecycle,
    first: StateMachine,
    second: StateMachine,
}

impl Orthogonal {
    /// Compose `first` and `second`. Declaration order is the tie-break:
    /// when both regions recognize an event, `first` receives it.
    pub fn new(name: impl Into<String>, mut first: StateMachine, mut second: StateMachine) -> Self {
        let name = name.into();
        let queue = Arc::new(EventQueue::new());
        let parent = ParentRef {
            name: Arc::from(name.as_str()),
        };
        first.attach(queue.clone(), parent.clone());
        second.attach(queue.clone(), parent);
        Orthogonal {
            name,
            parent: None,
            queue,
            interrupt: Arc::new(AtomicBool::new(false)),
            current_cell: StateCell::new(),
            lifecycle: Lifecycle::Idle,
            first,
            second,
        }
    }

    pub(crate) fn attach(&mut self, queue: Arc<EventQueue>, parent: ParentRef) {
        self.queue = queue;
        self.parent = Some(parent);
        let own_ref = ParentRef {
            name: Arc::from(self.name.as_str()),
        };
        self.first.attach(self.queue.clone(), own_ref.clone());
        self.second.attach(self.queue.clone(), own_ref);
    }

    /// Start both regions, first then second.
    pub fn start(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Idle {
            return Err(self.lifecycle_error("start"));
        }
        if self.parent.is_none() {
            self.queue.reset();
        }
        self.interrupt.store(false, Ordering::SeqCst);
        self.lifecycle = Lifecycle::Running;
        self.first.start()?;
        self.second.start()?;
        debug!(machine = %self.name, "regions started");
        Ok(())
    }

    /// Interrupt both regions and return to idle. At the root this also
    /// stops the shared queue.
    pub fn stop(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Running {
            return Err(self.lifecycle_error("stop"));
        }
        self.interrupt.store(true, Ordering::SeqCst);
        if self.parent.is_none() {
            self.queue.stop();
        }
        let _ = self.first.stop();
        let _ = self.second.stop();
        self.lifecycle = Lifecycle::Idle;
        debug!(machine = %self.name, "stopped");
        Ok(())
    }

    /// Return a terminated composition to idle.
    pub fn reset(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Terminated {
            return Err(self.lifecycle_error("reset"));
        }
        self.interrupt.store(false, Ordering::SeqCst);
        let _ = self.first.reset();
        let _ = self.second.reset();
        self.lifecycle = Lifecycle::Idle;
        Ok(())
    }

    pub fn send_event(&self, event: Event) {
        self.queue.add_back(event);
    }

    /// Perform one dispatch iteration: execute pass for each region, then
    /// dequeue and route.
    pub fn dispatch(&mut self, wait: Wait) -> Result<Dispatch> {
        if self.lifecycle != Lifecycle::Running {
            return Err(self.lifecycle_error("dispatch"));
        }

        if let Err(err) = self
            .first
            .execute_current()
            .and_then(|()| self.second.execute_current())
        {
            self.lifecycle = Lifecycle::Terminated;
            return Err(err);
        }

        let event = match wait {
            Wait::Block => match self.queue.next() {
                Ok(event) => event,
                Err(Error::Interrupted) => return self.interrupted(),
                Err(err) => return Err(err),
            },
            Wait::Poll => match self.queue.try_next() {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(Dispatch::Empty),
                Err(Error::Interrupted) => return self.interrupted(),
                Err(err) => return Err(err),
            },
        };

        if self.first.lifecycle() == Lifecycle::Running && self.first.recognized_events().contains(&event.id()) {
            self.queue.add_front(event);
            return self.route_first();
        }
        if self.second.lifecycle() == Lifecycle::Running && self.second.recognized_events().contains(&event.id()) {
            self.queue.add_front(event);
            return self.route_second();
        }

        if let Some(parent) = &self.parent {
            debug!(
                machine = %self.name,
                parent = %parent.name,
                event = %event.id(),
                "no region recognizes event, propagating to parent"
            );
            self.queue.add_front(event);
            return Ok(Dispatch::Propagated);
        }
        warn!(machine = %self.name, event = %event.id(), "unhandled event discarded");
        Ok(Dispatch::Handled)
    }

    fn route_first(&mut self) -> Result<Dispatch> {
        let outcome = self.first.dispatch(Wait::Poll);
        self.after_route(outcome)
    }

    fn route_second(&mut self) -> Result<Dispatch> {
        let outcome = self.second.dispatch(Wait::Poll);
        self.after_route(outcome)
    }

    fn after_route(&mut self, outcome: Result<Dispatch>) -> Result<Dispatch> {
        match outcome {
            // The region recognizes the event id globally but has no
            // transition from its current state. The event was pushed back
            // to the front; hand it upward rather than to the peer, so a
            // consumed event is never seen by both regions.
            Ok(Dispatch::Propagated) => {
                if self.parent.is_some() {
                    return Ok(Dispatch::Propagated);
                }
                if let Ok(Some(event)) = self.queue.try_next() {
                    warn!(
                        machine = %self.name,
                        event = %event.id(),
                        "region has no transition from its current state, event discarded"
                    );
                }
                Ok(Dispatch::Handled)
            }
            // The region reached its stop state before dequeuing; the event
            // stays at the front and is re-examined on the next iteration,
            // where the now-idle region no longer takes it.
            Ok(Dispatch::Terminated) => Ok(Dispatch::Handled),
            Ok(Dispatch::Empty) => Ok(Dispatch::Handled),
            Ok(outcome) => Ok(outcome),
            Err(Error::Interrupted) => self.interrupted(),
            Err(err) => {
                self.lifecycle = Lifecycle::Terminated;
                Err(err)
            }
        }
    }

    fn interrupted(&mut self) -> Result<Dispatch> {
        if self.interrupt.load(Ordering::SeqCst) {
            let _ = self.first.stop();
            let _ = self.second.stop();
            self.lifecycle = Lifecycle::Idle;
            debug!(machine = %self.name, "interrupted, returning to idle");
            Ok(Dispatch::Terminated)
        } else {
            Err(Error::Interrupted)
        }
    }

    fn lifecycle_error(&self, operation: &'static str) -> Error {
        Error::InvalidLifecycle {
            machine: self.name.clone(),
            lifecycle: self.lifecycle,
            operation,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn first(&self) -> &StateMachine {
        &self.first
    }

    pub fn second(&self) -> &StateMachine {
        &self.second
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub(crate) fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub(crate) fn state_cell(&self) -> StateCell {
        self.current_cell.clone()
    }

    /// Union of the regions' recognized event sets, used by an enclosing
    /// machine to route events here.
    pub fn recognized_events(&self) -> std::collections::BTreeSet<crate::EventId> {
        self.first
            .recognized_events()
            .union(self.second.recognized_events())
            .copied()
            .collect()
    }
}
