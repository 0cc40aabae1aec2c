use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::{Event, EventId};
use crate::queue::EventQueue;
use crate::state::{NodeKind, StateHandler, StateId, StateNode};
use crate::transition::{Action, Guard, Transition, TransitionKind, TransitionTable};
use crate::Orthogonal;

/// Meta-state of a machine.
///
/// ```text
/// Idle --start--> Running --stop/stop state--> Idle
/// Running --fault--> Terminated --reset--> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Running,
    Terminated,
}

/// Outcome of one dispatch iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// An event was consumed: a transition ran, a guard rejected it, or the
    /// root discarded it.
    Handled,
    /// The event was not recognized here and was pushed back to the front
    /// of the queue for the parent machine.
    Propagated,
    /// Nothing was waiting. Only returned by non-blocking dispatch.
    Empty,
    /// The stop state was reached or an interrupt was acknowledged.
    Terminated,
}

/// Whether a dispatch iteration may block on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Block,
    Poll,
}

/// Non-owning back-reference from a nested machine to its parent. Carries
/// only the name; it is never used to reach the parent or extend its
/// lifetime.
#[derive(Clone)]
pub(crate) struct ParentRef {
    pub(crate) name: Arc<str>,
}

/// Lock-free view of a machine's current state, readable from any thread
/// while a worker owns the machine itself.
#[derive(Clone)]
pub struct StateCell(Arc<AtomicU64>);

impl StateCell {
    pub(crate) fn new() -> Self {
        StateCell(Arc::new(AtomicU64::new(0)))
    }

    pub(crate) fn set(&self, id: Option<StateId>) {
        self.0.store(id.map_or(0, StateId::raw), Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<StateId> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            raw => Some(StateId::from_raw(raw)),
        }
    }
}

/// A hierarchical state machine.
///
/// The machine owns its states (which may themselves be machines), its
/// transition table and a reference to the event queue it shares with every
/// machine nested inside it. Declaring a nested machine re-attaches the
/// child subtree to the enclosing queue, so a single stream feeds the whole
/// hierarchy.
///
/// Dispatching is innermost-first: while the current state is a running
/// composite, the nested machine dequeues and dispatches. An event the
/// nested machine has no transition for is pushed back to the **front** of
/// the queue and the parent dispatches it on its own pass. At the root an
/// unrecognized event is logged and discarded.
///
/// A machine does not spawn threads. Drive it with
/// [`SyncExecutor`](crate::SyncExecutor) for caller-stepped execution or
/// [`ThreadedExecutor`](crate::ThreadedExecutor) for a dedicated worker.
pub struct StateMachine {
    name: String,
    parent: Option<ParentRef>,
    queue: Arc<EventQueue>,
    interrupt: Arc<AtomicBool>,
    current_cell: StateCell,
    lifecycle: Lifecycle,
    start_state: Option<StateId>,
    stop_state: Option<StateId>,
    current: Option<StateId>,
    states: BTreeMap<StateId, StateNode>,
    table: TransitionTable,
}

impl StateMachine {
    /// Create an empty machine with its own event queue. The queue is
    /// replaced by the enclosing machine's queue if this machine is later
    /// nested with [`machine`](StateMachine::machine).
    pub fn new(name: impl Into<String>) -> Self {
        StateMachine {
            name: name.into(),
            parent: None,
            queue: Arc::new(EventQueue::new()),
            interrupt: Arc::new(AtomicBool::new(false)),
            current_cell: StateCell::new(),
            lifecycle: Lifecycle::Idle,
            start_state: None,
            stop_state: None,
            current: None,
            states: BTreeMap::new(),
            table: TransitionTable::default(),
        }
    }

    /// Declare a leaf state with no behavior hooks.
    pub fn state(&mut self, name: impl Into<String>) -> StateId {
        self.insert_node(name.into(), NodeKind::Leaf(None))
    }

    /// Declare a leaf state backed by `handler`.
    pub fn state_with(
        &mut self,
        name: impl Into<String>,
        handler: impl StateHandler + 'static,
    ) -> StateId {
        self.insert_node(name.into(), NodeKind::Leaf(Some(Box::new(handler))))
    }

    /// Declare a nested machine as a composite state. The child and its
    /// whole subtree are re-attached to this machine's queue.
    pub fn machine(&mut self, mut child: StateMachine) -> StateId {
        child.attach(self.queue.clone(), self.parent_ref());
        let name = child.name.clone();
        self.insert_node(name, NodeKind::Machine(child))
    }

    /// Declare an orthogonal composition as a composite state.
    pub fn orthogonal(&mut self, mut child: Orthogonal) -> StateId {
        child.attach(self.queue.clone(), self.parent_ref());
        let name = child.name().to_owned();
        self.insert_node(name, NodeKind::Orthogonal(child))
    }

    fn insert_node(&mut self, name: String, kind: NodeKind) -> StateId {
        let id = StateId::fresh();
        self.states.insert(id, StateNode { name, kind });
        id
    }

    fn parent_ref(&self) -> ParentRef {
        ParentRef {
            name: Arc::from(self.name.as_str()),
        }
    }

    pub(crate) fn attach(&mut self, queue: Arc<EventQueue>, parent: ParentRef) {
        self.queue = queue;
        self.parent = Some(parent);
        let own_ref = self.parent_ref();
        let shared = self.queue.clone();
        for node in self.states.values_mut() {
            match &mut node.kind {
                NodeKind::Machine(child) => child.attach(shared.clone(), own_ref.clone()),
                NodeKind::Orthogonal(child) => child.attach(shared.clone(), own_ref.clone()),
                NodeKind::Leaf(_) => {}
            }
        }
    }

    /// Declare the state entered on `start`.
    pub fn set_start(&mut self, id: StateId) {
        self.start_state = Some(id);
    }

    /// Declare the state that terminates dispatch.
    ///
    /// The check runs before each dequeue, so a transition landing on the
    /// stop state is only observed on the following iteration.
    pub fn set_stop(&mut self, id: StateId) {
        self.stop_state = Some(id);
    }

    /// Declare a transition from `(from, event)` to `to`.
    ///
    /// Redeclaring the same pair overwrites the earlier rule. The table is
    /// effectively frozen once the machine runs under a worker, since the
    /// worker owns the machine exclusively.
    pub fn add(
        &mut self,
        from: StateId,
        event: &Event,
        to: StateId,
        action: Option<Action>,
        guard: Option<Guard>,
    ) {
        self.table.insert(
            from,
            event.id(),
            Transition {
                to,
                kind: TransitionKind::External,
                action,
                guard,
            },
        );
    }

    /// Declare an internal transition on `state`: the action runs but exit
    /// and entry are skipped and the state is not re-entered.
    pub fn add_internal(
        &mut self,
        state: StateId,
        event: &Event,
        action: Option<Action>,
        guard: Option<Guard>,
    ) {
        self.table.insert(
            state,
            event.id(),
            Transition {
                to: state,
                kind: TransitionKind::Internal,
                action,
                guard,
            },
        );
    }

    /// Enter the start state and begin accepting events.
    ///
    /// Starting a machine that is already running, or that terminated and
    /// was not [`reset`](StateMachine::reset), returns
    /// [`Error::InvalidLifecycle`] without touching it.
    pub fn start(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Idle {
            return Err(self.lifecycle_error("start"));
        }
        let start = self.start_state.ok_or_else(|| Error::MissingStartState {
            machine: self.name.clone(),
        })?;
        if self.parent.is_none() {
            self.queue.reset();
        }
        self.interrupt.store(false, Ordering::SeqCst);
        self.lifecycle = Lifecycle::Running;
        self.set_current(Some(start));
        debug!(machine = %self.name, state = %self.node_name(start), "started");
        let null = Event::null();
        self.enter_state(start, &null)
    }

    /// Interrupt the machine and return it to idle. At the root this also
    /// stops the shared queue, waking any blocked worker; joining the worker
    /// is the executor's job.
    pub fn stop(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Running {
            return Err(self.lifecycle_error("stop"));
        }
        self.interrupt.store(true, Ordering::SeqCst);
        if self.parent.is_none() {
            self.queue.stop();
        }
        self.set_current(None);
        self.lifecycle = Lifecycle::Idle;
        debug!(machine = %self.name, "stopped");
        Ok(())
    }

    /// Return a terminated machine to idle so it can be started again.
    pub fn reset(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Terminated {
            return Err(self.lifecycle_error("reset"));
        }
        self.interrupt.store(false, Ordering::SeqCst);
        self.set_current(None);
        self.lifecycle = Lifecycle::Idle;
        debug!(machine = %self.name, "reset");
        Ok(())
    }

    /// Append an event to the shared queue.
    pub fn send_event(&self, event: Event) {
        self.queue.add_back(event);
    }

    /// Perform one dispatch iteration.
    ///
    /// With [`Wait::Block`] the call suspends on the queue until an event
    /// arrives or the queue is stopped; with [`Wait::Poll`] an empty queue
    /// returns [`Dispatch::Empty`] immediately.
    pub fn dispatch(&mut self, wait: Wait) -> Result<Dispatch> {
        if self.lifecycle != Lifecycle::Running {
            return Err(self.lifecycle_error("dispatch"));
        }
        if let Some(outcome) = self.dispatch_nested(wait)? {
            return Ok(outcome);
        }
        self.dispatch_here(wait)
    }

    /// Give the innermost running machine the next dequeue. `None` means
    /// the event stream is this machine's to consume.
    fn dispatch_nested(&mut self, wait: Wait) -> Result<Option<Dispatch>> {
        let Some(current) = self.current else {
            return Ok(None);
        };
        let result = match self.states.get_mut(&current).map(|node| &mut node.kind) {
            Some(NodeKind::Machine(child)) if child.lifecycle == Lifecycle::Running => {
                child.dispatch(wait)
            }
            Some(NodeKind::Orthogonal(child)) if child.lifecycle() == Lifecycle::Running => {
                child.dispatch(wait)
            }
            _ => return Ok(None),
        };
        match result {
            // The child pushed the event to the front; our turn to try it.
            Ok(Dispatch::Propagated) => Ok(None),
            // The child reached its stop state; we keep dispatching.
            Ok(Dispatch::Terminated) => Ok(None),
            Ok(outcome) => Ok(Some(outcome)),
            Err(Error::Interrupted) => self.interrupted().map(Some),
            Err(err) => {
                self.lifecycle = Lifecycle::Terminated;
                Err(err)
            }
        }
    }

    fn dispatch_here(&mut self, wait: Wait) -> Result<Dispatch> {
        // The stop-state check runs before the dequeue, so a transition that
        // landed on the stop state is only observed here, one event later.
        if self.current.is_some() && self.current == self.stop_state {
            self.interrupt.store(true, Ordering::SeqCst);
            self.set_current(None);
            self.lifecycle = Lifecycle::Idle;
            debug!(machine = %self.name, "reached stop state");
            return Ok(Dispatch::Terminated);
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

        let Some(current) = self.current else {
            warn!(machine = %self.name, event = %event.id(), "no current state, event discarded");
            return Ok(Dispatch::Handled);
        };

        let Some((to, kind)) = self
            .table
            .next(current, event.id())
            .map(|t| (t.to(), t.kind()))
        else {
            if let Some(parent) = &self.parent {
                debug!(
                    machine = %self.name,
                    parent = %parent.name,
                    event = %event.id(),
                    "no transition, propagating to parent"
                );
                self.queue.add_front(event);
                return Ok(Dispatch::Propagated);
            }
            warn!(
                machine = %self.name,
                state = %self.node_name(current),
                event = %event.id(),
                "unhandled event discarded"
            );
            return Ok(Dispatch::Handled);
        };

        if !self.guard_passes(current, &event)? {
            debug!(
                machine = %self.name,
                state = %self.node_name(current),
                event = %event.id(),
                "guard rejected, event consumed"
            );
            return Ok(Dispatch::Handled);
        }

        if kind == TransitionKind::Internal {
            self.run_action(current, &event)?;
            debug!(
                machine = %self.name,
                state = %self.node_name(current),
                event = %event.id(),
                "internal transition"
            );
            return Ok(Dispatch::Handled);
        }

        // Exit, action, entry, execute. The current state only advances once
        // the entry completed, so a fault leaves the pre-transition state.
        self.exit_state(current, &event)?;
        self.run_action(current, &event)?;
        self.set_current(Some(to));
        if let Err(err) = self.enter_state(to, &event) {
            self.set_current(Some(current));
            return Err(err);
        }
        self.execute_state(to, &event)?;
        debug!(
            machine = %self.name,
            from = %self.node_name(current),
            to = %self.node_name(to),
            event = %event.id(),
            "transition"
        );
        Ok(Dispatch::Handled)
    }

    /// A stopped queue is a clean shutdown only if this machine was asked
    /// to stop; otherwise the interruption is somebody else's and is
    /// re-raised.
    fn interrupted(&mut self) -> Result<Dispatch> {
        if self.interrupt.load(Ordering::SeqCst) {
            self.set_current(None);
            self.lifecycle = Lifecycle::Idle;
            debug!(machine = %self.name, "interrupted, returning to idle");
            Ok(Dispatch::Terminated)
        } else {
            Err(Error::Interrupted)
        }
    }

    fn guard_passes(&mut self, from: StateId, event: &Event) -> Result<bool> {
        let outcome = match self.table.next(from, event.id()).and_then(|t| t.guard.as_ref()) {
            Some(guard) => panic::catch_unwind(AssertUnwindSafe(|| guard(event))),
            None => return Ok(true),
        };
        match outcome {
            Ok(passes) => Ok(passes),
            Err(_) => Err(self.fault(from, event, "guard")),
        }
    }

    fn run_action(&mut self, from: StateId, event: &Event) -> Result<()> {
        let outcome = match self
            .table
            .next_mut(from, event.id())
            .and_then(|t| t.action.as_mut())
        {
            Some(action) => panic::catch_unwind(AssertUnwindSafe(|| action(event))),
            None => return Ok(()),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(_) => Err(self.fault(from, event, "action")),
        }
    }

    fn enter_state(&mut self, id: StateId, event: &Event) -> Result<()> {
        let outcome = match self.states.get_mut(&id) {
            Some(node) => panic::catch_unwind(AssertUnwindSafe(|| node.enter(event))),
            None => return Ok(()),
        };
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                // A nested machine faulted and already stopped the queue.
                self.lifecycle = Lifecycle::Terminated;
                Err(err)
            }
            Err(_) => Err(self.fault(id, event, "entry hook")),
        }
    }

    fn exit_state(&mut self, id: StateId, event: &Event) -> Result<()> {
        let outcome = match self.states.get_mut(&id) {
            Some(node) => panic::catch_unwind(AssertUnwindSafe(|| node.exit(event))),
            None => return Ok(()),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(_) => Err(self.fault(id, event, "exit hook")),
        }
    }

    fn execute_state(&mut self, id: StateId, event: &Event) -> Result<()> {
        let outcome = match self.states.get_mut(&id) {
            Some(node) => panic::catch_unwind(AssertUnwindSafe(|| node.execute())),
            None => return Ok(()),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(_) => Err(self.fault(id, event, "execute hook")),
        }
    }

    /// Run the execute hook of the current state, if any. Used by
    /// orthogonal composition to give each region a pass between dequeues.
    pub(crate) fn execute_current(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Running {
            return Ok(());
        }
        match self.current {
            Some(current) => self.execute_state(current, &Event::null()),
            None => Ok(()),
        }
    }

    /// Contain a panic raised by user code: log, stop the queue and move to
    /// terminated. The error is handed to the driver.
    fn fault(&mut self, state: StateId, event: &Event, hook: &'static str) -> Error {
        tracing::error!(
            machine = %self.name,
            state = %self.node_name(state),
            event = %event.id(),
            hook,
            "user hook panicked, terminating dispatch"
        );
        self.lifecycle = Lifecycle::Terminated;
        self.interrupt.store(true, Ordering::SeqCst);
        self.queue.stop();
        Error::ActionFault {
            machine: self.name.clone(),
            state: self.node_name(state).to_owned(),
            hook,
            event: event.id(),
        }
    }

    fn lifecycle_error(&self, operation: &'static str) -> Error {
        Error::InvalidLifecycle {
            machine: self.name.clone(),
            lifecycle: self.lifecycle,
            operation,
        }
    }

    fn set_current(&mut self, id: Option<StateId>) {
        self.current = id;
        self.current_cell.set(id);
    }

    fn node_name(&self, id: StateId) -> &str {
        self.states.get(&id).map_or("?", |node| node.name.as_str())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn current_state(&self) -> Option<StateId> {
        self.current
    }

    pub fn current_state_name(&self) -> Option<&str> {
        let current = self.current?;
        self.states.get(&current).map(|node| node.name.as_str())
    }

    /// Cross-thread view of the current state; see [`StateCell`].
    pub fn state_cell(&self) -> StateCell {
        self.current_cell.clone()
    }

    pub fn state_name(&self, id: StateId) -> Option<&str> {
        self.states.get(&id).map(|node| node.name.as_str())
    }

    /// The nested machine declared as composite state `id`, if any.
    pub fn nested(&self, id: StateId) -> Option<&StateMachine> {
        match &self.states.get(&id)?.kind {
            NodeKind::Machine(child) => Some(child),
            _ => None,
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub(crate) fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    pub fn recognized_events(&self) -> &std::collections::BTreeSet<EventId> {
        self.table.recognized_events()
    }

    /// Render the transition table, one `<fromName>,<eventId>:<toName>`
    /// line per entry. This is the only stable textual format the runtime
    /// exposes.
    pub fn print(&self) -> String {
        let mut out = String::new();
        for (from, event, transition) in self.table.iter() {
            out.push_str(self.node_name(from));
            out.push(',');
            out.push_str(&event.to_string());
            out.push(':');
            out.push_str(self.node_name(transition.to()));
            out.push('\n');
        }
        out
    }
}
