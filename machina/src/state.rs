use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::machine::StateMachine;
use crate::orthogonal::Orthogonal;

/// Stable identity of a state within a process.
///
/// Ids are allocated from a process-wide counter, so states declared on
/// different machines never collide and tables stay valid when state
/// storage moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(u64);

impl StateId {
    pub(crate) fn fresh() -> Self {
        // Ids start at 1, 0 means "no state" in the shared current-state cell.
        static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);
        StateId(NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) const fn from_raw(raw: u64) -> Self {
        StateId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Behavior hooks of a leaf state.
///
/// All hooks default to no-ops; implement only what the state needs. Entry
/// and exit receive the triggering event, or the null event for the
/// automatic entry that runs on start. Hooks must not block on the event
/// queue of their own machine and must not mutate the enclosing machine's
/// current state.
pub trait StateHandler: Send {
    fn on_entry(&mut self, event: &Event) {
        let _ = event;
    }

    fn on_exit(&mut self, event: &Event) {
        let _ = event;
    }

    fn execute(&mut self) {}
}

/// The node kinds a machine can hold as states.
pub(crate) enum NodeKind {
    Leaf(Option<Box<dyn StateHandler>>),
    Machine(StateMachine),
    Orthogonal(Orthogonal),
}

pub(crate) struct StateNode {
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
}

impl StateNode {
    /// Entry hook of the node. Entering a composite starts its nested
    /// dispatcher; a composite left running from an earlier visit resumes
    /// unchanged because the redundant start is a lifecycle no-op.
    pub(crate) fn enter(&mut self, event: &Event) -> Result<()> {
        match &mut self.kind {
            NodeKind::Leaf(handler) => {
                if let Some(handler) = handler {
                    handler.on_entry(event);
                }
                Ok(())
            }
            NodeKind::Machine(child) => match child.start() {
                Ok(()) => Ok(()),
                Err(Error::InvalidLifecycle { .. }) => {
                    trace!(machine = %child.name(), "nested machine already active, resuming");
                    Ok(())
                }
                Err(err) => Err(err),
            },
            NodeKind::Orthogonal(child) => match child.start() {
                Ok(()) => Ok(()),
                Err(Error::InvalidLifecycle { .. }) => {
                    trace!(machine = %child.name(), "nested regions already active, resuming");
                    Ok(())
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Exit hook of the node. Leaving a composite keeps the nested current
    /// state intact; re-entry resumes it.
    pub(crate) fn exit(&mut self, event: &Event) {
        match &mut self.kind {
            NodeKind::Leaf(handler) => {
                if let Some(handler) = handler {
                    handler.on_exit(event);
                }
            }
            NodeKind::Machine(child) => {
                trace!(machine = %child.name(), "left composite, nested state preserved");
            }
            NodeKind::Orthogonal(child) => {
                trace!(machine = %child.name(), "left composite, region states preserved");
            }
        }
    }

    /// Execute hook of the node. Composites run their own dispatch passes
    /// instead, driven by the enclosing machine.
    pub(crate) fn execute(&mut self) {
        if let NodeKind::Leaf(Some(handler)) = &mut self.kind {
            handler.execute();
        }
    }
}
