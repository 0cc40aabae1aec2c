use std::collections::{BTreeMap, BTreeSet};

use crate::event::{Event, EventId};
use crate::state::StateId;

/// Effect invoked between exit and entry of a transition.
pub type Action = Box<dyn FnMut(&Event) + Send>;

/// Predicate gating a transition. A missing guard means "always taken".
pub type Guard = Box<dyn Fn(&Event) -> bool + Send>;

/// Whether a transition re-runs exit and entry.
///
/// A self-loop declared with [`StateMachine::add`](crate::StateMachine::add)
/// is external and runs both hooks. Internal transitions, declared with
/// [`add_internal`](crate::StateMachine::add_internal), run only the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    External,
    Internal,
}

/// A declared transition rule, keyed in the table by `(from, event)`.
pub struct Transition {
    pub(crate) to: StateId,
    pub(crate) kind: TransitionKind,
    pub(crate) action: Option<Action>,
    pub(crate) guard: Option<Guard>,
}

impl Transition {
    pub fn to(&self) -> StateId {
        self.to
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    pub fn has_guard(&self) -> bool {
        self.guard.is_some()
    }
}

/// Map from `(from-state, event)` to the transition to take.
///
/// Keys are unique and redeclaring overwrites, so at most one transition
/// resolves for any pair. State identity is the owning state's stable id,
/// never an address. The table also tracks the set of event ids it has an
/// entry for, which orthogonal composition uses to route a shared stream.
#[derive(Default)]
pub struct TransitionTable {
    entries: BTreeMap<(StateId, EventId), Transition>,
    recognized: BTreeSet<EventId>,
}

impl TransitionTable {
    pub(crate) fn insert(&mut self, from: StateId, event: EventId, transition: Transition) {
        self.recognized.insert(event);
        self.entries.insert((from, event), transition);
    }

    /// Look up the transition for `(from, event)`, if one was declared.
    pub fn next(&self, from: StateId, event: EventId) -> Option<&Transition> {
        self.entries.get(&(from, event))
    }

    pub(crate) fn next_mut(&mut self, from: StateId, event: EventId) -> Option<&mut Transition> {
        self.entries.get_mut(&(from, event))
    }

    /// Event ids for which at least one from-state has an entry.
    pub fn recognized_events(&self) -> &BTreeSet<EventId> {
        &self.recognized
    }

    pub fn recognizes(&self, event: EventId) -> bool {
        self.recognized.contains(&event)
    }

    pub fn iter(&self) -> impl Iterator<Item = (StateId, EventId, &Transition)> {
        self.entries
            .iter()
            .map(|(&(from, event), transition)| (from, event, transition))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
