#![cfg_attr(not(doctest), doc = include_str!("../../README.md"))]

mod error;
mod event;
mod machine;
mod orthogonal;
mod queue;
mod state;
mod transition;

pub mod exec;

pub use error::{Error, Result};
pub use event::{Event, EventId};
pub use exec::{Hsm, SyncExecutor, ThreadedExecutor};
pub use machine::{Dispatch, Lifecycle, StateCell, StateMachine, Wait};
pub use orthogonal::Orthogonal;
pub use queue::EventQueue;
pub use state::{StateHandler, StateId};
pub use transition::{Action, Guard, Transition, TransitionKind, TransitionTable};

/// Prelude containing the imports needed to declare and drive machines.
pub mod prelude {
    pub use crate::exec::{Hsm, SyncExecutor, ThreadedExecutor};
    pub use crate::{
        Dispatch, Error, Event, EventId, EventQueue, Lifecycle, Orthogonal, Result, StateHandler,
        StateId, StateMachine, TransitionKind, Wait,
    };
}
