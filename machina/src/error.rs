use crate::event::EventId;
use crate::machine::Lifecycle;

/// Alias for results produced by the runtime.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors surfaced by machines, queues and executors.
///
/// Two dispositions from dispatch are deliberately absent: an event that no
/// transition matches at the root is logged and discarded, and a guard that
/// returns `false` consumes its event silently. Neither is an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The event queue was stopped while the machine's interrupt flag was
    /// still clear. A worker that observes this exits with an error; a
    /// worker whose machine was asked to stop unwinds cleanly instead.
    #[error("event queue interrupted")]
    Interrupted,

    /// The requested lifecycle operation is not valid in the machine's
    /// current stage. Double start and double stop land here; the machine
    /// is left unchanged.
    #[error("`{operation}` is invalid for machine `{machine}` while {lifecycle:?}")]
    InvalidLifecycle {
        machine: String,
        lifecycle: Lifecycle,
        operation: &'static str,
    },

    /// `start` was called on a machine that never declared a start state.
    #[error("machine `{machine}` has no start state")]
    MissingStartState { machine: String },

    /// A user-supplied guard, action or state hook panicked. The dispatcher
    /// logs the fault, stops the queue and moves the machine to
    /// [`Lifecycle::Terminated`](crate::Lifecycle).
    #[error("{hook} panicked in machine `{machine}` at state `{state}` on event {event}")]
    ActionFault {
        machine: String,
        state: String,
        hook: &'static str,
        event: EventId,
    },

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread for machine `{machine}`: {source}")]
    Spawn {
        machine: String,
        #[source]
        source: std::io::Error,
    },

    /// The worker thread itself panicked. User hook panics are contained by
    /// the dispatcher, so this indicates a bug in the runtime.
    #[error("worker thread for machine `{machine}` panicked")]
    WorkerPanic { machine: String },
}
