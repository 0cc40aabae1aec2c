use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering as MemOrdering};
use std::sync::Arc;

/// Identity of an [`Event`]. Two events compare equal iff their ids do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    /// Id of the null event passed to the automatic entry and exit that run
    /// on start and stop. The factory never hands this id out.
    pub const NULL: EventId = EventId(0);

    /// Wrap a caller-chosen id. Callers that mix their own ids with
    /// factory-produced ones are responsible for keeping them disjoint.
    pub const fn new(raw: u64) -> Self {
        EventId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Factory ids start at 1, 0 is reserved for the null event.
static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

fn fresh_event_id() -> EventId {
    EventId(NEXT_EVENT_ID.fetch_add(1, MemOrdering::Relaxed))
}

type Payload = Arc<dyn Any + Send + Sync>;

/// An opaque event value.
///
/// Events are cheap to clone and free to share across threads. Identity
/// lives entirely in the id: equality, ordering and hashing ignore the
/// payload, so a clone and its original are interchangeable to a
/// transition table.
///
/// ```
/// use machina::Event;
///
/// let open = Event::new();
/// assert_eq!(open, open.clone());
/// assert_ne!(open, Event::new());
/// ```
#[derive(Clone)]
pub struct Event {
    id: EventId,
    payload: Option<Payload>,
}

impl Event {
    /// Create an event with a process-unique id and no payload.
    pub fn new() -> Self {
        Event {
            id: fresh_event_id(),
            payload: None,
        }
    }

    /// Create an event with a process-unique id carrying `payload`.
    pub fn with_payload<T: Any + Send + Sync>(payload: T) -> Self {
        Event {
            id: fresh_event_id(),
            payload: Some(Arc::new(payload)),
        }
    }

    /// Create an event with a caller-supplied id.
    pub fn from_id(id: EventId) -> Self {
        Event { id, payload: None }
    }

    /// Create an event with a caller-supplied id carrying `payload`.
    pub fn from_id_with_payload<T: Any + Send + Sync>(id: EventId, payload: T) -> Self {
        Event {
            id,
            payload: Some(Arc::new(payload)),
        }
    }

    /// The event handed to entry and exit hooks that run without a
    /// triggering event, i.e. on start and stop.
    pub fn null() -> Self {
        Event {
            id: EventId::NULL,
            payload: None,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn is_null(&self) -> bool {
        self.id == EventId::NULL
    }

    /// Borrow the payload as `T`, if one was attached with that type.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref()
    }
}

impl Default for Event {
    fn default() -> Self {
        Event::new()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}
