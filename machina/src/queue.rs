use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::event::Event;

/// Thread-safe FIFO shared by a root machine and all of its descendants.
///
/// Back-inserts are dequeued in insertion order; a front-insert beats
/// everything already waiting. Parent propagation and orthogonal routing use
/// the front to return an event to the head of the stream.
///
/// [`stop`](EventQueue::stop) wakes every waiter and makes subsequent
/// dequeues report [`Error::Interrupted`] until [`reset`](EventQueue::reset).
/// Stopping wins over buffered events: whatever is queued stays queued, so a
/// later reset and restart resumes exactly where the stream was cut.
pub struct EventQueue {
    inner: Mutex<Inner>,
    ready: Condvar,
}

struct Inner {
    events: VecDeque<Event>,
    stopped: bool,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            inner: Mutex::new(Inner {
                events: VecDeque::new(),
                stopped: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append an event and wake one waiter.
    pub fn add_back(&self, event: Event) {
        let mut inner = self.inner.lock();
        inner.events.push_back(event);
        self.ready.notify_one();
    }

    /// Prepend an event and wake one waiter. The event will be the next one
    /// dequeued regardless of what is already waiting.
    pub fn add_front(&self, event: Event) {
        let mut inner = self.inner.lock();
        inner.events.push_front(event);
        self.ready.notify_one();
    }

    /// Block until an event is available or the queue is stopped.
    pub fn next(&self) -> Result<Event> {
        let mut inner = self.inner.lock();
        loop {
            if inner.stopped {
                return Err(Error::Interrupted);
            }
            if let Some(event) = inner.events.pop_front() {
                return Ok(event);
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Non-blocking dequeue for caller-driven execution. Returns `Ok(None)`
    /// when the queue is empty.
    pub fn try_next(&self) -> Result<Option<Event>> {
        let mut inner = self.inner.lock();
        if inner.stopped {
            return Err(Error::Interrupted);
        }
        Ok(inner.events.pop_front())
    }

    /// Stop the queue and wake all waiters. Buffered events are kept.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if !inner.stopped {
            inner.stopped = true;
            debug!(pending = inner.events.len(), "event queue stopped");
        }
        drop(inner);
        self.ready.notify_all();
    }

    /// Clear the stopped flag; the queue becomes usable again.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.stopped = false;
    }

    pub fn interrupted(&self) -> bool {
        self.inner.lock().stopped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().events.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        EventQueue::new()
    }
}
