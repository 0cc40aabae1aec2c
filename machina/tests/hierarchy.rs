use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use machina::prelude::*;

/// Leaf handler that appends labeled entry and exit records to a shared log.
struct Trace {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl StateHandler for Trace {
    fn on_entry(&mut self, _event: &Event) {
        self.log.lock().push(format!("{}:enter", self.label));
    }

    fn on_exit(&mut self, _event: &Event) {
        self.log.lock().push(format!("{}:exit", self.label));
    }
}

#[test]
fn unhandled_child_event_reaches_parent() {
    let mut child = StateMachine::new("C");
    let c1 = child.state("c1");
    child.set_start(c1);

    // The child recognizes ping, but not x.
    let ping = Event::new();
    child.add_internal(c1, &ping, None, None);

    let mut parent = StateMachine::new("P");
    let c_node = parent.machine(child);
    let s2 = parent.state("s2");
    parent.set_start(c_node);

    let x = Event::with_payload(42u32);
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_in_action = seen.clone();
    parent.add(
        c_node,
        &x,
        s2,
        Some(Box::new(move |event| {
            let value = event.payload::<u32>().copied().unwrap_or_default();
            seen_in_action.store(value as usize, Ordering::SeqCst);
        })),
        None,
    );

    let mut exec = SyncExecutor::new(parent);
    exec.start().unwrap();
    assert_eq!(
        exec.machine().nested(c_node).unwrap().current_state(),
        Some(c1)
    );

    exec.send_event(x.clone());
    assert_eq!(exec.step().unwrap(), Dispatch::Handled);

    // The parent dispatched the event with its identity and payload intact,
    // and the child's current state did not move.
    assert_eq!(exec.machine().current_state(), Some(s2));
    assert_eq!(seen.load(Ordering::SeqCst), 42);
    assert_eq!(
        exec.machine().nested(c_node).unwrap().current_state(),
        Some(c1)
    );
}

#[test]
fn child_consumes_its_own_events() {
    let mut child = StateMachine::new("C");
    let c1 = child.state("c1");
    let c2 = child.state("c2");
    child.set_start(c1);
    let adv = Event::new();
    child.add(c1, &adv, c2, None, None);

    let mut parent = StateMachine::new("P");
    let c_node = parent.machine(child);
    parent.set_start(c_node);

    let mut exec = SyncExecutor::new(parent);
    exec.start().unwrap();
    exec.send_event(adv.clone());
    assert_eq!(exec.step().unwrap(), Dispatch::Handled);

    // The event never surfaced at the parent.
    assert_eq!(exec.machine().current_state(), Some(c_node));
    assert_eq!(
        exec.machine().nested(c_node).unwrap().current_state(),
        Some(c2)
    );
}

#[test]
fn composite_entry_starts_nested_machine() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut child = StateMachine::new("C");
    let c1 = child.state_with(
        "c1",
        Trace {
            label: "c1",
            log: log.clone(),
        },
    );
    let c2 = child.state_with(
        "c2",
        Trace {
            label: "c2",
            log: log.clone(),
        },
    );
    child.set_start(c1);
    let go = Event::new();
    child.add(c1, &go, c2, None, None);

    let mut parent = StateMachine::new("P");
    let c_node = parent.machine(child);
    parent.set_start(c_node);

    let mut exec = SyncExecutor::new(parent);
    exec.start().unwrap();

    // Entering the composite pushed the nested dispatcher into its start
    // state before any event was dequeued.
    assert_eq!(log.lock().as_slice(), ["c1:enter"]);

    exec.send_event(go.clone());
    exec.step().unwrap();
    assert_eq!(log.lock().as_slice(), ["c1:enter", "c1:exit", "c2:enter"]);
}

#[test]
fn nested_machine_reaches_stop_state_and_parent_resumes() {
    let mut child = StateMachine::new("C");
    let c1 = child.state("c1");
    let c_end = child.state("c_end");
    child.set_start(c1);
    child.set_stop(c_end);
    let done = Event::new();
    child.add(c1, &done, c_end, None, None);

    let mut parent = StateMachine::new("P");
    let c_node = parent.machine(child);
    let s2 = parent.state("s2");
    parent.set_start(c_node);
    let after = Event::new();
    parent.add(c_node, &after, s2, None, None);

    let mut exec = SyncExecutor::new(parent);
    exec.start().unwrap();

    exec.send_event(done.clone());
    assert_eq!(exec.step().unwrap(), Dispatch::Handled);
    assert_eq!(
        exec.machine().nested(c_node).unwrap().current_state(),
        Some(c_end)
    );

    // The next dispatch observes the child on its stop state, returns it to
    // idle and lets the parent take the event.
    exec.send_event(after.clone());
    assert_eq!(exec.step().unwrap(), Dispatch::Handled);
    assert_eq!(exec.machine().current_state(), Some(s2));
    let nested = exec.machine().nested(c_node).unwrap();
    assert_eq!(nested.lifecycle(), Lifecycle::Idle);
    assert_eq!(nested.current_state(), None);
}

#[test]
fn reentering_composite_resumes_nested_state() {
    let mut child = StateMachine::new("C");
    let c1 = child.state("c1");
    let c2 = child.state("c2");
    child.set_start(c1);
    let adv = Event::new();
    child.add(c1, &adv, c2, None, None);

    let mut parent = StateMachine::new("P");
    let c_node = parent.machine(child);
    let away = parent.state("away");
    parent.set_start(c_node);
    let out = Event::new();
    let back = Event::new();
    parent.add(c_node, &out, away, None, None);
    parent.add(away, &back, c_node, None, None);

    let mut exec = SyncExecutor::new(parent);
    exec.start().unwrap();

    exec.send_event(adv.clone());
    exec.step().unwrap();
    assert_eq!(
        exec.machine().nested(c_node).unwrap().current_state(),
        Some(c2)
    );

    exec.send_event(out.clone());
    exec.step().unwrap();
    assert_eq!(exec.machine().current_state(), Some(away));

    // While the parent is elsewhere, the dormant child does not dispatch.
    exec.send_event(adv.clone());
    exec.step().unwrap();
    assert_eq!(
        exec.machine().nested(c_node).unwrap().current_state(),
        Some(c2)
    );

    exec.send_event(back.clone());
    exec.step().unwrap();
    assert_eq!(exec.machine().current_state(), Some(c_node));
    assert_eq!(
        exec.machine().nested(c_node).unwrap().current_state(),
        Some(c2)
    );
}

#[test]
fn grandchild_miss_bubbles_to_root() {
    let mut grandchild = StateMachine::new("G");
    let g1 = grandchild.state("g1");
    grandchild.set_start(g1);

    let mut child = StateMachine::new("C");
    let g_node = child.machine(grandchild);
    child.set_start(g_node);

    let mut parent = StateMachine::new("P");
    let c_node = parent.machine(child);
    let s2 = parent.state("s2");
    parent.set_start(c_node);
    let x = Event::new();
    parent.add(c_node, &x, s2, None, None);

    let mut exec = SyncExecutor::new(parent);
    exec.start().unwrap();
    exec.send_event(x.clone());
    assert_eq!(exec.step().unwrap(), Dispatch::Handled);
    assert_eq!(exec.machine().current_state(), Some(s2));
}
