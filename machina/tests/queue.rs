use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use machina::{Error, Event, EventQueue};

#[test]
fn fifo_back_inserts() {
    let queue = EventQueue::new();
    let events: Vec<Event> = (0..5).map(|_| Event::new()).collect();
    for event in &events {
        queue.add_back(event.clone());
    }
    for event in &events {
        assert_eq!(queue.next().unwrap().id(), event.id());
    }
    assert!(queue.is_empty());
}

#[test]
fn front_insert_beats_waiting_events() {
    let queue = EventQueue::new();
    let first = Event::new();
    let second = Event::new();
    let urgent = Event::new();

    queue.add_back(first.clone());
    queue.add_back(second.clone());
    queue.add_front(urgent.clone());

    assert_eq!(queue.next().unwrap().id(), urgent.id());
    assert_eq!(queue.next().unwrap().id(), first.id());
    assert_eq!(queue.next().unwrap().id(), second.id());
}

#[test]
fn stop_interrupts_and_keeps_buffered_events() {
    let queue = EventQueue::new();
    let head = Event::new();
    queue.add_back(head.clone());

    queue.stop();
    assert!(queue.interrupted());
    // Stopped wins over buffered events.
    assert!(matches!(queue.next(), Err(Error::Interrupted)));
    assert_eq!(queue.len(), 1);

    // Reset recovers with the head still in place.
    queue.reset();
    assert!(!queue.interrupted());
    assert_eq!(queue.next().unwrap().id(), head.id());
}

#[test]
fn blocking_next_wakes_on_insert() {
    let queue = Arc::new(EventQueue::new());
    let expected = Event::new();

    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || queue.next().unwrap().id())
    };

    thread::sleep(Duration::from_millis(20));
    queue.add_back(expected.clone());
    assert_eq!(consumer.join().unwrap(), expected.id());
}

#[test]
fn stop_wakes_blocked_consumers() {
    let queue = Arc::new(EventQueue::new());
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || queue.next())
    };

    thread::sleep(Duration::from_millis(20));
    queue.stop();
    assert!(matches!(consumer.join().unwrap(), Err(Error::Interrupted)));
}

#[test]
fn concurrent_producers_no_loss_or_duplication() {
    const PRODUCERS: usize = 100;
    const PER_PRODUCER: usize = 100;

    let queue = Arc::new(EventQueue::new());
    let mut producers = Vec::with_capacity(PRODUCERS);
    for _ in 0..PRODUCERS {
        let queue = queue.clone();
        producers.push(thread::spawn(move || {
            for _ in 0..PER_PRODUCER {
                queue.add_back(Event::new());
            }
        }));
    }

    let mut seen = HashSet::with_capacity(PRODUCERS * PER_PRODUCER);
    for _ in 0..PRODUCERS * PER_PRODUCER {
        let event = queue.next().unwrap();
        assert!(seen.insert(event.id()), "event dequeued twice");
    }

    for producer in producers {
        producer.join().unwrap();
    }
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    assert!(queue.is_empty());
}

#[test]
fn payload_survives_the_queue() {
    let queue = EventQueue::new();
    queue.add_back(Event::with_payload("hello".to_owned()));
    let event = queue.next().unwrap();
    assert_eq!(event.payload::<String>().map(String::as_str), Some("hello"));
}
