//! Bounded outbound event queue.
//!
//! FIFO with priority insertion: priority events (REJECTED of a priority
//! command, FAILED) jump ahead of ordinary events and survive overflow. On
//! overflow the oldest non-priority event is dropped and counted; nothing
//! here ever blocks a producer.
//!
//! The loop consumes with a bounded condvar wait, so shutdown is observed
//! within 100 ms even when no events arrive.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::warn;

use printlink_types::{Event, EventSink};

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 100;

/// Upper bound of one consumer wait.
const MAX_WAIT: Duration = Duration::from_millis(100);

/// Bounded FIFO of outbound events with priority insertion.
#[derive(Debug)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    not_empty: Condvar,
    capacity: usize,
    dropped: AtomicU64,
    enqueued: AtomicU64,
}

impl EventQueue {
    /// Creates a queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
        }
    }

    /// Enqueues an event; priority events go to the front.
    ///
    /// On overflow the oldest non-priority event is dropped. When the queue
    /// is full of priority events, an ordinary newcomer is the one dropped.
    pub fn push(&self, event: Event) {
        let mut events = self.events.lock().expect("event queue lock poisoned");
        if events.len() >= self.capacity && !self.drop_one(&mut events, event.priority) {
            // Full of priority events and the newcomer is ordinary.
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %event.kind, "event queue full; dropping incoming event");
            return;
        }

        if event.priority {
            // Behind earlier priority events, ahead of everything else.
            let at = events.iter().take_while(|e| e.priority).count();
            events.insert(at, event);
        } else {
            events.push_back(event);
        }
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        drop(events);
        self.not_empty.notify_one();
    }

    /// Drops the oldest non-priority event. Returns false when none exists
    /// and the newcomer is not priority either.
    fn drop_one(&self, events: &mut VecDeque<Event>, incoming_priority: bool) -> bool {
        if let Some(at) = events.iter().position(|e| !e.priority) {
            let dropped = events.remove(at).expect("position is in range");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %dropped.kind, "event queue full; dropped oldest event");
            true
        } else if incoming_priority {
            // All priority: sacrifice the oldest so the newest fits.
            if events.pop_front().is_some() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            true
        } else {
            false
        }
    }

    /// Pops the next event without waiting.
    pub fn pop(&self) -> Option<Event> {
        self.events
            .lock()
            .expect("event queue lock poisoned")
            .pop_front()
    }

    /// Pops the front event only when it is a priority event.
    pub fn pop_priority(&self) -> Option<Event> {
        let mut events = self.events.lock().expect("event queue lock poisoned");
        if events.front().is_some_and(|e| e.priority) {
            events.pop_front()
        } else {
            None
        }
    }

    /// Pops the next event, waiting up to 100 ms for one to arrive.
    pub fn pop_wait(&self) -> Option<Event> {
        let events = self.events.lock().expect("event queue lock poisoned");
        let (mut events, _) = self
            .not_empty
            .wait_timeout_while(events, MAX_WAIT, |e| e.is_empty())
            .expect("event queue lock poisoned");
        events.pop_front()
    }

    /// Reinserts an event at the front (send failed, will retry).
    pub fn push_front(&self, event: Event) {
        let mut events = self.events.lock().expect("event queue lock poisoned");
        events.push_front(event);
        drop(events);
        self.not_empty.notify_one();
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("event queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events dropped on overflow since creation.
    pub fn events_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Events accepted since creation.
    pub fn events_enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// [`EventSink`] over an [`EventQueue`], handed to the filesystem and the
/// transfer manager.
#[derive(Clone)]
pub struct QueueSink(Arc<EventQueue>);

impl QueueSink {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self(queue)
    }
}

impl EventSink for QueueSink {
    fn emit(&self, event: Event) {
        self.0.push(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use printlink_types::{EventKind, EventSource};

    use super::*;

    fn event(kind: EventKind) -> Event {
        Event::new(kind, EventSource::Sdk)
    }

    #[test]
    fn fifo_order() {
        let q = EventQueue::new(10);
        q.push(event(EventKind::Info));
        q.push(event(EventKind::StateChanged));
        assert_eq!(q.pop().unwrap().kind, EventKind::Info);
        assert_eq!(q.pop().unwrap().kind, EventKind::StateChanged);
        assert!(q.pop().is_none());
    }

    #[test]
    fn priority_jumps_the_queue_in_order() {
        let q = EventQueue::new(10);
        q.push(event(EventKind::Info));
        q.push(event(EventKind::Failed).with_priority());
        q.push(event(EventKind::Rejected).with_priority());

        assert_eq!(q.pop().unwrap().kind, EventKind::Failed);
        assert_eq!(q.pop().unwrap().kind, EventKind::Rejected);
        assert_eq!(q.pop().unwrap().kind, EventKind::Info);
    }

    #[test]
    fn pop_priority_only_takes_priority() {
        let q = EventQueue::new(10);
        q.push(event(EventKind::Info));
        assert!(q.pop_priority().is_none());
        q.push(event(EventKind::Failed).with_priority());
        assert_eq!(q.pop_priority().unwrap().kind, EventKind::Failed);
        assert!(q.pop_priority().is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn overflow_drops_oldest_non_priority() {
        let q = EventQueue::new(3);
        q.push(event(EventKind::Info));
        q.push(event(EventKind::Failed).with_priority());
        q.push(event(EventKind::StateChanged));
        q.push(event(EventKind::FileChanged));

        assert_eq!(q.len(), 3);
        assert_eq!(q.events_dropped(), 1);
        // The priority event survived; the oldest ordinary one (Info) went.
        let kinds: Vec<EventKind> = std::iter::from_fn(|| q.pop()).map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Failed, EventKind::StateChanged, EventKind::FileChanged]
        );
    }

    #[test]
    fn ordinary_newcomer_dropped_when_full_of_priority() {
        let q = EventQueue::new(2);
        q.push(event(EventKind::Failed).with_priority());
        q.push(event(EventKind::Failed).with_priority());
        q.push(event(EventKind::Info));

        assert_eq!(q.len(), 2);
        assert_eq!(q.events_dropped(), 1);
        assert!(std::iter::from_fn(|| q.pop()).all(|e| e.kind == EventKind::Failed));
    }

    #[test]
    fn pop_wait_returns_early_when_notified() {
        let q = Arc::new(EventQueue::new(10));
        let producer = Arc::clone(&q);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(event(EventKind::Info));
        });
        let started = Instant::now();
        let popped = q.pop_wait();
        handle.join().unwrap();
        assert!(popped.is_some());
        assert!(started.elapsed() < MAX_WAIT, "should wake on notify");
    }

    #[test]
    fn pop_wait_times_out_bounded() {
        let q = EventQueue::new(10);
        let started = Instant::now();
        assert!(q.pop_wait().is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(80));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn counters_track_enqueues() {
        let q = EventQueue::new(2);
        q.push(event(EventKind::Info));
        q.push(event(EventKind::Info));
        q.push(event(EventKind::Info));
        assert_eq!(q.events_enqueued(), 3);
        assert_eq!(q.events_dropped(), 1);
    }

    #[test]
    #[should_panic(expected = "queue capacity must be positive")]
    fn zero_capacity_panics() {
        let _q = EventQueue::new(0);
    }
}
