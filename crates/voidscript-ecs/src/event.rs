//! Per-frame typed event queues.
//!
//! A writer appends to the queue for its event type; any reader created later
//! in the same frame sees every event sent so far. The scheduler calls
//! [`Events::clear_all`] at the end of each frame, so an event is visible for
//! exactly one frame and never replayed.

use std::any::{Any, TypeId};
use std::collections::HashMap;

trait AnyQueue: Send + Sync {
    fn clear(&mut self);
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Queue<E> {
    events: Vec<E>,
}

impl<E: Send + Sync + 'static> AnyQueue for Queue<E> {
    fn clear(&mut self) {
        self.events.clear();
    }

    fn len(&self) -> usize {
        self.events.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Every event queue, one per event type.
///
/// Queues are created on first send or writer and are emptied, not removed, by
/// [`clear_all`](Self::clear_all).
#[derive(Default)]
pub struct Events {
    queues: HashMap<TypeId, Box<dyn AnyQueue>>,
}

impl Events {
    /// An empty set of queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_mut<E: Send + Sync + 'static>(&mut self) -> &mut Vec<E> {
        let queue = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Queue::<E> { events: Vec::new() }));
        match queue.as_any_mut().downcast_mut::<Queue<E>>() {
            Some(q) => &mut q.events,
            None => unreachable!("event queue keyed by the wrong TypeId"),
        }
    }

    /// Append `event` to the queue for `E`.
    pub fn send<E: Send + Sync + 'static>(&mut self, event: E) {
        self.queue_mut::<E>().push(event);
    }

    /// Events of type `E` sent so far this frame, oldest first.
    pub fn read<E: Send + Sync + 'static>(&self) -> &[E] {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|q| q.as_any().downcast_ref::<Queue<E>>())
            .map(|q| q.events.as_slice())
            .unwrap_or(&[])
    }

    /// Number of queued events across all types.
    pub fn pending(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    /// Empty every queue. Called once per frame, after the last system.
    pub fn clear_all(&mut self) {
        for queue in self.queues.values_mut() {
            queue.clear();
        }
    }

    /// Writer for `E`, creating its queue if needed.
    pub fn writer<E: Send + Sync + 'static>(&mut self) -> EventWriter<'_, E> {
        EventWriter {
            queue: self.queue_mut::<E>(),
        }
    }

    /// Reader over the `E` events sent so far. Empty if none were sent.
    pub fn reader<E: Send + Sync + 'static>(&self) -> EventReader<'_, E> {
        EventReader {
            events: self.read::<E>(),
        }
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events")
            .field("types", &self.queues.len())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Appends events of one type.
pub struct EventWriter<'a, E> {
    queue: &'a mut Vec<E>,
}

impl<E> EventWriter<'_, E> {
    /// Append one event.
    pub fn send(&mut self, event: E) {
        self.queue.push(event);
    }

    /// Append several events, in iteration order.
    pub fn send_batch(&mut self, events: impl IntoIterator<Item = E>) {
        self.queue.extend(events);
    }
}

/// Reads this frame's events of one type.
pub struct EventReader<'a, E> {
    events: &'a [E],
}

impl<'a, E> EventReader<'a, E> {
    /// Events oldest first.
    pub fn iter(&self) -> std::slice::Iter<'a, E> {
        self.events.iter()
    }

    /// Number of events visible to this reader.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<'a, E> IntoIterator for EventReader<'a, E> {
    type Item = &'a E;
    type IntoIter = std::slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Hit(u32);

    #[derive(Debug, PartialEq)]
    struct Jump;

    #[test]
    fn events_are_readable_until_cleared() {
        let mut events = Events::new();
        events.send(Hit(1));
        events.writer::<Hit>().send_batch([Hit(2), Hit(3)]);
        assert_eq!(events.read::<Hit>(), &[Hit(1), Hit(2), Hit(3)]);
        assert!(events.read::<Jump>().is_empty());

        events.clear_all();
        assert!(events.reader::<Hit>().is_empty());
        assert_eq!(events.pending(), 0);
    }

    #[test]
    fn queues_are_per_type() {
        let mut events = Events::new();
        events.send(Jump);
        events.send(Hit(7));
        let hits: Vec<_> = events.reader::<Hit>().into_iter().collect();
        assert_eq!(hits, vec![&Hit(7)]);
        assert_eq!(events.pending(), 2);
    }
}
