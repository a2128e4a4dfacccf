// Event arena - fixed pool of note event slots shared with the realtime reader
//
// Every field is atomic so the realtime thread can traverse step chains while
// the control thread edits them. The writer fills a free slot with relaxed
// stores and publishes it with a release store of the link that makes it
// reachable; readers follow links with acquire loads.
//
// Slots are addressed by index. Removed slots are not reused until the
// deferred reclaimer hands them back; at that point their generation is bumped
// so stale `EventHandle`s stop resolving.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

/// Null link
pub(crate) const NIL: u32 = u32::MAX;

/// Stable, generation-tagged reference to an arena slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    index: u32,
    generation: u32,
}

impl EventHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// What the realtime reader sees of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventView {
    pub step: u32,
    pub key: u8,
    pub velocity: u8,
    pub length: u32,
    pub onset: bool,
}

#[derive(Debug)]
pub(crate) struct EventSlot {
    step: AtomicU32,
    key: AtomicU8,
    velocity: AtomicU8,
    length: AtomicU32,
    onset: AtomicBool,
    next: AtomicU32,
    // Writer-only links; atomics so the slot stays Sync
    prev: AtomicU32,
    assoc: AtomicU32,
    generation: AtomicU32,
}

impl Default for EventSlot {
    fn default() -> Self {
        Self {
            step: AtomicU32::new(0),
            key: AtomicU8::new(0),
            velocity: AtomicU8::new(0),
            length: AtomicU32::new(0),
            onset: AtomicBool::new(false),
            next: AtomicU32::new(NIL),
            prev: AtomicU32::new(NIL),
            assoc: AtomicU32::new(NIL),
            generation: AtomicU32::new(0),
        }
    }
}

/// Fixed-capacity pool of event slots
#[derive(Debug)]
pub(crate) struct EventArena {
    slots: Box<[EventSlot]>,
}

impl EventArena {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(NIL as usize);
        Self {
            slots: (0..capacity).map(|_| EventSlot::default()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, index: u32) -> &EventSlot {
        &self.slots[index as usize]
    }

    pub fn handle(&self, index: u32) -> EventHandle {
        EventHandle {
            index,
            generation: self.slot(index).generation.load(Ordering::Relaxed),
        }
    }

    /// Index of a live handle, `None` once the slot has been recycled
    pub fn resolve(&self, handle: EventHandle) -> Option<u32> {
        let slot = self.slots.get(handle.index as usize)?;
        (slot.generation.load(Ordering::Relaxed) == handle.generation).then_some(handle.index)
    }

    /// Fill an unlinked slot. Becomes visible once a link to it is published.
    pub fn init(&self, index: u32, step: u32, key: u8, velocity: u8, length: u32, onset: bool) {
        let slot = self.slot(index);
        slot.step.store(step, Ordering::Relaxed);
        slot.key.store(key, Ordering::Relaxed);
        slot.velocity.store(velocity, Ordering::Relaxed);
        slot.length.store(length, Ordering::Relaxed);
        slot.onset.store(onset, Ordering::Relaxed);
        slot.next.store(NIL, Ordering::Relaxed);
        slot.prev.store(NIL, Ordering::Relaxed);
        slot.assoc.store(NIL, Ordering::Relaxed);
    }

    /// Invalidate outstanding handles to a reclaimed slot
    pub fn recycle(&self, index: u32) {
        let slot = self.slot(index);
        let generation = slot.generation.load(Ordering::Relaxed);
        slot.generation.store(generation.wrapping_add(1), Ordering::Relaxed);
        slot.next.store(NIL, Ordering::Relaxed);
        slot.prev.store(NIL, Ordering::Relaxed);
        slot.assoc.store(NIL, Ordering::Relaxed);
    }

    pub fn view(&self, index: u32) -> EventView {
        let slot = self.slot(index);
        EventView {
            step: slot.step.load(Ordering::Relaxed),
            key: slot.key.load(Ordering::Relaxed),
            velocity: slot.velocity.load(Ordering::Relaxed),
            length: slot.length.load(Ordering::Relaxed),
            onset: slot.onset.load(Ordering::Relaxed),
        }
    }

    pub fn next(&self, index: u32) -> u32 {
        self.slot(index).next.load(Ordering::Acquire)
    }

    /// Publish a link: everything written to `target` before this becomes visible
    pub fn set_next(&self, index: u32, target: u32) {
        self.slot(index).next.store(target, Ordering::Release);
    }

    pub fn prev(&self, index: u32) -> u32 {
        self.slot(index).prev.load(Ordering::Relaxed)
    }

    pub fn set_prev(&self, index: u32, target: u32) {
        self.slot(index).prev.store(target, Ordering::Relaxed);
    }

    pub fn assoc(&self, index: u32) -> u32 {
        self.slot(index).assoc.load(Ordering::Relaxed)
    }

    pub fn set_assoc(&self, index: u32, target: u32) {
        self.slot(index).assoc.store(target, Ordering::Relaxed);
    }

    pub fn set_length(&self, index: u32, length: u32) {
        self.slot(index).length.store(length, Ordering::Relaxed);
    }

    pub fn set_velocity(&self, index: u32, velocity: u8) {
        self.slot(index).velocity.store(velocity, Ordering::Relaxed);
    }

    pub fn link_handle(&self, index: u32) -> Option<EventHandle> {
        (index != NIL).then(|| self.handle(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_invalidated_by_recycle() {
        let arena = EventArena::new(4);
        arena.init(2, 0, 60, 100, 1, true);

        let handle = arena.handle(2);
        assert_eq!(arena.resolve(handle), Some(2));

        arena.recycle(2);
        assert_eq!(arena.resolve(handle), None);
        assert_eq!(arena.resolve(arena.handle(2)), Some(2));
    }

    #[test]
    fn test_view_reflects_init() {
        let arena = EventArena::new(1);
        arena.init(0, 5, 64, 90, 3, true);

        let view = arena.view(0);
        assert_eq!(
            view,
            EventView {
                step: 5,
                key: 64,
                velocity: 90,
                length: 3,
                onset: true
            }
        );
        assert_eq!(arena.next(0), NIL);
    }

    #[test]
    fn test_out_of_range_handle_does_not_resolve() {
        let arena = EventArena::new(1);
        let bogus = EventHandle {
            index: 7,
            generation: 0,
        };
        assert_eq!(arena.resolve(bogus), None);
    }
}
