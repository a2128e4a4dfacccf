// DeferredReclaimer - Two-stage graveyard for objects the realtime reader may still see
//
// Objects unlinked from a live structure are queued here instead of being dropped.
// A periodic non-realtime tick first confirms them (moves them to the to-delete
// stage) and, on a later tick, destroys them. Both stages are fixed-capacity
// ringbuffers allocated up front, so queuing never allocates and never blocks.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Default capacity of each stage
pub const DEFAULT_RECLAIMER_CAPACITY: usize = 1000;

/// Default number of objects moved per `confirm()` call
pub const DEFAULT_CONFIRM_BATCH: usize = 100;

/// Fixed-capacity deferred reclamation queue
///
/// Invariant: an object is never in either stage while it is still reachable
/// from a live structure, and an object in either stage is never reachable.
pub struct DeferredReclaimer<T> {
    /// Objects unlinked but not yet confirmed as unreachable by the reader
    unconfirmed_tx: HeapProd<T>,
    unconfirmed_rx: HeapCons<T>,

    /// Objects confirmed and ready to be destroyed
    confirmed_tx: HeapProd<T>,
    confirmed_rx: HeapCons<T>,

    capacity: usize,
    confirm_batch: usize,

    /// Number of rejected `queue_deletion` calls since creation
    overflows: u64,
}

impl<T> DeferredReclaimer<T> {
    /// Create a reclaimer with `capacity` slots in each stage
    pub fn new(capacity: usize) -> Self {
        Self::with_batch(capacity, DEFAULT_CONFIRM_BATCH)
    }

    /// Create a reclaimer with a custom default confirm batch size
    pub fn with_batch(capacity: usize, confirm_batch: usize) -> Self {
        let capacity = capacity.max(1);
        let (unconfirmed_tx, unconfirmed_rx) = HeapRb::<T>::new(capacity).split();
        let (confirmed_tx, confirmed_rx) = HeapRb::<T>::new(capacity).split();

        Self {
            unconfirmed_tx,
            unconfirmed_rx,
            confirmed_tx,
            confirmed_rx,
            capacity,
            confirm_batch: confirm_batch.max(1),
            overflows: 0,
        }
    }

    /// Queue an unlinked object for deferred destruction
    ///
    /// Never blocks. When the unconfirmed stage is full the object is handed
    /// back in `Err` so the caller can surface the fault; it is never dropped here.
    pub fn queue_deletion(&mut self, item: T) -> Result<(), T> {
        match self.unconfirmed_tx.try_push(item) {
            Ok(()) => Ok(()),
            Err(item) => {
                self.overflows += 1;
                Err(item)
            }
        }
    }

    /// Move up to `n` objects from the unconfirmed stage to the to-delete stage
    ///
    /// Must only be called once the realtime reader has completed a full pass
    /// since the objects were unlinked. Returns the number of objects moved.
    pub fn confirm(&mut self, n: usize) -> usize {
        let mut moved = 0;
        while moved < n && !self.confirmed_tx.is_full() {
            let Some(item) = self.unconfirmed_rx.try_pop() else {
                break;
            };
            // Cannot fail: we checked for a vacant slot above
            if self.confirmed_tx.try_push(item).is_err() {
                break;
            }
            moved += 1;
        }
        moved
    }

    /// `confirm()` with the configured batch size
    pub fn confirm_batch(&mut self) -> usize {
        self.confirm(self.confirm_batch)
    }

    /// Destroy every confirmed object, returning how many were dropped
    pub fn do_delete(&mut self) -> usize {
        self.drain_confirmed(drop)
    }

    /// Hand every confirmed object to `dispose` instead of dropping it
    ///
    /// Used by owners that recycle storage (e.g. arena slots) rather than free it.
    pub fn drain_confirmed(&mut self, mut dispose: impl FnMut(T)) -> usize {
        let mut count = 0;
        while let Some(item) = self.confirmed_rx.try_pop() {
            dispose(item);
            count += 1;
        }
        count
    }

    /// Objects waiting for confirmation
    pub fn pending_len(&self) -> usize {
        self.unconfirmed_rx.occupied_len()
    }

    /// Objects confirmed and waiting for `do_delete()`
    pub fn confirmed_len(&self) -> usize {
        self.confirmed_rx.occupied_len()
    }

    /// Capacity of each stage
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of rejected `queue_deletion` calls
    pub fn overflow_count(&self) -> u64 {
        self.overflows
    }

    /// True when nothing is waiting in either stage
    pub fn is_idle(&self) -> bool {
        self.pending_len() == 0 && self.confirmed_len() == 0
    }
}

impl<T> Default for DeferredReclaimer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_RECLAIMER_CAPACITY)
    }
}
