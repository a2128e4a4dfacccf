// Pattern - step-grid note, control change and curve storage
//
// The control thread edits a pattern through `PatternStore`; the realtime
// thread reads it through `PatternReader` without locks. Notes live in a
// shared event arena chained per step. Step, CC and curve tables are swapped
// whole through `ArcSwap` when the pattern geometry changes.
//
// Nothing the reader may still see is dropped synchronously: unlinked event
// slots and replaced tables are queued in the pattern's DeferredReclaimer and
// only recycled by `reclaim_tick()` after the grace period.

use crate::messaging::signals::SignalBus;
use crate::reclaim::DeferredReclaimer;
use crate::sequencer::arena::{EventArena, EventHandle, EventView, NIL};
use crate::sequencer::controller::CC_COUNT;
use crate::sequencer::curve::{Curve, CurveData, InterpolatedEvent};
use crate::sequencer::note::{Note, NoteCollection, NoteEvent};
use arc_swap::ArcSwap;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Unique identifier for patterns within a track
pub type PatternId = u32;

const NO_CC: u8 = 0xFF;

/// Errors reported by pattern edits. All checks run before any mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("step {step} outside pattern of {slots} steps")]
    StepOutOfRange { step: u32, slots: u32 },

    #[error("key {0} outside 0-127")]
    KeyOutOfRange(u8),

    #[error("value {0} outside 0-127")]
    ValueOutOfRange(i32),

    #[error("note length {length} does not fit at step {step}")]
    LengthOutOfRange { step: u32, length: u32 },

    #[error("controller {0} outside 0-127")]
    ControllerOutOfRange(u32),

    #[error("no curve for controller {0}")]
    UnknownCurve(u32),

    #[error("curve for controller {0} already exists")]
    CurveExists(u32),

    #[error("event arena exhausted ({capacity} slots)")]
    ArenaExhausted { capacity: usize },

    #[error("invalid pattern geometry: {0}")]
    InvalidGeometry(String),
}

/// Most note or controller steps a single pattern can hold
pub const MAX_SLOTS: u32 = 1 << 16;

/// Check a pattern geometry, returning its note and controller step counts
pub fn check_geometry(
    length: u32,
    steps: u32,
    cc_steps: u32,
) -> Result<(u32, u32), PatternError> {
    if length == 0 || steps == 0 || cc_steps == 0 {
        return Err(PatternError::InvalidGeometry(format!(
            "length {length}, steps {steps} and cc steps {cc_steps} must be positive"
        )));
    }
    if cc_steps % steps != 0 {
        return Err(PatternError::InvalidGeometry(format!(
            "cc steps {cc_steps} is not a multiple of steps {steps}"
        )));
    }
    let slots = length.checked_mul(steps).filter(|&n| n <= MAX_SLOTS);
    let cells = length.checked_mul(cc_steps).filter(|&n| n <= MAX_SLOTS);
    match (slots, cells) {
        (Some(slots), Some(cells)) => Ok((slots, cells)),
        _ => Err(PatternError::InvalidGeometry(format!(
            "{length} beats of {cc_steps} steps exceed {MAX_SLOTS} steps"
        ))),
    }
}

/// Sizing of a pattern's preallocated storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternConfig {
    /// Number of note events (two per note) the arena can hold
    pub arena_capacity: usize,
    /// Capacity of each reclaimer stage
    pub reclaimer_capacity: usize,
    /// Objects confirmed per reclamation tick
    pub confirm_batch: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            arena_capacity: 4096,
            reclaimer_capacity: 4096 + 64,
            confirm_batch: 4096 + 64,
        }
    }
}

/// Note events reserved per grid step when sizing the arena from the geometry
pub const ARENA_EVENTS_PER_STEP: usize = 32;

impl PatternConfig {
    /// Arena sized for a grid of `slots` steps, never below the configured floor
    pub fn for_grid(self, slots: u32) -> Self {
        self.with_min_arena(slots as usize * ARENA_EVENTS_PER_STEP)
    }

    /// Raise the arena so it holds at least `events` note events
    pub fn with_min_arena(mut self, events: usize) -> Self {
        if events > self.arena_capacity {
            self.arena_capacity = events;
            self.reclaimer_capacity = self.reclaimer_capacity.max(events + 64);
            self.confirm_batch = self.confirm_batch.max(events + 64);
        }
        self
    }
}

/// Observer notifications for a pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSignal {
    NoteAdded { step: u32, key: u8, length: u32 },
    NoteRemoved { step: u32, key: u8 },
    NoteChanged { step: u32, key: u8, velocity: u8, length: u32 },
    CcAdded { number: u8, step: u32, value: u8 },
    CcChanged { number: u8, step: u32, value: u8 },
    CcRemoved { number: u8, step: u32, value: u8 },
    CurveAdded(u32),
    CurveRemoved(u32),
    CurvePointSet { number: u32, step: u32, value: i32 },
    CurvePointRemoved { number: u32, step: u32 },
    NameChanged(String),
    LengthChanged(u32),
    StepsChanged(u32),
}

/// Bounding box of note cells touched since the last query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRect {
    pub min_step: u32,
    pub max_step: u32,
    pub min_key: u8,
    pub max_key: u8,
}

impl DirtyRect {
    fn cell_range(from_step: u32, to_step: u32, key: u8) -> Self {
        Self {
            min_step: from_step.min(to_step),
            max_step: from_step.max(to_step),
            min_key: key,
            max_key: key,
        }
    }

    fn union(self, other: Self) -> Self {
        Self {
            min_step: self.min_step.min(other.min_step),
            max_step: self.max_step.max(other.max_step),
            min_key: self.min_key.min(other.min_key),
            max_key: self.max_key.max(other.max_key),
        }
    }
}

/// Heads of the per-step event chains
#[derive(Debug)]
pub(crate) struct StepTable {
    length: u32,
    steps: u32,
    heads: Box<[AtomicU32]>,
}

impl StepTable {
    fn new(length: u32, steps: u32) -> Self {
        Self {
            length,
            steps,
            heads: (0..length * steps).map(|_| AtomicU32::new(NIL)).collect(),
        }
    }

    fn slot_count(&self) -> u32 {
        self.heads.len() as u32
    }

    fn head(&self, step: u32) -> u32 {
        self.heads[step as usize].load(Ordering::Acquire)
    }

    fn set_head(&self, step: u32, index: u32) {
        self.heads[step as usize].store(index, Ordering::Release);
    }
}

/// Dense per-controller CC lanes, `NO_CC` marks an empty cell
#[derive(Debug)]
pub(crate) struct CcTable {
    cc_steps: u32,
    lanes: Box<[Box<[AtomicU8]>]>,
}

impl CcTable {
    fn new(length: u32, cc_steps: u32) -> Self {
        let cells = (length * cc_steps) as usize;
        Self {
            cc_steps,
            lanes: (0..CC_COUNT)
                .map(|_| (0..cells).map(|_| AtomicU8::new(NO_CC)).collect())
                .collect(),
        }
    }

    fn cell_count(&self) -> u32 {
        self.lanes.first().map_or(0, |lane| lane.len() as u32)
    }

    fn get(&self, number: u8, step: u32) -> Option<u8> {
        let value = self
            .lanes
            .get(number as usize)?
            .get(step as usize)?
            .load(Ordering::Relaxed);
        (value != NO_CC).then_some(value)
    }

    fn swap(&self, number: u8, step: u32, value: u8) -> u8 {
        self.lanes[number as usize][step as usize].swap(value, Ordering::Relaxed)
    }

    fn points(&self, number: u8) -> Vec<(u32, u8)> {
        (0..self.cell_count())
            .filter_map(|step| self.get(number, step).map(|value| (step, value)))
            .collect()
    }
}

/// Curves keyed by controller number
#[derive(Debug, Default)]
pub(crate) struct CurveSet {
    curves: Vec<(u32, Arc<Curve>)>,
}

impl CurveSet {
    fn find(&self, number: u32) -> Option<&Arc<Curve>> {
        self.curves
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, curve)| curve)
    }
}

/// State shared between the writer and its readers
#[derive(Debug)]
pub(crate) struct PatternShared {
    id: PatternId,
    arena: EventArena,
    steps: ArcSwap<StepTable>,
    cc: ArcSwap<CcTable>,
    curves: ArcSwap<CurveSet>,
}

/// Objects held back until the reader can no longer see them
#[derive(Debug)]
pub(crate) enum Retired {
    Slot(u32),
    Steps(Arc<StepTable>),
    Cc(Arc<CcTable>),
    Curves(Arc<CurveSet>),
}

/// Control-side owner of one pattern
pub struct PatternStore {
    id: PatternId,
    name: String,
    length: u32,
    steps: u32,
    cc_steps: u32,
    config: PatternConfig,

    shared: Arc<PatternShared>,
    // Writer copies of the currently published tables
    table: Arc<StepTable>,
    cc: Arc<CcTable>,
    curves: Arc<CurveSet>,

    free: Vec<u32>,
    retired: DeferredReclaimer<Retired>,
    /// Objects the reclaimer refused; re-queued on the next tick
    stranded: Vec<Retired>,
    reclaim_faults: u64,

    dirty: Option<DirtyRect>,
    modified: bool,
    signals: SignalBus<PatternSignal>,
}

impl PatternStore {
    /// Create an empty pattern of `length` beats with `steps` note steps and
    /// `cc_steps` controller steps per beat
    pub fn new(
        id: PatternId,
        name: impl Into<String>,
        length: u32,
        steps: u32,
        cc_steps: u32,
        config: PatternConfig,
    ) -> Result<Self, PatternError> {
        check_geometry(length, steps, cc_steps)?;

        let table = Arc::new(StepTable::new(length, steps));
        let cc = Arc::new(CcTable::new(length, cc_steps));
        let curves = Arc::new(CurveSet::default());
        let shared = Arc::new(PatternShared {
            id,
            arena: EventArena::new(config.arena_capacity),
            steps: ArcSwap::new(table.clone()),
            cc: ArcSwap::new(cc.clone()),
            curves: ArcSwap::new(curves.clone()),
        });
        let free = (0..shared.arena.capacity() as u32).rev().collect();

        Ok(Self {
            id,
            name: name.into(),
            length,
            steps,
            cc_steps,
            config,
            shared,
            table,
            cc,
            curves,
            free,
            retired: DeferredReclaimer::with_batch(config.reclaimer_capacity, config.confirm_batch),
            stranded: Vec::new(),
            reclaim_faults: 0,
            dirty: None,
            modified: false,
            signals: SignalBus::new(),
        })
    }

    pub fn id(&self) -> PatternId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename, notifying only when the name actually changes
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name != self.name {
            self.name = name.clone();
            self.modified = true;
            self.signals.emit(PatternSignal::NameChanged(name));
        }
    }

    /// Length in beats
    pub fn length(&self) -> u32 {
        self.length
    }

    /// Note steps per beat
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Controller steps per beat
    pub fn cc_steps(&self) -> u32 {
        self.cc_steps
    }

    /// Total number of note step slots
    pub fn slot_count(&self) -> u32 {
        self.length * self.steps
    }

    pub fn config(&self) -> PatternConfig {
        self.config
    }

    pub fn subscribe(&mut self) -> Receiver<PatternSignal> {
        self.signals.subscribe()
    }

    /// Realtime view of this pattern
    pub fn reader(&self) -> PatternReader {
        PatternReader {
            shared: self.shared.clone(),
        }
    }

    /// Unsaved changes since the last `mark_saved()`
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn mark_saved(&mut self) {
        self.modified = false;
    }

    /// Free arena slots available for new events
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    /// Return the accumulated dirty rectangle and reset it
    ///
    /// Only for the redraw collaborator; never call from the realtime thread.
    pub fn get_dirty_rect(&mut self) -> Option<DirtyRect> {
        self.dirty.take()
    }

    fn touch(&mut self, from_step: u32, to_step: u32, key: u8) {
        let cells = DirtyRect::cell_range(from_step, to_step, key);
        self.dirty = Some(match self.dirty {
            Some(rect) => rect.union(cells),
            None => cells,
        });
        self.modified = true;
    }

    // ---------------------------------------------------------------------
    // Chain primitives
    // ---------------------------------------------------------------------

    fn find_event(&self, table: &StepTable, step: u32, key: u8, onset: bool) -> Option<u32> {
        let arena = &self.shared.arena;
        let mut index = table.head(step);
        while index != NIL {
            let view = arena.view(index);
            if view.key == key && view.onset == onset {
                return Some(index);
            }
            index = arena.next(index);
        }
        None
    }

    fn allocate(&mut self) -> Option<u32> {
        self.free.pop()
    }

    /// Onsets go to the head of their step chain
    fn link_onset(&self, table: &StepTable, step: u32, index: u32) {
        let arena = &self.shared.arena;
        let head = table.head(step);
        arena.set_prev(index, NIL);
        arena.set_next(index, head);
        if head != NIL {
            arena.set_prev(head, index);
        }
        table.set_head(step, index);
    }

    /// Releases go to the tail of their step chain
    fn link_release(&self, table: &StepTable, step: u32, index: u32) {
        let arena = &self.shared.arena;
        let mut tail = table.head(step);
        if tail == NIL {
            arena.set_prev(index, NIL);
            table.set_head(step, index);
            return;
        }
        while arena.next(tail) != NIL {
            tail = arena.next(tail);
        }
        arena.set_prev(index, tail);
        arena.set_next(tail, index);
    }

    /// Unlink an event and queue its slot. The slot keeps its `next` link so a
    /// reader standing on it can still walk on.
    fn unlink(&mut self, table: &StepTable, step: u32, index: u32) {
        let arena = &self.shared.arena;
        let prev = arena.prev(index);
        let next = arena.next(index);
        if prev == NIL {
            table.set_head(step, next);
        } else {
            arena.set_next(prev, next);
        }
        if next != NIL {
            arena.set_prev(next, prev);
        }
        self.retire(Retired::Slot(index));
    }

    fn retire(&mut self, item: Retired) {
        if let Err(item) = self.retired.queue_deletion(item) {
            self.reclaim_faults += 1;
            log::error!(
                "Pattern {}: reclaimer full ({} slots), holding {:?} until the next tick",
                self.id,
                self.retired.capacity(),
                item
            );
            self.stranded.push(item);
        }
    }

    /// Remove an onset and its release
    fn remove_note_events(&mut self, table: &StepTable, onset: u32) -> Note {
        let arena = &self.shared.arena;
        let view = arena.view(onset);
        let release = arena.assoc(onset);
        let note = Note::new(view.step, view.key, view.velocity, view.length);

        self.unlink(table, view.step, onset);
        if release != NIL {
            let release_step = self.shared.arena.view(release).step;
            self.unlink(table, release_step, release);
        }
        note
    }

    /// Onset of the note sounding at `step`, searching backwards
    fn locate_note(&self, table: &StepTable, step: u32, key: u8) -> Option<u32> {
        if step >= table.slot_count() {
            return None;
        }
        if let Some(onset) = self.find_event(table, step, key, true) {
            return Some(onset);
        }
        for i in (0..step).rev() {
            if self.find_event(table, i, key, false).is_some() {
                return None;
            }
            if let Some(onset) = self.find_event(table, i, key, true) {
                return Some(onset);
            }
        }
        None
    }

    fn note_of(&self, onset: u32) -> Note {
        let view = self.shared.arena.view(onset);
        Note::new(view.step, view.key, view.velocity, view.length)
    }

    fn exhausted(&self, needed: usize) -> PatternError {
        log::error!(
            "Pattern {}: event arena exhausted, need {} slots, {} free",
            self.id,
            needed,
            self.free.len()
        );
        PatternError::ArenaExhausted {
            capacity: self.shared.arena.capacity(),
        }
    }

    // ---------------------------------------------------------------------
    // Notes
    // ---------------------------------------------------------------------

    /// Add a note, shortening a note of the same key that is still sounding
    /// at `step` and clamping the new note before the next onset of its key
    ///
    /// Returns `Ok(None)` when an identical note (same start, key and length)
    /// already exists; nothing changes and no signal fires.
    pub fn add_note(
        &mut self,
        step: u32,
        key: u8,
        velocity: u8,
        length: u32,
    ) -> Result<Option<Note>, PatternError> {
        let table = self.table.clone();
        let slots = table.slot_count();
        if step >= slots {
            return Err(PatternError::StepOutOfRange { step, slots });
        }
        if key > 127 {
            return Err(PatternError::KeyOutOfRange(key));
        }
        if velocity > 127 {
            return Err(PatternError::ValueOutOfRange(velocity as i32));
        }
        if length == 0 || step.checked_add(length).is_none_or(|end| end > slots) {
            return Err(PatternError::LengthOutOfRange { step, length });
        }

        // A note of this key still playing at step - 1 gets cut
        let mut truncate = None;
        for i in (0..step).rev() {
            if self.find_event(&table, i, key, false).is_some() {
                break;
            }
            if let Some(onset) = self.find_event(&table, i, key, true) {
                truncate = Some((i, onset));
                break;
            }
        }

        // A note starting here is replaced unless it is identical
        let existing = self.find_event(&table, step, key, true);
        if let Some(onset) = existing {
            if self.shared.arena.view(onset).length == length {
                return Ok(None);
            }
        }

        let needed = 2 + usize::from(truncate.is_some());
        if self.free.len() < needed {
            return Err(self.exhausted(needed));
        }

        if let Some((start, onset)) = truncate {
            let old_release = self.shared.arena.assoc(onset);
            let old_end = if old_release == NIL {
                step - 1
            } else {
                self.shared.arena.view(old_release).step
            };
            let Some(release) = self.allocate() else {
                return Err(self.exhausted(needed));
            };
            let arena = &self.shared.arena;
            let velocity_before = arena.view(onset).velocity;
            arena.init(release, step - 1, key, 0, step - start, false);
            arena.set_assoc(release, onset);
            self.link_release(&table, step - 1, release);
            let arena = &self.shared.arena;
            arena.set_length(onset, step - start);
            arena.set_assoc(onset, release);
            if old_release != NIL {
                self.unlink(&table, old_end, old_release);
            }
            self.touch(start, old_end, key);
            self.signals.emit(PatternSignal::NoteChanged {
                step: start,
                key,
                velocity: velocity_before,
                length: step - start,
            });
        }

        if let Some(onset) = existing {
            let replaced = self.remove_note_events(&table, onset);
            self.touch(replaced.step, replaced.last_step(), key);
            self.signals.emit(PatternSignal::NoteRemoved {
                step: replaced.step,
                key,
            });
        }

        let mut effective = length;
        for i in step + 1..step + length {
            if self.find_event(&table, i, key, true).is_some() {
                effective = i - step;
                break;
            }
        }

        let (Some(release), Some(onset)) = (self.allocate(), self.allocate()) else {
            return Err(self.exhausted(2));
        };
        let last = step + effective - 1;
        let arena = &self.shared.arena;
        arena.init(release, last, key, 0, effective, false);
        arena.init(onset, step, key, velocity, effective, true);
        arena.set_assoc(release, onset);
        arena.set_assoc(onset, release);
        self.link_release(&table, last, release);
        self.link_onset(&table, step, onset);

        self.touch(step, last, key);
        self.signals.emit(PatternSignal::NoteAdded {
            step,
            key,
            length: effective,
        });
        Ok(Some(Note::new(step, key, velocity, effective)))
    }

    /// Delete the note of `key` sounding at `step`
    ///
    /// Returns the step the deleted note started on, `None` if no note of
    /// that key covers `step`.
    pub fn delete_note(&mut self, step: u32, key: u8) -> Option<u32> {
        let table = self.table.clone();
        let onset = self.locate_note(&table, step, key)?;
        let note = self.remove_note_events(&table, onset);
        self.touch(note.step, note.last_step(), key);
        self.signals.emit(PatternSignal::NoteRemoved {
            step: note.step,
            key,
        });
        Some(note.step)
    }

    /// The note of `key` sounding at `step`
    pub fn find_note(&self, step: u32, key: u8) -> Option<Note> {
        self.locate_note(&self.table, step, key)
            .map(|onset| self.note_of(onset))
    }

    /// Handle of the onset event of the note sounding at `step`
    pub fn find_note_handle(&self, step: u32, key: u8) -> Option<EventHandle> {
        self.locate_note(&self.table, step, key)
            .map(|onset| self.shared.arena.handle(onset))
    }

    /// Copy of a live event, `None` for stale handles
    pub fn event(&self, handle: EventHandle) -> Option<NoteEvent> {
        let index = self.shared.arena.resolve(handle)?;
        Some(self.event_at(index))
    }

    fn event_at(&self, index: u32) -> NoteEvent {
        let arena = &self.shared.arena;
        let view = arena.view(index);
        NoteEvent {
            handle: arena.handle(index),
            step: view.step,
            key: view.key,
            velocity: view.velocity,
            length: view.length,
            onset: view.onset,
            next: arena.link_handle(arena.next(index)),
            previous: arena.link_handle(arena.prev(index)),
            assoc: arena.link_handle(arena.assoc(index)),
        }
    }

    /// The chain of events stored at `step`, in chain order
    pub fn events_at(&self, step: u32) -> Vec<NoteEvent> {
        let mut events = Vec::new();
        if step >= self.table.slot_count() {
            return events;
        }
        let mut index = self.table.head(step);
        while index != NIL {
            events.push(self.event_at(index));
            index = self.shared.arena.next(index);
        }
        events
    }

    /// All notes, ordered by start step
    pub fn notes(&self) -> Vec<Note> {
        let mut notes = Vec::new();
        for step in 0..self.table.slot_count() {
            let mut index = self.table.head(step);
            while index != NIL {
                let view = self.shared.arena.view(index);
                if view.onset {
                    notes.push(Note::new(view.step, view.key, view.velocity, view.length));
                }
                index = self.shared.arena.next(index);
            }
        }
        notes
    }

    pub fn note_count(&self) -> usize {
        self.notes().len()
    }

    pub fn is_empty(&self) -> bool {
        (0..self.table.slot_count()).all(|step| self.table.head(step) == NIL)
    }

    /// Change the velocity of the note sounding at `step`, returning the old one
    pub fn set_velocity(
        &mut self,
        step: u32,
        key: u8,
        velocity: u8,
    ) -> Result<Option<u8>, PatternError> {
        if velocity > 127 {
            return Err(PatternError::ValueOutOfRange(velocity as i32));
        }
        let Some(onset) = self.locate_note(&self.table, step, key) else {
            return Ok(None);
        };
        let note = self.note_of(onset);
        self.shared.arena.set_velocity(onset, velocity);
        self.touch(note.step, note.last_step(), key);
        self.signals.emit(PatternSignal::NoteChanged {
            step: note.step,
            key,
            velocity,
            length: note.length,
        });
        Ok(Some(note.velocity))
    }

    /// Resize the note sounding at `step`
    ///
    /// The new length is clamped before the next onset of the same key.
    /// Returns the previous length, `None` if there is no such note.
    pub fn resize_note(
        &mut self,
        step: u32,
        key: u8,
        length: u32,
    ) -> Result<Option<u32>, PatternError> {
        let table = self.table.clone();
        let Some(onset) = self.locate_note(&table, step, key) else {
            return Ok(None);
        };
        let note = self.note_of(onset);
        let slots = table.slot_count();
        if length == 0 || note.step.checked_add(length).is_none_or(|end| end > slots) {
            return Err(PatternError::LengthOutOfRange {
                step: note.step,
                length,
            });
        }

        let mut effective = length;
        for i in note.step + 1..note.step + length {
            if self.find_event(&table, i, key, true).is_some() {
                effective = i - note.step;
                break;
            }
        }
        if effective == note.length {
            return Ok(Some(note.length));
        }

        let Some(release) = self.allocate() else {
            return Err(self.exhausted(1));
        };
        let old_release = self.shared.arena.assoc(onset);
        let last = note.step + effective - 1;
        let arena = &self.shared.arena;
        arena.init(release, last, key, 0, effective, false);
        arena.set_assoc(release, onset);
        self.link_release(&table, last, release);
        let arena = &self.shared.arena;
        arena.set_length(onset, effective);
        arena.set_assoc(onset, release);
        if old_release != NIL {
            let old_last = arena.view(old_release).step;
            self.unlink(&table, old_last, old_release);
        }

        self.touch(note.step, note.last_step().max(last), key);
        self.signals.emit(PatternSignal::NoteChanged {
            step: note.step,
            key,
            velocity: note.velocity,
            length: effective,
        });
        Ok(Some(note.length))
    }

    /// Remove every note, returning them
    pub fn clear_notes(&mut self) -> Vec<Note> {
        let table = self.table.clone();
        let mut removed = Vec::new();
        for step in 0..table.slot_count() {
            while let Some(onset) = self.first_onset(&table, step) {
                let note = self.remove_note_events(&table, onset);
                self.touch(note.step, note.last_step(), note.key);
                self.signals.emit(PatternSignal::NoteRemoved {
                    step: note.step,
                    key: note.key,
                });
                removed.push(note);
            }
        }
        removed
    }

    fn first_onset(&self, table: &StepTable, step: u32) -> Option<u32> {
        let mut index = table.head(step);
        while index != NIL {
            if self.shared.arena.view(index).onset {
                return Some(index);
            }
            index = self.shared.arena.next(index);
        }
        None
    }

    /// Paste a note collection anchored at `(step, key)`
    ///
    /// Notes falling outside the pattern or the key range are skipped, lengths
    /// are clamped to the pattern end. Returns the number of notes added.
    pub fn add_notes(
        &mut self,
        notes: &NoteCollection,
        step: u32,
        key: u8,
    ) -> Result<usize, PatternError> {
        let needed = notes.len() * 3;
        if self.free.len() < needed {
            return Err(self.exhausted(needed));
        }
        let slots = self.slot_count();
        let mut added = 0;
        for note in notes.iter() {
            let Some(note_step) = step.checked_add(note.start) else {
                continue;
            };
            let note_key = key as u32 + note.key as u32;
            if note_step >= slots || note_key > 127 {
                continue;
            }
            let length = note.length.min(slots - note_step).max(1);
            if self
                .add_note(note_step, note_key as u8, note.velocity.min(127), length)?
                .is_some()
            {
                added += 1;
            }
        }
        Ok(added)
    }

    // ---------------------------------------------------------------------
    // Control changes
    // ---------------------------------------------------------------------

    /// Set a CC value at a controller step
    pub fn add_cc(&mut self, number: u32, step: u32, value: u8) -> Result<(), PatternError> {
        if number >= CC_COUNT as u32 {
            return Err(PatternError::ControllerOutOfRange(number));
        }
        let cells = self.cc.cell_count();
        if step >= cells {
            return Err(PatternError::StepOutOfRange { step, slots: cells });
        }
        if value > 127 {
            return Err(PatternError::ValueOutOfRange(value as i32));
        }

        let number = number as u8;
        let previous = self.cc.swap(number, step, value);
        self.modified = true;
        if previous == NO_CC {
            self.signals.emit(PatternSignal::CcAdded {
                number,
                step,
                value,
            });
        } else {
            self.signals.emit(PatternSignal::CcChanged {
                number,
                step,
                value,
            });
        }
        Ok(())
    }

    /// Erase a CC value, returning it, `None` if there was none
    pub fn delete_cc(&mut self, number: u32, step: u32) -> Option<u8> {
        if number >= CC_COUNT as u32 || step >= self.cc.cell_count() {
            return None;
        }
        let number = number as u8;
        self.cc.get(number, step)?;
        let value = self.cc.swap(number, step, NO_CC);
        self.modified = true;
        self.signals
            .emit(PatternSignal::CcRemoved { number, step, value });
        Some(value)
    }

    pub fn cc_value(&self, number: u32, step: u32) -> Option<u8> {
        if number >= CC_COUNT as u32 {
            return None;
        }
        self.cc.get(number as u8, step)
    }

    /// All set points of one controller, in step order
    pub fn cc_points(&self, number: u32) -> Vec<(u32, u8)> {
        if number >= CC_COUNT as u32 {
            return Vec::new();
        }
        self.cc.points(number as u8)
    }

    // ---------------------------------------------------------------------
    // Curves
    // ---------------------------------------------------------------------

    /// Number of curve steps; points live at `0..=curve_size()`
    pub fn curve_size(&self) -> u32 {
        self.slot_count()
    }

    pub fn has_curve(&self, number: u32) -> bool {
        self.curves.find(number).is_some()
    }

    pub fn curve_numbers(&self) -> Vec<u32> {
        self.curves.curves.iter().map(|(n, _)| *n).collect()
    }

    fn publish_curves(&mut self, curves: Vec<(u32, Arc<Curve>)>) {
        let set = Arc::new(CurveSet { curves });
        let old = self.shared.curves.swap(set.clone());
        self.curves = set;
        self.retire(Retired::Curves(old));
    }

    /// Add a curve for a controller, optionally pre-filled
    pub fn add_curve(&mut self, number: u32, data: &[(u32, i32)]) -> Result<(), PatternError> {
        if self.has_curve(number) {
            return Err(PatternError::CurveExists(number));
        }
        let mut curves = self.curves.curves.clone();
        curves.push((number, Arc::new(Curve::from_data(self.curve_size(), data))));
        curves.sort_by_key(|(n, _)| *n);
        self.publish_curves(curves);
        self.modified = true;
        self.signals.emit(PatternSignal::CurveAdded(number));
        Ok(())
    }

    /// Remove a controller's curve, returning its points
    pub fn remove_curve(&mut self, number: u32) -> Option<CurveData> {
        let data = self.curves.find(number)?.data();
        let curves = self
            .curves
            .curves
            .iter()
            .filter(|(n, _)| *n != number)
            .cloned()
            .collect();
        self.publish_curves(curves);
        self.modified = true;
        self.signals.emit(PatternSignal::CurveRemoved(number));
        Some(data)
    }

    /// Move a curve to another controller number
    pub fn renumber_curve(&mut self, from: u32, to: u32) -> bool {
        if !self.has_curve(from) || self.has_curve(to) {
            return false;
        }
        let mut curves: Vec<_> = self
            .curves
            .curves
            .iter()
            .map(|(n, curve)| (if *n == from { to } else { *n }, curve.clone()))
            .collect();
        curves.sort_by_key(|(n, _)| *n);
        self.publish_curves(curves);
        self.modified = true;
        true
    }

    /// Set a curve point, returning the value it replaced
    pub fn add_curve_point(
        &mut self,
        number: u32,
        step: u32,
        value: i32,
    ) -> Result<Option<i32>, PatternError> {
        let size = self.curve_size();
        let curve = self
            .curves
            .find(number)
            .ok_or(PatternError::UnknownCurve(number))?;
        if step > size {
            return Err(PatternError::StepOutOfRange {
                step,
                slots: size + 1,
            });
        }
        let previous = curve.point(step);
        curve.set_point(step, value);
        self.modified = true;
        self.signals.emit(PatternSignal::CurvePointSet {
            number,
            step,
            value,
        });
        Ok(previous)
    }

    /// Remove a curve point, returning its value
    pub fn remove_curve_point(
        &mut self,
        number: u32,
        step: u32,
    ) -> Result<Option<i32>, PatternError> {
        let curve = self
            .curves
            .find(number)
            .ok_or(PatternError::UnknownCurve(number))?;
        let removed = curve.clear_point(step);
        if removed.is_some() {
            self.modified = true;
            self.signals
                .emit(PatternSignal::CurvePointRemoved { number, step });
        }
        Ok(removed)
    }

    pub fn curve_point(&self, number: u32, step: u32) -> Option<i32> {
        self.curves.find(number)?.point(step)
    }

    pub fn curve_event(&self, number: u32, step: u32) -> Option<InterpolatedEvent> {
        self.curves.find(number)?.event(step)
    }

    pub fn curve_data(&self, number: u32) -> Option<CurveData> {
        Some(self.curves.find(number)?.data())
    }

    // ---------------------------------------------------------------------
    // Geometry
    // ---------------------------------------------------------------------

    /// Change the length in beats
    ///
    /// Notes starting past the new end are removed and notes crossing it are
    /// shortened; CC values and curve points past the end are dropped.
    pub fn set_length(&mut self, length: u32) -> Result<(), PatternError> {
        check_geometry(length, self.steps, self.cc_steps)?;
        if length == self.length {
            return Ok(());
        }

        let end = length * self.steps;
        let notes = self.notes();
        let crossing = notes
            .iter()
            .filter(|n| n.step < end && n.end_step() > end)
            .count();
        if self.free.len() < crossing {
            return Err(self.exhausted(crossing));
        }
        for note in notes.iter().filter(|n| n.step >= end) {
            self.delete_note(note.step, note.key);
        }
        for note in notes.iter().filter(|n| n.step < end && n.end_step() > end) {
            self.resize_note(note.step, note.key, end - note.step)?;
        }

        // New step table sharing the surviving chains
        let table = Arc::new(StepTable::new(length, self.steps));
        for step in 0..table.slot_count().min(self.table.slot_count()) {
            table.set_head(step, self.table.head(step));
        }
        let cc = Arc::new(CcTable::new(length, self.cc_steps));
        for number in 0..CC_COUNT as u8 {
            for (step, value) in self.cc.points(number) {
                if step < cc.cell_count() {
                    cc.swap(number, step, value);
                }
            }
        }
        let curve_size = length * self.steps;
        let curves = self
            .curves
            .curves
            .iter()
            .map(|(n, curve)| (*n, Arc::new(Curve::from_data(curve_size, &curve.data()))))
            .collect();

        self.length = length;
        self.install_tables(table, cc);
        self.publish_curves(curves);
        self.touch(0, end.saturating_sub(1), 0);
        self.signals.emit(PatternSignal::LengthChanged(length));
        Ok(())
    }

    /// Change the number of note steps per beat, rescaling note positions
    ///
    /// If the CC resolution is no longer a multiple of the note resolution it
    /// is raised to the next multiple and CC positions are rescaled.
    pub fn set_steps(&mut self, steps: u32) -> Result<(), PatternError> {
        let cc_steps = self.cc_steps_for(steps)?;
        if steps == self.steps {
            return Ok(());
        }

        let old_steps = self.steps;
        let notes = self.notes();
        let needed = notes.len() * 2;
        if self.free.len() < needed {
            return Err(self.exhausted(needed));
        }

        let slots = self.length * steps;

        self.clear_notes();

        let table = Arc::new(StepTable::new(self.length, steps));
        let cc = Arc::new(CcTable::new(self.length, cc_steps));
        for number in 0..CC_COUNT as u8 {
            for (step, value) in self.cc.points(number) {
                let scaled = (step as u64 * cc_steps as u64 / self.cc_steps as u64) as u32;
                if scaled < cc.cell_count() {
                    cc.swap(number, scaled, value);
                }
            }
        }
        let curves = self
            .curves
            .curves
            .iter()
            .map(|(n, curve)| {
                let data: CurveData = curve
                    .data()
                    .into_iter()
                    .map(|(s, v)| ((s as u64 * steps as u64 / old_steps as u64) as u32, v))
                    .collect();
                (*n, Arc::new(Curve::from_data(slots, &data)))
            })
            .collect();

        self.steps = steps;
        self.cc_steps = cc_steps;
        self.install_tables(table, cc);
        self.publish_curves(curves);

        for note in notes {
            let step = (note.step as u64 * steps as u64 / old_steps as u64) as u32;
            if step >= slots {
                continue;
            }
            let length = ((note.length as u64 * steps as u64 / old_steps as u64) as u32)
                .clamp(1, slots - step);
            self.add_note(step, note.key, note.velocity, length)?;
        }

        self.signals.emit(PatternSignal::StepsChanged(steps));
        Ok(())
    }

    /// Controller resolution after a change to `steps`, checking the new grid
    pub fn cc_steps_for(&self, steps: u32) -> Result<u32, PatternError> {
        if steps == 0 {
            return Err(PatternError::InvalidGeometry(
                "steps per beat must be positive".into(),
            ));
        }
        let cc_steps = if self.cc_steps % steps == 0 {
            Some(self.cc_steps)
        } else {
            self.cc_steps.div_ceil(steps).checked_mul(steps)
        };
        let cc_steps = cc_steps.ok_or_else(|| {
            PatternError::InvalidGeometry(format!("{steps} steps per beat is too fine"))
        })?;
        check_geometry(self.length, steps, cc_steps)?;
        Ok(cc_steps)
    }

    fn install_tables(&mut self, table: Arc<StepTable>, cc: Arc<CcTable>) {
        let old_table = self.shared.steps.swap(table.clone());
        let old_cc = self.shared.cc.swap(cc.clone());
        self.table = table;
        self.cc = cc;
        self.retire(Retired::Steps(old_table));
        self.retire(Retired::Cc(old_cc));
    }

    // ---------------------------------------------------------------------
    // Reclamation
    // ---------------------------------------------------------------------

    /// Periodic reclamation step; call only once the grace period elapsed
    ///
    /// Destroys (recycles) everything confirmed on the previous tick, then
    /// confirms what was queued since. Returns the number of objects reclaimed.
    pub fn reclaim_tick(&mut self) -> usize {
        let arena = &self.shared.arena;
        let free = &mut self.free;
        let reclaimed = self.retired.drain_confirmed(|item| match item {
            Retired::Slot(index) => {
                arena.recycle(index);
                free.push(index);
            }
            other => drop(other),
        });

        self.retired.confirm_batch();

        let stranded = std::mem::take(&mut self.stranded);
        for item in stranded {
            self.retire(item);
        }

        if reclaimed > 0 {
            log::trace!("Pattern {}: reclaimed {} objects", self.id, reclaimed);
        }
        reclaimed
    }

    /// Objects still waiting in the reclaimer
    pub fn pending_reclaim(&self) -> usize {
        self.retired.pending_len() + self.retired.confirmed_len() + self.stranded.len()
    }

    /// Number of times the reclaimer refused an object
    pub fn reclaim_faults(&self) -> u64 {
        self.reclaim_faults
    }

    /// A copy of this pattern with a new id (notes, CC values and curves)
    pub fn duplicate(&self, id: PatternId) -> Result<PatternStore, PatternError> {
        let mut copy = PatternStore::new(
            id,
            self.name.clone(),
            self.length,
            self.steps,
            self.cc_steps,
            self.config,
        )?;
        for note in self.notes() {
            copy.add_note(note.step, note.key, note.velocity, note.length)?;
        }
        for number in 0..CC_COUNT as u32 {
            for (step, value) in self.cc_points(number) {
                copy.add_cc(number, step, value)?;
            }
        }
        for (number, curve) in &self.curves.curves {
            copy.add_curve(*number, &curve.data())?;
        }
        copy.dirty = None;
        Ok(copy)
    }
}

impl std::fmt::Debug for PatternStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternStore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("length", &self.length)
            .field("steps", &self.steps)
            .field("cc_steps", &self.cc_steps)
            .finish_non_exhaustive()
    }
}

/// Lock-free, allocation-free read access for the realtime thread
#[derive(Debug, Clone)]
pub struct PatternReader {
    shared: Arc<PatternShared>,
}

impl PatternReader {
    pub fn id(&self) -> PatternId {
        self.shared.id
    }

    /// Length in beats as currently published
    pub fn length(&self) -> u32 {
        self.shared.steps.load().length
    }

    pub fn steps(&self) -> u32 {
        self.shared.steps.load().steps
    }

    pub fn slot_count(&self) -> u32 {
        self.shared.steps.load().slot_count()
    }

    /// Visit every event in steps `[from, to)`, step by step, onsets first
    pub fn for_each_event(&self, from: u32, to: u32, mut visit: impl FnMut(EventView)) {
        let table = self.shared.steps.load();
        let arena = &self.shared.arena;
        let to = to.min(table.slot_count());
        // Bounds the walk even if a chain were ever corrupted
        let limit = arena.capacity();
        for step in from..to {
            let mut index = table.head(step);
            let mut visited = 0;
            while index != NIL && visited < limit {
                visit(arena.view(index));
                index = arena.next(index);
                visited += 1;
            }
        }
    }

    pub fn cc_steps(&self) -> u32 {
        self.shared.cc.load().cc_steps
    }

    pub fn cc_value(&self, number: u8, cc_step: u32) -> Option<u8> {
        self.shared.cc.load().get(number, cc_step)
    }

    /// Visit every set CC value in controller steps `[from, to)`
    pub fn for_each_cc(&self, from: u32, to: u32, mut visit: impl FnMut(u8, u32, u8)) {
        let cc = self.shared.cc.load();
        let to = to.min(cc.cell_count());
        for number in 0..CC_COUNT as u8 {
            for step in from..to {
                if let Some(value) = cc.get(number, step) {
                    visit(number, step, value);
                }
            }
        }
    }

    pub fn curve_value(&self, number: u32, step: u32) -> Option<i32> {
        self.shared.curves.load().find(number)?.value_at(step)
    }

    /// Visit every curve with its controller number
    pub fn for_each_curve(&self, mut visit: impl FnMut(u32, &Curve)) {
        let curves = self.shared.curves.load();
        for (number, curve) in &curves.curves {
            visit(*number, curve);
        }
    }
}
