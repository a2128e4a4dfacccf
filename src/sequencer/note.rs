// Note representation for the pattern store
//
// A sounding note is stored as two arena events: an onset at its first step and
// a release at its last step, cross-linked through `assoc`. The types here are
// plain copies handed out to the control side; the live data stays in the arena.

use crate::sequencer::arena::EventHandle;
use serde::{Deserialize, Serialize};

/// A note in a pattern, in step units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Note {
    /// First step of the note
    pub step: u32,

    /// MIDI key (0-127, where 60 = C4)
    pub key: u8,

    /// MIDI velocity (0-127)
    pub velocity: u8,

    /// Length in steps (>= 1)
    pub length: u32,
}

impl Note {
    pub fn new(step: u32, key: u8, velocity: u8, length: u32) -> Self {
        Self {
            step,
            key,
            velocity,
            length,
        }
    }

    /// First step after the note
    pub fn end_step(&self) -> u32 {
        self.step + self.length
    }

    /// Step holding the release event
    pub fn last_step(&self) -> u32 {
        self.end_step().saturating_sub(1)
    }

    /// Check if this note sounds during `step`
    pub fn contains_step(&self, step: u32) -> bool {
        step >= self.step && step < self.end_step()
    }

    /// Get the note name (e.g., "C4", "A#5")
    pub fn note_name(&self) -> String {
        const NOTE_NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];

        let octave = (self.key / 12) as i32 - 1;
        let note_index = (self.key % 12) as usize;

        format!("{}{}", NOTE_NAMES[note_index], octave)
    }
}

/// Copy of one onset or release event and its links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub handle: EventHandle,
    /// Step bucket the event lives in
    pub step: u32,
    pub key: u8,
    /// Meaningful on onsets only
    pub velocity: u8,
    /// Note length in steps, carried by both events of a note
    pub length: u32,
    pub onset: bool,
    /// Next event in the same step
    pub next: Option<EventHandle>,
    /// Previous event in the same step
    pub previous: Option<EventHandle>,
    /// Matching release (for an onset) or onset (for a release)
    pub assoc: Option<EventHandle>,
}

/// A note stored relative to an anchor step and key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedNote {
    pub start: u32,
    pub key: u8,
    pub velocity: u8,
    pub length: u32,
}

/// A set of notes detached from any pattern, used for paste and restore
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteCollection {
    notes: Vec<CollectedNote>,
}

impl NoteCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect notes relative to their lowest step and lowest key
    ///
    /// Returns the collection and the `(step, key)` anchor it was taken at.
    pub fn from_notes<I>(notes: I) -> (Self, u32, u8)
    where
        I: IntoIterator<Item = Note>,
    {
        let notes: Vec<Note> = notes.into_iter().collect();
        let min_step = notes.iter().map(|n| n.step).min().unwrap_or(0);
        let min_key = notes.iter().map(|n| n.key).min().unwrap_or(0);

        let collected = notes
            .iter()
            .map(|n| CollectedNote {
                start: n.step - min_step,
                key: n.key - min_key,
                velocity: n.velocity,
                length: n.length,
            })
            .collect();

        (Self { notes: collected }, min_step, min_key)
    }

    pub fn push(&mut self, note: CollectedNote) {
        self.notes.push(note);
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectedNote> {
        self.notes.iter()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_range() {
        let note = Note::new(4, 60, 100, 3);

        assert_eq!(note.end_step(), 7);
        assert_eq!(note.last_step(), 6);
        assert!(note.contains_step(4));
        assert!(note.contains_step(6));
        assert!(!note.contains_step(7));
        assert!(!note.contains_step(3));
    }

    #[test]
    fn test_note_name() {
        assert_eq!(Note::new(0, 60, 100, 1).note_name(), "C4");
        assert_eq!(Note::new(0, 69, 100, 1).note_name(), "A4");
        assert_eq!(Note::new(0, 73, 100, 1).note_name(), "C#5");
    }

    #[test]
    fn test_collection_is_relative() {
        let notes = vec![Note::new(8, 64, 90, 2), Note::new(4, 60, 100, 1)];
        let (collection, step, key) = NoteCollection::from_notes(notes);

        assert_eq!(step, 4);
        assert_eq!(key, 60);
        let mut items: Vec<_> = collection.iter().copied().collect();
        items.sort_by_key(|n| n.start);
        assert_eq!(
            items[0],
            CollectedNote {
                start: 0,
                key: 0,
                velocity: 100,
                length: 1
            }
        );
        assert_eq!(items[1].start, 4);
        assert_eq!(items[1].key, 4);
    }

    #[test]
    fn test_empty_collection() {
        let (collection, step, key) = NoteCollection::from_notes(Vec::new());
        assert!(collection.is_empty());
        assert_eq!((step, key), (0, 0));
    }
}
