// MIDI output types

pub mod event;

pub use event::{EventBuffer, FixedEventBuffer, MidiEvent, MidiEventTimed};
