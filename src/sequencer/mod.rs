// Sequencer module
// Pattern storage shared with the realtime player, tracks, the song and the
// player that walks a published song snapshot.

pub mod arena;
pub mod controller;
pub mod curve;
pub mod note;
pub mod pattern;
pub mod player;
pub mod song;
pub mod time;
pub mod track;

pub use arena::{EventHandle, EventView};
pub use controller::{ControllerInfo, PITCH_BEND};
pub use curve::{Curve, CurveData, InterpolatedEvent};
pub use note::{CollectedNote, Note, NoteCollection, NoteEvent};
pub use pattern::{
    ARENA_EVENTS_PER_STEP, DirtyRect, MAX_SLOTS, PatternConfig, PatternError, PatternId, PatternReader, PatternSignal,
    PatternStore, check_geometry,
};
pub use player::SongPlayer;
pub use song::{DEFAULT_BPM, Song, SongReader, SongSignal, SongSnapshot};
pub use time::SongTime;
pub use track::{KeyInfo, SequenceEntry, Track, TrackId, TrackMode};
