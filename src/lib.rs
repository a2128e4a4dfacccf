// stepseq - Library exports for tests and benchmarks

pub mod command;
pub mod config;
pub mod messaging;
pub mod midi;
pub mod project;
pub mod reclaim;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use command::{Command, CommandError, CommandStack, UndoableCommand};
pub use config::{ConfigError, EngineConfig};
pub use messaging::channels::create_notification_channel;
pub use midi::event::{MidiEvent, MidiEventTimed};
pub use project::{ProjectError, ProjectManager};
pub use sequencer::{
    PatternReader, PatternStore, Song, SongPlayer, SongReader, SongTime, Track,
};
