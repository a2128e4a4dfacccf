// Command Pattern for Undo/Redo functionality
//
// Every edit of the song goes through a command executed by the CommandStack.
// Concrete commands are plain structs implementing UndoableCommand; the
// `Command` enum gathers them into one tagged type so that histories and
// compound commands hold them by value.
//
// - UndoableCommand trait: do_command(), undo_command(), name()
// - CompoundCommand: children built while it executes
// - CommandStack: undo/redo stacks, retires dropped commands to the song

pub mod compound;
pub mod manager;
pub mod pattern_commands;
pub mod song_commands;
pub mod track_commands;
pub mod trait_def;

pub use compound::CompoundCommand;
pub use manager::{CommandStack, DEFAULT_MAX_HISTORY, StackSignal};
pub use pattern_commands::*;
pub use song_commands::*;
pub use track_commands::*;
pub use trait_def::{CommandError, CommandResult, UndoableCommand};

use crate::sequencer::song::Song;

macro_rules! commands {
    ($($variant:ident),* $(,)?) => {
        /// Any undoable edit
        pub enum Command {
            $($variant($variant),)*
        }

        impl UndoableCommand for Command {
            fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
                match self {
                    $(Command::$variant(c) => c.do_command(song),)*
                }
            }

            fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
                match self {
                    $(Command::$variant(c) => c.undo_command(song),)*
                }
            }

            fn name(&self) -> &str {
                match self {
                    $(Command::$variant(c) => c.name(),)*
                }
            }

            fn retire(&mut self, song: &mut Song) {
                match self {
                    $(Command::$variant(c) => c.retire(song),)*
                }
            }
        }

        $(
            impl From<$variant> for Command {
                fn from(command: $variant) -> Self {
                    Command::$variant(command)
                }
            }
        )*
    };
}

commands! {
    CompoundCommand,
    // Song
    SetSongLength,
    ChangeSongLength,
    SetLoopStart,
    SetLoopEnd,
    AddTempoChange,
    RemoveTempoChange,
    AddTrack,
    RemoveTrack,
    // Track
    SetTrackName,
    SetTrackMode,
    SetTrackMidiChannel,
    AddPattern,
    DuplicatePattern,
    RemovePattern,
    DisownPattern,
    AddSequenceEntry,
    RemoveSequenceEntry,
    SetSequenceEntryLength,
    AddController,
    RemoveController,
    SetControllerName,
    SetControllerMin,
    SetControllerMax,
    SetControllerDefault,
    SetControllerNumber,
    SetControllerGlobal,
    AddTrackCurvePoint,
    AddKey,
    RemoveKey,
    SetKeyName,
    SetKeyNumber,
    // Pattern
    SetPatternName,
    SetPatternLength,
    ChangePatternLength,
    SetPatternSteps,
    AddNote,
    AddNotes,
    SetNoteVelocity,
    SetNoteSize,
    DeleteNote,
    AddPatternCurvePoint,
    RemovePatternCurvePoint,
    AddControlChange,
    RemoveControlChange,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Command").field(&self.name()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_dispatch() {
        let mut song = Song::new();
        let mut command: Command = AddTrack::new("Bass").into();
        assert_eq!(command.name(), "Add track");

        command.do_command(&mut song).unwrap();
        assert_eq!(song.track_count(), 1);
        command.undo_command(&mut song).unwrap();
        assert_eq!(song.track_count(), 0);
    }

    #[test]
    fn test_commands_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Command>();
        assert_send::<CommandStack>();
    }
}
