// UndoableCommand trait definition

use crate::sequencer::pattern::{PatternError, PatternId, PatternStore};
use crate::sequencer::song::Song;
use crate::sequencer::time::SongTime;
use crate::sequencer::track::{Track, TrackId};
use thiserror::Error;

/// Result type for command operations
pub type CommandResult<T> = Result<T, CommandError>;

/// Why a command did not take effect
///
/// Precondition violations are worth showing to the user; `NoOp` and the
/// empty-history errors are silently ignorable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Unknown track {0}")]
    UnknownTrack(TrackId),

    #[error("Unknown pattern {pattern} in track {track}")]
    UnknownPattern { track: TrackId, pattern: PatternId },

    #[error("Unknown controller {number} in track {track}")]
    UnknownController { track: TrackId, number: u32 },

    #[error("Unknown key {key} in track {track}")]
    UnknownKey { track: TrackId, key: u8 },

    #[error("No sequence entry at {time} in track {track}")]
    UnknownSequenceEntry { track: TrackId, time: SongTime },

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("Nothing to do: {0}")]
    NoOp(&'static str),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,
}

impl CommandError {
    /// False for outcomes the UI should ignore silently
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            CommandError::NoOp(_) | CommandError::NothingToUndo | CommandError::NothingToRedo
        )
    }
}

/// A one-shot, undoable edit of the song
///
/// `do_command` either succeeds or leaves the song untouched: every check runs
/// before the first mutation. `undo_command` reverses a successful
/// `do_command`; a command may go through do, undo, do (redo) any number of
/// times.
///
/// Commands that take objects out of the song keep them so undo can put them
/// back. When the command stack drops such a command it calls `retire()`,
/// which must hand those objects to the song's reclaimer: the realtime thread
/// may still be looking at them.
pub trait UndoableCommand: Send {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()>;

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()>;

    /// Human-readable name, e.g. for "Undo Add note"
    fn name(&self) -> &str;

    fn retire(&mut self, _song: &mut Song) {}
}

pub(crate) fn track_mut(song: &mut Song, track: TrackId) -> CommandResult<&mut Track> {
    song.track_mut(track).ok_or(CommandError::UnknownTrack(track))
}

pub(crate) fn track_ref(song: &Song, track: TrackId) -> CommandResult<&Track> {
    song.track(track).ok_or(CommandError::UnknownTrack(track))
}

pub(crate) fn pattern_mut(
    song: &mut Song,
    track: TrackId,
    pattern: PatternId,
) -> CommandResult<&mut PatternStore> {
    track_mut(song, track)?
        .pattern_mut(pattern)
        .ok_or(CommandError::UnknownPattern { track, pattern })
}

pub(crate) fn pattern_ref(song: &Song, track: TrackId, pattern: PatternId) -> CommandResult<&PatternStore> {
    track_ref(song, track)?
        .pattern(pattern)
        .ok_or(CommandError::UnknownPattern { track, pattern })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_visibility() {
        assert!(CommandError::UnknownTrack(3).is_user_visible());
        assert!(CommandError::OutOfRange("step".into()).is_user_visible());
        assert!(CommandError::Pattern(PatternError::KeyOutOfRange(200)).is_user_visible());
        assert!(!CommandError::NoOp("identical note").is_user_visible());
        assert!(!CommandError::NothingToUndo.is_user_visible());
        assert!(!CommandError::NothingToRedo.is_user_visible());
    }

    #[test]
    fn test_lookup_helpers() {
        let mut song = Song::new();
        let track = song.add_track("T");
        assert!(track_mut(&mut song, track).is_ok());
        assert_eq!(
            track_mut(&mut song, track + 1).unwrap_err(),
            CommandError::UnknownTrack(track + 1)
        );
        assert_eq!(
            pattern_ref(&song, track, 9).unwrap_err(),
            CommandError::UnknownPattern { track, pattern: 9 }
        );
    }
}
