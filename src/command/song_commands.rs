// Song-level commands: length, loop, tempo map, tracks

use crate::command::compound::CompoundCommand;
use crate::command::track_commands::{RemoveSequenceEntry, SetSequenceEntryLength};
use crate::command::trait_def::{CommandError, CommandResult, UndoableCommand, track_ref};
use crate::sequencer::song::Song;
use crate::sequencer::time::SongTime;
use crate::sequencer::track::{Track, TrackId};

/// Change the song length
///
/// Shrinking also removes loop points, tempo changes and sequence entries past
/// the new end, and shortens entries crossing it, all undone together.
pub struct SetSongLength {
    length: u32,
    inner: CompoundCommand,
}

impl SetSongLength {
    pub fn new(length: u32) -> Self {
        Self {
            length,
            inner: CompoundCommand::new("Change song length"),
        }
    }
}

impl UndoableCommand for SetSongLength {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        if self.length == 0 {
            return Err(CommandError::Invalid("song length must be positive".into()));
        }
        if self.length == song.length() {
            return Err(CommandError::NoOp("song length unchanged"));
        }

        self.inner.clear(song);
        let length = self.length;
        if length < song.length() {
            if song.loop_start().is_some_and(|beat| beat > length) {
                self.inner.append(SetLoopStart::new(None));
            }
            if song.loop_end().is_some_and(|beat| beat > length) {
                self.inner.append(SetLoopEnd::new(Some(length)));
            }

            let tempo: Vec<u32> = song
                .tempo_changes()
                .map(|(beat, _)| beat)
                .filter(|beat| *beat >= length && *beat > 0)
                .collect();
            for beat in tempo {
                self.inner.append(RemoveTempoChange::new(beat));
            }

            let end = SongTime::from_beats(length);
            let mut entries = Vec::new();
            for track in song.tracks() {
                for entry in track.sequence() {
                    entries.push((track.id(), *entry));
                }
            }
            for (track, entry) in entries {
                if entry.start >= end {
                    self.inner.append(RemoveSequenceEntry::new(track, entry.start));
                } else if entry.end() > end {
                    self.inner.append(SetSequenceEntryLength::new(
                        track,
                        entry.start,
                        end.saturating_sub(entry.start),
                    ));
                }
            }
        }
        self.inner.append(ChangeSongLength::new(length));

        self.inner.do_command(song)
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        self.inner.undo_command(song)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn retire(&mut self, song: &mut Song) {
        self.inner.retire(song);
    }
}

/// The length change proper, run last inside `SetSongLength`
pub struct ChangeSongLength {
    length: u32,
    old: u32,
}

impl ChangeSongLength {
    pub fn new(length: u32) -> Self {
        Self { length, old: 0 }
    }
}

impl UndoableCommand for ChangeSongLength {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let old = song.length();
        if !song.set_length(self.length) {
            return Err(CommandError::Invalid("song length must be positive".into()));
        }
        self.old = old;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        song.set_length(self.old);
        Ok(())
    }

    fn name(&self) -> &str {
        "Change song length"
    }
}

/// Set or clear the loop start
pub struct SetLoopStart {
    beat: Option<u32>,
    old: Option<u32>,
}

impl SetLoopStart {
    pub fn new(beat: Option<u32>) -> Self {
        Self { beat, old: None }
    }
}

impl UndoableCommand for SetLoopStart {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let old = song.loop_start();
        if self.beat == old {
            return Err(CommandError::NoOp("loop start unchanged"));
        }
        if let Some(beat) = self.beat.filter(|beat| *beat > song.length()) {
            return Err(CommandError::OutOfRange(format!(
                "loop start {} past song end {}",
                beat,
                song.length()
            )));
        }
        self.old = old;
        song.set_loop_start(self.beat);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        if self.old.is_some_and(|beat| beat > song.length()) {
            return Err(CommandError::OutOfRange("loop start past song end".into()));
        }
        song.set_loop_start(self.old);
        Ok(())
    }

    fn name(&self) -> &str {
        "Set loop start"
    }
}

/// Set or clear the loop end
pub struct SetLoopEnd {
    beat: Option<u32>,
    old: Option<u32>,
}

impl SetLoopEnd {
    pub fn new(beat: Option<u32>) -> Self {
        Self { beat, old: None }
    }
}

impl UndoableCommand for SetLoopEnd {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let old = song.loop_end();
        if self.beat == old {
            return Err(CommandError::NoOp("loop end unchanged"));
        }
        if let Some(beat) = self.beat.filter(|beat| *beat > song.length()) {
            return Err(CommandError::OutOfRange(format!(
                "loop end {} past song end {}",
                beat,
                song.length()
            )));
        }
        self.old = old;
        song.set_loop_end(self.beat);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        if self.old.is_some_and(|beat| beat > song.length()) {
            return Err(CommandError::OutOfRange("loop end past song end".into()));
        }
        song.set_loop_end(self.old);
        Ok(())
    }

    fn name(&self) -> &str {
        "Set loop end"
    }
}

/// Set the tempo from a beat on
pub struct AddTempoChange {
    beat: u32,
    bpm: f64,
    old: Option<f64>,
}

impl AddTempoChange {
    pub fn new(beat: u32, bpm: f64) -> Self {
        Self { beat, bpm, old: None }
    }
}

impl UndoableCommand for AddTempoChange {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        if self.beat >= song.length() {
            return Err(CommandError::OutOfRange(format!(
                "tempo change at beat {} past song end {}",
                self.beat,
                song.length()
            )));
        }
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(CommandError::Invalid(format!("tempo {} bpm", self.bpm)));
        }
        if song.tempo_at(self.beat) == Some(self.bpm) {
            return Err(CommandError::NoOp("tempo unchanged"));
        }
        self.old = song.add_tempo_change(self.beat, self.bpm);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        match self.old {
            Some(bpm) => {
                song.add_tempo_change(self.beat, bpm);
            }
            None => {
                song.remove_tempo_change(self.beat);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Set tempo change"
    }
}

pub struct RemoveTempoChange {
    beat: u32,
    old: f64,
}

impl RemoveTempoChange {
    pub fn new(beat: u32) -> Self {
        Self { beat, old: 0.0 }
    }
}

impl UndoableCommand for RemoveTempoChange {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        if self.beat == 0 {
            return Err(CommandError::Invalid(
                "the tempo at beat 0 cannot be removed".into(),
            ));
        }
        self.old = song
            .remove_tempo_change(self.beat)
            .ok_or(CommandError::NoOp("no tempo change at that beat"))?;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        song.add_tempo_change(self.beat, self.old);
        Ok(())
    }

    fn name(&self) -> &str {
        "Remove tempo change"
    }
}

/// Create a track
///
/// Undo keeps the track so that redo brings back the same id and contents.
pub struct AddTrack {
    name: String,
    id: Option<TrackId>,
    removed: Option<Track>,
}

impl AddTrack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            removed: None,
        }
    }

    /// Id of the created track, once executed
    pub fn track_id(&self) -> Option<TrackId> {
        self.id
    }
}

impl UndoableCommand for AddTrack {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let id = match self.removed.take() {
            Some(track) => song.insert_track(track),
            None => song.add_track(self.name.clone()),
        };
        self.id = Some(id);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let id = self.id.ok_or(CommandError::Invalid("track was never added".into()))?;
        let track = song.disown_track(id).ok_or(CommandError::UnknownTrack(id))?;
        self.removed = Some(track);
        Ok(())
    }

    fn name(&self) -> &str {
        "Add track"
    }

    fn retire(&mut self, song: &mut Song) {
        if let Some(track) = self.removed.take() {
            song.retire(Box::new(track));
        }
    }
}

pub struct RemoveTrack {
    id: TrackId,
    removed: Option<Track>,
}

impl RemoveTrack {
    pub fn new(id: TrackId) -> Self {
        Self { id, removed: None }
    }
}

impl UndoableCommand for RemoveTrack {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_ref(song, self.id)?;
        self.removed = song.disown_track(self.id);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = self
            .removed
            .take()
            .ok_or(CommandError::Invalid("track was never removed".into()))?;
        self.id = song.insert_track(track);
        Ok(())
    }

    fn name(&self) -> &str {
        "Remove track"
    }

    fn retire(&mut self, song: &mut Song) {
        if let Some(track) = self.removed.take() {
            song.retire(Box::new(track));
        }
    }
}
