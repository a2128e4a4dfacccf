// Track-level commands: track properties, patterns, sequence, controllers, keys

use crate::command::compound::CompoundCommand;
use crate::command::trait_def::{
    CommandError, CommandResult, UndoableCommand, pattern_ref, track_mut, track_ref,
};
use crate::sequencer::controller::{ControllerInfo, is_cc, is_pbend};
use crate::sequencer::pattern::{PatternId, PatternStore, check_geometry};
use crate::sequencer::song::Song;
use crate::sequencer::time::SongTime;
use crate::sequencer::track::{DisownedController, KeyInfo, SequenceEntry, TrackId, TrackMode};

fn controller_info(song: &Song, track: TrackId, number: u32) -> CommandResult<ControllerInfo> {
    track_ref(song, track)?
        .controller(number)
        .cloned()
        .ok_or(CommandError::UnknownController { track, number })
}

fn key_info(song: &Song, track: TrackId, key: u8) -> CommandResult<KeyInfo> {
    track_ref(song, track)?
        .find_key(key)
        .cloned()
        .ok_or(CommandError::UnknownKey { track, key })
}

fn sequence_entry(song: &Song, track: TrackId, time: SongTime) -> CommandResult<SequenceEntry> {
    track_ref(song, track)?
        .find_sequence_entry(time)
        .copied()
        .ok_or(CommandError::UnknownSequenceEntry { track, time })
}

// -------------------------------------------------------------------------
// Track properties
// -------------------------------------------------------------------------

pub struct SetTrackName {
    track: TrackId,
    name: String,
    old: String,
}

impl SetTrackName {
    pub fn new(track: TrackId, name: impl Into<String>) -> Self {
        Self {
            track,
            name: name.into(),
            old: String::new(),
        }
    }
}

impl UndoableCommand for SetTrackName {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        if track.name() == self.name {
            return Err(CommandError::NoOp("track name unchanged"));
        }
        self.old = track.name().to_string();
        track.set_name(self.name.clone());
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?.set_name(self.old.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "Set track name"
    }
}

pub struct SetTrackMode {
    track: TrackId,
    mode: TrackMode,
    old: TrackMode,
}

impl SetTrackMode {
    pub fn new(track: TrackId, mode: TrackMode) -> Self {
        Self {
            track,
            mode,
            old: TrackMode::Normal,
        }
    }
}

impl UndoableCommand for SetTrackMode {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        if track.mode() == self.mode {
            return Err(CommandError::NoOp("track mode unchanged"));
        }
        self.old = track.mode();
        track.set_mode(self.mode);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?.set_mode(self.old);
        Ok(())
    }

    fn name(&self) -> &str {
        "Set track mode"
    }
}

pub struct SetTrackMidiChannel {
    track: TrackId,
    channel: u8,
    old: u8,
}

impl SetTrackMidiChannel {
    pub fn new(track: TrackId, channel: u8) -> Self {
        Self {
            track,
            channel,
            old: 0,
        }
    }
}

impl UndoableCommand for SetTrackMidiChannel {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        if self.channel > 15 {
            return Err(CommandError::OutOfRange(format!("MIDI channel {}", self.channel)));
        }
        if track.channel() == self.channel {
            return Err(CommandError::NoOp("MIDI channel unchanged"));
        }
        self.old = track.channel();
        track.set_channel(self.channel);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?.set_channel(self.old);
        Ok(())
    }

    fn name(&self) -> &str {
        "Set track MIDI channel"
    }
}

// -------------------------------------------------------------------------
// Patterns
// -------------------------------------------------------------------------

/// Create an empty pattern
///
/// Undo keeps the pattern so that redo restores the same id.
pub struct AddPattern {
    track: TrackId,
    name: String,
    geometry: Option<(u32, u32, u32)>,
    id: Option<PatternId>,
    removed: Option<PatternStore>,
}

impl AddPattern {
    /// A pattern with the song's default geometry
    pub fn new(track: TrackId, name: impl Into<String>) -> Self {
        Self {
            track,
            name: name.into(),
            geometry: None,
            id: None,
            removed: None,
        }
    }

    pub fn with_geometry(
        track: TrackId,
        name: impl Into<String>,
        length: u32,
        steps: u32,
        cc_steps: u32,
    ) -> Self {
        Self {
            geometry: Some((length, steps, cc_steps)),
            ..Self::new(track, name)
        }
    }

    /// Id of the created pattern, once executed
    pub fn pattern_id(&self) -> Option<PatternId> {
        self.id
    }
}

impl UndoableCommand for AddPattern {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let (length, steps, cc_steps) = self.geometry.unwrap_or(song.default_pattern_geometry());
        let track = track_mut(song, self.track)?;
        if let Some(pattern) = self.removed.take() {
            self.id = Some(pattern.id());
            track.insert_pattern(pattern);
            return Ok(());
        }
        check_geometry(length, steps, cc_steps)?;
        self.id = Some(track.add_pattern(self.name.clone(), length, steps, cc_steps)?);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let id = self.id.ok_or(CommandError::Invalid("pattern was never added".into()))?;
        let pattern = track_mut(song, self.track)?
            .disown_pattern(id)
            .ok_or(CommandError::UnknownPattern {
                track: self.track,
                pattern: id,
            })?;
        self.removed = Some(pattern);
        Ok(())
    }

    fn name(&self) -> &str {
        "Add pattern"
    }

    fn retire(&mut self, song: &mut Song) {
        if let Some(pattern) = self.removed.take() {
            song.retire(Box::new(pattern));
        }
    }
}

/// Copy a pattern under a new id
pub struct DuplicatePattern {
    track: TrackId,
    source: PatternId,
    id: Option<PatternId>,
    removed: Option<PatternStore>,
}

impl DuplicatePattern {
    pub fn new(track: TrackId, source: PatternId) -> Self {
        Self {
            track,
            source,
            id: None,
            removed: None,
        }
    }

    pub fn pattern_id(&self) -> Option<PatternId> {
        self.id
    }
}

impl UndoableCommand for DuplicatePattern {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        if let Some(pattern) = self.removed.take() {
            self.id = Some(pattern.id());
            track.insert_pattern(pattern);
            return Ok(());
        }
        let id = track
            .duplicate_pattern(self.source)
            .ok_or(CommandError::UnknownPattern {
                track: self.track,
                pattern: self.source,
            })??;
        self.id = Some(id);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let id = self.id.ok_or(CommandError::Invalid("pattern was never duplicated".into()))?;
        let pattern = track_mut(song, self.track)?
            .disown_pattern(id)
            .ok_or(CommandError::UnknownPattern {
                track: self.track,
                pattern: id,
            })?;
        self.removed = Some(pattern);
        Ok(())
    }

    fn name(&self) -> &str {
        "Duplicate pattern"
    }

    fn retire(&mut self, song: &mut Song) {
        if let Some(pattern) = self.removed.take() {
            song.retire(Box::new(pattern));
        }
    }
}

/// Remove a pattern and every sequence entry that plays it
pub struct RemovePattern {
    track: TrackId,
    pattern: PatternId,
    inner: CompoundCommand,
}

impl RemovePattern {
    pub fn new(track: TrackId, pattern: PatternId) -> Self {
        Self {
            track,
            pattern,
            inner: CompoundCommand::new("Remove pattern"),
        }
    }
}

impl UndoableCommand for RemovePattern {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        pattern_ref(song, self.track, self.pattern)?;
        self.inner.clear(song);

        let starts: Vec<SongTime> = track_ref(song, self.track)?
            .sequence()
            .filter(|e| e.pattern_id == self.pattern)
            .map(|e| e.start)
            .collect();
        for start in starts {
            self.inner.append(RemoveSequenceEntry::new(self.track, start));
        }
        self.inner.append(DisownPattern::new(self.track, self.pattern));

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

/// Take a pattern that is no longer in the sequence out of its track
pub struct DisownPattern {
    track: TrackId,
    pattern: PatternId,
    removed: Option<PatternStore>,
}

impl DisownPattern {
    pub fn new(track: TrackId, pattern: PatternId) -> Self {
        Self {
            track,
            pattern,
            removed: None,
        }
    }
}

impl UndoableCommand for DisownPattern {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        if track.sequence().any(|e| e.pattern_id == self.pattern) {
            return Err(CommandError::Invalid(format!(
                "pattern {} is still in the sequence",
                self.pattern
            )));
        }
        let pattern = track
            .disown_pattern(self.pattern)
            .ok_or(CommandError::UnknownPattern {
                track: self.track,
                pattern: self.pattern,
            })?;
        self.removed = Some(pattern);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        let pattern = self
            .removed
            .take()
            .ok_or(CommandError::Invalid("pattern was never removed".into()))?;
        track.insert_pattern(pattern);
        Ok(())
    }

    fn name(&self) -> &str {
        "Remove pattern"
    }

    fn retire(&mut self, song: &mut Song) {
        if let Some(pattern) = self.removed.take() {
            song.retire(Box::new(pattern));
        }
    }
}

// -------------------------------------------------------------------------
// Sequence
// -------------------------------------------------------------------------

/// Place a pattern in the song
///
/// The entry must fit in the song, must not be longer than the pattern and
/// must not overlap another entry of the track.
pub struct AddSequenceEntry {
    track: TrackId,
    start: SongTime,
    pattern: PatternId,
    length: SongTime,
}

impl AddSequenceEntry {
    pub fn new(track: TrackId, start: SongTime, pattern: PatternId, length: SongTime) -> Self {
        Self {
            track,
            start,
            pattern,
            length,
        }
    }
}

impl UndoableCommand for AddSequenceEntry {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let end = song.end();
        if self.start >= end || self.start + self.length > end {
            return Err(CommandError::OutOfRange(format!(
                "sequence entry {}+{} past song end {}",
                self.start, self.length, end
            )));
        }
        if self.length.is_zero() {
            return Err(CommandError::Invalid("sequence entry length must be positive".into()));
        }
        let pattern_length = SongTime::from_beats(pattern_ref(song, self.track, self.pattern)?.length());
        if self.length > pattern_length {
            return Err(CommandError::OutOfRange(format!(
                "sequence entry length {} longer than the pattern ({})",
                self.length, pattern_length
            )));
        }
        let track = track_mut(song, self.track)?;
        if track.overlaps_sequence(self.start, self.length) {
            return Err(CommandError::Invalid(format!(
                "sequence entry at {} overlaps another entry",
                self.start
            )));
        }
        track.set_sequence_entry(self.start, self.pattern, self.length);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?.remove_sequence_entry(self.start);
        Ok(())
    }

    fn name(&self) -> &str {
        "Add sequence entry"
    }
}

/// Remove the sequence entry playing at a time
pub struct RemoveSequenceEntry {
    track: TrackId,
    time: SongTime,
    removed: Option<SequenceEntry>,
}

impl RemoveSequenceEntry {
    pub fn new(track: TrackId, time: SongTime) -> Self {
        Self {
            track,
            time,
            removed: None,
        }
    }
}

impl UndoableCommand for RemoveSequenceEntry {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let entry = sequence_entry(song, self.track, self.time)?;
        track_mut(song, self.track)?.remove_sequence_entry(entry.start);
        self.removed = Some(entry);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let entry = self
            .removed
            .ok_or(CommandError::Invalid("sequence entry was never removed".into()))?;
        if !track_mut(song, self.track)?.set_sequence_entry(entry.start, entry.pattern_id, entry.length) {
            return Err(CommandError::UnknownPattern {
                track: self.track,
                pattern: entry.pattern_id,
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Remove sequence entry"
    }
}

/// Change the length of the sequence entry playing at a time
pub struct SetSequenceEntryLength {
    track: TrackId,
    time: SongTime,
    length: SongTime,
    start: SongTime,
    old: SongTime,
}

impl SetSequenceEntryLength {
    pub fn new(track: TrackId, time: SongTime, length: SongTime) -> Self {
        Self {
            track,
            time,
            length,
            start: time,
            old: SongTime::zero(),
        }
    }
}

impl UndoableCommand for SetSequenceEntryLength {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let entry = sequence_entry(song, self.track, self.time)?;
        if self.length == entry.length {
            return Err(CommandError::NoOp("sequence entry length unchanged"));
        }
        if self.length.is_zero() {
            return Err(CommandError::Invalid("sequence entry length must be positive".into()));
        }
        if entry.start + self.length > song.end() {
            return Err(CommandError::OutOfRange(format!(
                "sequence entry {}+{} past song end {}",
                entry.start,
                self.length,
                song.end()
            )));
        }
        let pattern_length = SongTime::from_beats(pattern_ref(song, self.track, entry.pattern_id)?.length());
        if self.length > pattern_length {
            return Err(CommandError::OutOfRange(format!(
                "sequence entry length {} longer than the pattern ({})",
                self.length, pattern_length
            )));
        }
        let track = track_mut(song, self.track)?;
        if track
            .sequence()
            .any(|e| e.start != entry.start && e.overlaps(entry.start, self.length))
        {
            return Err(CommandError::Invalid(format!(
                "sequence entry at {} would overlap the next entry",
                entry.start
            )));
        }
        track.set_sequence_entry_length(entry.start, self.length);
        self.start = entry.start;
        self.old = entry.length;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?
            .set_sequence_entry_length(self.start, self.old)
            .ok_or(CommandError::UnknownSequenceEntry {
                track: self.track,
                time: self.start,
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Set sequence entry length"
    }
}

// -------------------------------------------------------------------------
// Controllers
// -------------------------------------------------------------------------

pub struct AddController {
    track: TrackId,
    info: ControllerInfo,
}

impl AddController {
    pub fn new(track: TrackId, info: ControllerInfo) -> Self {
        Self { track, info }
    }
}

impl UndoableCommand for AddController {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        if !self.info.is_valid() {
            return Err(CommandError::OutOfRange(format!(
                "controller {} with range {}..={} and default {}",
                self.info.number, self.info.min, self.info.max, self.info.default
            )));
        }
        if track.controller(self.info.number).is_some() {
            return Err(CommandError::Invalid(format!(
                "controller {} already exists",
                self.info.number
            )));
        }
        track.add_controller(self.info.clone());
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?
            .disown_controller(self.info.number)
            .ok_or(CommandError::UnknownController {
                track: self.track,
                number: self.info.number,
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Add controller"
    }
}

/// Remove a controller together with its curves; undo brings both back
pub struct RemoveController {
    track: TrackId,
    number: u32,
    removed: Option<DisownedController>,
}

impl RemoveController {
    pub fn new(track: TrackId, number: u32) -> Self {
        Self {
            track,
            number,
            removed: None,
        }
    }
}

impl UndoableCommand for RemoveController {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let disowned = track_mut(song, self.track)?
            .disown_controller(self.number)
            .ok_or(CommandError::UnknownController {
                track: self.track,
                number: self.number,
            })?;
        self.removed = Some(disowned);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        let disowned = self
            .removed
            .take()
            .ok_or(CommandError::Invalid("controller was never removed".into()))?;
        if !track.restore_controller(disowned) {
            return Err(CommandError::Invalid(format!(
                "controller {} could not be restored",
                self.number
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Remove controller"
    }
}

pub struct SetControllerName {
    track: TrackId,
    number: u32,
    name: String,
    old: String,
}

impl SetControllerName {
    pub fn new(track: TrackId, number: u32, name: impl Into<String>) -> Self {
        Self {
            track,
            number,
            name: name.into(),
            old: String::new(),
        }
    }
}

impl UndoableCommand for SetControllerName {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let info = controller_info(song, self.track, self.number)?;
        if info.name == self.name {
            return Err(CommandError::NoOp("controller name unchanged"));
        }
        track_mut(song, self.track)?.set_controller_name(self.number, self.name.clone());
        self.old = info.name;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?
            .set_controller_name(self.number, self.old.clone())
            .ok_or(CommandError::UnknownController {
                track: self.track,
                number: self.number,
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Set controller name"
    }
}

pub struct SetControllerMin {
    track: TrackId,
    number: u32,
    min: i32,
    old: i32,
}

impl SetControllerMin {
    pub fn new(track: TrackId, number: u32, min: i32) -> Self {
        Self {
            track,
            number,
            min,
            old: 0,
        }
    }
}

impl UndoableCommand for SetControllerMin {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let info = controller_info(song, self.track, self.number)?;
        if info.min == self.min {
            return Err(CommandError::NoOp("controller minimum unchanged"));
        }
        if self.min > info.max {
            return Err(CommandError::OutOfRange(format!(
                "minimum {} above maximum {}",
                self.min, info.max
            )));
        }
        track_mut(song, self.track)?.set_controller_min(self.number, self.min);
        self.old = info.min;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?
            .set_controller_min(self.number, self.old)
            .ok_or(CommandError::UnknownController {
                track: self.track,
                number: self.number,
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Set controller minimum"
    }
}

pub struct SetControllerMax {
    track: TrackId,
    number: u32,
    max: i32,
    old: i32,
}

impl SetControllerMax {
    pub fn new(track: TrackId, number: u32, max: i32) -> Self {
        Self {
            track,
            number,
            max,
            old: 0,
        }
    }
}

impl UndoableCommand for SetControllerMax {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let info = controller_info(song, self.track, self.number)?;
        if info.max == self.max {
            return Err(CommandError::NoOp("controller maximum unchanged"));
        }
        if self.max < info.min {
            return Err(CommandError::OutOfRange(format!(
                "maximum {} below minimum {}",
                self.max, info.min
            )));
        }
        track_mut(song, self.track)?.set_controller_max(self.number, self.max);
        self.old = info.max;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?
            .set_controller_max(self.number, self.old)
            .ok_or(CommandError::UnknownController {
                track: self.track,
                number: self.number,
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Set controller maximum"
    }
}

pub struct SetControllerDefault {
    track: TrackId,
    number: u32,
    default: i32,
    old: i32,
}

impl SetControllerDefault {
    pub fn new(track: TrackId, number: u32, default: i32) -> Self {
        Self {
            track,
            number,
            default,
            old: 0,
        }
    }
}

impl UndoableCommand for SetControllerDefault {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let info = controller_info(song, self.track, self.number)?;
        if info.default == self.default {
            return Err(CommandError::NoOp("controller default unchanged"));
        }
        if !info.accepts(self.default) {
            return Err(CommandError::OutOfRange(format!(
                "default {} outside {}..={}",
                self.default, info.min, info.max
            )));
        }
        track_mut(song, self.track)?.set_controller_default(self.number, self.default);
        self.old = info.default;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?
            .set_controller_default(self.number, self.old)
            .ok_or(CommandError::UnknownController {
                track: self.track,
                number: self.number,
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Set controller default"
    }
}

/// Move a controller and its curves to another controller number
pub struct SetControllerNumber {
    track: TrackId,
    number: u32,
    new_number: u32,
}

impl SetControllerNumber {
    pub fn new(track: TrackId, number: u32, new_number: u32) -> Self {
        Self {
            track,
            number,
            new_number,
        }
    }
}

impl UndoableCommand for SetControllerNumber {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        controller_info(song, self.track, self.number)?;
        if self.number == self.new_number {
            return Err(CommandError::NoOp("controller number unchanged"));
        }
        if !(is_cc(self.new_number) || is_pbend(self.new_number)) {
            return Err(CommandError::OutOfRange(format!(
                "controller number {}",
                self.new_number
            )));
        }
        let track = track_mut(song, self.track)?;
        if track.controller(self.new_number).is_some() {
            return Err(CommandError::Invalid(format!(
                "controller {} already exists",
                self.new_number
            )));
        }
        track.set_controller_number(self.number, self.new_number);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        if !track_mut(song, self.track)?.set_controller_number(self.new_number, self.number) {
            return Err(CommandError::UnknownController {
                track: self.track,
                number: self.new_number,
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Set controller number"
    }
}

/// Switch a controller between per-pattern curves and one track curve
///
/// The existing curve data is kept by the command and restored on undo.
pub struct SetControllerGlobal {
    track: TrackId,
    number: u32,
    global: bool,
    removed: Option<DisownedController>,
}

impl SetControllerGlobal {
    pub fn new(track: TrackId, number: u32, global: bool) -> Self {
        Self {
            track,
            number,
            global,
            removed: None,
        }
    }
}

impl UndoableCommand for SetControllerGlobal {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let info = controller_info(song, self.track, self.number)?;
        if info.global == self.global {
            return Err(CommandError::NoOp("controller scope unchanged"));
        }
        let track = track_mut(song, self.track)?;
        let disowned = track
            .disown_controller(self.number)
            .ok_or(CommandError::UnknownController {
                track: self.track,
                number: self.number,
            })?;
        let mut info = disowned.info.clone();
        info.global = self.global;
        track.add_controller(info);
        self.removed = Some(disowned);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        let disowned = self
            .removed
            .take()
            .ok_or(CommandError::Invalid("controller scope was never changed".into()))?;
        track.disown_controller(self.number);
        if !track.restore_controller(disowned) {
            return Err(CommandError::Invalid(format!(
                "controller {} could not be restored",
                self.number
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Set controller global"
    }
}

/// Set a point on the track curve of a global controller
pub struct AddTrackCurvePoint {
    track: TrackId,
    number: u32,
    step: u32,
    value: i32,
    old: Option<i32>,
}

impl AddTrackCurvePoint {
    pub fn new(track: TrackId, number: u32, step: u32, value: i32) -> Self {
        Self {
            track,
            number,
            step,
            value,
            old: None,
        }
    }
}

impl UndoableCommand for AddTrackCurvePoint {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let info = controller_info(song, self.track, self.number)?;
        if !info.global {
            return Err(CommandError::Invalid(format!(
                "controller {} has per-pattern curves",
                self.number
            )));
        }
        if !info.accepts(self.value) {
            return Err(CommandError::OutOfRange(format!(
                "value {} outside {}..={}",
                self.value, info.min, info.max
            )));
        }
        if self.step > song.length() {
            return Err(CommandError::OutOfRange(format!(
                "curve step {} past song end {}",
                self.step,
                song.length()
            )));
        }
        let track = track_mut(song, self.track)?;
        let old = track
            .set_curve_point(self.number, self.step, self.value)
            .ok_or(CommandError::UnknownController {
                track: self.track,
                number: self.number,
            })?;
        self.old = old;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        match self.old {
            Some(value) => {
                track.set_curve_point(self.number, self.step, value);
            }
            None => {
                track.remove_curve_point(self.number, self.step);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Add track curve point"
    }
}

// -------------------------------------------------------------------------
// Named keys
// -------------------------------------------------------------------------

pub struct AddKey {
    track: TrackId,
    number: u8,
    name: String,
}

impl AddKey {
    pub fn new(track: TrackId, number: u8, name: impl Into<String>) -> Self {
        Self {
            track,
            number,
            name: name.into(),
        }
    }
}

impl UndoableCommand for AddKey {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        if self.number > 127 {
            return Err(CommandError::OutOfRange(format!("key {}", self.number)));
        }
        if !track.add_key(self.number, self.name.clone()) {
            return Err(CommandError::Invalid(format!("key {} already named", self.number)));
        }
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?
            .remove_key(self.number)
            .ok_or(CommandError::UnknownKey {
                track: self.track,
                key: self.number,
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Add key"
    }
}

pub struct RemoveKey {
    track: TrackId,
    number: u8,
    removed: Option<KeyInfo>,
}

impl RemoveKey {
    pub fn new(track: TrackId, number: u8) -> Self {
        Self {
            track,
            number,
            removed: None,
        }
    }
}

impl UndoableCommand for RemoveKey {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let key = track_mut(song, self.track)?
            .remove_key(self.number)
            .ok_or(CommandError::UnknownKey {
                track: self.track,
                key: self.number,
            })?;
        self.removed = Some(key);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let track = track_mut(song, self.track)?;
        let key = self
            .removed
            .take()
            .ok_or(CommandError::Invalid("key was never removed".into()))?;
        track.add_key(key.number, key.name);
        Ok(())
    }

    fn name(&self) -> &str {
        "Remove key"
    }
}

pub struct SetKeyName {
    track: TrackId,
    number: u8,
    name: String,
    old: String,
}

impl SetKeyName {
    pub fn new(track: TrackId, number: u8, name: impl Into<String>) -> Self {
        Self {
            track,
            number,
            name: name.into(),
            old: String::new(),
        }
    }
}

impl UndoableCommand for SetKeyName {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let key = key_info(song, self.track, self.number)?;
        if key.name == self.name {
            return Err(CommandError::NoOp("key name unchanged"));
        }
        track_mut(song, self.track)?.set_key_name(self.number, self.name.clone());
        self.old = key.name;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        track_mut(song, self.track)?
            .set_key_name(self.number, self.old.clone())
            .ok_or(CommandError::UnknownKey {
                track: self.track,
                key: self.number,
            })?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Set key name"
    }
}

pub struct SetKeyNumber {
    track: TrackId,
    number: u8,
    new_number: u8,
}

impl SetKeyNumber {
    pub fn new(track: TrackId, number: u8, new_number: u8) -> Self {
        Self {
            track,
            number,
            new_number,
        }
    }
}

impl UndoableCommand for SetKeyNumber {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        key_info(song, self.track, self.number)?;
        if self.number == self.new_number {
            return Err(CommandError::NoOp("key number unchanged"));
        }
        if self.new_number > 127 {
            return Err(CommandError::OutOfRange(format!("key {}", self.new_number)));
        }
        if !track_mut(song, self.track)?.set_key_number(self.number, self.new_number) {
            return Err(CommandError::Invalid(format!(
                "key {} already named",
                self.new_number
            )));
        }
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        if !track_mut(song, self.track)?.set_key_number(self.new_number, self.number) {
            return Err(CommandError::UnknownKey {
                track: self.track,
                key: self.new_number,
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Set key number"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::controller::PITCH_BEND;

    fn song_with_pattern() -> (Song, TrackId, PatternId) {
        let mut song = Song::new();
        let track = song.add_track("Keys");
        let pattern = song.track_mut(track).unwrap().add_pattern("A", 4, 4, 4).unwrap();
        (song, track, pattern)
    }

    #[test]
    fn test_track_properties() {
        let (mut song, track, _) = song_with_pattern();

        let mut name = SetTrackName::new(track, "Piano");
        name.do_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().name(), "Piano");
        name.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().name(), "Keys");

        let mut mode = SetTrackMode::new(track, TrackMode::Drum);
        mode.do_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().mode(), TrackMode::Drum);
        mode.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().mode(), TrackMode::Normal);

        assert!(matches!(
            SetTrackMidiChannel::new(track, 16).do_command(&mut song),
            Err(CommandError::OutOfRange(_))
        ));
        let mut channel = SetTrackMidiChannel::new(track, 9);
        channel.do_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().channel(), 9);
        channel.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().channel(), 0);
    }

    #[test]
    fn test_add_pattern_redo_keeps_id() {
        let (mut song, track, _) = song_with_pattern();
        let mut add = AddPattern::with_geometry(track, "B", 8, 4, 8);
        add.do_command(&mut song).unwrap();
        let id = add.pattern_id().unwrap();
        assert_eq!(song.pattern(track, id).unwrap().length(), 8);

        add.undo_command(&mut song).unwrap();
        assert!(song.pattern(track, id).is_none());
        add.do_command(&mut song).unwrap();
        assert_eq!(add.pattern_id(), Some(id));
        assert_eq!(song.pattern(track, id).unwrap().name(), "B");
    }

    #[test]
    fn test_add_pattern_uses_song_defaults() {
        let (mut song, track, _) = song_with_pattern();
        let mut add = AddPattern::new(track, "Default");
        add.do_command(&mut song).unwrap();
        let pattern = song.pattern(track, add.pattern_id().unwrap()).unwrap();
        let (length, steps, cc_steps) = song.default_pattern_geometry();
        assert_eq!(
            (pattern.length(), pattern.steps(), pattern.cc_steps()),
            (length, steps, cc_steps)
        );
    }

    #[test]
    fn test_duplicate_pattern_copies_notes() {
        let (mut song, track, pattern) = song_with_pattern();
        song.pattern_mut(track, pattern).unwrap().add_note(2, 60, 100, 3).unwrap();

        let mut duplicate = DuplicatePattern::new(track, pattern);
        duplicate.do_command(&mut song).unwrap();
        let copy = duplicate.pattern_id().unwrap();
        assert_ne!(copy, pattern);
        assert_eq!(song.pattern(track, copy).unwrap().notes().len(), 1);

        duplicate.undo_command(&mut song).unwrap();
        assert!(song.pattern(track, copy).is_none());

        assert_eq!(
            DuplicatePattern::new(track, 77).do_command(&mut song),
            Err(CommandError::UnknownPattern { track, pattern: 77 })
        );
    }

    #[test]
    fn test_remove_pattern_removes_its_entries() {
        let (mut song, track, pattern) = song_with_pattern();
        for start in [0, 4, 12] {
            AddSequenceEntry::new(track, SongTime::from_beats(start), pattern, SongTime::from_beats(4))
                .do_command(&mut song)
                .unwrap();
        }

        let mut remove = RemovePattern::new(track, pattern);
        remove.do_command(&mut song).unwrap();
        assert!(song.pattern(track, pattern).is_none());
        assert_eq!(song.track(track).unwrap().sequence().count(), 0);

        remove.undo_command(&mut song).unwrap();
        assert!(song.pattern(track, pattern).is_some());
        assert_eq!(song.track(track).unwrap().sequence().count(), 3);
    }

    #[test]
    fn test_disown_pattern_refuses_sequenced_pattern() {
        let (mut song, track, pattern) = song_with_pattern();
        AddSequenceEntry::new(track, SongTime::zero(), pattern, SongTime::from_beats(2))
            .do_command(&mut song)
            .unwrap();
        assert!(matches!(
            DisownPattern::new(track, pattern).do_command(&mut song),
            Err(CommandError::Invalid(_))
        ));
    }

    #[test]
    fn test_sequence_entry_preconditions() {
        let (mut song, track, pattern) = song_with_pattern();
        let beats = SongTime::from_beats;

        let mut add = AddSequenceEntry::new(track, beats(4), pattern, beats(4));
        add.do_command(&mut song).unwrap();

        // Overlap
        assert!(matches!(
            AddSequenceEntry::new(track, beats(6), pattern, beats(2)).do_command(&mut song),
            Err(CommandError::Invalid(_))
        ));
        // Longer than the pattern
        assert!(matches!(
            AddSequenceEntry::new(track, beats(10), pattern, beats(5)).do_command(&mut song),
            Err(CommandError::OutOfRange(_))
        ));
        // Past the song end
        let end = song.length();
        assert!(matches!(
            AddSequenceEntry::new(track, beats(end - 1), pattern, beats(2)).do_command(&mut song),
            Err(CommandError::OutOfRange(_))
        ));
        assert_eq!(
            AddSequenceEntry::new(track, beats(20), 42, beats(2)).do_command(&mut song),
            Err(CommandError::UnknownPattern { track, pattern: 42 })
        );

        add.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().sequence().count(), 0);
    }

    #[test]
    fn test_sequence_entry_remove_and_resize() {
        let (mut song, track, pattern) = song_with_pattern();
        let beats = SongTime::from_beats;
        AddSequenceEntry::new(track, beats(0), pattern, beats(4))
            .do_command(&mut song)
            .unwrap();
        AddSequenceEntry::new(track, beats(4), pattern, beats(2))
            .do_command(&mut song)
            .unwrap();

        // Any time inside the entry finds it
        let mut resize = SetSequenceEntryLength::new(track, SongTime::new(4, 240), beats(3));
        resize.do_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().find_sequence_entry(beats(6)).unwrap().start, beats(4));
        resize.undo_command(&mut song).unwrap();
        assert!(song.track(track).unwrap().find_sequence_entry(beats(6)).is_none());

        assert!(matches!(
            SetSequenceEntryLength::new(track, beats(0), beats(4)).do_command(&mut song),
            Err(CommandError::NoOp(_))
        ));

        // Growing into the next entry is refused
        AddSequenceEntry::new(track, beats(7), pattern, beats(2))
            .do_command(&mut song)
            .unwrap();
        assert!(matches!(
            SetSequenceEntryLength::new(track, beats(4), beats(4)).do_command(&mut song),
            Err(CommandError::Invalid(_))
        ));

        let mut remove = RemoveSequenceEntry::new(track, SongTime::new(1, 100));
        remove.do_command(&mut song).unwrap();
        assert!(song.track(track).unwrap().find_sequence_entry(beats(0)).is_none());
        remove.undo_command(&mut song).unwrap();
        assert!(song.track(track).unwrap().find_sequence_entry(beats(0)).is_some());

        assert_eq!(
            RemoveSequenceEntry::new(track, beats(30)).do_command(&mut song),
            Err(CommandError::UnknownSequenceEntry {
                track,
                time: beats(30)
            })
        );
    }

    #[test]
    fn test_add_controller_gives_patterns_curves() {
        let (mut song, track, pattern) = song_with_pattern();
        let mut add = AddController::new(track, ControllerInfo::cc(7, "Volume"));
        add.do_command(&mut song).unwrap();
        assert!(song.pattern(track, pattern).unwrap().has_curve(7));

        assert!(matches!(
            AddController::new(track, ControllerInfo::cc(7, "Again")).do_command(&mut song),
            Err(CommandError::Invalid(_))
        ));
        assert!(matches!(
            AddController::new(track, ControllerInfo::new(300, "Bad", 0, 0, 127, false))
                .do_command(&mut song),
            Err(CommandError::OutOfRange(_))
        ));

        add.undo_command(&mut song).unwrap();
        assert!(song.track(track).unwrap().controller(7).is_none());
        assert!(!song.pattern(track, pattern).unwrap().has_curve(7));
    }

    #[test]
    fn test_remove_controller_succeeds_and_undo_restores_curves() {
        let (mut song, track, pattern) = song_with_pattern();
        AddController::new(track, ControllerInfo::cc(1, "Mod"))
            .do_command(&mut song)
            .unwrap();
        song.pattern_mut(track, pattern)
            .unwrap()
            .add_curve_point(1, 4, 64)
            .unwrap();

        let mut remove = RemoveController::new(track, 1);
        assert_eq!(remove.do_command(&mut song), Ok(()));
        assert!(song.track(track).unwrap().controller(1).is_none());

        remove.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().controller(1).unwrap().name, "Mod");
        assert_eq!(song.pattern(track, pattern).unwrap().curve_point(1, 4), Some(64));

        assert_eq!(
            RemoveController::new(track, 2).do_command(&mut song),
            Err(CommandError::UnknownController { track, number: 2 })
        );
    }

    #[test]
    fn test_controller_setters() {
        let (mut song, track, _) = song_with_pattern();
        AddController::new(track, ControllerInfo::cc(10, "Pan"))
            .do_command(&mut song)
            .unwrap();

        let mut name = SetControllerName::new(track, 10, "Balance");
        name.do_command(&mut song).unwrap();
        name.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().controller(10).unwrap().name, "Pan");

        let mut min = SetControllerMin::new(track, 10, 20);
        min.do_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().controller(10).unwrap().min, 20);
        min.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().controller(10).unwrap().min, 0);

        assert!(SetControllerMax::new(track, 10, -1).do_command(&mut song).is_err());
        let mut max = SetControllerMax::new(track, 10, 100);
        max.do_command(&mut song).unwrap();
        max.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().controller(10).unwrap().max, 127);

        assert!(SetControllerDefault::new(track, 10, 200).do_command(&mut song).is_err());
        let mut default = SetControllerDefault::new(track, 10, 64);
        default.do_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().controller(10).unwrap().default, 64);
        default.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().controller(10).unwrap().default, 0);

        assert_eq!(
            SetControllerName::new(track, 11, "X").do_command(&mut song),
            Err(CommandError::UnknownController { track, number: 11 })
        );
    }

    #[test]
    fn test_controller_number_moves_curves() {
        let (mut song, track, pattern) = song_with_pattern();
        AddController::new(track, ControllerInfo::cc(1, "Mod"))
            .do_command(&mut song)
            .unwrap();
        song.pattern_mut(track, pattern)
            .unwrap()
            .add_curve_point(1, 0, 10)
            .unwrap();

        let mut renumber = SetControllerNumber::new(track, 1, PITCH_BEND);
        renumber.do_command(&mut song).unwrap();
        assert_eq!(song.pattern(track, pattern).unwrap().curve_point(PITCH_BEND, 0), Some(10));
        renumber.undo_command(&mut song).unwrap();
        assert_eq!(song.pattern(track, pattern).unwrap().curve_point(1, 0), Some(10));

        assert!(matches!(
            SetControllerNumber::new(track, 1, 500).do_command(&mut song),
            Err(CommandError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_controller_global_round_trip() {
        let (mut song, track, pattern) = song_with_pattern();
        AddController::new(track, ControllerInfo::cc(74, "Cutoff"))
            .do_command(&mut song)
            .unwrap();
        song.pattern_mut(track, pattern)
            .unwrap()
            .add_curve_point(74, 2, 90)
            .unwrap();

        let mut global = SetControllerGlobal::new(track, 74, true);
        global.do_command(&mut song).unwrap();
        assert!(song.track(track).unwrap().curve(74).is_some());
        assert!(!song.pattern(track, pattern).unwrap().has_curve(74));

        let mut point = AddTrackCurvePoint::new(track, 74, 8, 100);
        point.do_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().curve(74).unwrap().point(8), Some(100));
        point.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().curve(74).unwrap().point(8), None);

        global.undo_command(&mut song).unwrap();
        assert!(song.track(track).unwrap().curve(74).is_none());
        assert_eq!(song.pattern(track, pattern).unwrap().curve_point(74, 2), Some(90));
    }

    #[test]
    fn test_track_curve_point_preconditions() {
        let (mut song, track, _) = song_with_pattern();
        AddController::new(track, ControllerInfo::new(7, "Volume", 100, 0, 127, true))
            .do_command(&mut song)
            .unwrap();
        let beyond = song.length() + 1;
        assert!(matches!(
            AddTrackCurvePoint::new(track, 7, beyond, 10).do_command(&mut song),
            Err(CommandError::OutOfRange(_))
        ));
        assert!(matches!(
            AddTrackCurvePoint::new(track, 7, 0, 128).do_command(&mut song),
            Err(CommandError::OutOfRange(_))
        ));

        AddController::new(track, ControllerInfo::cc(8, "Local"))
            .do_command(&mut song)
            .unwrap();
        assert!(matches!(
            AddTrackCurvePoint::new(track, 8, 0, 10).do_command(&mut song),
            Err(CommandError::Invalid(_))
        ));
    }

    #[test]
    fn test_named_keys() {
        let (mut song, track, _) = song_with_pattern();
        let mut add = AddKey::new(track, 36, "Kick");
        add.do_command(&mut song).unwrap();
        assert!(AddKey::new(track, 36, "Again").do_command(&mut song).is_err());
        assert!(AddKey::new(track, 200, "Bad").do_command(&mut song).is_err());

        let mut name = SetKeyName::new(track, 36, "Bass drum");
        name.do_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().find_key(36).unwrap().name, "Bass drum");
        name.undo_command(&mut song).unwrap();

        let mut number = SetKeyNumber::new(track, 36, 35);
        number.do_command(&mut song).unwrap();
        assert!(song.track(track).unwrap().find_key(36).is_none());
        number.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().find_key(36).unwrap().name, "Kick");

        let mut remove = RemoveKey::new(track, 36);
        remove.do_command(&mut song).unwrap();
        assert!(song.track(track).unwrap().keys().is_empty());
        remove.undo_command(&mut song).unwrap();
        assert_eq!(song.track(track).unwrap().keys().len(), 1);

        add.undo_command(&mut song).unwrap();
        assert_eq!(
            RemoveKey::new(track, 36).do_command(&mut song),
            Err(CommandError::UnknownKey { track, key: 36 })
        );
    }
}
