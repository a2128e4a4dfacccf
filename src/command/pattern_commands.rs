// Pattern-level commands: geometry, notes, control changes, curve points

use crate::command::compound::CompoundCommand;
use crate::command::trait_def::{
    CommandError, CommandResult, UndoableCommand, pattern_mut, pattern_ref, track_ref,
};
use crate::sequencer::controller::{CC_COUNT, ControllerInfo};
use crate::sequencer::curve::CurveData;
use crate::sequencer::note::{Note, NoteCollection};
use crate::sequencer::pattern::{PatternId, PatternStore, check_geometry};
use crate::sequencer::song::Song;
use crate::sequencer::track::TrackId;

/// Saved CC lanes and curves of a pattern
#[derive(Debug, Clone, Default)]
struct ControllerData {
    cc_steps: u32,
    cc: Vec<(u32, Vec<(u32, u8)>)>,
    curves: Vec<(u32, CurveData)>,
}

impl ControllerData {
    fn save(pattern: &PatternStore) -> Self {
        let cc = (0..CC_COUNT as u32)
            .map(|number| (number, pattern.cc_points(number)))
            .filter(|(_, points)| !points.is_empty())
            .collect();
        let curves = pattern
            .curve_numbers()
            .into_iter()
            .filter_map(|number| Some((number, pattern.curve_data(number)?)))
            .collect();
        Self {
            cc_steps: pattern.cc_steps(),
            cc,
            curves,
        }
    }

    /// Put back every saved value the pattern lost
    fn restore(&self, pattern: &mut PatternStore) -> CommandResult<()> {
        if pattern.cc_steps() == self.cc_steps {
            for (number, points) in &self.cc {
                for &(step, value) in points {
                    if pattern.cc_value(*number, step) != Some(value) {
                        pattern.add_cc(*number, step, value)?;
                    }
                }
            }
        }
        for (number, data) in &self.curves {
            let Some(current) = pattern.curve_data(*number) else {
                continue;
            };
            for (step, _) in current.iter().filter(|p| !data.contains(p)) {
                pattern.remove_curve_point(*number, *step)?;
            }
            for &(step, value) in data {
                if pattern.curve_point(*number, step) != Some(value) {
                    pattern.add_curve_point(*number, step, value)?;
                }
            }
        }
        Ok(())
    }
}

/// Bring the notes selected by `filter` back to `before`
fn restore_notes(
    pattern: &mut PatternStore,
    before: &[Note],
    filter: impl Fn(&Note) -> bool,
) -> CommandResult<()> {
    let after: Vec<Note> = pattern.notes().into_iter().filter(|n| filter(n)).collect();
    for note in after.iter().filter(|n| !before.contains(n)) {
        pattern.delete_note(note.step, note.key);
    }
    for note in before.iter().filter(|n| !after.contains(n)) {
        pattern.add_note(note.step, note.key, note.velocity, note.length)?;
    }
    Ok(())
}

fn pattern_controller(song: &Song, track: TrackId, number: u32) -> CommandResult<ControllerInfo> {
    track_ref(song, track)?
        .controller(number)
        .cloned()
        .ok_or(CommandError::UnknownController { track, number })
}

// -------------------------------------------------------------------------
// Pattern properties and geometry
// -------------------------------------------------------------------------

pub struct SetPatternName {
    track: TrackId,
    pattern: PatternId,
    name: String,
    old: String,
}

impl SetPatternName {
    pub fn new(track: TrackId, pattern: PatternId, name: impl Into<String>) -> Self {
        Self {
            track,
            pattern,
            name: name.into(),
            old: String::new(),
        }
    }
}

impl UndoableCommand for SetPatternName {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        if pattern.name() == self.name {
            return Err(CommandError::NoOp("pattern name unchanged"));
        }
        self.old = pattern.name().to_string();
        pattern.set_name(self.name.clone());
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        pattern_mut(song, self.track, self.pattern)?.set_name(self.old.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "Set pattern name"
    }
}

/// Change a pattern's length in beats
///
/// Notes starting past the new end are deleted and notes crossing it are
/// shortened, each as its own undoable step, before the length changes.
pub struct SetPatternLength {
    track: TrackId,
    pattern: PatternId,
    length: u32,
    inner: CompoundCommand,
}

impl SetPatternLength {
    pub fn new(track: TrackId, pattern: PatternId, length: u32) -> Self {
        Self {
            track,
            pattern,
            length,
            inner: CompoundCommand::new("Set pattern length"),
        }
    }
}

impl UndoableCommand for SetPatternLength {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        if self.length == 0 {
            return Err(CommandError::Invalid("pattern length must be positive".into()));
        }
        let pattern = pattern_ref(song, self.track, self.pattern)?;
        if pattern.length() == self.length {
            return Err(CommandError::NoOp("pattern length unchanged"));
        }
        let (end, _) = check_geometry(self.length, pattern.steps(), pattern.cc_steps())?;
        let notes = pattern.notes();

        self.inner.clear(song);
        for note in notes {
            if note.step >= end {
                self.inner
                    .append(DeleteNote::new(self.track, self.pattern, note.step, note.key));
            } else if note.end_step() > end {
                self.inner.append(SetNoteSize::new(
                    self.track,
                    self.pattern,
                    note.step,
                    note.key,
                    end - note.step,
                ));
            }
        }
        self.inner
            .append(ChangePatternLength::new(self.track, self.pattern, self.length));

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

/// The length change proper, run last inside `SetPatternLength`
///
/// Keeps the CC values and curve points that fall off the end.
pub struct ChangePatternLength {
    track: TrackId,
    pattern: PatternId,
    length: u32,
    old: u32,
    saved: ControllerData,
}

impl ChangePatternLength {
    pub fn new(track: TrackId, pattern: PatternId, length: u32) -> Self {
        Self {
            track,
            pattern,
            length,
            old: 0,
            saved: ControllerData::default(),
        }
    }
}

impl UndoableCommand for ChangePatternLength {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        let old = pattern.length();
        let saved = ControllerData::save(pattern);
        pattern.set_length(self.length)?;
        self.old = old;
        self.saved = saved;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        pattern.set_length(self.old)?;
        self.saved.restore(pattern)
    }

    fn name(&self) -> &str {
        "Set pattern length"
    }
}

/// Change the note resolution, rescaling notes, CC values and curves
///
/// Undo puts back the exact notes, curves and CC values, even where the
/// rescale rounded positions.
pub struct SetPatternSteps {
    track: TrackId,
    pattern: PatternId,
    steps: u32,
    old: u32,
    notes: Vec<Note>,
    saved: ControllerData,
}

impl SetPatternSteps {
    pub fn new(track: TrackId, pattern: PatternId, steps: u32) -> Self {
        Self {
            track,
            pattern,
            steps,
            old: 0,
            notes: Vec::new(),
            saved: ControllerData::default(),
        }
    }
}

impl UndoableCommand for SetPatternSteps {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        if self.steps == 0 {
            return Err(CommandError::Invalid("steps per beat must be positive".into()));
        }
        if pattern.steps() == self.steps {
            return Err(CommandError::NoOp("pattern steps unchanged"));
        }
        pattern.cc_steps_for(self.steps)?;
        let old = pattern.steps();
        let notes = pattern.notes();
        let saved = ControllerData::save(pattern);
        pattern.set_steps(self.steps)?;
        self.old = old;
        self.notes = notes;
        self.saved = saved;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        pattern.set_steps(self.old)?;
        restore_notes(pattern, &self.notes, |_| true)?;
        self.saved.restore(pattern)
    }

    fn name(&self) -> &str {
        "Set pattern steps"
    }
}

// -------------------------------------------------------------------------
// Notes
// -------------------------------------------------------------------------

/// Add a note, truncating or replacing notes of the same key as needed
///
/// Undo restores the notes of that key exactly as they were.
pub struct AddNote {
    track: TrackId,
    pattern: PatternId,
    step: u32,
    key: u8,
    velocity: u8,
    length: u32,
    before: Vec<Note>,
    added: Option<Note>,
}

impl AddNote {
    pub fn new(track: TrackId, pattern: PatternId, step: u32, key: u8, velocity: u8, length: u32) -> Self {
        Self {
            track,
            pattern,
            step,
            key,
            velocity,
            length,
            before: Vec::new(),
            added: None,
        }
    }

    /// The note as stored, after clamping
    pub fn added(&self) -> Option<Note> {
        self.added
    }
}

impl UndoableCommand for AddNote {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        let key = self.key;
        let before: Vec<Note> = pattern.notes().into_iter().filter(|n| n.key == key).collect();
        let added = pattern
            .add_note(self.step, self.key, self.velocity, self.length)?
            .ok_or(CommandError::NoOp("identical note already there"))?;
        self.before = before;
        self.added = Some(added);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        let key = self.key;
        restore_notes(pattern, &self.before, |n| n.key == key)
    }

    fn name(&self) -> &str {
        "Add note"
    }
}

/// Paste a note collection at a step and key offset
pub struct AddNotes {
    track: TrackId,
    pattern: PatternId,
    notes: NoteCollection,
    step: u32,
    key: u8,
    before: Vec<Note>,
}

impl AddNotes {
    pub fn new(track: TrackId, pattern: PatternId, notes: NoteCollection, step: u32, key: u8) -> Self {
        Self {
            track,
            pattern,
            notes,
            step,
            key,
            before: Vec::new(),
        }
    }
}

impl UndoableCommand for AddNotes {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        let before = pattern.notes();
        if pattern.add_notes(&self.notes, self.step, self.key)? == 0 {
            return Err(CommandError::NoOp("no notes pasted"));
        }
        self.before = before;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        restore_notes(pattern, &self.before, |_| true)
    }

    fn name(&self) -> &str {
        "Add notes"
    }
}

/// Change the velocity of the note sounding at a step
pub struct SetNoteVelocity {
    track: TrackId,
    pattern: PatternId,
    step: u32,
    key: u8,
    velocity: u8,
    start: u32,
    old: u8,
}

impl SetNoteVelocity {
    pub fn new(track: TrackId, pattern: PatternId, step: u32, key: u8, velocity: u8) -> Self {
        Self {
            track,
            pattern,
            step,
            key,
            velocity,
            start: step,
            old: 0,
        }
    }
}

impl UndoableCommand for SetNoteVelocity {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        let note = pattern
            .find_note(self.step, self.key)
            .ok_or(CommandError::NoOp("no note there"))?;
        if note.velocity == self.velocity {
            return Err(CommandError::NoOp("velocity unchanged"));
        }
        pattern.set_velocity(note.step, self.key, self.velocity)?;
        self.start = note.step;
        self.old = note.velocity;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        pattern_mut(song, self.track, self.pattern)?.set_velocity(self.start, self.key, self.old)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Set note velocity"
    }
}

/// Resize the note sounding at a step
pub struct SetNoteSize {
    track: TrackId,
    pattern: PatternId,
    step: u32,
    key: u8,
    length: u32,
    start: u32,
    old: u32,
}

impl SetNoteSize {
    pub fn new(track: TrackId, pattern: PatternId, step: u32, key: u8, length: u32) -> Self {
        Self {
            track,
            pattern,
            step,
            key,
            length,
            start: step,
            old: 0,
        }
    }
}

impl UndoableCommand for SetNoteSize {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        let note = pattern
            .find_note(self.step, self.key)
            .ok_or(CommandError::NoOp("no note there"))?;
        if note.length == self.length {
            return Err(CommandError::NoOp("note size unchanged"));
        }
        pattern.resize_note(note.step, self.key, self.length)?;
        if pattern
            .find_note(note.step, self.key)
            .is_some_and(|n| n.length == note.length)
        {
            // Clamped back to where it was
            return Err(CommandError::NoOp("note size unchanged"));
        }
        self.start = note.step;
        self.old = note.length;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        pattern_mut(song, self.track, self.pattern)?.resize_note(self.start, self.key, self.old)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Set note size"
    }
}

/// Delete the note sounding at a step
pub struct DeleteNote {
    track: TrackId,
    pattern: PatternId,
    step: u32,
    key: u8,
    removed: Option<Note>,
}

impl DeleteNote {
    pub fn new(track: TrackId, pattern: PatternId, step: u32, key: u8) -> Self {
        Self {
            track,
            pattern,
            step,
            key,
            removed: None,
        }
    }
}

impl UndoableCommand for DeleteNote {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        let note = pattern
            .find_note(self.step, self.key)
            .ok_or(CommandError::NoOp("no note there"))?;
        pattern.delete_note(note.step, note.key);
        self.removed = Some(note);
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let note = self
            .removed
            .ok_or(CommandError::Invalid("note was never deleted".into()))?;
        pattern_mut(song, self.track, self.pattern)?.add_note(
            note.step,
            note.key,
            note.velocity,
            note.length,
        )?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Delete note"
    }
}

// -------------------------------------------------------------------------
// Curves and control changes
// -------------------------------------------------------------------------

/// Set a point on a pattern curve
pub struct AddPatternCurvePoint {
    track: TrackId,
    pattern: PatternId,
    number: u32,
    step: u32,
    value: i32,
    old: Option<i32>,
}

impl AddPatternCurvePoint {
    pub fn new(track: TrackId, pattern: PatternId, number: u32, step: u32, value: i32) -> Self {
        Self {
            track,
            pattern,
            number,
            step,
            value,
            old: None,
        }
    }
}

impl UndoableCommand for AddPatternCurvePoint {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let info = pattern_controller(song, self.track, self.number)?;
        if info.global {
            return Err(CommandError::Invalid(format!(
                "controller {} has a track curve",
                self.number
            )));
        }
        if !info.accepts(self.value) {
            return Err(CommandError::OutOfRange(format!(
                "value {} outside {}..={}",
                self.value, info.min, info.max
            )));
        }
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        if pattern.curve_point(self.number, self.step) == Some(self.value) {
            return Err(CommandError::NoOp("curve point unchanged"));
        }
        self.old = pattern.add_curve_point(self.number, self.step, self.value)?;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        match self.old {
            Some(value) => {
                pattern.add_curve_point(self.number, self.step, value)?;
            }
            None => {
                pattern.remove_curve_point(self.number, self.step)?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Add curve point"
    }
}

pub struct RemovePatternCurvePoint {
    track: TrackId,
    pattern: PatternId,
    number: u32,
    step: u32,
    old: i32,
}

impl RemovePatternCurvePoint {
    pub fn new(track: TrackId, pattern: PatternId, number: u32, step: u32) -> Self {
        Self {
            track,
            pattern,
            number,
            step,
            old: 0,
        }
    }
}

impl UndoableCommand for RemovePatternCurvePoint {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        if self.step >= pattern.curve_size() {
            return Err(CommandError::OutOfRange(format!(
                "curve step {} (size {})",
                self.step,
                pattern.curve_size()
            )));
        }
        self.old = pattern
            .remove_curve_point(self.number, self.step)?
            .ok_or(CommandError::NoOp("no curve point there"))?;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        pattern_mut(song, self.track, self.pattern)?.add_curve_point(self.number, self.step, self.old)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Remove curve point"
    }
}

/// Set a CC value at a controller step
pub struct AddControlChange {
    track: TrackId,
    pattern: PatternId,
    number: u32,
    step: u32,
    value: u8,
    old: Option<u8>,
}

impl AddControlChange {
    pub fn new(track: TrackId, pattern: PatternId, number: u32, step: u32, value: u8) -> Self {
        Self {
            track,
            pattern,
            number,
            step,
            value,
            old: None,
        }
    }
}

impl UndoableCommand for AddControlChange {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        let old = pattern.cc_value(self.number, self.step);
        if old == Some(self.value) {
            return Err(CommandError::NoOp("control change unchanged"));
        }
        pattern.add_cc(self.number, self.step, self.value)?;
        self.old = old;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        let pattern = pattern_mut(song, self.track, self.pattern)?;
        match self.old {
            Some(value) => pattern.add_cc(self.number, self.step, value)?,
            None => {
                pattern.delete_cc(self.number, self.step);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Add control change"
    }
}

pub struct RemoveControlChange {
    track: TrackId,
    pattern: PatternId,
    number: u32,
    step: u32,
    old: u8,
}

impl RemoveControlChange {
    pub fn new(track: TrackId, pattern: PatternId, number: u32, step: u32) -> Self {
        Self {
            track,
            pattern,
            number,
            step,
            old: 0,
        }
    }
}

impl UndoableCommand for RemoveControlChange {
    fn do_command(&mut self, song: &mut Song) -> CommandResult<()> {
        self.old = pattern_mut(song, self.track, self.pattern)?
            .delete_cc(self.number, self.step)
            .ok_or(CommandError::NoOp("no control change there"))?;
        Ok(())
    }

    fn undo_command(&mut self, song: &mut Song) -> CommandResult<()> {
        pattern_mut(song, self.track, self.pattern)?.add_cc(self.number, self.step, self.old)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "Remove control change"
    }
}
