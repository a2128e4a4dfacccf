// Project persistence
// Songs are saved as RON or JSON documents; patterns keep one note element
// per onset and are rebuilt through add_note on load.

pub mod manager;
pub mod serialization;
pub mod types;

pub use manager::{ProjectError, ProjectFormat, ProjectManager};
pub use serialization::{song_from_document, song_to_document};
pub use types::{
    CcElement, CurveElement, DEFAULT_VELOCITY, FormatVersion, NoteElement, PatternDocument,
    SongDocument, TempoElement, TrackDocument,
};

use crate::sequencer::pattern::check_geometry;
use crate::sequencer::time::SongTime;
use std::collections::HashSet;

/// Helper function to validate document structure before building a song
pub fn validate_document(document: &SongDocument) -> Result<(), ProjectError> {
    if document.length == 0 {
        return Err(ProjectError::Invalid("Song length must be positive".to_string()));
    }

    for (name, beat) in [("start", document.loop_start), ("end", document.loop_end)] {
        if let Some(beat) = beat
            && beat > document.length
        {
            return Err(ProjectError::Invalid(format!(
                "Loop {} {} is past the song end {}",
                name, beat, document.length
            )));
        }
    }

    for tempo in &document.tempo {
        if !(tempo.bpm.is_finite() && tempo.bpm > 0.0) {
            return Err(ProjectError::Invalid(format!(
                "Tempo {} at beat {} must be positive",
                tempo.bpm, tempo.beat
            )));
        }
        if tempo.beat >= document.length {
            return Err(ProjectError::Invalid(format!(
                "Tempo change at beat {} is past the song end",
                tempo.beat
            )));
        }
    }

    let mut track_ids = HashSet::new();
    for track in &document.tracks {
        if !track_ids.insert(track.id) {
            return Err(ProjectError::Invalid(format!("Duplicate track ID: {}", track.id)));
        }
        validate_track(track, document.length)?;
    }

    Ok(())
}

fn validate_track(track: &TrackDocument, song_length: u32) -> Result<(), ProjectError> {
    let mut pattern_ids = HashSet::new();
    for pattern in &track.patterns {
        if !pattern_ids.insert(pattern.id) {
            return Err(ProjectError::Invalid(format!(
                "Duplicate pattern ID {} in track {}",
                pattern.id, track.id
            )));
        }

        let (slots, cells) = check_geometry(pattern.length, pattern.steps, pattern.ccsteps)
            .map_err(|e| ProjectError::Invalid(format!("Pattern {}: {}", pattern.id, e)))?;
        if pattern.notes.len() > 128 * slots as usize {
            return Err(ProjectError::Invalid(format!(
                "Pattern {} has more notes than its grid can hold",
                pattern.id
            )));
        }

        for note in &pattern.notes {
            if note.step >= slots
                || note.step.checked_add(note.length).is_none_or(|end| end > slots)
            {
                return Err(ProjectError::Invalid(format!(
                    "Note at step {} does not fit pattern {} of {} steps",
                    note.step, pattern.id, slots
                )));
            }
            if note.value > 127 {
                return Err(ProjectError::Invalid(format!(
                    "Note key {} exceeds MIDI range (0-127) in pattern {}",
                    note.value, pattern.id
                )));
            }
            if note.velocity.is_some_and(|v| v > 127) {
                return Err(ProjectError::Invalid(format!(
                    "Note velocity exceeds MIDI range (0-127) in pattern {}",
                    pattern.id
                )));
            }
            if note.length == 0 {
                return Err(ProjectError::Invalid(format!(
                    "Note length cannot be 0 in pattern {}",
                    pattern.id
                )));
            }
        }

        for cc in &pattern.cc {
            if cc.number > 127 || cc.value > 127 || cc.step >= cells {
                return Err(ProjectError::Invalid(format!(
                    "CC {} at step {} out of range in pattern {}",
                    cc.number, cc.step, pattern.id
                )));
            }
        }

        for curve in &pattern.curves {
            let owned = track
                .controllers
                .iter()
                .any(|c| c.number == curve.number && !c.global);
            if !owned {
                return Err(ProjectError::Invalid(format!(
                    "Pattern {} has a curve for unknown controller {}",
                    pattern.id, curve.number
                )));
            }
        }
    }

    let mut numbers = HashSet::new();
    for controller in &track.controllers {
        if !controller.is_valid() || !numbers.insert(controller.number) {
            return Err(ProjectError::Invalid(format!(
                "Track {} has an invalid or duplicate controller {}",
                track.id, controller.number
            )));
        }
    }

    let end = SongTime::from_beats(song_length);
    let mut sequence = track.sequence.clone();
    sequence.sort_by_key(|entry| entry.start);
    let mut previous_end = SongTime::zero();
    for entry in &sequence {
        if !pattern_ids.contains(&entry.pattern_id) {
            return Err(ProjectError::Invalid(format!(
                "Track {} references missing pattern {}",
                track.id, entry.pattern_id
            )));
        }
        if entry.length.is_zero() || entry.end() > end {
            return Err(ProjectError::Invalid(format!(
                "Track {}: sequence entry at beat {} does not fit the song",
                track.id, entry.start.beat
            )));
        }
        if entry.start < previous_end {
            return Err(ProjectError::Invalid(format!(
                "Track {}: sequence entries overlap at beat {}",
                track.id, entry.start.beat
            )));
        }
        previous_end = entry.end();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::controller::ControllerInfo;
    use crate::sequencer::track::{SequenceEntry, TrackMode};

    fn document_with_track(track: TrackDocument) -> SongDocument {
        SongDocument {
            version: FormatVersion::current(),
            title: "Test".to_string(),
            length: 16,
            loop_start: None,
            loop_end: None,
            tempo: vec![TempoElement { beat: 0, bpm: 120.0 }],
            tracks: vec![track],
        }
    }

    fn track() -> TrackDocument {
        TrackDocument {
            id: 1,
            name: "Drums".to_string(),
            mode: TrackMode::Drum,
            channel: 9,
            patterns: vec![PatternDocument {
                id: 1,
                name: "Beat".to_string(),
                length: 4,
                steps: 4,
                ccsteps: 4,
                notes: vec![NoteElement { step: 0, value: 36, length: 1, velocity: None }],
                cc: Vec::new(),
                curves: Vec::new(),
            }],
            sequence: vec![SequenceEntry {
                start: SongTime::from_beats(0),
                pattern_id: 1,
                length: SongTime::from_beats(4),
            }],
            controllers: Vec::new(),
            curves: Vec::new(),
            keys: Vec::new(),
        }
    }

    #[test]
    fn test_validate_document_valid() {
        assert!(validate_document(&document_with_track(track())).is_ok());
    }

    #[test]
    fn test_validate_document_zero_length() {
        let mut document = document_with_track(track());
        document.length = 0;
        let result = validate_document(&document);
        assert!(result.unwrap_err().to_string().contains("length must be positive"));
    }

    #[test]
    fn test_validate_document_bad_tempo() {
        let mut document = document_with_track(track());
        document.tempo.push(TempoElement { beat: 4, bpm: 0.0 });
        assert!(validate_document(&document).is_err());
    }

    #[test]
    fn test_validate_document_duplicate_track() {
        let mut document = document_with_track(track());
        document.tracks.push(track());
        let result = validate_document(&document);
        assert!(result.unwrap_err().to_string().contains("Duplicate track ID"));
    }

    #[test]
    fn test_validate_document_missing_pattern() {
        let mut bad = track();
        bad.sequence[0].pattern_id = 7;
        let result = validate_document(&document_with_track(bad));
        assert!(result.unwrap_err().to_string().contains("references missing pattern"));
    }

    #[test]
    fn test_validate_document_overlapping_entries() {
        let mut bad = track();
        bad.sequence.push(SequenceEntry {
            start: SongTime::from_beats(2),
            pattern_id: 1,
            length: SongTime::from_beats(2),
        });
        let result = validate_document(&document_with_track(bad));
        assert!(result.unwrap_err().to_string().contains("overlap"));
    }

    #[test]
    fn test_validate_document_oversized_pattern() {
        let mut bad = track();
        bad.patterns[0].length = 0x10000;
        bad.patterns[0].steps = 0x10000;
        bad.patterns[0].ccsteps = 0x10000;
        let result = validate_document(&document_with_track(bad));
        assert!(result.unwrap_err().to_string().contains("Pattern 1"));

        let mut bad = track();
        bad.patterns[0].ccsteps = 6;
        assert!(validate_document(&document_with_track(bad)).is_err());
    }

    #[test]
    fn test_validate_document_note_outside_grid() {
        let mut bad = track();
        bad.patterns[0].notes[0].length = u32::MAX;
        let result = validate_document(&document_with_track(bad));
        assert!(result.unwrap_err().to_string().contains("does not fit"));

        let mut bad = track();
        bad.patterns[0].notes[0].step = 16;
        assert!(validate_document(&document_with_track(bad)).is_err());
    }

    #[test]
    fn test_validate_document_cc_outside_grid() {
        let mut bad = track();
        bad.patterns[0].cc.push(CcElement { number: 1, step: 16, value: 3 });
        assert!(validate_document(&document_with_track(bad)).is_err());
    }

    #[test]
    fn test_validate_document_entry_past_end() {
        let mut bad = track();
        bad.sequence[0].start = SongTime::from_beats(14);
        assert!(validate_document(&document_with_track(bad)).is_err());
    }

    #[test]
    fn test_validate_document_orphan_curve() {
        let mut bad = track();
        bad.patterns[0].curves.push(CurveElement {
            number: 7,
            points: vec![(0, 1)],
        });
        assert!(validate_document(&document_with_track(bad.clone())).is_err());

        bad.controllers.push(ControllerInfo::cc(7, "Volume"));
        assert!(validate_document(&document_with_track(bad)).is_ok());
    }
}
