// Serialization utilities for project persistence

use crate::config::EngineConfig;
use crate::project::ProjectError;
use crate::project::types::*;
use crate::sequencer::pattern::{PatternStore, check_geometry};
use crate::sequencer::song::Song;
use crate::sequencer::track::{DisownedController, Track};
use ron::ser::PrettyConfig;

/// Serialize a song document to RON format
pub fn serialize_to_ron(document: &SongDocument) -> Result<String, ProjectError> {
    ron::ser::to_string_pretty(document, PrettyConfig::default())
        .map_err(|e| ProjectError::Ron(format!("Failed to serialize to RON: {}", e)))
}

/// Deserialize a song document from RON format
pub fn deserialize_from_ron(ron_data: &str) -> Result<SongDocument, ProjectError> {
    ron::from_str(ron_data)
        .map_err(|e| ProjectError::Ron(format!("Failed to deserialize from RON: {}", e)))
}

/// Serialize a song document to JSON format
pub fn serialize_to_json(document: &SongDocument) -> Result<String, ProjectError> {
    Ok(serde_json::to_string_pretty(document)?)
}

/// Deserialize a song document from JSON format
pub fn deserialize_from_json(json_data: &str) -> Result<SongDocument, ProjectError> {
    Ok(serde_json::from_str(json_data)?)
}

/// One note element per onset, in onset order
pub fn pattern_to_document(pattern: &PatternStore) -> PatternDocument {
    let notes = pattern
        .notes()
        .into_iter()
        .map(|note| NoteElement {
            step: note.step,
            value: note.key,
            length: note.length,
            velocity: Some(note.velocity),
        })
        .collect();

    let cc = (0..128u8)
        .flat_map(|number| {
            pattern
                .cc_points(number as u32)
                .into_iter()
                .map(move |(step, value)| CcElement { number, step, value })
        })
        .collect();

    let curves = pattern
        .curve_numbers()
        .into_iter()
        .filter_map(|number| {
            let points = pattern.curve_data(number)?;
            Some(CurveElement { number, points })
        })
        .filter(|curve| !curve.points.is_empty())
        .collect();

    PatternDocument {
        id: pattern.id(),
        name: pattern.name().to_string(),
        length: pattern.length(),
        steps: pattern.steps(),
        ccsteps: pattern.cc_steps(),
        notes,
        cc,
        curves,
    }
}

/// Rebuild a pattern's notes and CC values; curves come with the track's
/// controllers
pub fn pattern_from_document(
    document: &PatternDocument,
    config: &EngineConfig,
) -> Result<PatternStore, ProjectError> {
    let (slots, _) = check_geometry(document.length, document.steps, document.ccsteps)?;
    let mut pattern = PatternStore::new(
        document.id,
        document.name.clone(),
        document.length,
        document.steps,
        document.ccsteps,
        // Room for every saved note plus a truncation each
        config
            .pattern_config()
            .for_grid(slots)
            .with_min_arena(document.notes.len() * 3),
    )?;

    for note in &document.notes {
        let velocity = note.velocity.unwrap_or(DEFAULT_VELOCITY);
        if pattern.add_note(note.step, note.value, velocity, note.length)?.is_none() {
            log::debug!(
                "Pattern {}: duplicate note {} at step {} skipped",
                document.id,
                note.value,
                note.step
            );
        }
    }

    for cc in &document.cc {
        pattern.add_cc(cc.number as u32, cc.step, cc.value)?;
    }

    Ok(pattern)
}

pub fn track_to_document(track: &Track) -> TrackDocument {
    let curves = track
        .curve_numbers()
        .into_iter()
        .filter_map(|number| {
            let points = track.curve(number)?.data();
            Some(CurveElement { number, points })
        })
        .filter(|curve| !curve.points.is_empty())
        .collect();

    TrackDocument {
        id: track.id(),
        name: track.name().to_string(),
        mode: track.mode(),
        channel: track.channel(),
        patterns: track.patterns().map(pattern_to_document).collect(),
        sequence: track.sequence().copied().collect(),
        controllers: track.controllers().to_vec(),
        curves,
        keys: track.keys().to_vec(),
    }
}

pub fn track_from_document(
    document: &TrackDocument,
    song_length: u32,
    config: &EngineConfig,
) -> Result<Track, ProjectError> {
    let mut track = Track::new(document.id, document.name.clone(), song_length, config.pattern_config());
    track.set_mode(document.mode);
    if !track.set_channel(document.channel) {
        return Err(ProjectError::Invalid(format!(
            "Track {}: MIDI channel {} outside 0-15",
            document.id, document.channel
        )));
    }

    for pattern in &document.patterns {
        track.insert_pattern(pattern_from_document(pattern, config)?);
    }

    for info in &document.controllers {
        let pattern_curves = document
            .patterns
            .iter()
            .filter_map(|pattern| {
                let curve = pattern.curves.iter().find(|c| c.number == info.number)?;
                Some((pattern.id, curve.points.clone()))
            })
            .collect();
        let track_curve = document
            .curves
            .iter()
            .find(|c| c.number == info.number)
            .map(|c| c.points.clone());

        let restored = track.restore_controller(DisownedController {
            info: info.clone(),
            pattern_curves,
            track_curve,
        });
        if !restored {
            return Err(ProjectError::Invalid(format!(
                "Track {}: controller {} rejected",
                document.id, info.number
            )));
        }
    }

    for key in &document.keys {
        if !track.add_key(key.number, key.name.clone()) {
            return Err(ProjectError::Invalid(format!(
                "Track {}: key {} rejected",
                document.id, key.number
            )));
        }
    }

    for entry in &document.sequence {
        if !track.set_sequence_entry(entry.start, entry.pattern_id, entry.length) {
            return Err(ProjectError::Invalid(format!(
                "Track {}: sequence entry at {:?} rejected",
                document.id, entry.start
            )));
        }
    }

    for pattern in track.patterns_mut() {
        pattern.mark_saved();
    }
    Ok(track)
}

/// Capture the persistent state of a song
pub fn song_to_document(song: &Song) -> SongDocument {
    SongDocument {
        version: FormatVersion::current(),
        title: song.title().to_string(),
        length: song.length(),
        loop_start: song.loop_start(),
        loop_end: song.loop_end(),
        tempo: song
            .tempo_changes()
            .map(|(beat, bpm)| TempoElement { beat, bpm })
            .collect(),
        tracks: song.tracks().map(track_to_document).collect(),
    }
}

/// Build a song from a validated document and publish its first snapshot
pub fn song_from_document(document: &SongDocument, config: &EngineConfig) -> Result<Song, ProjectError> {
    crate::project::validate_document(document)?;

    let mut song = Song::with_config(config);
    song.set_title(document.title.clone());
    if !song.set_length(document.length) {
        return Err(ProjectError::Invalid("Song length must be positive".to_string()));
    }
    song.set_loop_start(document.loop_start);
    song.set_loop_end(document.loop_end);
    for tempo in &document.tempo {
        song.add_tempo_change(tempo.beat, tempo.bpm);
    }

    for track in &document.tracks {
        song.insert_track(track_from_document(track, document.length, config)?);
    }

    song.commit();
    log::info!(
        "Loaded song '{}' ({} tracks, {} beats)",
        song.title(),
        song.track_count(),
        song.length()
    );
    Ok(song)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::controller::ControllerInfo;
    use crate::sequencer::time::SongTime;

    fn sample_song() -> Song {
        let mut song = Song::new();
        song.set_title("Sketch");
        song.add_tempo_change(8, 140.0);
        let id = song.add_track("Lead");
        let track = song.track_mut(id).unwrap();
        track.add_controller(ControllerInfo::cc(7, "Volume"));
        let pid = track.add_pattern("Intro", 2, 4, 4).unwrap();
        let pattern = track.pattern_mut(pid).unwrap();
        pattern.add_note(0, 60, 100, 2).unwrap();
        pattern.add_note(4, 64, 90, 3).unwrap();
        pattern.add_cc(1, 2, 55).unwrap();
        pattern.add_curve_point(7, 0, 10).unwrap();
        track.set_sequence_entry(SongTime::from_beats(0), pid, SongTime::from_beats(2));
        song.commit();
        song
    }

    #[test]
    fn test_pattern_document_shape() {
        let song = sample_song();
        let track = song.tracks().next().unwrap();
        let document = pattern_to_document(track.patterns().next().unwrap());

        assert_eq!(document.name, "Intro");
        assert_eq!((document.length, document.steps, document.ccsteps), (2, 4, 4));
        assert_eq!(document.notes.len(), 2);
        assert_eq!(document.notes[0].step, 0);
        assert_eq!(document.notes[1].value, 64);
        assert_eq!(document.cc, vec![CcElement { number: 1, step: 2, value: 55 }]);
        assert_eq!(document.curves.len(), 1);
    }

    #[test]
    fn test_song_document_round_trip() {
        let song = sample_song();
        let document = song_to_document(&song);
        let loaded = song_from_document(&document, &EngineConfig::default()).unwrap();

        assert_eq!(song_to_document(&loaded), document);
        assert_eq!(loaded.tempo_at(8), Some(140.0));
    }

    #[test]
    fn test_missing_velocity_uses_default() {
        let document = PatternDocument {
            id: 1,
            name: "P".to_string(),
            length: 1,
            steps: 4,
            ccsteps: 4,
            notes: vec![NoteElement {
                step: 1,
                value: 48,
                length: 2,
                velocity: None,
            }],
            cc: Vec::new(),
            curves: Vec::new(),
        };
        let pattern = pattern_from_document(&document, &EngineConfig::default()).unwrap();
        let note = pattern.find_note(1, 48).unwrap();
        assert_eq!(note.velocity, DEFAULT_VELOCITY);
        assert_eq!(note.length, 2);
    }

    #[test]
    fn test_notes_replay_through_add_note() {
        // The second note of key 60 cuts the first one short
        let document = PatternDocument {
            id: 1,
            name: "P".to_string(),
            length: 2,
            steps: 4,
            ccsteps: 4,
            notes: vec![
                NoteElement { step: 0, value: 60, length: 6, velocity: Some(80) },
                NoteElement { step: 3, value: 60, length: 2, velocity: Some(80) },
            ],
            cc: Vec::new(),
            curves: Vec::new(),
        };
        let pattern = pattern_from_document(&document, &EngineConfig::default()).unwrap();
        assert_eq!(pattern.find_note(0, 60).unwrap().length, 3);
        assert_eq!(pattern.find_note(3, 60).unwrap().length, 2);
    }

    #[test]
    fn test_out_of_range_note_is_rejected() {
        let document = PatternDocument {
            id: 1,
            name: "P".to_string(),
            length: 1,
            steps: 4,
            ccsteps: 4,
            notes: vec![NoteElement { step: 9, value: 60, length: 1, velocity: None }],
            cc: Vec::new(),
            curves: Vec::new(),
        };
        assert!(matches!(
            pattern_from_document(&document, &EngineConfig::default()),
            Err(ProjectError::Pattern(_))
        ));
    }

    #[test]
    fn test_dense_pattern_loads() {
        // 16 keys on every step of a 16x16 grid: more notes than the default arena
        let notes: Vec<NoteElement> = (0..256)
            .flat_map(|step| {
                (48..64).map(move |value| NoteElement { step, value, length: 1, velocity: Some(80) })
            })
            .collect();
        let config = EngineConfig::default();
        assert!(notes.len() * 2 > config.arena_capacity);

        let document = PatternDocument {
            id: 2,
            name: "Dense".to_string(),
            length: 16,
            steps: 16,
            ccsteps: 16,
            notes,
            cc: Vec::new(),
            curves: Vec::new(),
        };
        let pattern = pattern_from_document(&document, &config).unwrap();
        assert_eq!(pattern.note_count(), 4096);
        assert_eq!(pattern.find_note(255, 63).map(|n| n.velocity), Some(80));
    }

    #[test]
    fn test_ron_and_json_text() {
        let document = song_to_document(&sample_song());

        let ron_text = serialize_to_ron(&document).unwrap();
        assert_eq!(deserialize_from_ron(&ron_text).unwrap(), document);

        let json_text = serialize_to_json(&document).unwrap();
        assert_eq!(deserialize_from_json(&json_text).unwrap(), document);

        assert!(matches!(deserialize_from_ron("(length: "), Err(ProjectError::Ron(_))));
        assert!(matches!(deserialize_from_json("{"), Err(ProjectError::Json(_))));
    }
}
