// Track - patterns, their arrangement in the song, controllers and named keys

use crate::reclaim::Garbage;
use crate::sequencer::controller::{ControllerInfo, is_cc, is_pbend};
use crate::sequencer::curve::{Curve, CurveData};
use crate::sequencer::pattern::{
    PatternConfig, PatternError, PatternId, PatternReader, PatternStore, check_geometry,
};
use crate::sequencer::time::SongTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Unique identifier for tracks within a song
pub type TrackId = u32;

/// How the editor presents the track's patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackMode {
    #[default]
    Normal,
    /// Only named keys are shown and notes are one step long
    Drum,
}

/// One placement of a pattern in the song
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceEntry {
    pub start: SongTime,
    pub pattern_id: PatternId,
    pub length: SongTime,
}

impl SequenceEntry {
    pub fn end(&self) -> SongTime {
        self.start + self.length
    }

    pub fn contains(&self, time: SongTime) -> bool {
        time >= self.start && time < self.end()
    }

    pub fn overlaps(&self, start: SongTime, length: SongTime) -> bool {
        self.start < start + length && self.end() > start
    }
}

/// A key with a display name (drum maps)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub number: u8,
    pub name: String,
}

/// A controller taken off a track together with all of its curve data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisownedController {
    pub info: ControllerInfo,
    pub pattern_curves: Vec<(PatternId, CurveData)>,
    pub track_curve: Option<CurveData>,
}

/// What the realtime player sees of a track
#[derive(Debug, Clone)]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub channel: u8,
    pub sequence: Vec<SequenceEntry>,
    pub patterns: Vec<PatternReader>,
    pub curves: Vec<(u32, Arc<Curve>)>,
}

impl TrackSnapshot {
    pub fn pattern(&self, id: PatternId) -> Option<&PatternReader> {
        self.patterns.iter().find(|p| p.id() == id)
    }

    /// The sequence entry playing at `time`
    pub fn entry_at(&self, time: SongTime) -> Option<&SequenceEntry> {
        self.sequence.iter().find(|e| e.contains(time))
    }
}

pub struct Track {
    id: TrackId,
    name: String,
    mode: TrackMode,
    channel: u8,
    song_length: u32,
    pattern_config: PatternConfig,

    patterns: BTreeMap<PatternId, PatternStore>,
    next_pattern_id: PatternId,
    sequence: BTreeMap<SongTime, SequenceEntry>,
    controllers: Vec<ControllerInfo>,
    keys: Vec<KeyInfo>,
    /// Curves of global controllers, one step per beat
    curves: Vec<(u32, Arc<Curve>)>,

    /// Something the realtime snapshot shows changed
    changed: bool,
    garbage: Vec<Garbage>,
}

impl Track {
    pub fn new(
        id: TrackId,
        name: impl Into<String>,
        song_length: u32,
        pattern_config: PatternConfig,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            mode: TrackMode::Normal,
            channel: 0,
            song_length,
            pattern_config,
            patterns: BTreeMap::new(),
            next_pattern_id: 1,
            sequence: BTreeMap::new(),
            controllers: Vec::new(),
            keys: Vec::new(),
            curves: Vec::new(),
            changed: true,
            garbage: Vec::new(),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: TrackId) {
        self.id = id;
        self.changed = true;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn mode(&self) -> TrackMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TrackMode) {
        self.mode = mode;
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Set the MIDI channel (0-15)
    pub fn set_channel(&mut self, channel: u8) -> bool {
        if channel >= 16 {
            return false;
        }
        self.channel = channel;
        self.changed = true;
        true
    }

    pub fn pattern_config(&self) -> PatternConfig {
        self.pattern_config
    }

    // ---------------------------------------------------------------------
    // Patterns
    // ---------------------------------------------------------------------

    pub fn pattern(&self, id: PatternId) -> Option<&PatternStore> {
        self.patterns.get(&id)
    }

    /// Edits through this reference are visible to the reader directly;
    /// the track snapshot does not need republishing.
    pub fn pattern_mut(&mut self, id: PatternId) -> Option<&mut PatternStore> {
        self.patterns.get_mut(&id)
    }

    pub fn patterns(&self) -> impl Iterator<Item = &PatternStore> {
        self.patterns.values()
    }

    pub fn patterns_mut(&mut self) -> impl Iterator<Item = &mut PatternStore> {
        self.patterns.values_mut()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Create an empty pattern carrying a curve for every non-global controller
    pub fn add_pattern(
        &mut self,
        name: impl Into<String>,
        length: u32,
        steps: u32,
        cc_steps: u32,
    ) -> Result<PatternId, PatternError> {
        let id = self.next_pattern_id;
        let (slots, _) = check_geometry(length, steps, cc_steps)?;
        let config = self.pattern_config.for_grid(slots);
        let mut pattern = PatternStore::new(id, name, length, steps, cc_steps, config)?;
        for info in self.controllers.iter().filter(|c| !c.global) {
            pattern.add_curve(info.number, &[])?;
        }
        self.insert_pattern(pattern);
        Ok(id)
    }

    /// Copy an existing pattern under a new id
    pub fn duplicate_pattern(&mut self, source: PatternId) -> Option<Result<PatternId, PatternError>> {
        let id = self.next_pattern_id;
        let copy = self.patterns.get(&source)?.duplicate(id);
        Some(copy.map(|pattern| {
            self.insert_pattern(pattern);
            id
        }))
    }

    /// Put a pattern (new or previously disowned) into the track
    pub fn insert_pattern(&mut self, pattern: PatternStore) {
        let id = pattern.id();
        self.next_pattern_id = self.next_pattern_id.max(id + 1);
        self.patterns.insert(id, pattern);
        self.changed = true;
    }

    /// Take a pattern out of the track. The caller owns it and must hand it
    /// to the song's reclaimer rather than dropping it.
    pub fn disown_pattern(&mut self, id: PatternId) -> Option<PatternStore> {
        let pattern = self.patterns.remove(&id)?;
        self.changed = true;
        Some(pattern)
    }

    /// Remove a pattern for good
    pub fn remove_pattern(&mut self, id: PatternId) -> bool {
        match self.disown_pattern(id) {
            Some(pattern) => {
                self.garbage.push(Box::new(pattern));
                true
            }
            None => false,
        }
    }

    // ---------------------------------------------------------------------
    // Sequence
    // ---------------------------------------------------------------------

    pub fn sequence(&self) -> impl Iterator<Item = &SequenceEntry> {
        self.sequence.values()
    }

    /// The entry playing at `time`
    pub fn find_sequence_entry(&self, time: SongTime) -> Option<&SequenceEntry> {
        self.sequence
            .range(..=time)
            .next_back()
            .map(|(_, entry)| entry)
            .filter(|entry| entry.contains(time))
    }

    pub fn overlaps_sequence(&self, start: SongTime, length: SongTime) -> bool {
        self.sequence.values().any(|e| e.overlaps(start, length))
    }

    /// Place a pattern; no overlap checks, commands validate first
    pub fn set_sequence_entry(&mut self, start: SongTime, pattern_id: PatternId, length: SongTime) -> bool {
        if !self.patterns.contains_key(&pattern_id) || length.is_zero() {
            return false;
        }
        self.sequence.insert(
            start,
            SequenceEntry {
                start,
                pattern_id,
                length,
            },
        );
        self.changed = true;
        true
    }

    pub fn remove_sequence_entry(&mut self, start: SongTime) -> Option<SequenceEntry> {
        let entry = self.sequence.remove(&start)?;
        self.changed = true;
        Some(entry)
    }

    /// Returns the previous length
    pub fn set_sequence_entry_length(&mut self, start: SongTime, length: SongTime) -> Option<SongTime> {
        if length.is_zero() {
            return None;
        }
        let entry = self.sequence.get_mut(&start)?;
        let old = std::mem::replace(&mut entry.length, length);
        self.changed = true;
        Some(old)
    }

    // ---------------------------------------------------------------------
    // Controllers
    // ---------------------------------------------------------------------

    pub fn controllers(&self) -> &[ControllerInfo] {
        &self.controllers
    }

    pub fn controller(&self, number: u32) -> Option<&ControllerInfo> {
        self.controllers.iter().find(|c| c.number == number)
    }

    fn controller_mut(&mut self, number: u32) -> Option<&mut ControllerInfo> {
        self.controllers.iter_mut().find(|c| c.number == number)
    }

    /// Add a controller with empty curves
    pub fn add_controller(&mut self, info: ControllerInfo) -> bool {
        self.restore_controller(DisownedController {
            info,
            pattern_curves: Vec::new(),
            track_curve: None,
        })
    }

    /// Add a controller and its curve data back
    pub fn restore_controller(&mut self, disowned: DisownedController) -> bool {
        let DisownedController {
            info,
            pattern_curves,
            track_curve,
        } = disowned;
        if !(is_cc(info.number) || is_pbend(info.number)) || self.controller(info.number).is_some() {
            return false;
        }

        if info.global {
            let data = track_curve.unwrap_or_default();
            self.curves
                .push((info.number, Arc::new(Curve::from_data(self.song_length, &data))));
            self.curves.sort_by_key(|(n, _)| *n);
        } else {
            for pattern in self.patterns.values_mut() {
                let data = pattern_curves
                    .iter()
                    .find(|(id, _)| *id == pattern.id())
                    .map(|(_, data)| data.as_slice())
                    .unwrap_or(&[]);
                if let Err(e) = pattern.add_curve(info.number, data) {
                    log::warn!("Track {}: pattern {} kept its curve: {}", self.id, pattern.id(), e);
                }
            }
        }

        self.controllers.push(info);
        self.changed = true;
        true
    }

    /// Remove a controller, returning it with every curve it owned
    pub fn disown_controller(&mut self, number: u32) -> Option<DisownedController> {
        let index = self.controllers.iter().position(|c| c.number == number)?;
        let info = self.controllers.remove(index);

        let mut pattern_curves = Vec::new();
        for pattern in self.patterns.values_mut() {
            if let Some(data) = pattern.remove_curve(number) {
                pattern_curves.push((pattern.id(), data));
            }
        }

        let track_curve = self
            .curves
            .iter()
            .position(|(n, _)| *n == number)
            .map(|i| self.curves.remove(i).1.data());

        self.changed = true;
        Some(DisownedController {
            info,
            pattern_curves,
            track_curve,
        })
    }

    pub fn remove_controller(&mut self, number: u32) -> bool {
        self.disown_controller(number).is_some()
    }

    /// Returns the previous name
    pub fn set_controller_name(&mut self, number: u32, name: impl Into<String>) -> Option<String> {
        let info = self.controller_mut(number)?;
        Some(std::mem::replace(&mut info.name, name.into()))
    }

    pub fn set_controller_min(&mut self, number: u32, min: i32) -> Option<i32> {
        let info = self.controller_mut(number)?;
        Some(std::mem::replace(&mut info.min, min))
    }

    pub fn set_controller_max(&mut self, number: u32, max: i32) -> Option<i32> {
        let info = self.controller_mut(number)?;
        Some(std::mem::replace(&mut info.max, max))
    }

    pub fn set_controller_default(&mut self, number: u32, default: i32) -> Option<i32> {
        let info = self.controller_mut(number)?;
        Some(std::mem::replace(&mut info.default, default))
    }

    /// Move a controller and its curves to another number
    pub fn set_controller_number(&mut self, number: u32, new_number: u32) -> bool {
        if !(is_cc(new_number) || is_pbend(new_number)) || self.controller(new_number).is_some() {
            return false;
        }
        let Some(info) = self.controller_mut(number) else {
            return false;
        };
        info.number = new_number;

        for pattern in self.patterns.values_mut() {
            pattern.renumber_curve(number, new_number);
        }
        for (n, _) in self.curves.iter_mut() {
            if *n == number {
                *n = new_number;
            }
        }
        self.curves.sort_by_key(|(n, _)| *n);
        self.changed = true;
        true
    }

    // ---------------------------------------------------------------------
    // Track curves
    // ---------------------------------------------------------------------

    pub fn curve(&self, number: u32) -> Option<&Arc<Curve>> {
        self.curves.iter().find(|(n, _)| *n == number).map(|(_, c)| c)
    }

    pub fn curve_numbers(&self) -> Vec<u32> {
        self.curves.iter().map(|(n, _)| *n).collect()
    }

    /// Set a point on a global controller curve, returning the replaced value.
    /// `None` when there is no such curve or the step is past its end.
    pub fn set_curve_point(&mut self, number: u32, step: u32, value: i32) -> Option<Option<i32>> {
        let curve = self.curve(number)?;
        if step > curve.size() {
            return None;
        }
        let previous = curve.point(step);
        curve.set_point(step, value);
        Some(previous)
    }

    pub fn remove_curve_point(&mut self, number: u32, step: u32) -> Option<i32> {
        self.curve(number)?.clear_point(step)
    }

    /// Resize global curves when the song length changes
    pub(crate) fn set_song_length(&mut self, length: u32) {
        if length == self.song_length {
            return;
        }
        self.song_length = length;
        // The published snapshot keeps the old curves alive until it is retired
        self.curves = self
            .curves
            .iter()
            .map(|(n, curve)| (*n, Arc::new(Curve::from_data(length, &curve.data()))))
            .collect();
        self.changed = true;
    }

    // ---------------------------------------------------------------------
    // Named keys
    // ---------------------------------------------------------------------

    pub fn keys(&self) -> &[KeyInfo] {
        &self.keys
    }

    pub fn find_key(&self, number: u8) -> Option<&KeyInfo> {
        self.keys.iter().find(|k| k.number == number)
    }

    pub fn add_key(&mut self, number: u8, name: impl Into<String>) -> bool {
        if number > 127 || self.find_key(number).is_some() {
            return false;
        }
        self.keys.push(KeyInfo {
            number,
            name: name.into(),
        });
        self.keys.sort_by_key(|k| k.number);
        true
    }

    pub fn remove_key(&mut self, number: u8) -> Option<KeyInfo> {
        let index = self.keys.iter().position(|k| k.number == number)?;
        Some(self.keys.remove(index))
    }

    pub fn set_key_name(&mut self, number: u8, name: impl Into<String>) -> Option<String> {
        let key = self.keys.iter_mut().find(|k| k.number == number)?;
        Some(std::mem::replace(&mut key.name, name.into()))
    }

    pub fn set_key_number(&mut self, number: u8, new_number: u8) -> bool {
        if new_number > 127 || self.find_key(new_number).is_some() {
            return false;
        }
        let Some(key) = self.keys.iter_mut().find(|k| k.number == number) else {
            return false;
        };
        key.number = new_number;
        self.keys.sort_by_key(|k| k.number);
        true
    }

    // ---------------------------------------------------------------------
    // Publication
    // ---------------------------------------------------------------------

    pub(crate) fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            channel: self.channel,
            sequence: self.sequence.values().copied().collect(),
            patterns: self.patterns.values().map(|p| p.reader()).collect(),
            curves: self.curves.clone(),
        }
    }

    pub(crate) fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub(crate) fn mark_changed(&mut self) {
        self.changed = true;
    }

    pub(crate) fn take_garbage(&mut self) -> Vec<Garbage> {
        std::mem::take(&mut self.garbage)
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("channel", &self.channel)
            .field("patterns", &self.patterns.len())
            .field("sequence", &self.sequence.len())
            .finish_non_exhaustive()
    }
}
