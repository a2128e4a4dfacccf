// Song - tracks, song length, loop and tempo map, plus the reclamation tick
//
// The song owns the control-side state and publishes an immutable
// `SongSnapshot` for the realtime player through `ArcSwap`. Pattern contents
// are not copied into the snapshot: it holds `PatternReader`s that see edits
// directly. Everything taken out of the live structure (tracks, patterns,
// replaced snapshots) goes through the song's `DeferredReclaimer`.

use crate::config::EngineConfig;
use crate::messaging::{Notification, NotificationCategory, NotificationProducer, SignalBus};
use crate::reclaim::{DeferredReclaimer, Garbage, GraceTracker, ReaderClock};
use crate::sequencer::pattern::{PatternConfig, PatternId, PatternStore};
use crate::sequencer::time::SongTime;
use crate::sequencer::track::{Track, TrackId, TrackSnapshot};
use arc_swap::{ArcSwap, Guard};
use crossbeam_channel::Receiver;
use ringbuf::traits::Producer;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_BPM: f64 = 120.0;

/// Observer notifications for song-level changes
#[derive(Debug, Clone, PartialEq)]
pub enum SongSignal {
    LengthChanged(u32),
    LoopStartChanged(Option<u32>),
    LoopEndChanged(Option<u32>),
    TempoChangeSet { beat: u32, bpm: f64 },
    TempoChangeRemoved(u32),
    TrackAdded(TrackId),
    TrackRemoved(TrackId),
    TitleChanged(String),
}

/// Immutable view of the song structure for the realtime player
#[derive(Debug, Clone)]
pub struct SongSnapshot {
    pub length: u32,
    pub loop_start: Option<u32>,
    pub loop_end: Option<u32>,
    /// (beat, bpm) sorted by beat, always starting at beat 0
    pub tempo: Vec<(u32, f64)>,
    pub tracks: Vec<TrackSnapshot>,
}

impl SongSnapshot {
    fn empty(length: u32) -> Self {
        Self {
            length,
            loop_start: None,
            loop_end: None,
            tempo: vec![(0, DEFAULT_BPM)],
            tracks: Vec::new(),
        }
    }

    pub fn bpm_at(&self, beat: u32) -> f64 {
        self.tempo
            .iter()
            .take_while(|(b, _)| *b <= beat)
            .last()
            .map_or(DEFAULT_BPM, |(_, bpm)| *bpm)
    }

    pub fn end(&self) -> SongTime {
        SongTime::from_beats(self.length)
    }
}

/// Realtime-side handle: the published snapshot and the grace clock
#[derive(Debug, Clone)]
pub struct SongReader {
    snapshot: Arc<ArcSwap<SongSnapshot>>,
    clock: ReaderClock,
    dropped: Arc<AtomicU64>,
}

impl SongReader {
    /// Current snapshot; wait-free
    pub fn load(&self) -> Guard<Arc<SongSnapshot>> {
        self.snapshot.load()
    }

    pub fn clock(&self) -> &ReaderClock {
        &self.clock
    }

    /// Count events an output buffer refused; reported on the next control tick
    pub fn report_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }
}

pub struct Song {
    title: String,
    length: u32,
    loop_start: Option<u32>,
    loop_end: Option<u32>,
    tempo: BTreeMap<u32, f64>,
    tracks: BTreeMap<TrackId, Track>,
    next_track_id: TrackId,

    pattern_config: PatternConfig,
    default_pattern: (u32, u32, u32),

    reclaimer: DeferredReclaimer<Garbage>,
    /// Garbage the reclaimer refused; re-queued on the next tick
    overflow: Vec<Garbage>,
    reclaim_faults: u64,
    clock: ReaderClock,
    grace: GraceTracker,

    snapshot: Arc<ArcSwap<SongSnapshot>>,
    structure_dirty: bool,

    signals: SignalBus<SongSignal>,
    notifications: Option<NotificationProducer>,
    dropped: Arc<AtomicU64>,
    dropped_reported: u64,
}

impl Song {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        let length = config.default_song_length;
        Self {
            title: String::new(),
            length,
            loop_start: None,
            loop_end: None,
            tempo: BTreeMap::from([(0, DEFAULT_BPM)]),
            tracks: BTreeMap::new(),
            next_track_id: 1,
            pattern_config: config.pattern_config(),
            default_pattern: (
                config.default_pattern_length,
                config.default_steps,
                config.default_cc_steps,
            ),
            reclaimer: DeferredReclaimer::with_batch(config.reclaimer_capacity, config.confirm_batch),
            overflow: Vec::new(),
            reclaim_faults: 0,
            clock: ReaderClock::new(),
            grace: GraceTracker::new(),
            snapshot: Arc::new(ArcSwap::from_pointee(SongSnapshot::empty(length))),
            structure_dirty: true,
            signals: SignalBus::new(),
            notifications: None,
            dropped: Arc::new(AtomicU64::new(0)),
            dropped_reported: 0,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        let title = title.into();
        if title != self.title {
            self.title = title.clone();
            self.signals.emit(SongSignal::TitleChanged(title));
        }
    }

    /// Length in beats
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn end(&self) -> SongTime {
        SongTime::from_beats(self.length)
    }

    /// Set the length without touching sequence entries, loop or tempo map.
    /// The `SetSongLength` command adjusts those first.
    pub fn set_length(&mut self, length: u32) -> bool {
        if length == 0 {
            return false;
        }
        if length != self.length {
            self.length = length;
            for track in self.tracks.values_mut() {
                track.set_song_length(length);
            }
            self.structure_dirty = true;
            self.signals.emit(SongSignal::LengthChanged(length));
        }
        true
    }

    pub fn loop_start(&self) -> Option<u32> {
        self.loop_start
    }

    pub fn set_loop_start(&mut self, beat: Option<u32>) {
        if beat != self.loop_start {
            self.loop_start = beat;
            self.structure_dirty = true;
            self.signals.emit(SongSignal::LoopStartChanged(beat));
        }
    }

    pub fn loop_end(&self) -> Option<u32> {
        self.loop_end
    }

    pub fn set_loop_end(&mut self, beat: Option<u32>) {
        if beat != self.loop_end {
            self.loop_end = beat;
            self.structure_dirty = true;
            self.signals.emit(SongSignal::LoopEndChanged(beat));
        }
    }

    // ---------------------------------------------------------------------
    // Tempo map
    // ---------------------------------------------------------------------

    pub fn tempo_changes(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.tempo.iter().map(|(beat, bpm)| (*beat, *bpm))
    }

    pub fn tempo_at(&self, beat: u32) -> Option<f64> {
        self.tempo.get(&beat).copied()
    }

    /// Tempo in effect at `beat`
    pub fn bpm_at(&self, beat: u32) -> f64 {
        self.tempo
            .range(..=beat)
            .next_back()
            .map_or(DEFAULT_BPM, |(_, bpm)| *bpm)
    }

    /// Set the tempo from `beat` on, returning the tempo it replaced there
    pub fn add_tempo_change(&mut self, beat: u32, bpm: f64) -> Option<f64> {
        let previous = self.tempo.insert(beat, bpm);
        self.structure_dirty = true;
        self.signals.emit(SongSignal::TempoChangeSet { beat, bpm });
        previous
    }

    /// Beat 0 always carries a tempo and cannot be removed
    pub fn remove_tempo_change(&mut self, beat: u32) -> Option<f64> {
        if beat == 0 {
            return None;
        }
        let bpm = self.tempo.remove(&beat)?;
        self.structure_dirty = true;
        self.signals.emit(SongSignal::TempoChangeRemoved(beat));
        Some(bpm)
    }

    // ---------------------------------------------------------------------
    // Tracks
    // ---------------------------------------------------------------------

    pub fn add_track(&mut self, name: impl Into<String>) -> TrackId {
        let id = self.next_track_id;
        let track = Track::new(id, name, self.length, self.pattern_config);
        self.insert_track(track);
        id
    }

    /// Put a track (new or previously disowned) into the song under its id.
    /// A clashing id is replaced by a fresh one, which is returned.
    pub fn insert_track(&mut self, mut track: Track) -> TrackId {
        if self.tracks.contains_key(&track.id()) {
            track.set_id(self.next_track_id);
        }
        let id = track.id();
        track.set_song_length(self.length);
        track.mark_changed();
        self.next_track_id = self.next_track_id.max(id + 1);
        self.tracks.insert(id, track);
        self.structure_dirty = true;
        self.signals.emit(SongSignal::TrackAdded(id));
        id
    }

    /// Take a track out of the song; the caller must retire it
    pub fn disown_track(&mut self, id: TrackId) -> Option<Track> {
        let track = self.tracks.remove(&id)?;
        self.structure_dirty = true;
        self.signals.emit(SongSignal::TrackRemoved(id));
        Some(track)
    }

    pub fn remove_track(&mut self, id: TrackId) -> bool {
        match self.disown_track(id) {
            Some(track) => {
                self.retire(Box::new(track));
                true
            }
            None => false,
        }
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn tracks_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn pattern(&self, track: TrackId, pattern: PatternId) -> Option<&PatternStore> {
        self.tracks.get(&track)?.pattern(pattern)
    }

    pub fn pattern_mut(&mut self, track: TrackId, pattern: PatternId) -> Option<&mut PatternStore> {
        self.tracks.get_mut(&track)?.pattern_mut(pattern)
    }

    /// (length, steps, cc_steps) for new patterns
    pub fn default_pattern_geometry(&self) -> (u32, u32, u32) {
        self.default_pattern
    }

    pub fn subscribe(&mut self) -> Receiver<SongSignal> {
        self.signals.subscribe()
    }

    /// Route engine faults to a notification channel as well as the log
    pub fn set_notification_producer(&mut self, producer: NotificationProducer) {
        self.notifications = Some(producer);
    }

    /// Push a notification if a channel is set; a full channel drops it
    pub fn notify(&mut self, notification: Notification) {
        if let Some(tx) = self.notifications.as_mut() {
            let _ = tx.try_push(notification);
        }
    }

    /// Events refused by player output buffers so far
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn check_playback(&mut self) {
        let dropped = self.dropped_events();
        if dropped > self.dropped_reported {
            let new = dropped - self.dropped_reported;
            self.dropped_reported = dropped;
            log::warn!("Playback dropped {} events (output buffer full)", new);
            self.notify(Notification::warning(
                NotificationCategory::Playback,
                format!("{new} MIDI events dropped, output buffer full"),
            ));
        }
    }

    // ---------------------------------------------------------------------
    // Publication and reclamation
    // ---------------------------------------------------------------------

    /// Realtime handle on the published snapshot
    pub fn reader(&self) -> SongReader {
        SongReader {
            snapshot: self.snapshot.clone(),
            clock: self.clock.clone(),
            dropped: self.dropped.clone(),
        }
    }

    pub fn reader_clock(&self) -> &ReaderClock {
        &self.clock
    }

    /// Hand an object that may still be visible to the realtime thread to
    /// the reclaimer
    pub fn retire(&mut self, garbage: Garbage) {
        if let Err(garbage) = self.reclaimer.queue_deletion(garbage) {
            self.reclaim_faults += 1;
            log::error!(
                "Song reclaimer full ({} slots); holding object until the next tick",
                self.reclaimer.capacity()
            );
            self.notify(Notification::error(
                NotificationCategory::Reclaim,
                "Reclamation queue overflow",
            ));
            self.overflow.push(garbage);
        }
    }

    /// Publish a new snapshot if the song structure changed since the last
    /// commit. Called by the command stack after every successful command.
    pub fn commit(&mut self) {
        let mut changed = std::mem::take(&mut self.structure_dirty);
        let mut garbage = Vec::new();
        for track in self.tracks.values_mut() {
            changed |= track.take_changed();
            garbage.extend(track.take_garbage());
        }
        for item in garbage {
            self.retire(item);
        }
        if !changed {
            return;
        }

        let snapshot = SongSnapshot {
            length: self.length,
            loop_start: self.loop_start,
            loop_end: self.loop_end,
            tempo: self.tempo_changes().collect(),
            tracks: self.tracks.values().map(|t| t.snapshot()).collect(),
        };
        let old = self.snapshot.swap(Arc::new(snapshot));
        self.retire(Box::new(old));
        log::trace!("Published song snapshot ({} tracks)", self.tracks.len());
    }

    /// Periodic reclamation tick (control side)
    ///
    /// Does nothing until the realtime reader finished every pass that was
    /// running at the previous tick. Then destroys what the previous tick
    /// confirmed, and confirms what was queued since.
    pub fn collect_garbage(&mut self) -> usize {
        self.check_playback();
        if !self.grace.elapsed(&self.clock) {
            return 0;
        }

        let mut reclaimed = self.reclaimer.do_delete();
        for track in self.tracks.values_mut() {
            for pattern in track.patterns_mut() {
                reclaimed += pattern.reclaim_tick();
            }
        }

        let overflow = std::mem::take(&mut self.overflow);
        for item in overflow {
            self.retire(item);
        }

        self.reclaimer.confirm_batch();
        self.grace.mark(&self.clock);

        if reclaimed > 0 {
            log::trace!("Reclaimed {} objects", reclaimed);
        }
        reclaimed
    }

    /// Objects waiting in the song reclaimer
    pub fn pending_garbage(&self) -> usize {
        self.reclaimer.pending_len() + self.reclaimer.confirmed_len() + self.overflow.len()
    }

    /// Reclaimer overflows, in the song and in every pattern
    pub fn reclaim_faults(&self) -> u64 {
        self.reclaim_faults
            + self
                .tracks
                .values()
                .flat_map(|t| t.patterns())
                .map(|p| p.reclaim_faults())
                .sum::<u64>()
    }
}

impl Default for Song {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Song {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Song")
            .field("title", &self.title)
            .field("length", &self.length)
            .field("loop_start", &self.loop_start)
            .field("loop_end", &self.loop_end)
            .field("tracks", &self.tracks)
            .finish_non_exhaustive()
    }
}
