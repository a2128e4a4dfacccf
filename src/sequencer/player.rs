// Sequencer Player - Reads the published song and emits MIDI events
//
// Runs on the realtime thread: no locks, no allocation, no logging. Each
// `process()` call is one traversal pass bracketed by the song's reader clock,
// which is what lets the control side reclaim unlinked events safely.

use crate::midi::event::{EventBuffer, MidiEvent};
use crate::reclaim::{ReaderClock, ReaderRegistration};
use crate::sequencer::controller::{is_cc, is_pbend};
use crate::sequencer::curve::Curve;
use crate::sequencer::pattern::PatternReader;
use crate::sequencer::song::{SongReader, SongSnapshot};
use crate::sequencer::time::SongTime;

const TPB: u64 = SongTime::TICKS_PER_BEAT as u64;

/// Upper bound on loop wraps handled in one process call
const MAX_WRAPS: usize = 64;

/// Destination of one pass: the buffer plus sounding-note bookkeeping
struct Output<'a, B: EventBuffer> {
    buffer: &'a mut B,
    /// One bit per key, per channel
    active: &'a mut [u128; 16],
    dropped: &'a mut u64,
    written: usize,
}

impl<B: EventBuffer> Output<'_, B> {
    fn emit(&mut self, ticks: u64, event: MidiEvent) {
        match event {
            MidiEvent::NoteOn { channel, note, .. } => {
                self.active[(channel & 0x0F) as usize] |= 1u128 << (note & 0x7F);
            }
            MidiEvent::NoteOff { channel, note } => {
                self.active[(channel & 0x0F) as usize] &= !(1u128 << (note & 0x7F));
            }
            _ => {}
        }
        if self.buffer.write_event(SongTime::from_total_ticks(ticks), event) {
            self.written += 1;
        } else {
            *self.dropped += 1;
        }
    }
}

fn step_ticks(step: u32, steps_per_beat: u32) -> u64 {
    step as u64 * TPB / steps_per_beat.max(1) as u64
}

fn controller_event(channel: u8, number: u32, value: i32) -> Option<MidiEvent> {
    if is_cc(number) {
        Some(MidiEvent::ControlChange {
            channel,
            controller: number as u8,
            value: value.clamp(0, 127) as u8,
        })
    } else if is_pbend(number) {
        Some(MidiEvent::PitchBend {
            channel,
            value: (value + 8192).clamp(0, 0x3FFF) as i16,
        })
    } else {
        None
    }
}

/// Emit a curve's value at every step where it changes, for steps whose
/// time `offset + step_ticks(step)` falls in `[from, to)`
#[allow(clippy::too_many_arguments)]
fn sequence_curve<B: EventBuffer>(
    curve: &Curve,
    number: u32,
    steps_per_beat: u32,
    offset: u64,
    from: u64,
    to: u64,
    channel: u8,
    out: &mut Output<'_, B>,
) {
    let first = (from * steps_per_beat as u64 / TPB) as u32;
    let last = ((to * steps_per_beat as u64).div_ceil(TPB) as u32).min(curve.size());
    for step in first..=last {
        let t = step_ticks(step, steps_per_beat);
        if t < from || t >= to {
            continue;
        }
        let Some(value) = curve.value_at(step) else {
            continue;
        };
        let previous = step.checked_sub(1).and_then(|s| curve.value_at(s));
        if step == 0 || previous != Some(value) {
            if let Some(event) = controller_event(channel, number, value) {
                out.emit(offset + t, event);
            }
        }
    }
}

/// Emit one pattern placed at `offset` (ticks) and cut at `length` ticks, for
/// the pattern-local window `[from, to)`. Note offs use `(from, to]`.
fn sequence_pattern<B: EventBuffer>(
    pattern: &PatternReader,
    offset: u64,
    length: u64,
    from: u64,
    to: u64,
    channel: u8,
    out: &mut Output<'_, B>,
) {
    let spb = pattern.steps();
    let slots = pattern.slot_count();
    let first = ((from * spb as u64 / TPB) as u32).saturating_sub(1);
    let last = if to >= length {
        slots
    } else {
        ((to * spb as u64).div_ceil(TPB) as u32 + 1).min(slots)
    };

    pattern.for_each_event(first, last, |event| {
        if event.onset {
            let t = step_ticks(event.step, spb);
            if t >= from && t < to && t < length {
                out.emit(
                    offset + t,
                    MidiEvent::NoteOn {
                        channel,
                        note: event.key,
                        velocity: event.velocity.max(1),
                    },
                );
            }
        } else {
            let onset_step = (event.step + 1).saturating_sub(event.length);
            if step_ticks(onset_step, spb) >= length {
                return;
            }
            let off = step_ticks(event.step + 1, spb).min(length);
            if off > from && off <= to {
                out.emit(
                    offset + off,
                    MidiEvent::NoteOff {
                        channel,
                        note: event.key,
                    },
                );
            }
        }
    });

    let cc_spb = pattern.cc_steps();
    let cc_first = (from * cc_spb as u64 / TPB) as u32;
    let cc_last = (to * cc_spb as u64).div_ceil(TPB) as u32 + 1;
    pattern.for_each_cc(cc_first, cc_last, |number, step, value| {
        let t = step_ticks(step, cc_spb);
        if t >= from && t < to && t < length {
            out.emit(
                offset + t,
                MidiEvent::ControlChange {
                    channel,
                    controller: number,
                    value,
                },
            );
        }
    });

    let curve_to = to.min(length);
    pattern.for_each_curve(|number, curve| {
        sequence_curve(curve, number, spb, offset, from, curve_to, channel, out);
    });
}

/// Emit everything in the song window `[from, to)` (ticks)
fn sequence_song<B: EventBuffer>(snapshot: &SongSnapshot, from: u64, to: u64, out: &mut Output<'_, B>) {
    for track in &snapshot.tracks {
        for entry in &track.sequence {
            let start = entry.start.to_total_ticks();
            let end = entry.end().to_total_ticks();
            if start >= to || end <= from {
                continue;
            }
            let Some(pattern) = track.pattern(entry.pattern_id) else {
                continue;
            };
            let local_from = from.saturating_sub(start);
            let local_to = to.min(end) - start;
            sequence_pattern(
                pattern,
                start,
                end - start,
                local_from,
                local_to,
                track.channel,
                out,
            );
        }

        // Global controller curves have one step per beat
        for (number, curve) in &track.curves {
            sequence_curve(curve, *number, 1, 0, from, to, track.channel, out);
        }
    }
}

/// Realtime song player
///
/// Owns a reader registration for as long as it lives, so the control side
/// waits for its passes before reclaiming.
pub struct SongPlayer {
    reader: SongReader,
    clock: ReaderClock,
    _registration: ReaderRegistration,
    position: SongTime,
    active: [u128; 16],
    dropped: u64,
}

impl SongPlayer {
    pub fn new(reader: SongReader) -> Self {
        let clock = reader.clock().clone();
        let registration = clock.attach();
        Self {
            reader,
            clock,
            _registration: registration,
            position: SongTime::zero(),
            active: [0; 16],
            dropped: 0,
        }
    }

    pub fn position(&self) -> SongTime {
        self.position
    }

    /// Move the playhead. Call `stop()` first to release sounding notes.
    pub fn locate(&mut self, position: SongTime) {
        self.position = position;
    }

    /// Events the output buffer refused
    pub fn dropped_events(&self) -> u64 {
        self.dropped
    }

    /// Number of notes currently sounding
    pub fn active_notes(&self) -> u32 {
        self.active.iter().map(|bits| bits.count_ones()).sum()
    }

    /// Sequence the next `duration` of song time and advance the playhead,
    /// wrapping at the loop end when a loop is set. Returns the number of
    /// events written.
    pub fn process<B: EventBuffer>(&mut self, duration: SongTime, buffer: &mut B) -> usize {
        let _pass = self.clock.begin_pass();
        let snapshot = self.reader.load();

        let song_end = snapshot.end().to_total_ticks();
        let loop_range = match (snapshot.loop_start, snapshot.loop_end) {
            (Some(start), Some(end)) if start < end => Some((start as u64 * TPB, end as u64 * TPB)),
            _ => None,
        };

        let dropped_before = self.dropped;
        let mut out = Output {
            buffer,
            active: &mut self.active,
            dropped: &mut self.dropped,
            written: 0,
        };
        let mut from = self.position.to_total_ticks();
        let mut remaining = duration.to_total_ticks();

        for _ in 0..MAX_WRAPS {
            if remaining == 0 {
                break;
            }
            let limit = match loop_range {
                Some((_, end)) if from < end => end,
                _ => song_end,
            };
            if from >= limit {
                break;
            }
            let to = (from + remaining).min(limit);
            sequence_song(&snapshot, from, to, &mut out);
            remaining -= to - from;
            from = to;
            if let Some((start, end)) = loop_range {
                if from == end {
                    from = start;
                }
            }
        }

        let written = out.written;
        self.position = SongTime::from_total_ticks(from);
        self.publish_dropped(dropped_before);
        written
    }

    fn publish_dropped(&self, before: u64) {
        if self.dropped > before {
            self.reader.report_dropped(self.dropped - before);
        }
    }

    /// Release every sounding note
    pub fn stop<B: EventBuffer>(&mut self, buffer: &mut B) -> usize {
        let dropped_before = self.dropped;
        let mut out = Output {
            buffer,
            active: &mut [0; 16],
            dropped: &mut self.dropped,
            written: 0,
        };
        let time = self.position.to_total_ticks();
        for (channel, bits) in self.active.iter_mut().enumerate() {
            while *bits != 0 {
                let note = bits.trailing_zeros() as u8;
                *bits &= !(1u128 << note);
                out.emit(
                    time,
                    MidiEvent::NoteOff {
                        channel: channel as u8,
                        note,
                    },
                );
            }
        }
        let written = out.written;
        self.publish_dropped(dropped_before);
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{NotificationCategory, create_notification_channel};
    use crate::midi::event::FixedEventBuffer;
    use ringbuf::traits::Consumer;
    use crate::sequencer::controller::ControllerInfo;
    use crate::sequencer::song::Song;

    fn song_with_pattern() -> (Song, u32, u32) {
        let mut song = Song::new();
        let track = song.add_track("Lead");
        let t = song.track_mut(track).unwrap();
        let pattern = t.add_pattern("A", 4, 4, 4).unwrap();
        t.set_sequence_entry(SongTime::zero(), pattern, SongTime::from_beats(4));
        song.commit();
        (song, track, pattern)
    }

    fn notes(buffer: &FixedEventBuffer) -> Vec<(SongTime, MidiEvent)> {
        buffer
            .events()
            .iter()
            .filter(|e| matches!(e.event, MidiEvent::NoteOn { .. } | MidiEvent::NoteOff { .. }))
            .map(|e| (e.time, e.event))
            .collect()
    }

    #[test]
    fn test_note_on_and_off() {
        let (mut song, track, pattern) = song_with_pattern();
        song.pattern_mut(track, pattern)
            .unwrap()
            .add_note(4, 60, 100, 2)
            .unwrap();

        let mut player = SongPlayer::new(song.reader());
        let mut buffer = FixedEventBuffer::with_capacity(64);
        player.process(SongTime::from_beats(4), &mut buffer);

        assert_eq!(
            notes(&buffer),
            vec![
                (
                    SongTime::from_beats(1),
                    MidiEvent::NoteOn {
                        channel: 0,
                        note: 60,
                        velocity: 100
                    }
                ),
                (
                    SongTime::new(1, 240),
                    MidiEvent::NoteOff { channel: 0, note: 60 }
                ),
            ]
        );
        assert_eq!(player.active_notes(), 0);
    }

    #[test]
    fn test_split_windows_emit_each_event_once() {
        let (mut song, track, pattern) = song_with_pattern();
        let p = song.pattern_mut(track, pattern).unwrap();
        p.add_note(0, 60, 100, 4).unwrap();
        p.add_note(4, 62, 100, 4).unwrap();

        let mut player = SongPlayer::new(song.reader());
        let mut buffer = FixedEventBuffer::with_capacity(64);
        for _ in 0..16 {
            player.process(SongTime::new(0, 120), &mut buffer);
        }
        assert_eq!(notes(&buffer).len(), 4);
        assert_eq!(player.position(), SongTime::from_beats(4));
    }

    #[test]
    fn test_entry_cuts_long_note() {
        let mut song = Song::new();
        let track = song.add_track("Lead");
        let t = song.track_mut(track).unwrap();
        let pattern = t.add_pattern("A", 4, 4, 4).unwrap();
        t.pattern_mut(pattern).unwrap().add_note(0, 60, 100, 16).unwrap();
        t.pattern_mut(pattern).unwrap().add_note(8, 64, 100, 1).unwrap();
        t.set_sequence_entry(SongTime::zero(), pattern, SongTime::from_beats(1));
        song.commit();

        let mut player = SongPlayer::new(song.reader());
        let mut buffer = FixedEventBuffer::with_capacity(64);
        player.process(SongTime::from_beats(8), &mut buffer);

        assert_eq!(
            notes(&buffer),
            vec![
                (
                    SongTime::zero(),
                    MidiEvent::NoteOn {
                        channel: 0,
                        note: 60,
                        velocity: 100
                    }
                ),
                (
                    SongTime::from_beats(1),
                    MidiEvent::NoteOff { channel: 0, note: 60 }
                ),
            ]
        );
    }

    #[test]
    fn test_loop_wraps_playhead() {
        let (mut song, _, _) = song_with_pattern();
        song.set_loop_start(Some(0));
        song.set_loop_end(Some(2));
        song.commit();

        let mut player = SongPlayer::new(song.reader());
        let mut buffer = FixedEventBuffer::with_capacity(8);
        player.process(SongTime::from_beats(3), &mut buffer);
        assert_eq!(player.position(), SongTime::from_beats(1));
    }

    #[test]
    fn test_control_changes_and_curves() {
        let (mut song, track, pattern) = song_with_pattern();
        let t = song.track_mut(track).unwrap();
        t.add_controller(ControllerInfo::cc(1, "Mod"));
        let p = t.pattern_mut(pattern).unwrap();
        p.add_cc(7, 2, 90).unwrap();
        p.add_curve_point(1, 0, 10).unwrap();

        let mut player = SongPlayer::new(song.reader());
        let mut buffer = FixedEventBuffer::with_capacity(64);
        player.process(SongTime::from_beats(4), &mut buffer);

        let ccs: Vec<_> = buffer
            .events()
            .iter()
            .filter_map(|e| match e.event {
                MidiEvent::ControlChange { controller, value, .. } => Some((e.time, controller, value)),
                _ => None,
            })
            .collect();
        assert!(ccs.contains(&(SongTime::new(0, 240), 7, 90)));
        assert!(ccs.contains(&(SongTime::zero(), 1, 10)));
        // A flat curve is sent once
        assert_eq!(ccs.iter().filter(|(_, c, _)| *c == 1).count(), 1);
    }

    #[test]
    fn test_stop_releases_sounding_notes() {
        let (mut song, track, pattern) = song_with_pattern();
        song.pattern_mut(track, pattern)
            .unwrap()
            .add_note(0, 60, 100, 8)
            .unwrap();

        let mut player = SongPlayer::new(song.reader());
        let mut buffer = FixedEventBuffer::with_capacity(8);
        player.process(SongTime::from_beats(1), &mut buffer);
        assert_eq!(player.active_notes(), 1);

        buffer.clear();
        assert_eq!(player.stop(&mut buffer), 1);
        assert_eq!(player.active_notes(), 0);
    }

    #[test]
    fn test_full_buffer_counts_drops() {
        let (mut song, track, pattern) = song_with_pattern();
        let p = song.pattern_mut(track, pattern).unwrap();
        for key in 60..64 {
            p.add_note(0, key, 100, 1).unwrap();
        }

        let mut player = SongPlayer::new(song.reader());
        let mut buffer = FixedEventBuffer::with_capacity(2);
        let capacity = buffer.capacity() as u64;
        player.process(SongTime::from_beats(1), &mut buffer);
        assert_eq!(player.dropped_events(), 8 - capacity);
        assert_eq!(song.dropped_events(), 8 - capacity);
    }

    #[test]
    fn test_drops_reported_on_control_tick() {
        let (mut song, track, pattern) = song_with_pattern();
        let (tx, mut rx) = create_notification_channel(4);
        song.set_notification_producer(tx);
        let p = song.pattern_mut(track, pattern).unwrap();
        for key in 60..64 {
            p.add_note(0, key, 100, 1).unwrap();
        }

        let mut player = SongPlayer::new(song.reader());
        let mut buffer = FixedEventBuffer::with_capacity(1);
        player.process(SongTime::from_beats(1), &mut buffer);
        assert!(rx.try_pop().is_none());

        song.collect_garbage();
        let notification = rx.try_pop().unwrap();
        assert_eq!(notification.category, NotificationCategory::Playback);
        assert_eq!(notification.message, "7 MIDI events dropped, output buffer full");

        // Reported once
        song.collect_garbage();
        assert!(rx.try_pop().is_none());
    }
}
