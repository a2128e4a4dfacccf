// MIDI types events

use crate::sequencer::time::SongTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// 14-bit value, 8192 is centered
    PitchBend { channel: u8, value: i16 },
}

/// MIDI event stamped with the song position it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEventTimed {
    pub event: MidiEvent,
    pub time: SongTime,
}

impl MidiEvent {
    /// Parse un RAW MIDI message
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 {
            return None;
        }

        let status = bytes[0];
        let channel = status & 0x0F;

        match status & 0xF0 {
            0x90 => {
                let note = bytes[1];
                let velocity = bytes[2];
                // Velocity 0 = Note Off
                if velocity == 0 {
                    Some(MidiEvent::NoteOff { channel, note })
                } else {
                    Some(MidiEvent::NoteOn {
                        channel,
                        note,
                        velocity,
                    })
                }
            }
            0x80 => Some(MidiEvent::NoteOff {
                channel,
                note: bytes[1],
            }),
            0xB0 => Some(MidiEvent::ControlChange {
                channel,
                controller: bytes[1],
                value: bytes[2],
            }),
            0xE0 => {
                let lsb = bytes[1] as i16;
                let msb = bytes[2] as i16;
                Some(MidiEvent::PitchBend {
                    channel,
                    value: (msb << 7) | lsb,
                })
            }
            _ => None,
        }
    }

    /// Encode as a three byte channel message
    pub fn to_bytes(&self) -> [u8; 3] {
        match *self {
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => [0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiEvent::NoteOff { channel, note } => [0x80 | (channel & 0x0F), note & 0x7F, 0x40],
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } => [0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F],
            MidiEvent::PitchBend { channel, value } => {
                let value = value.clamp(0, 0x3FFF) as u16;
                [
                    0xE0 | (channel & 0x0F),
                    (value & 0x7F) as u8,
                    ((value >> 7) & 0x7F) as u8,
                ]
            }
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. } => channel,
        }
    }
}

/// Sink for events produced by the realtime player
pub trait EventBuffer {
    /// Write one event. Returns false when the buffer cannot take it; must not
    /// block or allocate.
    fn write_event(&mut self, time: SongTime, event: MidiEvent) -> bool;
}

/// Event buffer with storage reserved up front
#[derive(Debug)]
pub struct FixedEventBuffer {
    events: Vec<MidiEventTimed>,
    dropped: u64,
}

impl FixedEventBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            dropped: 0,
        }
    }

    pub fn events(&self) -> &[MidiEventTimed] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.events.capacity()
    }

    /// Events refused because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventBuffer for FixedEventBuffer {
    fn write_event(&mut self, time: SongTime, event: MidiEvent) -> bool {
        if self.events.len() == self.events.capacity() {
            self.dropped += 1;
            return false;
        }
        self.events.push(MidiEventTimed { event, time });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on() {
        let bytes = [0x90, 60, 100]; // Note On, note 60 (C4), velocity 100
        let event = MidiEvent::from_bytes(&bytes).unwrap();

        assert_eq!(
            event,
            MidiEvent::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100
            }
        );
    }

    #[test]
    fn test_note_off_velocity_zero() {
        // Note On avec velocity 0 = Note Off
        let bytes = [0x93, 64, 0];
        let event = MidiEvent::from_bytes(&bytes).unwrap();

        assert_eq!(event, MidiEvent::NoteOff { channel: 3, note: 64 });
    }

    #[test]
    fn test_pitch_bend() {
        let bytes = [0xE0, 0x00, 0x40]; // Pitch Bend, valeur centrée
        match MidiEvent::from_bytes(&bytes).unwrap() {
            MidiEvent::PitchBend { value, .. } => assert_eq!(value, 8192),
            _ => panic!("Expected PitchBend event"),
        }
    }

    #[test]
    fn test_invalid_messages() {
        assert!(MidiEvent::from_bytes(&[]).is_none());
        assert!(MidiEvent::from_bytes(&[0x90, 60]).is_none());
        assert!(MidiEvent::from_bytes(&[0xF0, 0x00, 0x00]).is_none());
    }

    #[test]
    fn test_to_bytes_keeps_channel() {
        let event = MidiEvent::ControlChange {
            channel: 9,
            controller: 7,
            value: 127,
        };
        let bytes = event.to_bytes();
        assert_eq!(bytes, [0xB9, 7, 127]);
        assert_eq!(MidiEvent::from_bytes(&bytes), Some(event));
        assert_eq!(event.channel(), 9);
    }

    #[test]
    fn test_fixed_buffer_refuses_when_full() {
        let mut buffer = FixedEventBuffer::with_capacity(1);
        let capacity = buffer.capacity();
        let event = MidiEvent::NoteOff { channel: 0, note: 1 };

        for _ in 0..capacity {
            assert!(buffer.write_event(SongTime::zero(), event));
        }
        assert!(!buffer.write_event(SongTime::zero(), event));
        assert_eq!(buffer.dropped(), 1);

        buffer.clear();
        assert!(buffer.is_empty());
    }
}
