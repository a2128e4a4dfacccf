// Song time - beat/tick positions on the song timeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// A position or a duration on the song timeline
///
/// Always normalized: `tick < TICKS_PER_BEAT`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SongTime {
    pub beat: u32,
    pub tick: u32,
}

impl SongTime {
    /// Ticks per beat (PPQN)
    pub const TICKS_PER_BEAT: u32 = 480;

    /// Creates a new time, carrying excess ticks into beats
    pub fn new(beat: u32, tick: u32) -> Self {
        Self {
            beat: beat.saturating_add(tick / Self::TICKS_PER_BEAT),
            tick: tick % Self::TICKS_PER_BEAT,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_beats(beat: u32) -> Self {
        Self { beat, tick: 0 }
    }

    /// Saturates at the last representable tick
    pub fn from_total_ticks(total_ticks: u64) -> Self {
        let tpb = Self::TICKS_PER_BEAT as u64;
        match u32::try_from(total_ticks / tpb) {
            Ok(beat) => Self {
                beat,
                tick: (total_ticks % tpb) as u32,
            },
            Err(_) => Self::max(),
        }
    }

    pub fn max() -> Self {
        Self {
            beat: u32::MAX,
            tick: Self::TICKS_PER_BEAT - 1,
        }
    }

    pub fn to_total_ticks(&self) -> u64 {
        self.beat as u64 * Self::TICKS_PER_BEAT as u64 + self.tick as u64
    }

    /// Start time of pattern step `step` in a grid of `steps_per_beat`
    pub fn from_steps(step: u32, steps_per_beat: u32) -> Self {
        let steps_per_beat = steps_per_beat.max(1) as u64;
        Self::from_total_ticks(step as u64 * Self::TICKS_PER_BEAT as u64 / steps_per_beat)
    }

    /// Index of the step containing this time in a grid of `steps_per_beat`
    pub fn to_steps(&self, steps_per_beat: u32) -> u64 {
        self.to_total_ticks() * steps_per_beat as u64 / Self::TICKS_PER_BEAT as u64
    }

    /// Subtraction clamped at zero
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self::from_total_ticks(self.to_total_ticks().saturating_sub(rhs.to_total_ticks()))
    }

    pub fn is_zero(&self) -> bool {
        self.beat == 0 && self.tick == 0
    }
}

impl Add for SongTime {
    type Output = SongTime;

    fn add(self, rhs: Self) -> Self::Output {
        Self::from_total_ticks(self.to_total_ticks() + rhs.to_total_ticks())
    }
}

impl Sub for SongTime {
    type Output = SongTime;

    /// Clamped at zero; song positions are never negative
    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl fmt::Display for SongTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.beat, self.tick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let t = SongTime::new(1, SongTime::TICKS_PER_BEAT + 10);
        assert_eq!(t, SongTime { beat: 2, tick: 10 });
    }

    #[test]
    fn test_ordering() {
        assert!(SongTime::new(1, 479) < SongTime::new(2, 0));
        assert!(SongTime::new(3, 0) > SongTime::new(2, 479));
    }

    #[test]
    fn test_arithmetic() {
        let a = SongTime::new(2, 400);
        let b = SongTime::new(1, 100);
        assert_eq!(a + b, SongTime::new(4, 20));
        assert_eq!(a - b, SongTime::new(1, 300));
        assert_eq!(b - a, SongTime::zero());
    }

    #[test]
    fn test_arithmetic_saturates() {
        let far = SongTime::new(u32::MAX, 0);
        assert_eq!(far + SongTime::from_beats(10), SongTime::max());
        assert_eq!(SongTime::new(u32::MAX, 960), SongTime { beat: u32::MAX, tick: 0 });
        assert!(far + far > SongTime::from_beats(64));
    }

    #[test]
    fn test_step_conversion() {
        // 4 steps per beat -> 120 ticks per step
        assert_eq!(SongTime::from_steps(5, 4), SongTime::new(1, 120));
        assert_eq!(SongTime::new(1, 130).to_steps(4), 5);
        assert_eq!(SongTime::new(1, 119).to_steps(4), 4);
    }

    #[test]
    fn test_display() {
        assert_eq!(SongTime::new(3, 7).to_string(), "3.007");
    }
}
