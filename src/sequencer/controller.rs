// Controller descriptions for tracks

use serde::{Deserialize, Serialize};

/// Controller number used for pitch bend. CC numbers are 0-127.
pub const PITCH_BEND: u32 = 0x1_0000;

/// Number of MIDI continuous controllers
pub const CC_COUNT: usize = 128;

pub fn is_cc(number: u32) -> bool {
    number < CC_COUNT as u32
}

pub fn is_pbend(number: u32) -> bool {
    number == PITCH_BEND
}

/// Description of an automatable controller on a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    pub number: u32,
    pub name: String,
    pub default: i32,
    pub min: i32,
    pub max: i32,
    /// Global controllers have one curve on the track instead of one per pattern
    pub global: bool,
}

impl ControllerInfo {
    pub fn new(number: u32, name: impl Into<String>, default: i32, min: i32, max: i32, global: bool) -> Self {
        Self {
            number,
            name: name.into(),
            default,
            min,
            max,
            global,
        }
    }

    /// Full-range CC controller
    pub fn cc(number: u8, name: impl Into<String>) -> Self {
        Self::new(number as u32, name, 0, 0, 127, false)
    }

    /// Full-range pitch bend controller
    pub fn pitch_bend(name: impl Into<String>) -> Self {
        Self::new(PITCH_BEND, name, 0, -8192, 8191, false)
    }

    /// Valid controller number and a coherent range
    pub fn is_valid(&self) -> bool {
        (is_cc(self.number) || is_pbend(self.number))
            && self.min <= self.max
            && (self.min..=self.max).contains(&self.default)
    }

    pub fn accepts(&self, value: i32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}
